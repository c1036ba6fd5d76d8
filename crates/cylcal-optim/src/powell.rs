//! Derivative-free direction-set minimization.
//!
//! Powell's method with Brent line minimization: coordinate-wise line
//! searches with direction replacement, no gradients. This is the narrow
//! optimizer seam consumed by the distortion refiner; the strategy enum
//! exists so an equivalent search (e.g. Nelder-Mead) could be slotted in
//! without touching callers.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use cylcal_core::Real;

/// Search strategy for [`minimize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchMethod {
    /// Powell's direction-set method.
    #[default]
    Powell,
}

/// Options for the derivative-free minimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MinimizeOptions {
    /// Hard cap on outer iterations (full direction-set sweeps).
    pub max_iters: usize,
    /// Relative improvement threshold terminating the outer loop.
    pub convergence_tolerance: Real,
    /// Search strategy.
    pub method: SearchMethod,
    /// Log per-iteration cost at debug level.
    pub display_progress: bool,
}

impl Default for MinimizeOptions {
    fn default() -> Self {
        Self {
            max_iters: 1000,
            convergence_tolerance: 1e-8,
            method: SearchMethod::Powell,
            display_progress: false,
        }
    }
}

/// Outcome of a [`minimize`] run.
#[derive(Debug, Clone)]
pub struct MinimizeResult {
    pub x: DVector<Real>,
    pub fval: Real,
    pub iters: usize,
    /// False when the iteration cap was hit before the convergence test
    /// passed; the caller decides whether that is an error.
    pub success: bool,
}

const GOLD: Real = 1.618_034;
const GROW_LIMIT: Real = 100.0;
const CGOLD: Real = 0.381_966_0;
const TINY: Real = 1e-25;
const ZEPS: Real = 1e-12;
const LINE_TOL: Real = 1e-8;
const LINE_MAX_ITERS: usize = 100;

/// Bracket a minimum of `f` starting from the interval `[a, b]`.
///
/// Returns `(a, b, c, fa, fb, fc)` with `b` between `a` and `c` and
/// `f(b) <= min(f(a), f(c))`.
fn bracket(f: &mut impl FnMut(Real) -> Real, mut ax: Real, mut bx: Real) -> (Real, Real, Real, Real, Real, Real) {
    let mut fa = f(ax);
    let mut fb = f(bx);
    if fb > fa {
        std::mem::swap(&mut ax, &mut bx);
        std::mem::swap(&mut fa, &mut fb);
    }
    let mut cx = bx + GOLD * (bx - ax);
    let mut fc = f(cx);

    while fb > fc {
        let r = (bx - ax) * (fb - fc);
        let q = (bx - cx) * (fb - fa);
        let denom = 2.0 * (q - r).abs().max(TINY) * (q - r).signum();
        let mut u = bx - ((bx - cx) * q - (bx - ax) * r) / denom;
        let ulim = bx + GROW_LIMIT * (cx - bx);
        let mut fu;

        if (bx - u) * (u - cx) > 0.0 {
            // Parabolic candidate between b and c.
            fu = f(u);
            if fu < fc {
                return (bx, u, cx, fb, fu, fc);
            } else if fu > fb {
                return (ax, bx, u, fa, fb, fu);
            }
            u = cx + GOLD * (cx - bx);
            fu = f(u);
        } else if (cx - u) * (u - ulim) > 0.0 {
            fu = f(u);
            if fu < fc {
                bx = cx;
                cx = u;
                u = cx + GOLD * (cx - bx);
                fb = fc;
                fc = fu;
                fu = f(u);
            }
        } else if (u - ulim) * (ulim - cx) >= 0.0 {
            u = ulim;
            fu = f(u);
        } else {
            u = cx + GOLD * (cx - bx);
            fu = f(u);
        }

        ax = bx;
        bx = cx;
        cx = u;
        fa = fb;
        fb = fc;
        fc = fu;
    }
    (ax, bx, cx, fa, fb, fc)
}

/// Brent's parabolic-interpolation line minimization on a bracketed minimum.
fn brent(
    f: &mut impl FnMut(Real) -> Real,
    ax: Real,
    bx: Real,
    cx: Real,
    fb: Real,
) -> (Real, Real) {
    let mut a = ax.min(cx);
    let mut b = ax.max(cx);
    let mut x = bx;
    let mut w = bx;
    let mut v = bx;
    let mut fx = fb;
    let mut fw = fx;
    let mut fv = fx;
    let mut d: Real = 0.0;
    let mut e: Real = 0.0;

    for _ in 0..LINE_MAX_ITERS {
        let xm = 0.5 * (a + b);
        let tol1 = LINE_TOL * x.abs() + ZEPS;
        let tol2 = 2.0 * tol1;
        if (x - xm).abs() <= tol2 - 0.5 * (b - a) {
            break;
        }

        let mut use_golden = true;
        if e.abs() > tol1 {
            // Trial parabolic fit through x, v, w.
            let r = (x - w) * (fx - fv);
            let q = (x - v) * (fx - fw);
            let mut p = (x - v) * q - (x - w) * r;
            let mut q2 = 2.0 * (q - r);
            if q2 > 0.0 {
                p = -p;
            }
            q2 = q2.abs();
            let etemp = e;
            e = d;
            if p.abs() < (0.5 * q2 * etemp).abs() && p > q2 * (a - x) && p < q2 * (b - x) {
                d = p / q2;
                let u = x + d;
                if u - a < tol2 || b - u < tol2 {
                    d = tol1.copysign(xm - x);
                }
                use_golden = false;
            }
        }
        if use_golden {
            e = if x >= xm { a - x } else { b - x };
            d = CGOLD * e;
        }

        let u = if d.abs() >= tol1 {
            x + d
        } else {
            x + tol1.copysign(d)
        };
        let fu = f(u);

        if fu <= fx {
            if u >= x {
                a = x;
            } else {
                b = x;
            }
            v = w;
            w = x;
            x = u;
            fv = fw;
            fw = fx;
            fx = fu;
        } else {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu <= fw || w == x {
                v = w;
                w = u;
                fv = fw;
                fw = fu;
            } else if fu <= fv || v == x || v == w {
                v = u;
                fv = fu;
            }
        }
    }
    (x, fx)
}

/// Minimize `f` along `x + α·dir`, updating `x` in place. Returns the new
/// function value.
fn line_minimize(
    f: &mut impl FnMut(&DVector<Real>) -> Real,
    x: &mut DVector<Real>,
    dir: &DVector<Real>,
) -> Real {
    let base = x.clone();
    let mut f1d = |alpha: Real| f(&(&base + dir * alpha));
    let (ax, bx, cx, _fa, fb, _fc) = bracket(&mut f1d, 0.0, 1.0);
    let (alpha, fmin) = brent(&mut f1d, ax, bx, cx, fb);
    *x = base + dir * alpha;
    fmin
}

/// Minimize a scalar cost over an n-dimensional parameter vector without
/// derivatives, starting from `x0`.
///
/// Returns `success = false` (rather than an error) when the iteration cap
/// is reached; callers map that onto their own failure policy.
pub fn minimize(
    mut f: impl FnMut(&DVector<Real>) -> Real,
    x0: DVector<Real>,
    opts: &MinimizeOptions,
) -> MinimizeResult {
    match opts.method {
        SearchMethod::Powell => powell(&mut f, x0, opts),
    }
}

fn powell(
    f: &mut impl FnMut(&DVector<Real>) -> Real,
    x0: DVector<Real>,
    opts: &MinimizeOptions,
) -> MinimizeResult {
    let n = x0.len();
    let mut x = x0;
    let mut fret = f(&x);

    // Initial direction set: the coordinate basis.
    let mut dirs: Vec<DVector<Real>> = (0..n)
        .map(|i| {
            let mut d = DVector::zeros(n);
            d[i] = 1.0;
            d
        })
        .collect();

    for iter in 0..opts.max_iters {
        let f_start = fret;
        let x_start = x.clone();
        let mut biggest_drop = 0.0;
        let mut biggest_dir = 0;

        for (i, dir) in dirs.iter().enumerate() {
            let f_before = fret;
            fret = line_minimize(f, &mut x, dir);
            if f_before - fret > biggest_drop {
                biggest_drop = f_before - fret;
                biggest_dir = i;
            }
        }

        if opts.display_progress {
            log::debug!("powell iter {iter}: cost {fret:.6e}");
        }

        if 2.0 * (f_start - fret) <= opts.convergence_tolerance * (f_start.abs() + fret.abs()) + TINY
        {
            return MinimizeResult {
                x,
                fval: fret,
                iters: iter + 1,
                success: true,
            };
        }

        // Powell's update: consider replacing the direction of largest
        // decrease with the average sweep direction.
        let sweep: DVector<Real> = &x - &x_start;
        let extrapolated = &x + &sweep;
        let f_extrap = f(&extrapolated);
        if f_extrap < f_start {
            let t = 2.0 * (f_start - 2.0 * fret + f_extrap)
                * (f_start - fret - biggest_drop).powi(2)
                - biggest_drop * (f_start - f_extrap).powi(2);
            if t < 0.0 {
                fret = line_minimize(f, &mut x, &sweep);
                dirs[biggest_dir] = dirs[n - 1].clone();
                dirs[n - 1] = sweep;
            }
        }
    }

    MinimizeResult {
        x,
        fval: fret,
        iters: opts.max_iters,
        success: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn minimizes_a_shifted_quadratic() {
        let target = DVector::from_vec(vec![1.5, -2.0, 0.25]);
        let t = target.clone();
        let result = minimize(
            move |x: &DVector<Real>| (x - &t).norm_squared(),
            DVector::zeros(3),
            &MinimizeOptions::default(),
        );
        assert!(result.success);
        for i in 0..3 {
            assert_relative_eq!(result.x[i], target[i], epsilon = 1e-5);
        }
        assert!(result.fval < 1e-10);
    }

    #[test]
    fn minimizes_rosenbrock_in_two_dims() {
        let rosenbrock = |x: &DVector<Real>| {
            let a = 1.0 - x[0];
            let b = x[1] - x[0] * x[0];
            a * a + 100.0 * b * b
        };
        let result = minimize(rosenbrock, DVector::zeros(2), &MinimizeOptions::default());
        assert!(result.success);
        assert_relative_eq!(result.x[0], 1.0, epsilon = 1e-4);
        assert_relative_eq!(result.x[1], 1.0, epsilon = 1e-4);
    }

    #[test]
    fn reports_failure_when_capped() {
        let rosenbrock = |x: &DVector<Real>| {
            let a = 1.0 - x[0];
            let b = x[1] - x[0] * x[0];
            a * a + 100.0 * b * b
        };
        let opts = MinimizeOptions {
            max_iters: 1,
            convergence_tolerance: 1e-16,
            ..Default::default()
        };
        let result = minimize(rosenbrock, DVector::from_vec(vec![-3.0, 4.0]), &opts);
        assert!(!result.success);
        assert_eq!(result.iters, 1);
    }

    #[test]
    fn already_minimal_point_converges_immediately() {
        let result = minimize(
            |x: &DVector<Real>| x.norm_squared(),
            DVector::zeros(4),
            &MinimizeOptions::default(),
        );
        assert!(result.success);
        assert!(result.fval.abs() < 1e-20);
    }
}
