//! 2×10 polynomial distortion warp.
//!
//! The warp maps normalized image-plane coordinates to distorted
//! coordinates through a full bicubic monomial basis:
//!
//! `d(x, y) = M · [1, x, y, x², y², x³, y³, xy, xy², x²y]ᵀ`
//!
//! with `M ∈ ℝ²ˣ¹⁰`, flattened row-major into 20 parameters. This is
//! strictly richer than a radial/tangential model: it can bend the two axes
//! independently, which is what the wrapped rig pattern needs.

use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};

use cylcal_core::{Iso3, Pt2, Pt3, Real};

/// Number of free parameters of the warp.
pub const WARP_PARAMS: usize = 20;
/// Monomials in the warp basis.
pub const WARP_BASIS: usize = 10;

/// The 2×10 coefficient matrix of the polynomial warp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolyWarp {
    coeffs: SMatrix<Real, 2, WARP_BASIS>,
}

impl Default for PolyWarp {
    fn default() -> Self {
        Self::zero()
    }
}

impl PolyWarp {
    /// The all-zero warp: every input collapses to the origin. This is the
    /// optimizer seed, not a usable distortion model.
    pub fn zero() -> Self {
        Self {
            coeffs: SMatrix::zeros(),
        }
    }

    /// The identity warp, `d(x, y) = (x, y)`: unit weight on the linear
    /// monomials, zero elsewhere.
    pub fn identity() -> Self {
        let mut coeffs = SMatrix::<Real, 2, WARP_BASIS>::zeros();
        coeffs[(0, 1)] = 1.0;
        coeffs[(1, 2)] = 1.0;
        Self { coeffs }
    }

    /// Build from the flat row-major 20-parameter vector.
    pub fn from_params(params: &[Real; WARP_PARAMS]) -> Self {
        let mut coeffs = SMatrix::<Real, 2, WARP_BASIS>::zeros();
        for row in 0..2 {
            for col in 0..WARP_BASIS {
                coeffs[(row, col)] = params[row * WARP_BASIS + col];
            }
        }
        Self { coeffs }
    }

    /// Flatten to the row-major 20-parameter vector.
    pub fn params(&self) -> [Real; WARP_PARAMS] {
        let mut out = [0.0; WARP_PARAMS];
        for row in 0..2 {
            for col in 0..WARP_BASIS {
                out[row * WARP_BASIS + col] = self.coeffs[(row, col)];
            }
        }
        out
    }

    /// Monomial basis vector `[1, x, y, x², y², x³, y³, xy, xy², x²y]`.
    pub fn basis(x: Real, y: Real) -> SVector<Real, WARP_BASIS> {
        SVector::<Real, WARP_BASIS>::from_column_slice(&[
            1.0,
            x,
            y,
            x * x,
            y * y,
            x * x * x,
            y * y * y,
            x * y,
            x * y * y,
            x * x * y,
        ])
    }

    /// Apply the warp to a normalized image-plane point.
    pub fn apply(&self, n: &Pt2) -> Pt2 {
        let d = self.coeffs * Self::basis(n.x, n.y);
        Pt2::new(d.x, d.y)
    }
}

/// Depth epsilon shared with the bundle-adjustment factors.
const DEPTH_EPS: Real = 1.0e-9;

/// Project rig-frame points through pose, warp, and camera matrix.
///
/// The pipeline mirrors the physical image formation: homogenize, transform
/// by `[R|t]`, perspective-divide by camera-space depth, apply the warp in
/// normalized coordinates, then map to pixels with the first two rows of `K`.
pub fn project_with_warp(
    points: &[Pt3],
    cam_from_rig: &Iso3,
    k: &cylcal_core::CameraMatrix,
    warp: &PolyWarp,
) -> Vec<Pt2> {
    points
        .iter()
        .map(|pw| {
            let pc = cam_from_rig.transform_point(pw);
            let z = pc.z + DEPTH_EPS;
            let n = Pt2::new(pc.x / z, pc.y / z);
            k.to_pixel(&warp.apply(&n))
        })
        .collect()
}

/// RMS reprojection error in pixels: `‖observed − computed‖ / √N`.
///
/// The single error convention shared by every refinement pass.
pub fn rms_error(observed: &[Pt2], computed: &[Pt2]) -> Real {
    debug_assert_eq!(observed.len(), computed.len());
    if observed.is_empty() {
        return 0.0;
    }
    let ss: Real = observed
        .iter()
        .zip(computed)
        .map(|(o, c)| {
            let dx = o.x - c.x;
            let dy = o.y - c.y;
            dx * dx + dy * dy
        })
        .sum();
    (ss / observed.len() as Real).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cylcal_core::CameraMatrix;

    #[test]
    fn params_roundtrip_row_major() {
        let mut params = [0.0; WARP_PARAMS];
        for (i, p) in params.iter_mut().enumerate() {
            *p = i as Real * 0.01 - 0.07;
        }
        let warp = PolyWarp::from_params(&params);
        assert_eq!(warp.params(), params);
    }

    #[test]
    fn identity_warp_is_a_no_op() {
        let warp = PolyWarp::identity();
        let n = Pt2::new(0.31, -0.17);
        let d = warp.apply(&n);
        assert_relative_eq!(d.x, n.x, epsilon = 1e-15);
        assert_relative_eq!(d.y, n.y, epsilon = 1e-15);
    }

    #[test]
    fn identity_warp_reproduces_pinhole_projection() {
        let k = CameraMatrix {
            fx: 900.0,
            fy: 880.0,
            cx: 512.0,
            cy: 384.0,
        };
        let pose = Iso3::translation(0.0, 0.0, 100.0);
        let points = vec![Pt3::new(5.0, -3.0, 20.0), Pt3::new(-2.0, 7.0, 0.0)];

        let warped = project_with_warp(&points, &pose, &k, &PolyWarp::identity());
        for (pw, uv) in points.iter().zip(&warped) {
            let pc = pose.transform_point(pw);
            let expected = Pt2::new(k.fx * pc.x / pc.z + k.cx, k.fy * pc.y / pc.z + k.cy);
            assert_relative_eq!(uv.x, expected.x, epsilon = 1e-6);
            assert_relative_eq!(uv.y, expected.y, epsilon = 1e-6);
        }
    }

    #[test]
    fn basis_matches_monomials() {
        let b = PolyWarp::basis(2.0, 3.0);
        let expected = [1.0, 2.0, 3.0, 4.0, 9.0, 8.0, 27.0, 6.0, 18.0, 12.0];
        for (got, want) in b.iter().zip(expected.iter()) {
            assert_relative_eq!(got, want);
        }
    }

    #[test]
    fn rms_error_of_identical_sets_is_zero() {
        let pts = vec![Pt2::new(1.0, 2.0), Pt2::new(3.0, 4.0)];
        assert_eq!(rms_error(&pts, &pts.clone()), 0.0);
    }

    #[test]
    fn rms_error_is_root_mean_square() {
        // Two points each off by (3, 4): per-point distance 5, RMS 5.
        let obs = vec![Pt2::new(0.0, 0.0), Pt2::new(10.0, 10.0)];
        let comp = vec![Pt2::new(3.0, 4.0), Pt2::new(13.0, 14.0)];
        assert_relative_eq!(rms_error(&obs, &comp), 5.0, epsilon = 1e-12);
    }
}
