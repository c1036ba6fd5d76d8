//! Reprojection residual factors for tiny-solver.

use nalgebra::{DVector, RealField, Vector3};
use tiny_solver::factors::Factor;
use tiny_solver::manifold::se3::SE3;

use cylcal_core::{Pt2, Pt3};

/// Single-point reprojection residual with rational distortion.
///
/// Parameter blocks: `cam = [fx, fy, cx, cy]`,
/// `dist = [k1, k2, k3, k4, k5, k6, p1, p2]`, `pose` as a 7D SE(3) vector.
#[derive(Debug, Clone)]
pub struct RationalReprojFactor {
    pub pw: Pt3,
    pub uv: Pt2,
}

/// Depth epsilon keeping the perspective divide differentiable near z = 0.
const DEPTH_EPS: f64 = 1.0e-9;

impl RationalReprojFactor {
    fn residual_generic<T: RealField>(
        &self,
        cam: &DVector<T>,
        dist: &DVector<T>,
        pose: &DVector<T>,
    ) -> DVector<T> {
        debug_assert!(cam.len() == 4, "camera block must have 4 params");
        debug_assert!(dist.len() == 8, "distortion block must have 8 params");
        debug_assert!(pose.len() == 7, "pose block must have 7 params");

        let se3 = SE3::<T>::from_vec(pose.as_view());
        let pw_t = Vector3::new(
            T::from_f64(self.pw.x).unwrap(),
            T::from_f64(self.pw.y).unwrap(),
            T::from_f64(self.pw.z).unwrap(),
        );
        let pc = se3 * pw_t.as_view();

        let z = pc.z.clone() + T::from_f64(DEPTH_EPS).unwrap();
        let x = pc.x.clone() / z.clone();
        let y = pc.y.clone() / z;

        // Rational radial term plus tangential terms.
        let r2 = x.clone() * x.clone() + y.clone() * y.clone();
        let r4 = r2.clone() * r2.clone();
        let r6 = r4.clone() * r2.clone();
        let num = T::one()
            + dist[0].clone() * r2.clone()
            + dist[1].clone() * r4.clone()
            + dist[2].clone() * r6.clone();
        let den = T::one()
            + dist[3].clone() * r2.clone()
            + dist[4].clone() * r4.clone()
            + dist[5].clone() * r6;
        let radial = num / den;

        let two = T::from_f64(2.0).unwrap();
        let p1 = dist[6].clone();
        let p2 = dist[7].clone();
        let xy = x.clone() * y.clone();
        let xd = x.clone() * radial.clone()
            + two.clone() * p1.clone() * xy.clone()
            + p2.clone() * (r2.clone() + two.clone() * x.clone() * x.clone());
        let yd = y.clone() * radial
            + p1 * (r2 + two.clone() * y.clone() * y.clone())
            + two * p2 * xy;

        let u = cam[0].clone() * xd + cam[2].clone();
        let v = cam[1].clone() * yd + cam[3].clone();

        let ru = T::from_f64(self.uv.x).unwrap() - u;
        let rv = T::from_f64(self.uv.y).unwrap() - v;
        nalgebra::dvector![ru, rv]
    }
}

impl<T: RealField> Factor<T> for RationalReprojFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        debug_assert_eq!(params.len(), 3, "expected [cam, dist, pose] blocks");
        self.residual_generic(&params[0], &params[1], &params[2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cylcal_core::{project_point, CameraMatrix, Iso3, Rational8};

    #[test]
    fn residual_is_zero_at_the_ground_truth() {
        let k = CameraMatrix {
            fx: 850.0,
            fy: 830.0,
            cx: 640.0,
            cy: 360.0,
        };
        let dist = Rational8 {
            k1: -0.1,
            k2: 0.02,
            k4: -0.05,
            p1: 0.001,
            p2: -0.0004,
            iters: 8,
            ..Default::default()
        };
        let pose = Iso3::translation(2.0, -1.0, 120.0);
        let pw = Pt3::new(10.0, 5.0, 3.0);
        let uv = project_point(&pose, &k, &dist, &pw).unwrap();

        let factor = RationalReprojFactor { pw, uv };
        let cam = nalgebra::dvector![k.fx, k.fy, k.cx, k.cy];
        let dvec = nalgebra::dvector![
            dist.k1, dist.k2, dist.k3, dist.k4, dist.k5, dist.k6, dist.p1, dist.p2
        ];
        let q = pose.rotation.into_inner();
        let t = pose.translation.vector;
        let pose_vec = nalgebra::dvector![
            q.coords[0],
            q.coords[1],
            q.coords[2],
            q.coords[3],
            t.x,
            t.y,
            t.z
        ];

        let r = factor.residual_generic(&cam, &dvec, &pose_vec);
        assert_relative_eq!(r[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(r[1], 0.0, epsilon = 1e-6);
    }
}
