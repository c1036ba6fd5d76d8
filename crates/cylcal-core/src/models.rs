//! Camera matrix and lens distortion models.

use nalgebra::RealField;
use serde::{Deserialize, Serialize};

use crate::math::{Iso3, Mat3, Pt2, Pt3, Real};

/// Pixel dimensions of the calibration images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// Pinhole camera matrix parameters `fx, fy, cx, cy` (zero skew).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraMatrix {
    pub fx: Real,
    pub fy: Real,
    pub cx: Real,
    pub cy: Real,
}

impl CameraMatrix {
    /// Conventional seed for bundle adjustment: unit-less focal length of
    /// 1000 and the principal point at the image centre.
    pub fn initial_guess(size: ImageSize) -> Self {
        Self {
            fx: 1000.0,
            fy: 1000.0,
            cx: size.width as Real / 2.0,
            cy: size.height as Real / 2.0,
        }
    }

    /// Full 3×3 intrinsic matrix.
    pub fn k_matrix(&self) -> Mat3 {
        Mat3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Affine sensor mapping from normalized image-plane coordinates to
    /// pixels (the first two rows of `K` applied to `(x, y, 1)`).
    pub fn to_pixel(&self, n: &Pt2) -> Pt2 {
        Pt2::new(self.fx * n.x + self.cx, self.fy * n.y + self.cy)
    }

    /// Inverse of [`CameraMatrix::to_pixel`].
    pub fn to_normalized(&self, pixel: &Pt2) -> Pt2 {
        Pt2::new((pixel.x - self.cx) / self.fx, (pixel.y - self.cy) / self.fy)
    }
}

/// A lens distortion model acting on normalized image-plane coordinates.
pub trait DistortionModel<S: RealField + Copy> {
    fn distort(&self, n_undist: &nalgebra::Vector2<S>) -> nalgebra::Vector2<S>;
    fn undistort(&self, n_dist: &nalgebra::Vector2<S>) -> nalgebra::Vector2<S>;
}

/// No-op distortion.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct NoDistortion;

impl<S: RealField + Copy> DistortionModel<S> for NoDistortion {
    fn distort(&self, n_undist: &nalgebra::Vector2<S>) -> nalgebra::Vector2<S> {
        *n_undist
    }

    fn undistort(&self, n_dist: &nalgebra::Vector2<S>) -> nalgebra::Vector2<S> {
        *n_dist
    }
}

/// Rational distortion model with six radial and two tangential terms,
/// the "rational model" variant of Brown-Conrady.
///
/// `x_d = x·(1 + k1 r² + k2 r⁴ + k3 r⁶)/(1 + k4 r² + k5 r⁴ + k6 r⁶) + tangential`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Rational8<S: RealField> {
    pub k1: S,
    pub k2: S,
    pub k3: S,
    pub k4: S,
    pub k5: S,
    pub k6: S,
    pub p1: S,
    pub p2: S,
    /// Fixed-point iterations used by [`DistortionModel::undistort`].
    pub iters: u32,
}

impl<S: RealField + Copy> Rational8<S> {
    fn distort_impl(&self, x: S, y: S) -> (S, S) {
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;

        let num = S::one() + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let den = S::one() + self.k4 * r2 + self.k5 * r4 + self.k6 * r6;
        let radial = num / den;

        let two = S::one() + S::one();
        let xy = x * y;
        let x_tan = two * self.p1 * xy + self.p2 * (r2 + two * x * x);
        let y_tan = self.p1 * (r2 + two * y * y) + two * self.p2 * xy;

        (x * radial + x_tan, y * radial + y_tan)
    }
}

impl<S: RealField + Copy> DistortionModel<S> for Rational8<S> {
    fn distort(&self, n_undist: &nalgebra::Vector2<S>) -> nalgebra::Vector2<S> {
        let (xd, yd) = self.distort_impl(n_undist.x, n_undist.y);
        nalgebra::Vector2::new(xd, yd)
    }

    fn undistort(&self, n_dist: &nalgebra::Vector2<S>) -> nalgebra::Vector2<S> {
        let mut x = n_dist.x;
        let mut y = n_dist.y;

        let iters = if self.iters == 0 { 8 } else { self.iters };
        for _ in 0..iters {
            let (xd, yd) = self.distort_impl(x, y);
            x = x - (xd - n_dist.x);
            y = y - (yd - n_dist.y);
        }
        nalgebra::Vector2::new(x, y)
    }
}

/// Depth below which a camera-space point is treated as unprojectable.
pub const MIN_PROJECTION_DEPTH: Real = 1.0e-9;

/// Project a rig-frame point through pose, distortion, and camera matrix.
///
/// Returns `None` for points at or behind the camera plane.
pub fn project_point<D: DistortionModel<Real>>(
    cam_from_rig: &Iso3,
    k: &CameraMatrix,
    distortion: &D,
    pw: &Pt3,
) -> Option<Pt2> {
    let pc = cam_from_rig.transform_point(pw);
    if pc.z <= MIN_PROJECTION_DEPTH {
        return None;
    }
    let n = nalgebra::Vector2::new(pc.x / pc.z, pc.y / pc.z);
    let d = distortion.distort(&n);
    Some(k.to_pixel(&Pt2::new(d.x, d.y)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn initial_guess_centres_principal_point() {
        let k = CameraMatrix::initial_guess(ImageSize {
            width: 1280,
            height: 720,
        });
        assert_eq!(k.fx, 1000.0);
        assert_eq!(k.fy, 1000.0);
        assert_eq!(k.cx, 640.0);
        assert_eq!(k.cy, 360.0);
    }

    #[test]
    fn pixel_mapping_roundtrip() {
        let k = CameraMatrix {
            fx: 820.0,
            fy: 790.0,
            cx: 640.0,
            cy: 360.0,
        };
        let n = Pt2::new(0.12, -0.07);
        let back = k.to_normalized(&k.to_pixel(&n));
        assert_relative_eq!(back.x, n.x, epsilon = 1e-12);
        assert_relative_eq!(back.y, n.y, epsilon = 1e-12);
    }

    #[test]
    fn rational_zero_coeffs_is_identity() {
        let dist = Rational8::<Real>::default();
        let n = nalgebra::Vector2::new(0.3, -0.2);
        assert_eq!(dist.distort(&n), n);
    }

    #[test]
    fn rational_undistort_inverts_distort() {
        let dist = Rational8 {
            k1: -0.2,
            k2: 0.05,
            k3: 0.0,
            k4: -0.1,
            k5: 0.0,
            k6: 0.0,
            p1: 0.001,
            p2: -0.0005,
            iters: 20,
        };
        let n = nalgebra::Vector2::new(0.25, -0.15);
        let back = dist.undistort(&dist.distort(&n));
        assert_relative_eq!(back.x, n.x, epsilon = 1e-8);
        assert_relative_eq!(back.y, n.y, epsilon = 1e-8);
    }

    #[test]
    fn project_point_rejects_points_behind_camera() {
        let k = CameraMatrix::initial_guess(ImageSize {
            width: 640,
            height: 480,
        });
        let pose = Iso3::identity();
        let behind = Pt3::new(0.0, 0.0, -1.0);
        assert!(project_point(&pose, &k, &NoDistortion, &behind).is_none());
    }
}
