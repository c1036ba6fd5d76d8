//! Intrinsic bundle adjustment.
//!
//! Estimates the camera matrix, a rational distortion vector, and one pose
//! per image from the full correspondence set. Poses are seeded by DLT PnP
//! against a conventional initial camera-matrix guess, then everything is
//! refined jointly by Levenberg-Marquardt through tiny-solver. Parameter
//! standard deviations come from the residual covariance at the solution.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use nalgebra::{DMatrix, DVector, Quaternion, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tiny_solver::manifold::se3::SE3Manifold;
use tiny_solver::optimizer::{Optimizer, OptimizerOptions};
use tiny_solver::problem::Problem;
use tiny_solver::LevenbergMarquardtOptimizer;

use cylcal_core::{
    project_point, CalibError, CameraMatrix, CorrespondenceView, ImageSize, Iso3, Rational8, Real,
};

use crate::factors::RationalReprojFactor;
use crate::pnp::dlt_pose;

/// Options for the intrinsic bundle adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntrinsicSolveOptions {
    /// Maximum LM iterations.
    pub max_iters: usize,
    /// tiny-solver verbosity level.
    pub verbosity: usize,
    /// Minimum number of usable images; fewer is numerically
    /// ill-conditioned and rejected before solving.
    pub min_images: usize,
    /// Minimum correspondences per image (the DLT seed needs 6).
    pub min_points_per_image: usize,
    /// Skip the (costly) standard-deviation estimation.
    pub skip_std_deviations: bool,
}

impl Default for IntrinsicSolveOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            verbosity: 0,
            min_images: 1,
            min_points_per_image: 6,
            skip_std_deviations: false,
        }
    }
}

/// Output of [`calibrate_intrinsics`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrinsicsResult {
    pub camera_matrix: CameraMatrix,
    pub distortion: Rational8<Real>,
    /// One pose per input view, same order.
    pub cam_from_rig: Vec<Iso3>,
    /// Per-view RMS reprojection error in pixels.
    pub per_view_errors: Vec<Real>,
    /// RMS reprojection error over all points of all views.
    pub overall_error: Real,
    /// Standard deviations of `[fx, fy, cx, cy, k1..k6, p1, p2]`.
    /// Empty when estimation was skipped or under-determined.
    pub std_intrinsics: Vec<Real>,
    /// Standard deviations of `[wx, wy, wz, tx, ty, tz]` per view, flattened.
    pub std_extrinsics: Vec<Real>,
}

/// Pack an `Iso3` into tiny-solver's 7D SE(3) vector `[qx, qy, qz, qw, t]`.
fn iso3_to_pose_dvec(pose: &Iso3) -> DVector<Real> {
    let q = pose.rotation.into_inner();
    let t = pose.translation.vector;
    nalgebra::dvector![q.coords[0], q.coords[1], q.coords[2], q.coords[3], t.x, t.y, t.z]
}

fn pose_dvec_to_iso3(v: &DVector<Real>) -> Result<Iso3> {
    if v.len() != 7 {
        anyhow::bail!("expected se3 vector of length 7, got {}", v.len());
    }
    let quat = Quaternion::new(v[3], v[0], v[1], v[2]);
    let rot = UnitQuaternion::from_quaternion(quat);
    Ok(Iso3::from_parts(Translation3::new(v[4], v[5], v[6]), rot))
}

fn distortion_to_dvec(d: &Rational8<Real>) -> DVector<Real> {
    nalgebra::dvector![d.k1, d.k2, d.k3, d.k4, d.k5, d.k6, d.p1, d.p2]
}

fn distortion_from_dvec(v: &DVector<Real>) -> Rational8<Real> {
    Rational8 {
        k1: v[0],
        k2: v[1],
        k3: v[2],
        k4: v[3],
        k5: v[4],
        k6: v[5],
        p1: v[6],
        p2: v[7],
        iters: 8,
    }
}

fn solve_lm(
    problem: &Problem,
    initial: HashMap<String, DVector<Real>>,
    opts: &IntrinsicSolveOptions,
) -> Result<HashMap<String, DVector<Real>>> {
    let optimizer = LevenbergMarquardtOptimizer::default();
    let options = OptimizerOptions {
        max_iteration: opts.max_iters,
        verbosity_level: opts.verbosity,
        ..OptimizerOptions::default()
    };
    optimizer
        .optimize(problem, &initial, Some(options))
        .ok_or_else(|| anyhow!("levenberg-marquardt failed to converge"))
}

/// Calibrate intrinsics, distortion, and per-view poses from all views.
///
/// Precondition checks fail fast instead of producing a silently unstable
/// solution: the caller gets `CorrespondenceEmpty` for an undersized view
/// and `IntrinsicCalibrationFailure` when the whole problem is too small or
/// the solver does not converge.
pub fn calibrate_intrinsics(
    views: &[CorrespondenceView],
    image_size: ImageSize,
    opts: &IntrinsicSolveOptions,
) -> Result<IntrinsicsResult, CalibError> {
    if views.len() < opts.min_images.max(1) {
        return Err(CalibError::IntrinsicCalibrationFailure {
            num_images: views.len(),
            reason: format!("need at least {} usable image(s)", opts.min_images.max(1)),
        });
    }
    for (idx, view) in views.iter().enumerate() {
        let min = opts.min_points_per_image.max(6);
        if view.len() < min {
            return Err(CalibError::CorrespondenceEmpty {
                image: format!("view {idx}"),
                got: view.len(),
                min,
            });
        }
    }

    let k0 = CameraMatrix::initial_guess(image_size);

    // Linear pose seeds against the guessed camera matrix.
    let mut pose_seeds = Vec::with_capacity(views.len());
    for (idx, view) in views.iter().enumerate() {
        let pose = dlt_pose(&view.points_3d, &view.points_2d, &k0).map_err(|err| {
            CalibError::IntrinsicCalibrationFailure {
                num_images: views.len(),
                reason: format!("pose initialization failed for view {idx}: {err}"),
            }
        })?;
        pose_seeds.push(pose);
    }

    let fail = |reason: String| CalibError::IntrinsicCalibrationFailure {
        num_images: views.len(),
        reason,
    };

    // Bundle adjustment over cam, dist, and all poses.
    let mut problem = Problem::new();
    let mut initial: HashMap<String, DVector<Real>> = HashMap::new();
    initial.insert(
        "cam".to_string(),
        nalgebra::dvector![k0.fx, k0.fy, k0.cx, k0.cy],
    );
    initial.insert(
        "dist".to_string(),
        distortion_to_dvec(&Rational8::default()),
    );

    for (view_idx, view) in views.iter().enumerate() {
        let pose_key = format!("pose/{view_idx}");
        initial.insert(pose_key.clone(), iso3_to_pose_dvec(&pose_seeds[view_idx]));
        problem.set_variable_manifold(&pose_key, Arc::new(SE3Manifold));

        for (pw, uv) in view.points_3d.iter().zip(view.points_2d.iter()) {
            let factor = RationalReprojFactor { pw: *pw, uv: *uv };
            problem.add_residual_block(
                2,
                &["cam", "dist", pose_key.as_str()],
                Box::new(factor),
                None,
            );
        }
    }

    let solution = solve_lm(&problem, initial, opts).map_err(|err| fail(err.to_string()))?;

    let cam_vec = solution
        .get("cam")
        .ok_or_else(|| fail("missing camera block in solution".to_string()))?;
    let camera_matrix = CameraMatrix {
        fx: cam_vec[0],
        fy: cam_vec[1],
        cx: cam_vec[2],
        cy: cam_vec[3],
    };
    let dist_vec = solution
        .get("dist")
        .ok_or_else(|| fail("missing distortion block in solution".to_string()))?;
    let distortion = distortion_from_dvec(dist_vec);

    let mut poses = Vec::with_capacity(views.len());
    for idx in 0..views.len() {
        let key = format!("pose/{idx}");
        let pose_vec = solution
            .get(&key)
            .ok_or_else(|| fail(format!("missing pose {idx} in solution")))?;
        poses.push(pose_dvec_to_iso3(pose_vec).map_err(|err| fail(err.to_string()))?);
    }

    if !camera_matrix.fx.is_finite() || !camera_matrix.fy.is_finite() {
        return Err(fail("solver produced non-finite intrinsics".to_string()));
    }

    // Per-view and overall RMS errors with the calibrated model.
    let mut per_view_errors = Vec::with_capacity(views.len());
    let mut total_ss = 0.0;
    let mut total_points = 0usize;
    for (view, pose) in views.iter().zip(&poses) {
        let mut ss = 0.0;
        for (pw, uv) in view.points_3d.iter().zip(view.points_2d.iter()) {
            let computed = project_point(pose, &camera_matrix, &distortion, pw)
                .unwrap_or(cylcal_core::Pt2::new(Real::INFINITY, Real::INFINITY));
            let dx = uv.x - computed.x;
            let dy = uv.y - computed.y;
            ss += dx * dx + dy * dy;
        }
        per_view_errors.push((ss / view.len() as Real).sqrt());
        total_ss += ss;
        total_points += view.len();
    }
    let overall_error = (total_ss / total_points as Real).sqrt();

    let (std_intrinsics, std_extrinsics) = if opts.skip_std_deviations {
        (Vec::new(), Vec::new())
    } else {
        std_deviations(views, &camera_matrix, &distortion, &poses)
    };

    log::info!(
        "intrinsic calibration over {} views: overall rms {:.4} px",
        views.len(),
        overall_error
    );

    Ok(IntrinsicsResult {
        camera_matrix,
        distortion,
        cam_from_rig: poses,
        per_view_errors,
        overall_error,
        std_intrinsics,
        std_extrinsics,
    })
}

/// Number of shared parameters: 4 intrinsics + 8 distortion coefficients.
const SHARED_PARAMS: usize = 12;
/// Local pose parameters: rotation vector + translation.
const POSE_PARAMS: usize = 6;

fn stacked_residuals(
    views: &[CorrespondenceView],
    k: &CameraMatrix,
    dist: &Rational8<Real>,
    poses: &[Iso3],
) -> DVector<Real> {
    let m: usize = views.iter().map(|v| v.len()).sum();
    let mut r = DVector::zeros(2 * m);
    let mut row = 0;
    for (view, pose) in views.iter().zip(poses) {
        for (pw, uv) in view.points_3d.iter().zip(view.points_2d.iter()) {
            let computed = project_point(pose, k, dist, pw)
                .unwrap_or(cylcal_core::Pt2::new(Real::INFINITY, Real::INFINITY));
            r[row] = uv.x - computed.x;
            r[row + 1] = uv.y - computed.y;
            row += 2;
        }
    }
    r
}

/// Apply a stacked parameter perturbation to the solution.
///
/// Layout: `[fx, fy, cx, cy, k1..k6, p1, p2]` followed by
/// `[wx, wy, wz, tx, ty, tz]` per view; rotations perturb on the left.
fn apply_delta(
    k: &CameraMatrix,
    dist: &Rational8<Real>,
    poses: &[Iso3],
    delta: &DVector<Real>,
) -> (CameraMatrix, Rational8<Real>, Vec<Iso3>) {
    let k2 = CameraMatrix {
        fx: k.fx + delta[0],
        fy: k.fy + delta[1],
        cx: k.cx + delta[2],
        cy: k.cy + delta[3],
    };
    let d2 = Rational8 {
        k1: dist.k1 + delta[4],
        k2: dist.k2 + delta[5],
        k3: dist.k3 + delta[6],
        k4: dist.k4 + delta[7],
        k5: dist.k5 + delta[8],
        k6: dist.k6 + delta[9],
        p1: dist.p1 + delta[10],
        p2: dist.p2 + delta[11],
        iters: dist.iters,
    };
    let mut poses2 = Vec::with_capacity(poses.len());
    for (i, pose) in poses.iter().enumerate() {
        let base = SHARED_PARAMS + POSE_PARAMS * i;
        let w = Vector3::new(delta[base], delta[base + 1], delta[base + 2]);
        let dt = Vector3::new(delta[base + 3], delta[base + 4], delta[base + 5]);
        let rot = UnitQuaternion::from_scaled_axis(w) * pose.rotation;
        let trans = Translation3::from(pose.translation.vector + dt);
        poses2.push(Iso3::from_parts(trans, rot));
    }
    (k2, d2, poses2)
}

/// Parameter standard deviations from the residual covariance.
///
/// Central-difference Jacobian, `σ² = RSS / (2m − p)`, covariance from the
/// pseudo-inverse of `JᵀJ`. Returns empty vectors for under-determined
/// problems instead of fabricating numbers.
fn std_deviations(
    views: &[CorrespondenceView],
    k: &CameraMatrix,
    dist: &Rational8<Real>,
    poses: &[Iso3],
) -> (Vec<Real>, Vec<Real>) {
    let m: usize = views.iter().map(|v| v.len()).sum();
    let rows = 2 * m;
    let num_params = SHARED_PARAMS + POSE_PARAMS * poses.len();
    if rows <= num_params {
        log::warn!(
            "too few residuals ({rows}) for {num_params} parameters; \
             skipping standard-deviation estimation"
        );
        return (Vec::new(), Vec::new());
    }

    let r0 = stacked_residuals(views, k, dist, poses);
    let mut jacobian = DMatrix::<Real>::zeros(rows, num_params);
    let mut delta = DVector::<Real>::zeros(num_params);
    for j in 0..num_params {
        let h = 1e-6;
        delta[j] = h;
        let (kp, dp, pp) = apply_delta(k, dist, poses, &delta);
        let r_plus = stacked_residuals(views, &kp, &dp, &pp);
        delta[j] = -h;
        let (km, dm, pm) = apply_delta(k, dist, poses, &delta);
        let r_minus = stacked_residuals(views, &km, &dm, &pm);
        delta[j] = 0.0;

        for row in 0..rows {
            jacobian[(row, j)] = (r_plus[row] - r_minus[row]) / (2.0 * h);
        }
    }

    let sigma2 = r0.norm_squared() / (rows - num_params) as Real;
    let jtj = jacobian.transpose() * &jacobian;
    let Ok(cov) = jtj.pseudo_inverse(1e-12) else {
        log::warn!("JᵀJ pseudo-inverse failed; skipping standard deviations");
        return (Vec::new(), Vec::new());
    };

    let stds: Vec<Real> = (0..num_params)
        .map(|i| (cov[(i, i)] * sigma2).max(0.0).sqrt())
        .collect();
    (
        stds[..SHARED_PARAMS].to_vec(),
        stds[SHARED_PARAMS..].to_vec(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use cylcal_core::correspondence::build_correspondences;
    use cylcal_core::synthetic::{project_detection, ring_pose};
    use cylcal_core::CylinderRig;

    fn synthetic_views(
        k: &CameraMatrix,
        dist: &Rational8<Real>,
        size: ImageSize,
        azimuths: &[Real],
    ) -> Vec<CorrespondenceView> {
        let rig = CylinderRig::new(16, 10, 110.0, 50.0).unwrap();
        let cloud = rig.corner_cloud();
        azimuths
            .iter()
            .map(|&az| {
                let pose = ring_pose(300.0, 55.0, az);
                let detection = project_detection(&cloud, &pose, k, dist, size);
                build_correspondences(&cloud, &detection)
            })
            .collect()
    }

    #[test]
    fn recovers_a_synthetic_camera() {
        let size = ImageSize {
            width: 1280,
            height: 960,
        };
        let k_gt = CameraMatrix {
            fx: 1100.0,
            fy: 1080.0,
            cx: 650.0,
            cy: 470.0,
        };
        let dist_gt = Rational8 {
            k1: -0.08,
            k2: 0.01,
            p1: 0.0005,
            p2: -0.0003,
            iters: 8,
            ..Default::default()
        };
        let views = synthetic_views(&k_gt, &dist_gt, size, &[0.0, 0.9, 2.1, 3.5, 4.8]);
        assert!(views.iter().all(|v| v.len() >= 6));

        let opts = IntrinsicSolveOptions {
            skip_std_deviations: true,
            ..Default::default()
        };
        let result = calibrate_intrinsics(&views, size, &opts).unwrap();

        assert!(
            result.overall_error < 1e-2,
            "overall rms too large: {}",
            result.overall_error
        );
        assert!((result.camera_matrix.fx - k_gt.fx).abs() < 1.0);
        assert!((result.camera_matrix.fy - k_gt.fy).abs() < 1.0);
        assert!((result.camera_matrix.cx - k_gt.cx).abs() < 2.0);
        assert!((result.camera_matrix.cy - k_gt.cy).abs() < 2.0);
        assert_eq!(result.cam_from_rig.len(), views.len());
        assert_eq!(result.per_view_errors.len(), views.len());
    }

    #[test]
    fn rejects_undersized_views_before_solving() {
        let size = ImageSize {
            width: 640,
            height: 480,
        };
        let view = CorrespondenceView {
            ids: vec![0, 1],
            points_3d: vec![cylcal_core::Pt3::new(0.0, 0.0, 1.0); 2],
            points_2d: vec![cylcal_core::Pt2::new(10.0, 10.0); 2],
        };
        let err =
            calibrate_intrinsics(&[view], size, &IntrinsicSolveOptions::default()).unwrap_err();
        assert!(matches!(err, CalibError::CorrespondenceEmpty { .. }));
    }

    #[test]
    fn rejects_empty_image_set() {
        let size = ImageSize {
            width: 640,
            height: 480,
        };
        let err =
            calibrate_intrinsics(&[], size, &IntrinsicSolveOptions::default()).unwrap_err();
        assert!(matches!(err, CalibError::IntrinsicCalibrationFailure { .. }));
    }

    #[test]
    fn std_deviations_shape_matches_parameters() {
        let size = ImageSize {
            width: 1280,
            height: 960,
        };
        let k_gt = CameraMatrix {
            fx: 1000.0,
            fy: 1000.0,
            cx: 640.0,
            cy: 480.0,
        };
        let views = synthetic_views(&k_gt, &Rational8::default(), size, &[0.0, 1.6, 3.1]);
        let result =
            calibrate_intrinsics(&views, size, &IntrinsicSolveOptions::default()).unwrap();
        assert_eq!(result.std_intrinsics.len(), 12);
        assert_eq!(result.std_extrinsics.len(), 6 * views.len());
    }
}
