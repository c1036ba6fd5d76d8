//! Polynomial distortion refinement.
//!
//! After the intrinsic bundle adjustment fixes the camera matrix and poses,
//! the rational distortion model is swapped for the richer 2×10 polynomial
//! warp and re-fit with Powell's method. The warp can be fit per image
//! (20 parameters each, aggregated afterwards) or jointly over all images
//! (one shared 20-parameter vector).

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use cylcal_core::{CalibError, CameraMatrix, CorrespondenceView, Iso3, Real};

use crate::powell::{minimize, MinimizeOptions};
use crate::warp::{project_with_warp, rms_error, PolyWarp, WARP_PARAMS};

/// Options for the Powell distortion refinement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineOptions {
    /// Line-search and convergence settings for the underlying minimizer.
    pub minimizer: MinimizeOptions,
}

/// Refined warp for a single image.
#[derive(Debug, Clone)]
pub struct ImageRefinement {
    pub warp: PolyWarp,
    /// RMS reprojection error with the refined warp, in pixels.
    pub error: Real,
    /// Powell iterations spent.
    pub iters: usize,
}

/// Jointly refined warp shared by all images.
#[derive(Debug, Clone)]
pub struct JointRefinement {
    pub warp: PolyWarp,
    /// Mean of the per-image RMS errors at the solution.
    pub joint_error: Real,
    /// RMS error per image, input order.
    pub per_image_errors: Vec<Real>,
    pub iters: usize,
}

fn warp_from_dvec(x: &DVector<Real>) -> PolyWarp {
    let mut params = [0.0; WARP_PARAMS];
    params.copy_from_slice(x.as_slice());
    PolyWarp::from_params(&params)
}

fn view_cost(view: &CorrespondenceView, pose: &Iso3, k: &CameraMatrix, warp: &PolyWarp) -> Real {
    let computed = project_with_warp(&view.points_3d, pose, k, warp);
    rms_error(&view.points_2d, &computed)
}

/// Fit a polynomial warp to one image, starting from the zero warp.
///
/// `image` labels the view in error messages. Hitting the iteration cap
/// without converging is an `OptimizationFailure`.
pub fn refine_image(
    view: &CorrespondenceView,
    cam_from_rig: &Iso3,
    k: &CameraMatrix,
    image: &str,
    opts: &RefineOptions,
) -> Result<ImageRefinement, CalibError> {
    if view.is_empty() {
        return Err(CalibError::CorrespondenceEmpty {
            image: image.to_string(),
            got: 0,
            min: 1,
        });
    }

    let cost = |x: &DVector<Real>| view_cost(view, cam_from_rig, k, &warp_from_dvec(x));
    let result = minimize(cost, DVector::zeros(WARP_PARAMS), &opts.minimizer);
    if !result.success {
        return Err(CalibError::OptimizationFailure {
            image: image.to_string(),
            reason: format!(
                "powell hit the {}-iteration cap at cost {:.6e}",
                result.iters, result.fval
            ),
        });
    }

    log::debug!(
        "refined {image}: rms {:.4} px in {} iterations",
        result.fval,
        result.iters
    );
    Ok(ImageRefinement {
        warp: warp_from_dvec(&result.x),
        error: result.fval,
        iters: result.iters,
    })
}

/// Fit one shared warp over all images by minimizing the mean per-image RMS.
pub fn refine_joint(
    views: &[CorrespondenceView],
    cam_from_rig: &[Iso3],
    k: &CameraMatrix,
    opts: &RefineOptions,
) -> Result<JointRefinement, CalibError> {
    debug_assert_eq!(views.len(), cam_from_rig.len());
    if views.is_empty() || views.iter().any(CorrespondenceView::is_empty) {
        let (idx, got) = views
            .iter()
            .enumerate()
            .find(|(_, v)| v.is_empty())
            .map(|(i, v)| (i, v.len()))
            .unwrap_or((0, 0));
        return Err(CalibError::CorrespondenceEmpty {
            image: format!("view {idx}"),
            got,
            min: 1,
        });
    }

    let cost = |x: &DVector<Real>| {
        let warp = warp_from_dvec(x);
        let total: Real = views
            .iter()
            .zip(cam_from_rig)
            .map(|(view, pose)| view_cost(view, pose, k, &warp))
            .sum();
        total / views.len() as Real
    };
    let result = minimize(cost, DVector::zeros(WARP_PARAMS), &opts.minimizer);
    if !result.success {
        return Err(CalibError::OptimizationFailure {
            image: format!("joint over {} views", views.len()),
            reason: format!(
                "powell hit the {}-iteration cap at cost {:.6e}",
                result.iters, result.fval
            ),
        });
    }

    let warp = warp_from_dvec(&result.x);
    let per_image_errors: Vec<Real> = views
        .iter()
        .zip(cam_from_rig)
        .map(|(view, pose)| view_cost(view, pose, k, &warp))
        .collect();

    Ok(JointRefinement {
        warp,
        joint_error: result.fval,
        per_image_errors,
        iters: result.iters,
    })
}

/// Coefficient-wise mean and standard deviation over per-image warps.
///
/// The standard deviation is the population one (divide by N). Empty input
/// yields the zero warp and zero spreads.
pub fn aggregate_warps(warps: &[PolyWarp]) -> (PolyWarp, [Real; WARP_PARAMS]) {
    if warps.is_empty() {
        return (PolyWarp::zero(), [0.0; WARP_PARAMS]);
    }
    let n = warps.len() as Real;

    let mut mean = [0.0; WARP_PARAMS];
    for warp in warps {
        for (acc, p) in mean.iter_mut().zip(warp.params().iter()) {
            *acc += p;
        }
    }
    for acc in &mut mean {
        *acc /= n;
    }

    let mut var = [0.0; WARP_PARAMS];
    for warp in warps {
        for ((acc, p), m) in var.iter_mut().zip(warp.params().iter()).zip(mean.iter()) {
            let d = p - m;
            *acc += d * d;
        }
    }
    let mut std = [0.0; WARP_PARAMS];
    for (s, v) in std.iter_mut().zip(var.iter()) {
        *s = (v / n).sqrt();
    }

    (PolyWarp::from_params(&mean), std)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cylcal_core::correspondence::build_correspondences;
    use cylcal_core::synthetic::{project_detection, ring_pose};
    use cylcal_core::{CylinderRig, ImageSize, NoDistortion};

    fn pinhole_view(k: &CameraMatrix, azimuth: Real) -> (CorrespondenceView, Iso3) {
        let rig = CylinderRig::new(14, 9, 90.0, 45.0).unwrap();
        let cloud = rig.corner_cloud();
        let pose = ring_pose(260.0, 45.0, azimuth);
        let size = ImageSize {
            width: 1280,
            height: 960,
        };
        let detection = project_detection(&cloud, &pose, k, &NoDistortion, size);
        (build_correspondences(&cloud, &detection), pose)
    }

    fn test_camera() -> CameraMatrix {
        CameraMatrix {
            fx: 1000.0,
            fy: 1000.0,
            cx: 640.0,
            cy: 480.0,
        }
    }

    #[test]
    fn pinhole_image_refines_to_near_identity_warp() {
        let k = test_camera();
        let (view, pose) = pinhole_view(&k, 0.7);
        assert!(view.len() > 20);

        let refined =
            refine_image(&view, &pose, &k, "img_0", &RefineOptions::default()).unwrap();
        assert!(refined.error < 1e-3, "residual rms {}", refined.error);

        // Distortion-free data: the fitted warp behaves like the identity
        // inside the observed region.
        let n = cylcal_core::Pt2::new(0.05, -0.04);
        let d = refined.warp.apply(&n);
        assert!((d.x - n.x).abs() < 1e-3);
        assert!((d.y - n.y).abs() < 1e-3);
    }

    #[test]
    fn empty_view_is_rejected() {
        let k = test_camera();
        let err = refine_image(
            &CorrespondenceView::default(),
            &Iso3::identity(),
            &k,
            "img_7",
            &RefineOptions::default(),
        )
        .unwrap_err();
        match err {
            CalibError::CorrespondenceEmpty { image, .. } => assert_eq!(image, "img_7"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn joint_refinement_covers_all_views() {
        let k = test_camera();
        let (v0, p0) = pinhole_view(&k, 0.0);
        let (v1, p1) = pinhole_view(&k, 1.3);
        let (v2, p2) = pinhole_view(&k, 2.9);

        let joint = refine_joint(
            &[v0, v1, v2],
            &[p0, p1, p2],
            &k,
            &RefineOptions::default(),
        )
        .unwrap();
        assert_eq!(joint.per_image_errors.len(), 3);
        assert!(joint.joint_error < 1e-2, "joint rms {}", joint.joint_error);
        let mean: Real =
            joint.per_image_errors.iter().sum::<Real>() / joint.per_image_errors.len() as Real;
        approx::assert_relative_eq!(mean, joint.joint_error, epsilon = 1e-9);
    }

    #[test]
    fn joint_fit_is_independent_of_image_order() {
        let k = test_camera();
        let (v0, p0) = pinhole_view(&k, 0.0);
        let (v1, p1) = pinhole_view(&k, 1.3);
        let (v2, p2) = pinhole_view(&k, 2.9);

        let opts = RefineOptions::default();
        let forward = refine_joint(
            &[v0.clone(), v1.clone(), v2.clone()],
            &[p0, p1, p2],
            &k,
            &opts,
        )
        .unwrap();
        let reversed = refine_joint(&[v2, v1, v0], &[p2, p1, p0], &k, &opts).unwrap();

        let a = forward.warp.params();
        let b = reversed.warp.params();
        for (fa, fb) in a.iter().zip(b.iter()) {
            approx::assert_relative_eq!(*fa, *fb, epsilon = 1e-6, max_relative = 1e-6);
        }
        approx::assert_relative_eq!(
            forward.joint_error,
            reversed.joint_error,
            epsilon = 1e-9
        );
    }

    #[test]
    fn aggregation_averages_coefficient_wise() {
        let mut a = [0.0; WARP_PARAMS];
        let mut b = [0.0; WARP_PARAMS];
        for i in 0..WARP_PARAMS {
            a[i] = i as Real;
            b[i] = i as Real + 2.0;
        }
        let (mean, std) = aggregate_warps(&[PolyWarp::from_params(&a), PolyWarp::from_params(&b)]);
        let mp = mean.params();
        for i in 0..WARP_PARAMS {
            approx::assert_relative_eq!(mp[i], i as Real + 1.0);
            approx::assert_relative_eq!(std[i], 1.0);
        }
    }

    #[test]
    fn aggregation_of_nothing_is_zero() {
        let (mean, std) = aggregate_warps(&[]);
        assert_eq!(mean, PolyWarp::zero());
        assert!(std.iter().all(|s| *s == 0.0));
    }
}
