//! Synthetic cylindrical rig views.
//!
//! These helpers generate camera poses orbiting the rig and project the
//! corner cloud into them, producing the same `Detection` structure an
//! external detector would. Only corners on the camera-facing half of the
//! cylinder are kept, so synthetic detections are partial exactly like real
//! ones. Used by tests throughout the workspace.

use std::collections::BTreeMap;

use nalgebra::{Matrix3, Rotation3, Translation3, UnitQuaternion, Vector3};

use crate::detect::Detection;
use crate::math::{CornerId, Iso3, Pt3, Real};
use crate::models::{project_point, CameraMatrix, DistortionModel, ImageSize};

/// Camera pose on a ring around the rig axis, looking at the axis.
///
/// The camera sits at distance `distance_mm` from the axis, height
/// `height_mm`, azimuth `azimuth_rad`, with image x to the right and image y
/// pointing down. Returns `cam_from_rig`.
pub fn ring_pose(distance_mm: Real, height_mm: Real, azimuth_rad: Real) -> Iso3 {
    let eye = Vector3::new(
        distance_mm * azimuth_rad.cos(),
        distance_mm * azimuth_rad.sin(),
        height_mm,
    );
    let target = Vector3::new(0.0, 0.0, height_mm);

    let forward = (target - eye).normalize();
    let up = Vector3::new(0.0, 0.0, 1.0);
    let right = forward.cross(&up).normalize();
    let down = forward.cross(&right);

    let rig_from_cam_rot =
        Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[right, down, forward]));
    let rig_from_cam = Iso3::from_parts(
        Translation3::from(eye),
        UnitQuaternion::from_rotation_matrix(&rig_from_cam_rot),
    );
    rig_from_cam.inverse()
}

/// Project the corner cloud into a posed camera, keeping facing corners.
///
/// A corner is kept when its outward surface normal points towards the
/// camera and its projection lands inside the image.
pub fn project_detection<D: DistortionModel<Real>>(
    cloud: &BTreeMap<CornerId, Pt3>,
    cam_from_rig: &Iso3,
    k: &CameraMatrix,
    distortion: &D,
    size: ImageSize,
) -> Detection {
    let cam_pos = cam_from_rig.inverse().translation.vector;
    let mut corners = BTreeMap::new();

    for (&id, pw) in cloud {
        let normal = Vector3::new(pw.x, pw.y, 0.0);
        let to_cam = cam_pos - pw.coords;
        if normal.dot(&to_cam) <= 0.0 {
            continue;
        }
        let Some(uv) = project_point(cam_from_rig, k, distortion, pw) else {
            continue;
        };
        if uv.x < 0.0 || uv.y < 0.0 || uv.x >= size.width as Real || uv.y >= size.height as Real {
            continue;
        }
        corners.insert(id, uv);
    }

    Detection::new(corners)
}

/// Deterministic pixel perturbation with alternating sign.
///
/// Keeps synthetic tests reproducible without a random source.
pub fn alternating_noise(index: usize, amplitude: Real) -> Real {
    if index % 2 == 0 {
        amplitude
    } else {
        -amplitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NoDistortion;
    use crate::rig::CylinderRig;
    use approx::assert_relative_eq;

    #[test]
    fn ring_pose_looks_at_the_axis() {
        let pose = ring_pose(300.0, 70.0, 0.7);
        // The axis point at camera height projects to the optical axis.
        let pc = pose.transform_point(&Pt3::new(0.0, 0.0, 70.0));
        assert_relative_eq!(pc.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(pc.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(pc.z, 300.0, epsilon = 1e-9);
    }

    #[test]
    fn detection_is_partial_on_a_cylinder() {
        let rig = CylinderRig::new(44, 28, 140.0, 70.0).unwrap();
        let cloud = rig.corner_cloud();
        let size = ImageSize {
            width: 1280,
            height: 960,
        };
        let k = CameraMatrix::initial_guess(size);
        let pose = ring_pose(400.0, 70.0, 0.0);

        let detection = project_detection(&cloud, &pose, &k, &NoDistortion, size);
        assert!(detection.found());
        // The far half of the cylinder is never visible.
        assert!(detection.len() < cloud.len());
    }

    #[test]
    fn detected_ids_are_a_subset_of_the_cloud() {
        let rig = CylinderRig::new(10, 6, 60.0, 30.0).unwrap();
        let cloud = rig.corner_cloud();
        let size = ImageSize {
            width: 800,
            height: 600,
        };
        let k = CameraMatrix::initial_guess(size);
        let detection =
            project_detection(&cloud, &ring_pose(200.0, 30.0, 1.3), &k, &NoDistortion, size);
        for id in detection.corners.keys() {
            assert!(cloud.contains_key(id));
        }
    }
}
