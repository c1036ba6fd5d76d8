//! Linear pose initialization.
//!
//! Normalized DLT solution to the PnP problem, used to seed the bundle
//! adjustment with per-image poses. The rig corners are genuinely
//! non-coplanar (they lie on a cylinder), so the 12-parameter projective
//! DLT is well conditioned here.

use anyhow::Result;
use nalgebra::{DMatrix, Matrix3x4, Rotation3, Translation3, UnitQuaternion, Vector3};

use cylcal_core::{CameraMatrix, Iso3, Mat3, Pt2, Pt3, Real};

/// Direct linear PnP on all input points.
///
/// `world` are rig-frame corners, `image` their pixel positions, `k` the
/// (guessed) camera matrix. Returns `cam_from_rig`. Needs at least 6
/// correspondences; the recovered rotation is projected onto SO(3).
pub fn dlt_pose(world: &[Pt3], image: &[Pt2], k: &CameraMatrix) -> Result<Iso3> {
    let n = world.len();
    if n < 6 || image.len() != n {
        anyhow::bail!("need at least 6 point correspondences, got {}", n);
    }

    // Center and scale the 3D points for conditioning.
    let mut centroid = Vector3::zeros();
    for p in world {
        centroid += p.coords;
    }
    centroid /= n as Real;

    let mut mean_dist = 0.0;
    for p in world {
        mean_dist += (p.coords - centroid).norm();
    }
    mean_dist /= n as Real;
    if mean_dist <= Real::EPSILON {
        anyhow::bail!("degenerate 3d point configuration");
    }
    let scale = (3.0_f64).sqrt() / mean_dist;

    let kmtx: Mat3 = k.k_matrix();
    let k_inv = kmtx
        .try_inverse()
        .ok_or_else(|| anyhow::anyhow!("camera matrix is not invertible"))?;

    // 2n x 12 homogeneous system for P = [R|t] in normalized coordinates.
    let mut a = DMatrix::<Real>::zeros(2 * n, 12);
    for (i, (pw, pi)) in world.iter().zip(image.iter()).enumerate() {
        let x = (pw.x - centroid.x) * scale;
        let y = (pw.y - centroid.y) * scale;
        let z = (pw.z - centroid.z) * scale;

        let v_img = k_inv * Vector3::new(pi.x, pi.y, 1.0);
        let u = v_img.x / v_img.z;
        let v = v_img.y / v_img.z;

        let r0 = 2 * i;
        let r1 = 2 * i + 1;

        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = z;
        a[(r0, 3)] = 1.0;
        a[(r0, 8)] = -u * x;
        a[(r0, 9)] = -u * y;
        a[(r0, 10)] = -u * z;
        a[(r0, 11)] = -u;

        a[(r1, 4)] = x;
        a[(r1, 5)] = y;
        a[(r1, 6)] = z;
        a[(r1, 7)] = 1.0;
        a[(r1, 8)] = -v * x;
        a[(r1, 9)] = -v * y;
        a[(r1, 10)] = -v * z;
        a[(r1, 11)] = -v;
    }

    let svd = a.svd(true, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| anyhow::anyhow!("svd failed in PnP DLT"))?;

    // Nullspace row reshaped into 3x4, then de-normalized.
    let row = v_t.nrows() - 1;
    let mut p_mtx = Matrix3x4::<Real>::zeros();
    for r in 0..3 {
        for c in 0..4 {
            p_mtx[(r, c)] = v_t[(row, 4 * r + c)];
        }
    }
    let t_world = nalgebra::Matrix4::new(
        scale,
        0.0,
        0.0,
        -scale * centroid.x,
        0.0,
        scale,
        0.0,
        -scale * centroid.y,
        0.0,
        0.0,
        scale,
        -scale * centroid.z,
        0.0,
        0.0,
        0.0,
        1.0,
    );
    let p_mtx = p_mtx * t_world;

    let m = p_mtx.fixed_view::<3, 3>(0, 0).into_owned();
    let mut r_approx = m;

    // Normalize scale using the average row norm; flip if left-handed.
    let mut s =
        (r_approx.row(0).norm() + r_approx.row(1).norm() + r_approx.row(2).norm()) / 3.0;
    if r_approx.determinant() < 0.0 {
        s = -s;
    }
    if s.abs() > 0.0 {
        r_approx /= s;
    }

    // Project onto SO(3).
    let svd = r_approx.svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| anyhow::anyhow!("svd failed in PnP DLT"))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| anyhow::anyhow!("svd failed in PnP DLT"))?;
    let mut r_orth = u * v_t;
    if r_orth.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r_orth = u_flipped * v_t;
    }

    let mut t = p_mtx.column(3).into_owned();
    if s.abs() > 0.0 {
        t /= s;
    }

    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r_orth));
    Ok(Iso3::from_parts(Translation3::from(t), rot))
}
