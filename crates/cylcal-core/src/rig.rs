//! Cylindrical calibration rig geometry.
//!
//! The rig is a charuco pattern wrapped around a cylinder of known diameter.
//! Every interior grid intersection (a charuco corner) has a dense integer
//! id and a fixed 3D position on the cylinder surface; the mapping is a pure
//! function of the rig parameters and is computed once per session.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CalibError;
use crate::math::{CornerId, Pt3, Real};

/// Immutable descriptor of the physical cylindrical rig.
///
/// `horizontal_squares` counts the pattern squares around the circumference,
/// `vertical_squares` counts them along the axis. All lengths in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CylinderRig {
    pub horizontal_squares: u32,
    pub vertical_squares: u32,
    pub height_mm: Real,
    pub diameter_mm: Real,
}

/// Board description handed to external charuco detectors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CharucoBoardSpec {
    pub columns: u32,
    pub rows: u32,
    pub square_length_mm: Real,
    pub marker_length_mm: Real,
}

/// Marker side over square side on the printed pattern.
const MARKER_TO_SQUARE: Real = 3.0 / 5.0;

impl CylinderRig {
    /// Validate and build a rig descriptor.
    ///
    /// A rig needs at least two squares in each direction to have interior
    /// corners at all, and strictly positive physical dimensions.
    pub fn new(
        horizontal_squares: u32,
        vertical_squares: u32,
        height_mm: Real,
        diameter_mm: Real,
    ) -> Result<Self, CalibError> {
        let invalid = |reason: &str| CalibError::InvalidGeometry {
            reason: reason.to_string(),
            horizontal_squares,
            vertical_squares,
        };
        if horizontal_squares < 2 || vertical_squares < 2 {
            return Err(invalid("need at least 2 squares in each direction"));
        }
        if !(diameter_mm > 0.0) || !(height_mm > 0.0) {
            return Err(invalid("height and diameter must be positive"));
        }
        let rig = Self {
            horizontal_squares,
            vertical_squares,
            height_mm,
            diameter_mm,
        };
        if rig.square_length_mm() < 1.0 {
            return Err(invalid(
                "squares would print at less than one millimetre; increase the diameter \
                 or reduce the horizontal square count",
            ));
        }
        Ok(rig)
    }

    /// Side of one pattern square, rounded to whole millimetres.
    ///
    /// The rounding matches the physically printed rig: the pattern is laid
    /// out in integer millimetres before being wrapped around the cylinder.
    pub fn square_length_mm(&self) -> Real {
        (std::f64::consts::PI * self.diameter_mm / self.horizontal_squares as Real).round()
    }

    /// Number of interior corners, `(H-1)·(V-1)`.
    pub fn corner_count(&self) -> usize {
        (self.horizontal_squares as usize - 1) * (self.vertical_squares as usize - 1)
    }

    /// Upper bound on detectable corners in a single image.
    pub fn max_detectable_corners(&self) -> usize {
        self.corner_count()
    }

    /// Dense corner id for a grid position.
    pub fn corner_id(&self, horz: u32, vert: u32) -> CornerId {
        horz + vert * (self.horizontal_squares - 1)
    }

    /// Generate the 3D corner cloud, keyed by corner id.
    ///
    /// The rig axis runs along +Z; corners lie on a cylinder of radius
    /// `diameter/2`. The first corner row sits one square length above the
    /// rig base, so `z = v·L + L`. Ids are dense in `[0, corner_count())`.
    pub fn corner_cloud(&self) -> BTreeMap<CornerId, Pt3> {
        let radius = 0.5 * self.diameter_mm;
        let square = self.square_length_mm();
        // Angle subtended by one square at the cylinder axis.
        let step_rad = square / radius;

        let mut cloud = BTreeMap::new();
        for vert in 0..self.vertical_squares - 1 {
            for horz in 0..self.horizontal_squares - 1 {
                let id = self.corner_id(horz, vert);
                let theta = horz as Real * step_rad;
                let z = vert as Real * square + square;
                cloud.insert(
                    id,
                    Pt3::new(radius * theta.cos(), radius * theta.sin(), z),
                );
            }
        }

        debug_assert_eq!(cloud.len(), self.corner_count());
        if (self.vertical_squares as Real) * square > self.height_mm {
            log::warn!(
                "pattern rows extend beyond the declared sample height ({} squares of {} mm \
                 on a {} mm sample)",
                self.vertical_squares,
                square,
                self.height_mm
            );
        }
        cloud
    }

    /// Board description for external charuco detectors.
    pub fn board_spec(&self) -> CharucoBoardSpec {
        let square = self.square_length_mm();
        CharucoBoardSpec {
            columns: self.horizontal_squares,
            rows: self.vertical_squares,
            square_length_mm: square,
            marker_length_mm: (MARKER_TO_SQUARE * square).round(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rejects_degenerate_grids() {
        assert!(CylinderRig::new(1, 3, 10.0, 10.0).is_err());
        assert!(CylinderRig::new(4, 1, 10.0, 10.0).is_err());
        assert!(CylinderRig::new(4, 3, 0.0, 10.0).is_err());
        assert!(CylinderRig::new(4, 3, 10.0, -5.0).is_err());
    }

    #[test]
    fn cloud_has_dense_ids() {
        let rig = CylinderRig::new(44, 28, 140.0, 70.0).unwrap();
        let cloud = rig.corner_cloud();
        assert_eq!(cloud.len(), 43 * 27);
        for (expected, (&id, _)) in cloud.iter().enumerate() {
            assert_eq!(id as usize, expected);
        }
    }

    #[test]
    fn small_rig_matches_hand_computation() {
        // 4x3 squares on a 10 mm cylinder: L = round(pi*10/4) = 8 mm,
        // six corners with ids 0..5, id 0 at theta = 0.
        let rig = CylinderRig::new(4, 3, 10.0, 10.0).unwrap();
        assert_relative_eq!(rig.square_length_mm(), 8.0);
        let cloud = rig.corner_cloud();
        assert_eq!(cloud.len(), 6);
        assert_eq!(
            cloud.keys().copied().collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4, 5]
        );

        let p0 = cloud[&0];
        assert_relative_eq!(p0.x, 5.0, epsilon = 1e-12);
        assert_relative_eq!(p0.y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(p0.z, 8.0, epsilon = 1e-12);

        // Second row starts one square higher.
        let p3 = cloud[&3];
        assert_relative_eq!(p3.z, 16.0, epsilon = 1e-12);
    }

    #[test]
    fn corners_lie_on_the_cylinder() {
        let rig = CylinderRig::new(44, 28, 140.0, 70.0).unwrap();
        for p in rig.corner_cloud().values() {
            assert_relative_eq!((p.x * p.x + p.y * p.y).sqrt(), 35.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn board_spec_uses_marker_factor() {
        let rig = CylinderRig::new(44, 28, 140.0, 70.0).unwrap();
        let spec = rig.board_spec();
        assert_eq!(spec.columns, 44);
        assert_eq!(spec.rows, 28);
        assert_relative_eq!(spec.square_length_mm, 5.0);
        assert_relative_eq!(spec.marker_length_mm, 3.0);
    }
}
