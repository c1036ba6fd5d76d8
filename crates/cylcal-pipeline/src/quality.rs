//! Calibration quality statistics.
//!
//! Read-only over finalized results: detection coverage per image, and the
//! relative spread of every recovered parameter.

use serde::{Deserialize, Serialize};

use cylcal_core::Real;
use cylcal_optim::IntrinsicsResult;

use crate::session::CalibrationSession;

fn round3(x: Real) -> Real {
    (x * 1000.0).round() / 1000.0
}

/// Fraction of the rig's corners found in one image, rounded to three
/// decimals for display parity with the report.
pub fn quality_index(detected: usize, max_detectable: usize) -> Real {
    if max_detectable == 0 {
        return 0.0;
    }
    round3(detected as Real / max_detectable as Real)
}

/// Coefficient of variation in percent, `|std / mean| · 100`.
///
/// Infinite when the parameter estimate itself is zero; the table renders
/// that as-is rather than hiding an unconstrained parameter.
pub fn coefficient_of_variation(mean: Real, std: Real) -> Real {
    if mean == 0.0 {
        if std == 0.0 {
            return 0.0;
        }
        return Real::INFINITY;
    }
    (std / mean).abs() * 100.0
}

/// One row of the parameter-spread table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamVariation {
    pub name: String,
    pub value: Real,
    pub std: Real,
    pub cov_percent: Real,
}

const INTRINSIC_PARAM_NAMES: [&str; 12] = [
    "fx", "fy", "cx", "cy", "k1", "k2", "k3", "k4", "k5", "k6", "p1", "p2",
];

/// Spread table for the intrinsic and distortion parameters.
///
/// Empty when the solve skipped standard-deviation estimation.
pub fn intrinsic_variation_table(result: &IntrinsicsResult) -> Vec<ParamVariation> {
    if result.std_intrinsics.len() != INTRINSIC_PARAM_NAMES.len() {
        return Vec::new();
    }
    let k = &result.camera_matrix;
    let d = &result.distortion;
    let values = [
        k.fx, k.fy, k.cx, k.cy, d.k1, d.k2, d.k3, d.k4, d.k5, d.k6, d.p1, d.p2,
    ];
    INTRINSIC_PARAM_NAMES
        .iter()
        .zip(values.iter())
        .zip(result.std_intrinsics.iter())
        .map(|((name, &value), &std)| ParamVariation {
            name: name.to_string(),
            value,
            std,
            cov_percent: coefficient_of_variation(value, std),
        })
        .collect()
}

/// Human-readable session summary, one line per image plus totals.
///
/// Intended for terminal output and live-preview overlays.
pub fn summary_text(session: &CalibrationSession) -> String {
    let max = session.rig.max_detectable_corners();
    let mut out = String::new();
    for img in &session.images {
        let line = match (img.baseline_error, img.refined_error) {
            (Some(base), Some(refined)) => format!(
                "{}: {}/{} corners (q {:.3}), rms {:.3} -> {:.3} px\n",
                img.name,
                img.detection.len(),
                max,
                quality_index(img.detection.len(), max),
                base,
                refined
            ),
            (Some(base), None) => format!(
                "{}: {}/{} corners (q {:.3}), rms {:.3} px\n",
                img.name,
                img.detection.len(),
                max,
                quality_index(img.detection.len(), max),
                base
            ),
            _ => format!(
                "{}: {}/{} corners (q {:.3}), not calibrated\n",
                img.name,
                img.detection.len(),
                max,
                quality_index(img.detection.len(), max)
            ),
        };
        out.push_str(&line);
    }
    if let Some(intrinsics) = &session.intrinsics {
        out.push_str(&format!(
            "overall rms {:.3} px over {} images\n",
            intrinsics.overall_error,
            intrinsics.cam_from_rig.len()
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn quality_index_rounds_to_three_decimals() {
        // 123 of 1161 corners: 0.10594... rounds to 0.106.
        assert_relative_eq!(quality_index(123, 1161), 0.106);
        assert_relative_eq!(quality_index(0, 1161), 0.0);
        assert_relative_eq!(quality_index(1161, 1161), 1.0);
    }

    #[test]
    fn quality_index_of_degenerate_rig_is_zero() {
        assert_eq!(quality_index(5, 0), 0.0);
    }

    #[test]
    fn cov_is_relative_and_absolute() {
        assert_relative_eq!(coefficient_of_variation(1000.0, 5.0), 0.5);
        assert_relative_eq!(coefficient_of_variation(-0.1, 0.01), 10.0);
        assert_eq!(coefficient_of_variation(0.0, 0.0), 0.0);
        assert!(coefficient_of_variation(0.0, 0.1).is_infinite());
    }
}
