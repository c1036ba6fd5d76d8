//! Serializable calibration report.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use cylcal_core::{CalibError, CameraMatrix, CylinderRig, ImageSize, Rational8, Real};

use crate::quality::ParamVariation;
use crate::session::RefinementSummary;

/// Per-image block of the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageReport {
    pub name: String,
    pub detected: usize,
    pub max_detectable: usize,
    /// `detected / max_detectable`, three decimals.
    pub quality_index: Real,
    /// RMS error under the rational model; absent for excluded images.
    pub baseline_error: Option<Real>,
    /// RMS error under the polynomial warp; absent when refinement did not
    /// run or did not converge for this image.
    pub refined_error: Option<Real>,
}

/// Complete result of one calibration session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub rig: CylinderRig,
    pub image_size: ImageSize,
    pub camera_matrix: CameraMatrix,
    pub distortion: Rational8<Real>,
    /// RMS reprojection error over all points of all calibrated images.
    pub overall_error: Real,
    /// Parameter spread table; empty when std estimation was skipped.
    pub intrinsic_variation: Vec<ParamVariation>,
    pub images: Vec<ImageReport>,
    pub refinement: Option<RefinementSummary>,
}

impl CalibrationReport {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CalibError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CalibError> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
