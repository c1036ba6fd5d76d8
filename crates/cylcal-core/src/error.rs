//! Error taxonomy for the calibration engine.
//!
//! Per-image failures (`DetectionFailure`, `CorrespondenceEmpty`,
//! `OptimizationFailure`) are recovered locally by the session: the image is
//! excluded and processing continues. Session-level failures
//! (`InvalidGeometry`, `IntrinsicCalibrationFailure`) abort the whole
//! calibration and carry enough context to retry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalibError {
    /// Rig parameters cannot describe a printable cylindrical board.
    #[error("invalid rig geometry: {reason} (horizontal_squares={horizontal_squares}, vertical_squares={vertical_squares})")]
    InvalidGeometry {
        reason: String,
        horizontal_squares: u32,
        vertical_squares: u32,
    },

    /// Corner detection failed on one image in a way that is not a clean
    /// zero-detection outcome (decoder error, malformed detector output, ...).
    #[error("corner detection failed on image '{image}': {reason}")]
    DetectionFailure { image: String, reason: String },

    /// An image contributes no usable 3D/2D pairs, or fewer than the
    /// configured minimum.
    #[error("image '{image}' has {got} usable correspondences, need at least {min}")]
    CorrespondenceEmpty {
        image: String,
        got: usize,
        min: usize,
    },

    /// The intrinsic bundle adjustment did not converge. Fatal for the
    /// session: nothing downstream can run without intrinsics.
    #[error("intrinsic calibration failed over {num_images} image(s): {reason}")]
    IntrinsicCalibrationFailure { num_images: usize, reason: String },

    /// Distortion refinement did not converge for one image. The image is
    /// excluded from aggregate statistics; the session proceeds.
    #[error("distortion refinement failed on image '{image}': {reason}")]
    OptimizationFailure { image: String, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Malformed persisted data (non-integer key, wrong vector arity, ...).
    #[error("malformed corner-map entry: {0}")]
    MalformedCornerMap(String),
}

impl CalibError {
    /// Whether the session can recover by excluding the offending image.
    pub fn is_per_image(&self) -> bool {
        matches!(
            self,
            CalibError::DetectionFailure { .. }
                | CalibError::CorrespondenceEmpty { .. }
                | CalibError::OptimizationFailure { .. }
        )
    }
}
