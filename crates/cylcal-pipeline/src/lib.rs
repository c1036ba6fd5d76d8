//! Staged calibration workflow for cylindrical fiducial rigs.
//!
//! The pipeline runs in a fixed order over a [`session::CalibrationSession`]:
//!
//! 1. detections are appended image by image,
//! 2. intrinsics, rational distortion, and per-image poses are bundle-adjusted,
//! 3. the polynomial warp is fit (per image or jointly),
//! 4. quality statistics and the serializable report are produced.

/// Session configuration.
pub mod config;
/// Quality statistics over finalized sessions.
pub mod quality;
/// Final serializable report.
pub mod report;
/// Session model and staged workflow.
pub mod session;

pub use config::{RefineMode, SessionConfig};
pub use quality::{coefficient_of_variation, quality_index, summary_text, ParamVariation};
pub use report::{CalibrationReport, ImageReport};
pub use session::{CalibrationImage, CalibrationSession, RefinementSummary};
