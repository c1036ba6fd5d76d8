//! Core primitives for cylindrical fiducial-rig camera calibration.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec2`, `Pt3`, ...),
//! - the cylindrical rig geometry and its deterministic corner cloud,
//! - the corner-detector seam consumed by the pipeline,
//! - 3D/2D correspondence building,
//! - the rational lens-distortion model used by intrinsic calibration,
//! - string-keyed JSON persistence for corner maps,
//! - the calibration error taxonomy.
//!
//! Camera pipeline:
//! `pixel = K ∘ distortion ∘ perspective(cam_from_rig · corner)`

/// Linear algebra type aliases and helpers.
pub mod math;
/// Calibration error taxonomy.
pub mod error;
/// Cylindrical rig geometry and corner cloud generation.
pub mod rig;
/// Corner detection seam.
pub mod detect;
/// 3D/2D correspondence building.
pub mod correspondence;
/// Camera matrix and distortion models.
pub mod models;
/// Persisted corner-map formats.
pub mod io;
/// Synthetic rig views for tests and examples.
pub mod synthetic;

pub use correspondence::*;
pub use detect::*;
pub use error::*;
pub use math::*;
pub use models::*;
pub use rig::*;
