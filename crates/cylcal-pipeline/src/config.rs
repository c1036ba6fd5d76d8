//! Session configuration.

use serde::{Deserialize, Serialize};

use cylcal_core::DictionarySpec;
use cylcal_optim::{IntrinsicSolveOptions, RefineOptions};

/// How the polynomial warp is fit after intrinsic calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefineMode {
    /// One 20-parameter warp per image, aggregated afterwards.
    #[default]
    PerImage,
    /// One shared 20-parameter warp minimizing the mean per-image cost.
    Joint,
}

/// Complete configuration of a calibration session.
///
/// Everything is serde-deserializable so a session can be driven from a JSON
/// config file; every field has a sensible default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Aruco dictionary the rig pattern was generated from.
    pub dictionary: DictionarySpec,
    /// Distortion refinement policy.
    pub mode: RefineMode,
    /// Bundle-adjustment options, including the minimum image and
    /// per-image point counts.
    pub solver: IntrinsicSolveOptions,
    /// Powell refinement options.
    pub refine: RefineOptions,
}
