//! Corner detection seam.
//!
//! Detection itself is an external concern (an aruco/charuco detector backed
//! by some vision library); the engine only consumes its output. The trait
//! here is deliberately narrow so any equivalent detector can be substituted,
//! including the synthetic projector used in tests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CalibError;
use crate::math::{CornerId, Pt2};
use crate::rig::CharucoBoardSpec;

/// Named aruco dictionary used to generate the rig pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionarySpec(pub String);

impl Default for DictionarySpec {
    fn default() -> Self {
        Self("5X5_1000".to_string())
    }
}

/// Charuco corners found in one image, keyed by corner id.
///
/// An empty map is a normal, representable outcome for an image where no
/// fiducials are visible; it is never an error by itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Detection {
    pub corners: BTreeMap<CornerId, Pt2>,
}

impl Detection {
    pub fn new(corners: BTreeMap<CornerId, Pt2>) -> Self {
        Self { corners }
    }

    /// Whether any corner was detected.
    pub fn found(&self) -> bool {
        !self.corners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.corners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corners.is_empty()
    }
}

/// Detects charuco-grid corners in a single image of type `I`.
///
/// Implementations must tolerate partial visibility: a cylindrical rig never
/// shows more than roughly half of its corners to one camera.
pub trait CornerDetector<I> {
    fn detect(
        &self,
        image: &I,
        dictionary: &DictionarySpec,
        board: &CharucoBoardSpec,
    ) -> Result<Detection, CalibError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_detection_is_not_found() {
        let d = Detection::default();
        assert!(!d.found());
        assert!(d.is_empty());
    }

    #[test]
    fn default_dictionary_matches_rig_pattern() {
        assert_eq!(DictionarySpec::default().0, "5X5_1000");
    }
}
