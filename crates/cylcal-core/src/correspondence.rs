//! 3D/2D correspondence building.
//!
//! Downstream numerical routines consume positional arrays only: the corner
//! id is discarded after array construction, so the iteration order over the
//! intersected key set must be fixed once per image and shared between the
//! 3D and 2D arrays. Ascending corner id is that order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::detect::Detection;
use crate::math::{CornerId, Pt2, Pt3};

/// Ordered, index-aligned 3D/2D point arrays for one image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrespondenceView {
    /// Corner ids in the order the point arrays were built (ascending).
    pub ids: Vec<CornerId>,
    pub points_3d: Vec<Pt3>,
    pub points_2d: Vec<Pt2>,
}

impl CorrespondenceView {
    pub fn len(&self) -> usize {
        self.points_3d.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points_3d.is_empty()
    }
}

/// Restrict the rig cloud to the corners present in a detection.
pub fn filter_cloud(
    cloud: &BTreeMap<CornerId, Pt3>,
    detection: &Detection,
) -> BTreeMap<CornerId, Pt3> {
    cloud
        .iter()
        .filter(|(id, _)| detection.corners.contains_key(id))
        .map(|(&id, &p)| (id, p))
        .collect()
}

/// Intersect the rig cloud with a detection, producing index-aligned arrays.
///
/// The result always has equal-length arrays; detected ids that have no rig
/// counterpart (stray detector output) are dropped. An empty intersection
/// yields an empty view, left to the caller to exclude.
pub fn build_correspondences(
    cloud: &BTreeMap<CornerId, Pt3>,
    detection: &Detection,
) -> CorrespondenceView {
    let mut view = CorrespondenceView::default();
    for (&id, pixel) in &detection.corners {
        if let Some(&pw) = cloud.get(&id) {
            view.ids.push(id);
            view.points_3d.push(pw);
            view.points_2d.push(*pixel);
        }
    }
    view
}
