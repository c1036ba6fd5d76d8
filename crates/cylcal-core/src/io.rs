//! Persisted corner-map format.
//!
//! Corner maps are stored as JSON objects keyed by the string-encoded corner
//! id, with float-list values: 3 floats for rig points, 2 for pixels. The
//! format round-trips numeric precision and restores integer ids from their
//! string keys.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::CalibError;
use crate::math::{CornerId, Pt2, Pt3};

fn encode<const N: usize>(
    map: impl Iterator<Item = (CornerId, [f64; N])>,
) -> BTreeMap<String, Vec<f64>> {
    map.map(|(id, coords)| (id.to_string(), coords.to_vec()))
        .collect()
}

fn decode<const N: usize>(
    raw: BTreeMap<String, Vec<f64>>,
) -> Result<BTreeMap<CornerId, [f64; N]>, CalibError> {
    let mut out = BTreeMap::new();
    for (key, coords) in raw {
        let id: CornerId = key
            .parse()
            .map_err(|_| CalibError::MalformedCornerMap(format!("non-integer key '{key}'")))?;
        let arr: [f64; N] = coords.as_slice().try_into().map_err(|_| {
            CalibError::MalformedCornerMap(format!(
                "corner {id}: expected {N} floats, got {}",
                coords.len()
            ))
        })?;
        out.insert(id, arr);
    }
    Ok(out)
}

/// Serialize a 3D corner map to the persisted JSON format.
pub fn point3_map_to_json(map: &BTreeMap<CornerId, Pt3>) -> Result<String, CalibError> {
    let raw = encode(map.iter().map(|(&id, p)| (id, [p.x, p.y, p.z])));
    Ok(serde_json::to_string_pretty(&raw)?)
}

/// Parse a 3D corner map from the persisted JSON format.
pub fn point3_map_from_json(json: &str) -> Result<BTreeMap<CornerId, Pt3>, CalibError> {
    let raw: BTreeMap<String, Vec<f64>> = serde_json::from_str(json)?;
    Ok(decode::<3>(raw)?
        .into_iter()
        .map(|(id, [x, y, z])| (id, Pt3::new(x, y, z)))
        .collect())
}

/// Serialize a 2D corner map (detected pixels) to the persisted JSON format.
pub fn point2_map_to_json(map: &BTreeMap<CornerId, Pt2>) -> Result<String, CalibError> {
    let raw = encode(map.iter().map(|(&id, p)| (id, [p.x, p.y])));
    Ok(serde_json::to_string_pretty(&raw)?)
}

/// Parse a 2D corner map from the persisted JSON format.
pub fn point2_map_from_json(json: &str) -> Result<BTreeMap<CornerId, Pt2>, CalibError> {
    let raw: BTreeMap<String, Vec<f64>> = serde_json::from_str(json)?;
    Ok(decode::<2>(raw)?
        .into_iter()
        .map(|(id, [x, y])| (id, Pt2::new(x, y)))
        .collect())
}

/// Write a 3D corner map to a file.
pub fn save_point3_map(path: &Path, map: &BTreeMap<CornerId, Pt3>) -> Result<(), CalibError> {
    fs::write(path, point3_map_to_json(map)?)?;
    Ok(())
}

/// Read a 3D corner map from a file.
pub fn load_point3_map(path: &Path) -> Result<BTreeMap<CornerId, Pt3>, CalibError> {
    point3_map_from_json(&fs::read_to_string(path)?)
}

/// Write a 2D corner map to a file.
pub fn save_point2_map(path: &Path, map: &BTreeMap<CornerId, Pt2>) -> Result<(), CalibError> {
    fs::write(path, point2_map_to_json(map)?)?;
    Ok(())
}

/// Read a 2D corner map from a file.
pub fn load_point2_map(path: &Path) -> Result<BTreeMap<CornerId, Pt2>, CalibError> {
    point2_map_from_json(&fs::read_to_string(path)?)
}
