#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Building records as returned by the spatial query gateway.

use std::collections::BTreeMap;

use building_queue_area_models::{BoundingBox, Coordinate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A building as reported by the external spatial data source.
///
/// Immutable once returned by the gateway; the queue snapshots it into a
/// candidate rather than holding on to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingRecord {
    /// Source identifier (e.g. the OSM way id).
    pub id: u64,
    /// Representative point of the footprint.
    pub center: Coordinate,
    /// Footprint envelope, when the source provides geometry.
    #[serde(default)]
    pub bounds: Option<BoundingBox>,
    /// Free-form key/value tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Source-side edit version.
    #[serde(default)]
    pub version: u32,
    /// When the source last modified this building.
    pub last_modified: DateTime<Utc>,
}

impl BuildingRecord {
    /// Returns `true` if the building already carries `key`.
    #[must_use]
    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let json = serde_json::json!({
            "id": 42,
            "center": { "latitude": 1.5, "longitude": 2.5 },
            "lastModified": "2024-05-01T12:00:00Z"
        });
        let record: BuildingRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.id, 42);
        assert!(record.bounds.is_none());
        assert!(record.tags.is_empty());
        assert_eq!(record.version, 0);
        assert!(!record.has_tag("building:colour"));
    }
}
