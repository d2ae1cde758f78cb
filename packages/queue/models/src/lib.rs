#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Candidate, event, and settings types for the review candidate queue.

use std::collections::BTreeMap;
use std::path::Path;

use building_queue_area_models::{BoundingBox, Coordinate};
use building_queue_gateway_models::BuildingRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};
use uuid::Uuid;

/// One unit of review work, derived 1:1 from a [`BuildingRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Source building id.
    pub source_id: u64,
    /// Building center.
    pub center: Coordinate,
    /// Building footprint envelope, if known.
    pub bounds: Option<BoundingBox>,
    /// Tags the building carried when it was fetched.
    pub tags: BTreeMap<String, String>,
    /// Source-side edit version at fetch time.
    pub version: u32,
    /// Source-side last modification at fetch time.
    pub last_modified: DateTime<Utc>,
    /// Session-scoped id correlating review actions with this candidate.
    pub correlation_id: Uuid,
}

impl Candidate {
    /// Snapshots `record` into a candidate with a fresh correlation id.
    #[must_use]
    pub fn from_record(record: BuildingRecord) -> Self {
        Self {
            source_id: record.id,
            center: record.center,
            bounds: record.bounds,
            tags: record.tags,
            version: record.version,
            last_modified: record.last_modified,
            correlation_id: Uuid::new_v4(),
        }
    }

    /// Reconstructs the building record this candidate was taken from.
    #[must_use]
    pub fn to_record(&self) -> BuildingRecord {
        BuildingRecord {
            id: self.source_id,
            center: self.center,
            bounds: self.bounds,
            tags: self.tags.clone(),
            version: self.version,
            last_modified: self.last_modified,
        }
    }
}

impl From<BuildingRecord> for Candidate {
    fn from(record: BuildingRecord) -> Self {
        Self::from_record(record)
    }
}

/// Lifecycle state of a candidate queue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueState {
    /// No area bound, or cleared.
    Uninitialized,
    /// Bound to an area and idle.
    Ready,
    /// A refill is in progress.
    Refilling,
}

/// Notifications emitted by the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    /// Depth fell to the low-water mark. Emitted once per crossing,
    /// before the automatic refill attempt.
    RunningLow {
        /// Queue depth at the time of the crossing.
        remaining: usize,
    },
    /// A candidate was marked processed. Emitted on every call.
    Processed {
        /// The id that was marked.
        id: u64,
        /// Queue depth after marking.
        remaining: usize,
        /// Distinct ids processed this session.
        total_processed: usize,
    },
}

/// Errors loading or validating [`QueueSettings`].
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Settings file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file is not valid TOML for [`QueueSettings`].
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parsed but are inconsistent.
    #[error("Invalid settings: {message}")]
    Invalid {
        /// What is wrong.
        message: String,
    },
}

/// Tunables for a candidate queue. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Maximum queue depth.
    pub capacity: usize,
    /// Depth at or below which `next()` triggers a refill.
    pub low_water_mark: usize,
    /// Refills request `needed × over_fetch_factor` to absorb duplicates.
    pub over_fetch_factor: usize,
    /// Buildings already carrying this tag are not fetched.
    pub skip_existing_tag: Option<String>,
    /// Capacity of the event broadcast channel.
    pub event_buffer: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: 20,
            low_water_mark: 5,
            over_fetch_factor: 2,
            skip_existing_tag: None,
            event_buffer: 64,
        }
    }
}

impl QueueSettings {
    /// Parses and validates settings from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] if the document is malformed or the
    /// values are inconsistent.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::de::from_str(toml_str)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] if the file cannot be read or parsed, or
    /// the values are inconsistent.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Checks that the values can drive a queue.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] describing the first problem.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let problem = if self.capacity == 0 {
            Some("capacity must be greater than 0".to_string())
        } else if self.low_water_mark >= self.capacity {
            Some(format!(
                "low_water_mark ({}) must be less than capacity ({})",
                self.low_water_mark, self.capacity
            ))
        } else if self.over_fetch_factor == 0 {
            Some("over_fetch_factor must be at least 1".to_string())
        } else if self.event_buffer == 0 {
            Some("event_buffer must be greater than 0".to_string())
        } else {
            None
        };

        problem.map_or(Ok(()), |message| Err(SettingsError::Invalid { message }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> BuildingRecord {
        let mut tags = BTreeMap::new();
        tags.insert("building".to_string(), "house".to_string());
        BuildingRecord {
            id: 991,
            center: Coordinate::new(48.1, 11.5),
            bounds: Some(BoundingBox::new(48.099, 11.499, 48.101, 11.501)),
            tags,
            version: 3,
            last_modified: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[test]
    fn candidate_round_trips_record() {
        let original = record();
        let candidate = Candidate::from_record(original.clone());
        let back = candidate.to_record();

        assert_eq!(back.id, original.id);
        assert_eq!(back.center, original.center);
        assert_eq!(back.bounds, original.bounds);
        assert_eq!(back, original);
    }

    #[test]
    fn correlation_ids_are_fresh() {
        let a = Candidate::from(record());
        let b = Candidate::from(record());
        assert_eq!(a.source_id, b.source_id);
        assert_ne!(a.correlation_id, b.correlation_id);
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = QueueSettings::default();
        assert_eq!(settings.capacity, 20);
        assert_eq!(settings.low_water_mark, 5);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn parses_partial_toml() {
        let settings = QueueSettings::from_toml_str(
            "capacity = 30\nskip_existing_tag = \"roof:colour\"\n",
        )
        .unwrap();
        assert_eq!(settings.capacity, 30);
        assert_eq!(settings.low_water_mark, 5);
        assert_eq!(settings.skip_existing_tag.as_deref(), Some("roof:colour"));
    }

    #[test]
    fn rejects_low_water_mark_at_capacity() {
        let result = QueueSettings::from_toml_str("capacity = 5\nlow_water_mark = 5\n");
        assert!(matches!(result, Err(SettingsError::Invalid { .. })));
    }

    #[test]
    fn rejects_malformed_toml() {
        let result = QueueSettings::from_toml_str("capacity = \"lots\"");
        assert!(matches!(result, Err(SettingsError::Parse(_))));
    }

    #[test]
    fn state_display() {
        assert_eq!(QueueState::Refilling.to_string(), "REFILLING");
    }
}
