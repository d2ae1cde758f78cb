#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Building density classification.
//!
//! Density is advisory: it sizes queries, it never decides correctness.
//! A [`DensityEstimate`] is derived once per area and replaced, never
//! mutated.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Density assumed when it cannot be measured, in buildings/km².
pub const FALLBACK_DENSITY_PER_KM2: f64 = 100.0;

/// Discrete building density class, ordered from sparsest to densest.
///
/// | Level | buildings/km² |
/// |---|---|
/// | `VeryLow` | < 10 |
/// | `Low` | 10 – 50 |
/// | `Medium` | 50 – 200 |
/// | `High` | 200 – 1000 |
/// | `VeryHigh` | 1000 – 5000 |
/// | `Extreme` | ≥ 5000 |
///
/// Lower bounds are inclusive.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DensityLevel {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
    Extreme,
}

impl DensityLevel {
    /// Classifies a density in buildings/km².
    ///
    /// Non-finite or negative input classifies as [`Self::VeryLow`].
    #[must_use]
    pub fn from_density(buildings_per_km2: f64) -> Self {
        match buildings_per_km2 {
            d if d >= 5000.0 => Self::Extreme,
            d if d >= 1000.0 => Self::VeryHigh,
            d if d >= 200.0 => Self::High,
            d if d >= 50.0 => Self::Medium,
            d if d >= 10.0 => Self::Low,
            _ => Self::VeryLow,
        }
    }

    /// Human-readable label (e.g. `"very high"`).
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::VeryLow => "very low",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very high",
            Self::Extreme => "extreme",
        }
    }
}

/// Estimated building density for one area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DensityEstimate {
    /// Buildings per km².
    pub buildings_per_km2: f64,
    /// Classification of `buildings_per_km2`.
    pub level: DensityLevel,
    /// Area size in km².
    pub area_km2: f64,
    /// `buildings_per_km2 × area_km2`, rounded.
    pub estimated_total_buildings: u64,
}

impl DensityEstimate {
    /// Builds an estimate from a measured density.
    #[must_use]
    pub fn from_density(buildings_per_km2: f64, area_km2: f64) -> Self {
        let density = if buildings_per_km2.is_finite() {
            buildings_per_km2.max(0.0)
        } else {
            0.0
        };

        Self {
            buildings_per_km2: density,
            level: DensityLevel::from_density(density),
            area_km2,
            estimated_total_buildings: round_count(density * area_km2),
        }
    }

    /// The conservative estimate used when probing fails.
    #[must_use]
    pub fn fallback(area_km2: f64) -> Self {
        Self::from_density(FALLBACK_DENSITY_PER_KM2, area_km2)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_count(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}
