#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geographic area types shared by the candidate acquisition pipeline.
//!
//! An [`AreaSelection`] is the unit every other component works against:
//! the density estimator probes it, the planner sizes queries for it, and
//! the candidate queue binds to it for the lifetime of a review session.
//! [`AreaSignature`] is its canonical, hashable form used as a cache key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kilometers per degree of latitude (flat-Earth approximation).
pub const KM_PER_DEGREE_LAT: f64 = 111.32;

/// Scale applied to coordinates before rounding them into an
/// [`AreaSignature`] (4 decimal places).
const SIGNATURE_SCALE: f64 = 10_000.0;

/// Errors raised when constructing an invalid [`AreaSelection`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AreaError {
    /// Radius was zero, negative, or not finite.
    #[error("Invalid radius: {radius_m} m (must be a finite value > 0)")]
    InvalidRadius {
        /// The rejected radius in meters.
        radius_m: f64,
    },

    /// Rectangle bounds were inverted, empty, or not finite.
    #[error("Invalid bounds: min must be < max on both axes ({bounds})")]
    InvalidBounds {
        /// The rejected bounding box.
        bounds: BoundingBox,
    },
}

/// A WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl Coordinate {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

/// An axis-aligned latitude/longitude box.
///
/// Used both as a rectangular area selection and as the footprint
/// envelope of a single building.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    /// Southern edge.
    pub min_lat: f64,
    /// Western edge.
    pub min_lon: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Eastern edge.
    pub max_lon: f64,
}

impl BoundingBox {
    #[must_use]
    pub const fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// Midpoint of the box.
    #[must_use]
    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    /// Whether `point` lies inside the box (edges inclusive).
    #[must_use]
    pub fn contains(&self, point: &Coordinate) -> bool {
        point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
            && point.longitude >= self.min_lon
            && point.longitude <= self.max_lon
    }

    /// Area in km² using a flat-Earth approximation: 111.32 km per degree
    /// of latitude, longitude scaled by `cos(mean latitude)`.
    #[must_use]
    pub fn area_km2(&self) -> f64 {
        let mean_lat = f64::midpoint(self.min_lat, self.max_lat).to_radians();
        let height_km = (self.max_lat - self.min_lat) * KM_PER_DEGREE_LAT;
        let width_km = (self.max_lon - self.min_lon) * KM_PER_DEGREE_LAT * mean_lat.cos();
        (height_km * width_km).abs()
    }

    /// A box with the same center whose sides are `factor` times as long.
    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        let center = self.center();
        let half_lat = (self.max_lat - self.min_lat) * factor / 2.0;
        let half_lon = (self.max_lon - self.min_lon) * factor / 2.0;
        Self::new(
            center.latitude - half_lat,
            center.longitude - half_lon,
            center.latitude + half_lat,
            center.longitude + half_lon,
        )
    }

    /// Splits the box into four equal quadrants, ordered SW, SE, NW, NE.
    #[must_use]
    pub fn quadrants(&self) -> [Self; 4] {
        let mid = self.center();
        [
            Self::new(self.min_lat, self.min_lon, mid.latitude, mid.longitude),
            Self::new(self.min_lat, mid.longitude, mid.latitude, self.max_lon),
            Self::new(mid.latitude, self.min_lon, self.max_lat, mid.longitude),
            Self::new(mid.latitude, mid.longitude, self.max_lat, self.max_lon),
        ]
    }

    fn is_valid(&self) -> bool {
        [self.min_lat, self.min_lon, self.max_lat, self.max_lon]
            .iter()
            .all(|v| v.is_finite())
            && self.min_lat < self.max_lat
            && self.min_lon < self.max_lon
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.6},{:.6},{:.6},{:.6}",
            self.min_lat, self.min_lon, self.max_lat, self.max_lon
        )
    }
}

/// The geographic scope of a review session.
///
/// Construct through [`AreaSelection::radius`] or
/// [`AreaSelection::rectangle`] to get the validity checks. Deserialization
/// runs the same checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", try_from = "UncheckedArea")]
pub enum AreaSelection {
    /// A circle around a center point.
    Radius {
        /// Circle center.
        center: Coordinate,
        /// Radius in meters.
        radius_m: f64,
    },
    /// An axis-aligned latitude/longitude box.
    Rectangle {
        /// The box.
        bounds: BoundingBox,
    },
}

/// Wire shape of [`AreaSelection`] before validation.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum UncheckedArea {
    Radius { center: Coordinate, radius_m: f64 },
    Rectangle { bounds: BoundingBox },
}

impl TryFrom<UncheckedArea> for AreaSelection {
    type Error = AreaError;

    fn try_from(area: UncheckedArea) -> Result<Self, Self::Error> {
        match area {
            UncheckedArea::Radius { center, radius_m } => Self::radius(center, radius_m),
            UncheckedArea::Rectangle { bounds } => Self::rectangle(bounds),
        }
    }
}

impl AreaSelection {
    /// Creates a radius selection.
    ///
    /// # Errors
    ///
    /// Returns [`AreaError::InvalidRadius`] if `radius_m` is not a finite
    /// positive number.
    pub fn radius(center: Coordinate, radius_m: f64) -> Result<Self, AreaError> {
        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(AreaError::InvalidRadius { radius_m });
        }
        Ok(Self::Radius { center, radius_m })
    }

    /// Creates a rectangle selection.
    ///
    /// # Errors
    ///
    /// Returns [`AreaError::InvalidBounds`] unless `min < max` holds on
    /// both axes.
    pub fn rectangle(bounds: BoundingBox) -> Result<Self, AreaError> {
        if !bounds.is_valid() {
            return Err(AreaError::InvalidBounds { bounds });
        }
        Ok(Self::Rectangle { bounds })
    }

    #[must_use]
    pub fn center(&self) -> Coordinate {
        match self {
            Self::Radius { center, .. } => *center,
            Self::Rectangle { bounds } => bounds.center(),
        }
    }

    #[must_use]
    pub const fn is_radius(&self) -> bool {
        matches!(self, Self::Radius { .. })
    }

    /// Area of the selection in km².
    #[must_use]
    pub fn area_km2(&self) -> f64 {
        match self {
            Self::Radius { radius_m, .. } => {
                let radius_km = radius_m / 1000.0;
                std::f64::consts::PI * radius_km * radius_km
            }
            Self::Rectangle { bounds } => bounds.area_km2(),
        }
    }

    /// A selection with the same center, scaled by `factor` in linear
    /// dimension. Radius selections are additionally capped at
    /// `max_radius_m`.
    #[must_use]
    pub fn shrunk(&self, factor: f64, max_radius_m: f64) -> Self {
        match self {
            Self::Radius { center, radius_m } => Self::Radius {
                center: *center,
                radius_m: (radius_m * factor).min(max_radius_m),
            },
            Self::Rectangle { bounds } => Self::Rectangle {
                bounds: bounds.scaled(factor),
            },
        }
    }

    /// Four equal sub-rectangles for rectangle selections; `None` for
    /// radius selections, which are never split automatically.
    #[must_use]
    pub fn quadrants(&self) -> Option<Vec<Self>> {
        match self {
            Self::Radius { .. } => None,
            Self::Rectangle { bounds } => Some(
                bounds
                    .quadrants()
                    .into_iter()
                    .map(|bounds| Self::Rectangle { bounds })
                    .collect(),
            ),
        }
    }

    /// Canonical cache key for this selection.
    #[must_use]
    pub fn signature(&self) -> AreaSignature {
        match self {
            Self::Radius { center, radius_m } => AreaSignature::Radius {
                lat: to_signature_unit(center.latitude),
                lon: to_signature_unit(center.longitude),
                radius_m: to_signature_unit(*radius_m),
            },
            Self::Rectangle { bounds } => AreaSignature::Rectangle {
                min_lat: to_signature_unit(bounds.min_lat),
                min_lon: to_signature_unit(bounds.min_lon),
                max_lat: to_signature_unit(bounds.max_lat),
                max_lon: to_signature_unit(bounds.max_lon),
            },
        }
    }
}

impl fmt::Display for AreaSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Radius { center, radius_m } => write!(f, "{radius_m:.0} m around {center}"),
            Self::Rectangle { bounds } => write!(f, "bbox {bounds}"),
        }
    }
}

/// Canonical identity of an [`AreaSelection`], rounded to 4 decimal
/// places.
///
/// Values are stored as integers in units of 1e-4 so the key is
/// `Eq + Ord + Hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AreaSignature {
    /// Signature of a radius selection.
    Radius {
        /// Center latitude in 1e-4 degrees.
        lat: i64,
        /// Center longitude in 1e-4 degrees.
        lon: i64,
        /// Radius in 1e-4 meters.
        radius_m: i64,
    },
    /// Signature of a rectangle selection.
    Rectangle {
        /// Southern edge in 1e-4 degrees.
        min_lat: i64,
        /// Western edge in 1e-4 degrees.
        min_lon: i64,
        /// Northern edge in 1e-4 degrees.
        max_lat: i64,
        /// Eastern edge in 1e-4 degrees.
        max_lon: i64,
    },
}

#[allow(clippy::cast_possible_truncation)]
fn to_signature_unit(value: f64) -> i64 {
    (value * SIGNATURE_SCALE).round() as i64
}

#[allow(clippy::cast_precision_loss)]
fn from_signature_unit(value: i64) -> f64 {
    value as f64 / SIGNATURE_SCALE
}

impl fmt::Display for AreaSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Radius { lat, lon, radius_m } => write!(
                f,
                "radius:{:.4},{:.4},{:.4}",
                from_signature_unit(lat),
                from_signature_unit(lon),
                from_signature_unit(radius_m)
            ),
            Self::Rectangle {
                min_lat,
                min_lon,
                max_lat,
                max_lon,
            } => write!(
                f,
                "bbox:{:.4},{:.4},{:.4},{:.4}",
                from_signature_unit(min_lat),
                from_signature_unit(min_lon),
                from_signature_unit(max_lat),
                from_signature_unit(max_lon)
            ),
        }
    }
}
