#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Spatial query gateway boundary.
//!
//! Every source of building records implements the [`SpatialGateway`]
//! trait. Two implementations ship with the crate:
//!
//! 1. [`overpass::OverpassGateway`]: the `OpenStreetMap` Overpass API,
//!    configured via TOML files in `services/` (see [`service_registry`]).
//!    Owns all wire-level protocol, rate-limit handling, and retry.
//! 2. [`memory::StaticGateway`]: a fixed, deterministic building list
//!    filtered in memory. Used for offline runs and tests.
//!
//! Callers treat any [`GatewayError`] as a single failure signal; the
//! variants exist for logging only.

pub mod cancel;
pub mod memory;
pub mod overpass;
pub mod retry;
pub mod service_registry;

use async_trait::async_trait;
use building_queue_area_models::{AreaSelection, BoundingBox, Coordinate};
use building_queue_gateway_models::BuildingRecord;

pub use cancel::CancelSignal;

/// Errors from gateway queries.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Response was well-formed JSON but not the expected shape.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// Rate limit still exceeded after all retries.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Non-success HTTP status that is not worth retrying.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt or reason.
        message: String,
    },

    /// The backend refused to serve the query.
    #[error("Gateway unavailable: {message}")]
    Unavailable {
        /// Why the backend is unavailable.
        message: String,
    },

    /// The caller's [`CancelSignal`] fired before the query completed.
    #[error("Gateway query cancelled")]
    Cancelled,
}

/// A source of building records for a geographic area.
///
/// Implementations must return at most `limit` records, and must omit
/// buildings that already carry `skip_existing_tag` when it is `Some`.
#[async_trait]
pub trait SpatialGateway: Send + Sync {
    /// Returns buildings whose center lies within `radius_m` meters of
    /// `center`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the backend query fails.
    async fn query_radius(
        &self,
        center: Coordinate,
        radius_m: f64,
        limit: usize,
        skip_existing_tag: Option<&str>,
    ) -> Result<Vec<BuildingRecord>, GatewayError>;

    /// Returns buildings whose center lies within `bounds`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the backend query fails.
    async fn query_bounding_box(
        &self,
        bounds: BoundingBox,
        limit: usize,
        skip_existing_tag: Option<&str>,
    ) -> Result<Vec<BuildingRecord>, GatewayError>;

    /// Looks up a single building by source id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the backend query fails.
    async fn query_by_id(&self, id: u64) -> Result<Option<BuildingRecord>, GatewayError>;

    /// Dispatches to [`Self::query_radius`] or
    /// [`Self::query_bounding_box`] depending on the area variant.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the backend query fails.
    async fn query_area(
        &self,
        area: &AreaSelection,
        limit: usize,
        skip_existing_tag: Option<&str>,
    ) -> Result<Vec<BuildingRecord>, GatewayError> {
        match area {
            AreaSelection::Radius { center, radius_m } => {
                self.query_radius(*center, *radius_m, limit, skip_existing_tag)
                    .await
            }
            AreaSelection::Rectangle { bounds } => {
                self.query_bounding_box(*bounds, limit, skip_existing_tag)
                    .await
            }
        }
    }
}
