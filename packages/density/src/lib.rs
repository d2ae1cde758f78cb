#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Probe-based building density estimation.
//!
//! Density is inferred from small, cheap probe queries instead of
//! enumerating an area:
//!
//! 1. Probe the full area with a limit of [`PROBE_SAMPLE_LIMIT`].
//! 2. If the probe comes back short, it saw every building: density is
//!    `count / area`.
//! 3. If it saturates, probe a sub-area at [`SUB_AREA_FACTOR`] of the
//!    linear size around the same center (radius capped at
//!    [`SUB_AREA_MAX_RADIUS_M`]) and extrapolate from that. A saturated
//!    sub-probe shrinks once more, up to [`MAX_SUB_PROBES`] levels.
//! 4. Every saturated probe proves a lower bound of `limit / probe_area`.
//!    The extrapolated density never drops below the highest such bound,
//!    so an empty sub-area cannot report a dense area as empty.
//!
//! Worst-case cost is therefore `1 + MAX_SUB_PROBES` small queries no
//! matter how dense the area is. Estimation never fails: gateway errors
//! degrade to [`DensityEstimate::fallback`].

pub mod cache;

use std::sync::Arc;

use building_queue_area_models::AreaSelection;
use building_queue_density_models::DensityEstimate;
use building_queue_gateway::{CancelSignal, GatewayError, SpatialGateway};

pub use cache::DensityCache;

/// Result limit of the full-area probe.
pub const PROBE_SAMPLE_LIMIT: usize = 10;

/// Result limit of each sub-area probe.
pub const SUB_PROBE_SAMPLE_LIMIT: usize = 50;

/// Linear scale of a sub-area relative to the area it was cut from.
pub const SUB_AREA_FACTOR: f64 = 0.1;

/// Upper bound on a sub-area radius.
pub const SUB_AREA_MAX_RADIUS_M: f64 = 500.0;

/// How many times a saturated probe may shrink further.
pub const MAX_SUB_PROBES: usize = 2;

/// Estimates buildings per km² for an area.
///
/// Stateless apart from the injected [`DensityCache`].
#[derive(Clone)]
pub struct DensityEstimator {
    gateway: Arc<dyn SpatialGateway>,
    cache: Arc<DensityCache>,
}

impl DensityEstimator {
    #[must_use]
    pub fn new(gateway: Arc<dyn SpatialGateway>, cache: Arc<DensityCache>) -> Self {
        Self { gateway, cache }
    }

    #[must_use]
    pub const fn cache(&self) -> &Arc<DensityCache> {
        &self.cache
    }

    /// Returns the cached estimate for `area` without probing.
    #[must_use]
    pub fn cached(&self, area: &AreaSelection) -> Option<DensityEstimate> {
        self.cache.get(&area.signature())
    }

    /// Estimates the building density of `area`.
    ///
    /// Cached estimates are returned without touching the gateway. Probe
    /// failures (including cancellation) return the uncached
    /// [`DensityEstimate::fallback`].
    pub async fn estimate(&self, area: &AreaSelection, cancel: &CancelSignal) -> DensityEstimate {
        let signature = area.signature();
        if let Some(hit) = self.cache.get(&signature) {
            log::trace!("Density cache hit for {signature}");
            return hit;
        }

        let area_km2 = area.area_km2();
        match self.probe(area, area_km2, cancel).await {
            Ok(estimate) => {
                log::debug!(
                    "Estimated {:.2} buildings/km² ({}) over {area_km2:.3} km² for {area}",
                    estimate.buildings_per_km2,
                    estimate.level.label(),
                );
                self.cache.insert(signature, estimate)
            }
            Err(e) => {
                let fallback = DensityEstimate::fallback(area_km2);
                log::warn!(
                    "Density probe failed for {area}: {e}; assuming {} buildings/km²",
                    fallback.buildings_per_km2
                );
                fallback
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    async fn probe(
        &self,
        area: &AreaSelection,
        area_km2: f64,
        cancel: &CancelSignal,
    ) -> Result<DensityEstimate, GatewayError> {
        if area_km2 <= 0.0 || !area_km2.is_finite() {
            return Ok(DensityEstimate::from_density(0.0, 0.0));
        }

        let sample = cancel
            .run(self.gateway.query_area(area, PROBE_SAMPLE_LIMIT, None))
            .await?;

        if sample.len() < PROBE_SAMPLE_LIMIT {
            let density = sample.len() as f64 / area_km2;
            return Ok(DensityEstimate::from_density(density, area_km2));
        }

        // The full area holds at least PROBE_SAMPLE_LIMIT buildings, so
        // that lower bound survives an empty sub-area.
        let mut floor = PROBE_SAMPLE_LIMIT as f64 / area_km2;
        let mut current = *area;

        for level in 1..=MAX_SUB_PROBES {
            current = current.shrunk(SUB_AREA_FACTOR, SUB_AREA_MAX_RADIUS_M);
            let sub_km2 = current.area_km2();
            if sub_km2 <= 0.0 {
                break;
            }

            let sub_sample = cancel
                .run(
                    self.gateway
                        .query_area(&current, SUB_PROBE_SAMPLE_LIMIT, None),
                )
                .await?;
            log::trace!(
                "Sub-probe {level} over {sub_km2:.4} km² returned {} buildings",
                sub_sample.len()
            );

            if sub_sample.len() < SUB_PROBE_SAMPLE_LIMIT {
                let density = (sub_sample.len() as f64 / sub_km2).max(floor);
                return Ok(DensityEstimate::from_density(density, area_km2));
            }

            floor = floor.max(SUB_PROBE_SAMPLE_LIMIT as f64 / sub_km2);
        }

        Ok(DensityEstimate::from_density(floor, area_km2))
    }
}
