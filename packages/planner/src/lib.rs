#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Query planning.
//!
//! Turns a desired candidate count and a density estimate into concrete
//! gateway query parameters: a result limit that never exceeds
//! [`GLOBAL_RESULT_CAP`], a suggested radius for radius areas, and a
//! quadrant split for rectangles holding more than [`SPLIT_THRESHOLD`]
//! buildings.
//!
//! Planning always succeeds because the density estimator cannot fail.

use std::fmt::Write as _;

use building_queue_area_models::AreaSelection;
use building_queue_density::DensityEstimator;
use building_queue_density_models::{DensityEstimate, DensityLevel};
use building_queue_gateway::CancelSignal;
use serde::Serialize;

/// Hard ceiling on results per query, regardless of the requested count.
pub const GLOBAL_RESULT_CAP: usize = 200;

/// Estimated building count above which an area should be split.
pub const SPLIT_THRESHOLD: u64 = 1000;

/// Lower clamp for recommended radii.
pub const MIN_RADIUS_KM: f64 = 0.1;

/// Upper clamp for recommended radii.
pub const MAX_RADIUS_KM: f64 = 10.0;

/// Radius recommended when density is unknown or zero.
pub const DEFAULT_RADIUS_KM: f64 = 1.0;

/// Concrete, cost-bounded parameters for one acquisition round.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRecommendation {
    /// Result limit to request, at most [`GLOBAL_RESULT_CAP`].
    pub limit: usize,
    /// Radius that would hold about the requested count, for radius
    /// areas only.
    pub radius_km: Option<f64>,
    /// Diagnostic explanation; never drives behavior.
    pub rationale: String,
    /// Whether the area is estimated to exceed [`SPLIT_THRESHOLD`].
    pub should_split: bool,
    /// Quadrants to query instead of the whole area (rectangles only).
    pub sub_areas: Option<Vec<AreaSelection>>,
    /// Density class the plan was computed from.
    pub density_level: DensityLevel,
}

/// Plans queries for an area using a [`DensityEstimator`].
#[derive(Clone)]
pub struct QueryPlanner {
    estimator: DensityEstimator,
}

impl QueryPlanner {
    #[must_use]
    pub const fn new(estimator: DensityEstimator) -> Self {
        Self { estimator }
    }

    #[must_use]
    pub const fn estimator(&self) -> &DensityEstimator {
        &self.estimator
    }

    /// Density level already known for `area`, without probing.
    #[must_use]
    pub fn cached_level(&self, area: &AreaSelection) -> Option<DensityLevel> {
        self.estimator.cached(area).map(|e| e.level)
    }

    /// Recommends query parameters for fetching `target_count` candidates
    /// from `area`.
    ///
    /// A `target_count` of zero never reaches the gateway: the plan uses a
    /// cached estimate if one exists and the fallback otherwise.
    pub async fn recommend(
        &self,
        area: &AreaSelection,
        target_count: usize,
        cancel: &CancelSignal,
    ) -> QueryRecommendation {
        let estimate = if target_count == 0 {
            self.estimator
                .cached(area)
                .unwrap_or_else(|| DensityEstimate::fallback(area.area_km2()))
        } else {
            self.estimator.estimate(area, cancel).await
        };

        let recommendation = plan(area, target_count, &estimate);
        log::debug!(
            "Plan for {area} (target {target_count}): {}",
            recommendation.rationale
        );
        recommendation
    }
}

/// Builds a recommendation from an already-known estimate.
#[must_use]
pub fn plan(
    area: &AreaSelection,
    target_count: usize,
    estimate: &DensityEstimate,
) -> QueryRecommendation {
    let limit = target_count.min(GLOBAL_RESULT_CAP);

    let radius_km = area
        .is_radius()
        .then(|| recommended_radius_km(target_count, estimate.buildings_per_km2));

    let should_split = estimate.estimated_total_buildings > SPLIT_THRESHOLD;
    let sub_areas = if should_split {
        area.quadrants()
    } else {
        None
    };

    let rationale = rationale(
        target_count,
        limit,
        estimate,
        should_split,
        sub_areas.as_ref().map(Vec::len),
    );

    QueryRecommendation {
        limit,
        radius_km,
        rationale,
        should_split,
        sub_areas,
        density_level: estimate.level,
    }
}

/// Radius in km of a circle expected to hold `target_count` buildings at
/// `density_per_km2`, clamped to [`MIN_RADIUS_KM`]..=[`MAX_RADIUS_KM`].
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn recommended_radius_km(target_count: usize, density_per_km2: f64) -> f64 {
    if density_per_km2 <= 0.0 || !density_per_km2.is_finite() {
        return DEFAULT_RADIUS_KM;
    }
    let area_km2 = target_count as f64 / density_per_km2;
    (area_km2 / std::f64::consts::PI)
        .sqrt()
        .clamp(MIN_RADIUS_KM, MAX_RADIUS_KM)
}

fn rationale(
    target_count: usize,
    limit: usize,
    estimate: &DensityEstimate,
    should_split: bool,
    quadrant_count: Option<usize>,
) -> String {
    let mut text = format!(
        "{} density (~{:.1} buildings/km², ~{} buildings in {:.2} km²)",
        estimate.level.label(),
        estimate.buildings_per_km2,
        estimate.estimated_total_buildings,
        estimate.area_km2,
    );

    if target_count == 0 {
        text.push_str("; nothing requested");
        return text;
    }

    let _ = write!(text, "; limit {limit}");
    if limit < target_count {
        let _ = write!(
            text,
            ", capped at {GLOBAL_RESULT_CAP} (requested {target_count})"
        );
    }

    if should_split {
        match quadrant_count {
            Some(n) => {
                let _ = write!(
                    text,
                    "; over {SPLIT_THRESHOLD} buildings, split into {n} sub-areas"
                );
            }
            None => {
                let _ = write!(
                    text,
                    "; over {SPLIT_THRESHOLD} buildings, consider a smaller radius"
                );
            }
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use building_queue_area_models::{BoundingBox, Coordinate};
    use building_queue_density::DensityCache;
    use building_queue_gateway::memory::StaticGateway;
    use building_queue_gateway_models::BuildingRecord;
    use chrono::{DateTime, Utc};

    use super::*;

    fn building(id: u64) -> BuildingRecord {
        BuildingRecord {
            id,
            center: Coordinate::new(0.0, 0.0),
            bounds: None,
            tags: BTreeMap::new(),
            version: 1,
            last_modified: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    fn planner(buildings: Vec<BuildingRecord>) -> (QueryPlanner, Arc<StaticGateway>) {
        let gateway = Arc::new(StaticGateway::new(buildings));
        let estimator = DensityEstimator::new(gateway.clone(), Arc::new(DensityCache::new()));
        (QueryPlanner::new(estimator), gateway)
    }

    fn radius_area() -> AreaSelection {
        AreaSelection::radius(Coordinate::new(0.0, 0.0), 1000.0).unwrap()
    }

    fn rect_area() -> AreaSelection {
        AreaSelection::rectangle(BoundingBox::new(0.0, 0.0, 0.1, 0.1)).unwrap()
    }

    #[test]
    fn limit_never_exceeds_global_cap() {
        let estimate = DensityEstimate::from_density(50.0, 1.0);
        for target in [1, 20, 199, 200, 201, 500, 10_000, usize::MAX] {
            let rec = plan(&radius_area(), target, &estimate);
            assert!(rec.limit <= GLOBAL_RESULT_CAP);
            assert_eq!(rec.limit, target.min(GLOBAL_RESULT_CAP));
        }
    }

    #[test]
    fn radius_follows_density() {
        // 20 buildings at 20/km² need 1 km², r = sqrt(1/π).
        let radius = recommended_radius_km(20, 20.0);
        assert!((radius - (1.0 / std::f64::consts::PI).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn radius_is_clamped() {
        assert!((recommended_radius_km(20, 1_000_000.0) - MIN_RADIUS_KM).abs() < f64::EPSILON);
        assert!((recommended_radius_km(200, 0.001) - MAX_RADIUS_KM).abs() < f64::EPSILON);
        assert!((recommended_radius_km(20, 0.0) - DEFAULT_RADIUS_KM).abs() < f64::EPSILON);
        assert!((recommended_radius_km(20, -4.0) - DEFAULT_RADIUS_KM).abs() < f64::EPSILON);
    }

    #[test]
    fn rectangles_have_no_radius() {
        let estimate = DensityEstimate::from_density(50.0, 1.0);
        assert!(plan(&rect_area(), 20, &estimate).radius_km.is_none());
        assert!(plan(&radius_area(), 20, &estimate).radius_km.is_some());
    }

    #[test]
    fn dense_rectangle_splits_into_quadrants() {
        let area = rect_area();
        let estimate = DensityEstimate::from_density(2000.0, area.area_km2());
        assert!(estimate.estimated_total_buildings > SPLIT_THRESHOLD);

        let rec = plan(&area, 20, &estimate);
        assert!(rec.should_split);
        let quads = rec.sub_areas.as_ref().unwrap();
        assert_eq!(quads.len(), 4);
        assert!(rec.rationale.contains("split into 4 sub-areas"));
    }

    #[test]
    fn dense_radius_flags_split_without_sub_areas() {
        let estimate = DensityEstimate::from_density(2000.0, std::f64::consts::PI);
        let rec = plan(&radius_area(), 20, &estimate);
        assert!(rec.should_split);
        assert!(rec.sub_areas.is_none());
        assert!(rec.rationale.contains("smaller radius"));
    }

    #[test]
    fn exactly_threshold_does_not_split() {
        let estimate = DensityEstimate::from_density(1000.0, 1.0);
        assert_eq!(estimate.estimated_total_buildings, SPLIT_THRESHOLD);
        let rec = plan(&rect_area(), 20, &estimate);
        assert!(!rec.should_split);
        assert!(rec.sub_areas.is_none());
    }

    #[test]
    fn rationale_is_deterministic() {
        let estimate = DensityEstimate::from_density(300.0, 2.0);
        let a = plan(&radius_area(), 500, &estimate);
        let b = plan(&radius_area(), 500, &estimate);
        assert_eq!(a.rationale, b.rationale);
        assert!(a.rationale.starts_with("high density"));
    }

    #[tokio::test]
    async fn zero_target_makes_no_gateway_call() {
        let (planner, gateway) = planner(vec![building(1)]);
        let rec = planner
            .recommend(&radius_area(), 0, &CancelSignal::new())
            .await;

        assert_eq!(rec.limit, 0);
        assert_eq!(rec.density_level, DensityLevel::Medium);
        assert_eq!(gateway.call_count(), 0);
        assert!(rec.rationale.contains("nothing requested"));
    }

    #[tokio::test]
    async fn zero_target_uses_cached_level() {
        let (planner, gateway) = planner(vec![building(1)]);
        let area = radius_area();
        let cancel = CancelSignal::new();

        planner.recommend(&area, 20, &cancel).await;
        assert_eq!(planner.cached_level(&area), Some(DensityLevel::VeryLow));

        let rec = planner.recommend(&area, 0, &cancel).await;
        assert_eq!(rec.density_level, DensityLevel::VeryLow);
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn large_target_without_density_info_is_capped() {
        let (planner, gateway) = planner(Vec::new());
        gateway.set_failing(true);

        let rec = planner
            .recommend(&radius_area(), 500, &CancelSignal::new())
            .await;

        assert_eq!(rec.limit, 200);
        assert_eq!(rec.density_level, DensityLevel::Medium);
        assert!(rec.rationale.contains("capped at 200 (requested 500)"));
    }
}
