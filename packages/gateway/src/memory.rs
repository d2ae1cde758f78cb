//! In-memory gateway over a fixed building list.
//!
//! Results are deterministic: buildings are returned in list order,
//! filtered by area and skip tag, truncated to the requested limit. The
//! list can be swapped and the gateway switched into a failing mode at
//! runtime, which is what offline runs and tests need.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use building_queue_area_models::{BoundingBox, Coordinate};
use building_queue_gateway_models::BuildingRecord;
use geo::{Distance, Haversine, Point};

use crate::{GatewayError, SpatialGateway};

/// A [`SpatialGateway`] backed by a fixed list of buildings.
#[derive(Debug, Default)]
pub struct StaticGateway {
    buildings: RwLock<Vec<BuildingRecord>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl StaticGateway {
    #[must_use]
    pub fn new(buildings: Vec<BuildingRecord>) -> Self {
        Self {
            buildings: RwLock::new(buildings),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Replaces the building list.
    pub fn set_buildings(&self, buildings: Vec<BuildingRecord>) {
        *self
            .buildings
            .write()
            .unwrap_or_else(PoisonError::into_inner) = buildings;
    }

    /// While `failing` is set, every query returns
    /// [`GatewayError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of queries received so far, including failed ones.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn begin_call(&self) -> Result<(), GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable {
                message: "static gateway is in failing mode".to_string(),
            });
        }
        Ok(())
    }

    fn select<P>(
        &self,
        limit: usize,
        skip_existing_tag: Option<&str>,
        in_area: P,
    ) -> Vec<BuildingRecord>
    where
        P: Fn(&BuildingRecord) -> bool,
    {
        self.buildings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|b| skip_existing_tag.is_none_or(|tag| !b.has_tag(tag)))
            .filter(|b| in_area(b))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SpatialGateway for StaticGateway {
    async fn query_radius(
        &self,
        center: Coordinate,
        radius_m: f64,
        limit: usize,
        skip_existing_tag: Option<&str>,
    ) -> Result<Vec<BuildingRecord>, GatewayError> {
        self.begin_call()?;
        let origin = Point::new(center.longitude, center.latitude);
        Ok(self.select(limit, skip_existing_tag, |b| {
            let point = Point::new(b.center.longitude, b.center.latitude);
            Haversine.distance(origin, point) <= radius_m
        }))
    }

    async fn query_bounding_box(
        &self,
        bounds: BoundingBox,
        limit: usize,
        skip_existing_tag: Option<&str>,
    ) -> Result<Vec<BuildingRecord>, GatewayError> {
        self.begin_call()?;
        Ok(self.select(limit, skip_existing_tag, |b| bounds.contains(&b.center)))
    }

    async fn query_by_id(&self, id: u64) -> Result<Option<BuildingRecord>, GatewayError> {
        self.begin_call()?;
        Ok(self
            .buildings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|b| b.id == id)
            .cloned())
    }
}
