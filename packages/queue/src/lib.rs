#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Fixed-capacity review candidate queue.
//!
//! A [`CandidateQueue`] is bound to one [`AreaSelection`] per review
//! session. It fills itself through the [`QueryPlanner`] and the gateway,
//! hands candidates out in FIFO order, and tops itself up when its depth
//! falls to the low-water mark.
//!
//! Every building id lives in at most one of three places: the live
//! queue, the in-flight set (handed out by [`CandidateQueue::next`] but not
//! yet marked), or the processed set. Processed ids are never enqueued
//! again for the lifetime of the session.
//!
//! Failures never escape: they surface as `false` from
//! [`CandidateQueue::initialize`] and [`CandidateQueue::refill`], which the
//! caller renders as "no more buildings in this area".
//!
//! The queue is single-consumer. Mutating operations take `&mut self`;
//! callers sharing one queue across tasks must wrap it in a mutex.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use building_queue_area_models::AreaSelection;
use building_queue_density::{DensityCache, DensityEstimator};
use building_queue_gateway::{CancelSignal, GatewayError, SpatialGateway};
use building_queue_gateway_models::BuildingRecord;
use building_queue_planner::QueryPlanner;
use building_queue_queue_models::{Candidate, QueueEvent, QueueSettings, QueueState};
use tokio::sync::broadcast;

/// What one acquisition round achieved.
struct FillOutcome {
    added: usize,
    error: Option<GatewayError>,
}

/// A deduplicating, self-refilling queue of review candidates.
pub struct CandidateQueue {
    gateway: Arc<dyn SpatialGateway>,
    planner: QueryPlanner,
    settings: QueueSettings,
    queue: VecDeque<Candidate>,
    queued_ids: BTreeSet<u64>,
    in_flight: BTreeSet<u64>,
    processed: BTreeSet<u64>,
    area: Option<AreaSelection>,
    state: QueueState,
    low_signalled: bool,
    exhausted: bool,
    round: usize,
    events: broadcast::Sender<QueueEvent>,
}

impl CandidateQueue {
    /// Creates an uninitialized queue.
    ///
    /// `planner` should be built over the same gateway.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn SpatialGateway>,
        planner: QueryPlanner,
        settings: QueueSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));
        Self {
            gateway,
            planner,
            settings,
            queue: VecDeque::new(),
            queued_ids: BTreeSet::new(),
            in_flight: BTreeSet::new(),
            processed: BTreeSet::new(),
            area: None,
            state: QueueState::Uninitialized,
            low_signalled: false,
            exhausted: false,
            round: 0,
            events,
        }
    }

    /// Creates a queue with its own planner and a fresh density cache.
    #[must_use]
    pub fn with_gateway(gateway: Arc<dyn SpatialGateway>, settings: QueueSettings) -> Self {
        let estimator = DensityEstimator::new(gateway.clone(), Arc::new(DensityCache::new()));
        Self::new(gateway, QueryPlanner::new(estimator), settings)
    }

    /// Subscribes to [`QueueEvent`]s emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Binds `area` and fills the queue from scratch.
    ///
    /// Queued and in-flight candidates are dropped. Processed ids survive
    /// when `area` has the same signature as the previously bound area, so
    /// re-initializing never re-shows reviewed buildings; binding a
    /// different area starts a fresh session.
    ///
    /// Returns `true` if at least one candidate was enqueued.
    pub async fn initialize(&mut self, area: AreaSelection, cancel: &CancelSignal) -> bool {
        let same_area = self
            .area
            .is_some_and(|bound| bound.signature() == area.signature());

        self.queue.clear();
        self.queued_ids.clear();
        self.in_flight.clear();
        if !same_area {
            self.processed.clear();
        }
        self.area = Some(area);
        self.state = QueueState::Ready;
        self.low_signalled = false;
        self.exhausted = false;
        self.round = 0;

        let capacity = self.settings.capacity;
        let outcome = self.acquire(&area, capacity, capacity, cancel).await;

        match &outcome.error {
            Some(e) => log::warn!(
                "Initializing queue for {area} failed after {} candidates: {e}",
                outcome.added
            ),
            None => log::info!(
                "Initialized queue for {area} with {} candidates",
                outcome.added
            ),
        }

        outcome.added > 0
    }

    /// Dequeues the next candidate.
    ///
    /// When depth is at or below the low-water mark, makes one best-effort
    /// [`Self::refill`] before dequeuing. The first call after the crossing
    /// also emits [`QueueEvent::RunningLow`].
    ///
    /// A refill that failed is retried on the next call. Once a refill
    /// completes without finding anything new, further calls stop querying
    /// until a fill adds candidates again. Returns `None` once the area is
    /// exhausted.
    pub async fn next(&mut self, cancel: &CancelSignal) -> Option<Candidate> {
        if self.state != QueueState::Uninitialized
            && self.area.is_some()
            && self.queue.len() <= self.settings.low_water_mark
        {
            let remaining = self.queue.len();
            if !self.low_signalled {
                self.low_signalled = true;
                log::debug!("Queue running low ({remaining} left)");
                self.emit(QueueEvent::RunningLow { remaining });
            }
            if !self.exhausted {
                self.refill(cancel).await;
            }
        }

        let candidate = self.queue.pop_front()?;
        self.queued_ids.remove(&candidate.source_id);
        self.in_flight.insert(candidate.source_id);
        Some(candidate)
    }

    /// Tops the queue back up to capacity.
    ///
    /// Requests `needed × over_fetch_factor` buildings to absorb
    /// duplicates and appends those that are neither processed, in flight,
    /// nor already queued. Returns `true` if anything was added (or the
    /// queue was already full); `false` means the area is likely
    /// exhausted, the gateway failed, or the queue is not initialized.
    pub async fn refill(&mut self, cancel: &CancelSignal) -> bool {
        if self.state == QueueState::Uninitialized {
            log::debug!("refill() called on an uninitialized queue; ignoring");
            return false;
        }
        let Some(area) = self.area else {
            return false;
        };

        let needed = self.settings.capacity.saturating_sub(self.queue.len());
        if needed == 0 {
            return true;
        }

        let request = needed.saturating_mul(self.settings.over_fetch_factor);
        let outcome = self.acquire(&area, request, needed, cancel).await;

        match &outcome.error {
            Some(e) => log::warn!(
                "Refill for {area} failed after {} of {needed} candidates: {e}",
                outcome.added
            ),
            None if outcome.added == 0 => {
                self.exhausted = true;
                log::info!("Refill for {area} found no new buildings; area likely exhausted");
            }
            None => log::debug!("Refill for {area} added {} of {needed}", outcome.added),
        }

        outcome.added > 0
    }

    /// Records that the reviewer has handled `id`.
    ///
    /// Idempotent with respect to the processed set, but emits
    /// [`QueueEvent::Processed`] on every call.
    pub fn mark_processed(&mut self, id: u64) {
        self.processed.insert(id);
        self.in_flight.remove(&id);
        if self.queued_ids.remove(&id) {
            self.queue.retain(|c| c.source_id != id);
        }

        self.emit(QueueEvent::Processed {
            id,
            remaining: self.queue.len(),
            total_processed: self.processed.len(),
        });
    }

    /// Drops all candidates and forgets processed ids.
    ///
    /// The area stays bound, but the queue is uninitialized: call
    /// [`Self::initialize`] before refilling again.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.queued_ids.clear();
        self.in_flight.clear();
        self.processed.clear();
        self.low_signalled = false;
        self.exhausted = false;
        self.round = 0;
        self.state = QueueState::Uninitialized;
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    #[must_use]
    pub fn is_processed(&self, id: u64) -> bool {
        self.processed.contains(&id)
    }

    #[must_use]
    pub const fn state(&self) -> QueueState {
        self.state
    }

    #[must_use]
    pub const fn bound_area(&self) -> Option<&AreaSelection> {
        self.area.as_ref()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.settings.capacity
    }

    #[must_use]
    pub const fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Whether depth is at or below the low-water mark.
    #[must_use]
    pub fn is_running_low(&self) -> bool {
        self.state != QueueState::Uninitialized
            && self.queue.len() <= self.settings.low_water_mark
    }

    /// The candidate [`Self::next`] would return, without refilling.
    #[must_use]
    pub fn peek(&self) -> Option<&Candidate> {
        self.queue.front()
    }

    /// Iterates queued candidates in service order.
    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.queue.iter()
    }

    /// Plans and runs one acquisition round, enqueuing at most `max_add`
    /// new candidates. Candidates enqueued before an error or cancellation
    /// stay queued.
    async fn acquire(
        &mut self,
        area: &AreaSelection,
        request_count: usize,
        max_add: usize,
        cancel: &CancelSignal,
    ) -> FillOutcome {
        self.state = QueueState::Refilling;

        let recommendation = self.planner.recommend(area, request_count, cancel).await;
        let targets = self.query_targets(area, recommendation.sub_areas.as_deref());
        self.round += 1;

        let gateway = self.gateway.clone();
        let skip_tag = self.settings.skip_existing_tag.clone();
        let per_target_limit = recommendation.limit.div_ceil(targets.len().max(1));

        let mut outcome = FillOutcome {
            added: 0,
            error: None,
        };

        for target in &targets {
            if outcome.added >= max_add || per_target_limit == 0 {
                break;
            }

            match cancel
                .run(gateway.query_area(target, per_target_limit, skip_tag.as_deref()))
                .await
            {
                Ok(records) => {
                    log::trace!("{target}: gateway returned {} buildings", records.len());
                    outcome.added += self.enqueue(records, max_add - outcome.added);
                }
                Err(e) => {
                    outcome.error = Some(e);
                    break;
                }
            }
        }

        self.state = QueueState::Ready;
        outcome
    }

    /// Areas to query this round. Split plans rotate their starting
    /// quadrant every round so refills do not keep draining the same one.
    fn query_targets(
        &self,
        area: &AreaSelection,
        sub_areas: Option<&[AreaSelection]>,
    ) -> Vec<AreaSelection> {
        match sub_areas {
            Some(subs) if !subs.is_empty() => {
                let start = self.round % subs.len();
                subs[start..].iter().chain(&subs[..start]).copied().collect()
            }
            _ => vec![*area],
        }
    }

    /// Appends up to `max_add` records that are not processed, in flight,
    /// or already queued, and never beyond capacity.
    fn enqueue(&mut self, records: Vec<BuildingRecord>, max_add: usize) -> usize {
        let mut added = 0;

        for record in records {
            if added >= max_add || self.queue.len() >= self.settings.capacity {
                break;
            }
            if self.processed.contains(&record.id) || self.in_flight.contains(&record.id) {
                continue;
            }
            if !self.queued_ids.insert(record.id) {
                continue;
            }
            self.queue.push_back(Candidate::from_record(record));
            added += 1;
        }

        if added > 0 {
            self.exhausted = false;
        }
        if self.queue.len() > self.settings.low_water_mark {
            self.low_signalled = false;
        }

        added
    }

    fn emit(&self, event: QueueEvent) {
        log::trace!("Queue event: {event:?}");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
