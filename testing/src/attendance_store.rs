//! In-memory event catalog and attendance store.
//!
//! Every event lives behind its own `tokio::sync::Mutex`, which plays the
//! role of the row lock a relational store takes. Transitions on different
//! events never contend.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use futures::future::BoxFuture;
use rsvp_core::error::AttendanceError;
use rsvp_core::event::{EventRecord, Location, NewEvent};
use rsvp_core::ids::{EventId, GroupId, ImageId, LocationId, ParticipantId, UserId};
use rsvp_core::participation::{ParticipantWrite, ParticipationRecord, ParticipationStatus};
use rsvp_core::store::{
    CapacityInvariantStore, CommitResult, DecisionFn, EventDetailsLookup, EventRepository,
    ParticipationQuery,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

#[derive(Debug)]
struct EventSlot {
    event: EventRecord,
    participants: HashMap<UserId, ParticipationRecord>,
    deleted: bool,
}

/// In-memory implementation of the attendance and catalog stores.
#[derive(Clone, Debug)]
pub struct InMemoryAttendanceStore {
    slots: Arc<RwLock<HashMap<EventId, Arc<Mutex<EventSlot>>>>>,
    next_event_id: Arc<AtomicI64>,
    next_participant_id: Arc<AtomicI64>,
    yield_inside_commit: Arc<AtomicBool>,
}

impl Default for InMemoryAttendanceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAttendanceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            next_event_id: Arc::new(AtomicI64::new(1)),
            next_participant_id: Arc::new(AtomicI64::new(1)),
            yield_inside_commit: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Yield to the scheduler while holding an event's lock, to widen race
    /// windows in concurrency tests.
    pub fn yield_inside_commit(&self, enabled: bool) {
        self.yield_inside_commit.store(enabled, Ordering::SeqCst);
    }

    /// Insert an event record as is, bypassing validation.
    pub fn seed(&self, event: EventRecord) {
        let id = event.event_id.get();
        self.next_event_id.fetch_max(id + 1, Ordering::SeqCst);
        self.slots.write().unwrap().insert(
            event.event_id,
            Arc::new(Mutex::new(EventSlot {
                event,
                participants: HashMap::new(),
                deleted: false,
            })),
        );
    }

    /// Current copy of an event.
    pub async fn event(&self, event_id: EventId) -> Option<EventRecord> {
        let slot = self.slot(event_id)?;
        let guard = slot.lock().await;
        (!guard.deleted).then(|| guard.event.clone())
    }

    /// Number of participations holding a seat.
    pub async fn seats_taken(&self, event_id: EventId) -> usize {
        let Some(slot) = self.slot(event_id) else {
            return 0;
        };
        let guard = slot.lock().await;
        guard.participants.values().filter(|p| p.status.counts()).count()
    }

    fn slot(&self, event_id: EventId) -> Option<Arc<Mutex<EventSlot>>> {
        self.slots.read().unwrap().get(&event_id).cloned()
    }

    fn slot_or_not_found(&self, event_id: EventId) -> Result<Arc<Mutex<EventSlot>>, AttendanceError> {
        self.slot(event_id)
            .ok_or_else(|| AttendanceError::not_found(format!("event {event_id}")))
    }

    fn allocate_participant_id(&self) -> Result<ParticipantId, AttendanceError> {
        ParticipantId::new(self.next_participant_id.fetch_add(1, Ordering::SeqCst))
    }

    fn live_events(&self) -> Vec<Arc<Mutex<EventSlot>>> {
        self.slots.read().unwrap().values().cloned().collect()
    }
}

impl CapacityInvariantStore for InMemoryAttendanceStore {
    fn apply_transition<'a>(
        &'a self,
        event_id: EventId,
        user_id: &'a UserId,
        decide: DecisionFn,
    ) -> BoxFuture<'a, Result<CommitResult, AttendanceError>> {
        Box::pin(async move {
            let slot = self.slot_or_not_found(event_id)?;
            let mut guard = slot.lock().await;
            if guard.deleted {
                return Err(AttendanceError::not_found(format!("event {event_id}")));
            }

            let decision = decide(&guard.event, guard.participants.get(user_id))?;

            if self.yield_inside_commit.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }

            let participant = match decision.write {
                ParticipantWrite::Upsert(status) => {
                    let participant_id = match guard.participants.get(user_id) {
                        Some(existing) => existing.participant_id,
                        None => self.allocate_participant_id()?,
                    };
                    let record = ParticipationRecord {
                        participant_id,
                        user_id: user_id.clone(),
                        event_id,
                        status,
                    };
                    guard.participants.insert(user_id.clone(), record.clone());
                    Some(record)
                }
                ParticipantWrite::Remove => {
                    guard.participants.remove(user_id);
                    None
                }
            };
            guard.event.count = decision.new_count;

            Ok(CommitResult {
                decision,
                event: guard.event.clone(),
                participant,
            })
        })
    }
}

impl ParticipationQuery for InMemoryAttendanceStore {
    fn participant<'a>(
        &'a self,
        event_id: EventId,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, Result<Option<ParticipationRecord>, AttendanceError>> {
        Box::pin(async move {
            let Some(slot) = self.slot(event_id) else {
                return Ok(None);
            };
            let guard = slot.lock().await;
            Ok(guard.participants.get(user_id).cloned())
        })
    }

    fn participants(
        &self,
        event_id: EventId,
    ) -> BoxFuture<'_, Result<Vec<ParticipationRecord>, AttendanceError>> {
        Box::pin(async move {
            let Some(slot) = self.slot(event_id) else {
                return Ok(Vec::new());
            };
            let guard = slot.lock().await;
            let mut all: Vec<_> = guard.participants.values().cloned().collect();
            all.sort_by_key(|p| p.participant_id);
            Ok(all)
        })
    }

    fn participations_for_user<'a>(
        &'a self,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, Result<Vec<(EventRecord, ParticipationStatus)>, AttendanceError>> {
        Box::pin(async move {
            let mut found = Vec::new();
            for slot in self.live_events() {
                let guard = slot.lock().await;
                if guard.deleted {
                    continue;
                }
                if let Some(record) = guard.participants.get(user_id) {
                    found.push((guard.event.clone(), record.status));
                }
            }
            found.sort_by_key(|(event, _)| event.event_id);
            Ok(found)
        })
    }
}

impl EventRepository for InMemoryAttendanceStore {
    fn insert(&self, event: NewEvent) -> BoxFuture<'_, Result<EventRecord, AttendanceError>> {
        Box::pin(async move {
            let event_id = EventId::new(self.next_event_id.fetch_add(1, Ordering::SeqCst))?;
            let record = event.into_record(event_id);
            self.seed(record.clone());
            Ok(record)
        })
    }

    fn get(&self, event_id: EventId) -> BoxFuture<'_, Result<Option<EventRecord>, AttendanceError>> {
        Box::pin(async move { Ok(self.event(event_id).await) })
    }

    fn update(
        &self,
        event_id: EventId,
        change: Box<dyn FnOnce(&EventRecord) -> Result<EventRecord, AttendanceError> + Send>,
    ) -> BoxFuture<'_, Result<EventRecord, AttendanceError>> {
        Box::pin(async move {
            let slot = self.slot_or_not_found(event_id)?;
            let mut guard = slot.lock().await;
            if guard.deleted {
                return Err(AttendanceError::not_found(format!("event {event_id}")));
            }
            let mut updated = change(&guard.event)?;
            updated.event_id = guard.event.event_id;
            updated.count = guard.event.count;
            updated.capacity = guard.event.capacity;
            guard.event = updated.clone();
            Ok(updated)
        })
    }

    fn delete(&self, event_id: EventId) -> BoxFuture<'_, Result<EventRecord, AttendanceError>> {
        Box::pin(async move {
            let slot = self.slot_or_not_found(event_id)?;
            let mut guard = slot.lock().await;
            if guard.deleted {
                return Err(AttendanceError::not_found(format!("event {event_id}")));
            }
            guard.deleted = true;
            guard.participants.clear();
            let last = guard.event.clone();
            drop(guard);
            self.slots.write().unwrap().remove(&event_id);
            Ok(last)
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<EventRecord>, AttendanceError>> {
        Box::pin(async move {
            let mut events = Vec::new();
            for slot in self.live_events() {
                let guard = slot.lock().await;
                if !guard.deleted {
                    events.push(guard.event.clone());
                }
            }
            events.sort_by_key(|e| e.event_id);
            Ok(events)
        })
    }

    fn by_group(&self, group_id: GroupId) -> BoxFuture<'_, Result<Vec<EventRecord>, AttendanceError>> {
        Box::pin(async move {
            let mut events = self.list().await?;
            events.retain(|e| e.group_id == group_id);
            Ok(events)
        })
    }
}

/// In-memory location and image directory.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDetailsLookup {
    locations: Arc<RwLock<HashMap<LocationId, Location>>>,
    image_base_url: Option<String>,
}

impl InMemoryDetailsLookup {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve images as `{base}/{image_id}`.
    #[must_use]
    pub fn with_image_base_url(mut self, base: impl Into<String>) -> Self {
        self.image_base_url = Some(base.into());
        self
    }

    /// Register a location.
    #[must_use]
    pub fn with_location(self, location_id: LocationId, location: Location) -> Self {
        self.locations.write().unwrap().insert(location_id, location);
        self
    }
}

impl EventDetailsLookup for InMemoryDetailsLookup {
    fn location(&self, location_id: LocationId) -> BoxFuture<'_, Result<Location, AttendanceError>> {
        Box::pin(async move {
            self.locations
                .read()
                .unwrap()
                .get(&location_id)
                .cloned()
                .ok_or_else(|| AttendanceError::not_found(format!("location {location_id}")))
        })
    }

    fn image_url(&self, image_id: ImageId) -> BoxFuture<'_, Result<Option<String>, AttendanceError>> {
        Box::pin(async move {
            Ok(self
                .image_base_url
                .as_ref()
                .map(|base| format!("{}/{image_id}", base.trim_end_matches('/'))))
        })
    }
}
