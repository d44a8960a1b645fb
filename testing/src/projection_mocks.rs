//! In-memory secondary event store.
//!
//! Mirrors the Postgres store used by consuming services, with a switch to
//! make writes fail so redelivery paths can be exercised.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use rsvp_core::ids::EventId;
use rsvp_core::projection::{ProjectionError, Result, SecondaryEventRecord, SecondaryEventStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// In-memory [`SecondaryEventStore`].
///
/// # Example
///
/// ```
/// use rsvp_testing::InMemorySecondaryEventStore;
///
/// let store = InMemorySecondaryEventStore::new();
/// assert!(store.is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemorySecondaryEventStore {
    records: Arc<RwLock<HashMap<EventId, SecondaryEventRecord>>>,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl InMemorySecondaryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make writes fail with a storage error until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes (upserts and removals).
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }

    /// Copy of a record, without going through the async trait.
    #[must_use]
    pub fn snapshot(&self, event_id: EventId) -> Option<SecondaryEventRecord> {
        self.records.read().unwrap().get(&event_id).cloned()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ProjectionError::Storage("injected write failure".to_string()));
        }
        Ok(())
    }
}

impl SecondaryEventStore for InMemorySecondaryEventStore {
    async fn upsert(&self, record: &SecondaryEventRecord) -> Result<()> {
        self.check_writable()?;
        self.records
            .write()
            .unwrap()
            .insert(record.event_id, record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, event_id: EventId) -> Result<bool> {
        self.check_writable()?;
        let existed = self.records.write().unwrap().remove(&event_id).is_some();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(existed)
    }

    async fn get(&self, event_id: EventId) -> Result<Option<SecondaryEventRecord>> {
        Ok(self.snapshot(event_id))
    }
}
