//! Downstream read model of events owned by another service.
//!
//! ```text
//! Owning service:               Consuming service:
//! ┌─────────────────┐          ┌──────────────────────┐
//! │  events table   │          │  secondary_events    │
//! │  participants   │          │  (keyed by event id) │
//! └────────┬────────┘          └──────────▲───────────┘
//!          │ snapshots                    │ upsert / remove
//!          ▼                              │
//! ┌────────────────────────────────────────────────────┐
//! │          event-mutations topic (Redpanda)          │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! A [`SecondaryEventRecord`] is fully determined by the last message applied
//! for its event id. Applying the same message twice leaves the same record.

use crate::event::{EventStatus, Location};
use crate::ids::{EventId, GroupId};
use crate::message::{EventSnapshot, WIRE_TIME_FORMAT};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;

/// Error type for projection operations.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// Local copy of an event kept by a consuming service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryEventRecord {
    /// Key.
    pub event_id: EventId,
    /// Owning group.
    pub group_id: GroupId,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Start time.
    pub start_time: NaiveDateTime,
    /// End time.
    pub end_time: NaiveDateTime,
    /// Address.
    pub location: Location,
    /// Attendee count at the time of the snapshot.
    pub attendee_count: u32,
    /// Capacity.
    pub capacity: u32,
    /// Lifecycle status.
    pub status: EventStatus,
    /// Cover image URL.
    pub image_url: Option<String>,
    /// When this consumer applied the snapshot.
    pub applied_at: DateTime<Utc>,
}

impl SecondaryEventRecord {
    /// Build the record from a received snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &EventSnapshot, applied_at: DateTime<Utc>) -> Self {
        Self {
            event_id: snapshot.event_id,
            group_id: snapshot.group_id,
            title: snapshot.event_title.clone(),
            description: snapshot.event_description.clone(),
            start_time: snapshot.event_start_time,
            end_time: snapshot.event_end_time,
            location: snapshot.location(),
            attendee_count: snapshot.count,
            capacity: snapshot.capacity,
            status: snapshot.status,
            image_url: snapshot.image_url.clone(),
            applied_at,
        }
    }

    /// Same content, ignoring `applied_at`.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        Self {
            applied_at: other.applied_at,
            ..self.clone()
        } == *other
    }

    /// Flat property map exported to the recommendation service.
    ///
    /// Status is lower-cased; a missing image is exported as `null`.
    #[must_use]
    pub fn properties(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("groupId".into(), Value::from(self.group_id.get()));
        map.insert("eventTitle".into(), Value::from(self.title.clone()));
        map.insert("eventDescription".into(), Value::from(self.description.clone()));
        map.insert(
            "eventStartTime".into(),
            Value::from(self.start_time.format(WIRE_TIME_FORMAT).to_string()),
        );
        map.insert(
            "eventEndTime".into(),
            Value::from(self.end_time.format(WIRE_TIME_FORMAT).to_string()),
        );
        map.insert("eventLocationStreet".into(), Value::from(self.location.street.clone()));
        map.insert("eventLocationCity".into(), Value::from(self.location.city.clone()));
        map.insert("eventLocationProvince".into(), Value::from(self.location.province.clone()));
        map.insert("eventLocationCountry".into(), Value::from(self.location.country.clone()));
        map.insert("eventAttendeeCount".into(), Value::from(self.attendee_count));
        map.insert("eventCapacity".into(), Value::from(self.capacity));
        map.insert(
            "eventStatus".into(),
            Value::from(self.status.as_str().to_ascii_lowercase()),
        );
        map.insert(
            "eventImageUrl".into(),
            self.image_url.clone().map_or(Value::Null, Value::from),
        );
        map
    }
}

/// Storage for [`SecondaryEventRecord`]s keyed by event id.
///
/// Writes are last-applied-wins; implementations never compare versions.
pub trait SecondaryEventStore: Send + Sync {
    /// Insert or replace the record for its event id.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the write fails.
    fn upsert(&self, record: &SecondaryEventRecord) -> impl Future<Output = Result<()>> + Send;

    /// Remove the record. Returns `false` if there was none.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the write fails.
    fn remove(&self, event_id: EventId) -> impl Future<Output = Result<bool>> + Send;

    /// Load a record.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the read fails.
    fn get(
        &self,
        event_id: EventId,
    ) -> impl Future<Output = Result<Option<SecondaryEventRecord>>> + Send;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> EventSnapshot {
        serde_json::from_value(json!({
            "eventId": 11,
            "groupId": 5,
            "eventTitle": "Book club",
            "eventDescription": "Chapter 3",
            "street": "9 Elm St",
            "city": "Edmonton",
            "province": "AB",
            "country": "Canada",
            "eventStartTime": "2025-09-10T19:00",
            "eventEndTime": "2025-09-10T21:00",
            "count": 4,
            "capacity": 12,
            "status": "POSTPONED",
            "imageUrl": "https://img.example/11.png"
        }))
        .unwrap()
    }

    #[test]
    fn properties_are_flat_and_lowercase_status() {
        let record = SecondaryEventRecord::from_snapshot(&snapshot(), Utc::now());
        let props = record.properties();
        assert_eq!(props["eventTitle"], "Book club");
        assert_eq!(props["eventLocationCity"], "Edmonton");
        assert_eq!(props["eventAttendeeCount"], 4);
        assert_eq!(props["eventStatus"], "postponed");
        assert_eq!(props["eventStartTime"], "2025-09-10T19:00");
        assert_eq!(props["eventImageUrl"], "https://img.example/11.png");
    }

    #[test]
    fn same_content_ignores_apply_time() {
        let a = SecondaryEventRecord::from_snapshot(&snapshot(), Utc::now());
        let mut b = a.clone();
        b.applied_at = a.applied_at + chrono::Duration::seconds(5);
        assert!(a.same_content(&b));
        b.attendee_count += 1;
        assert!(!a.same_content(&b));
    }
}
