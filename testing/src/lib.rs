//! # RSVP Testing
//!
//! Testing utilities for RSVP services.
//!
//! This crate provides:
//! - [`InMemoryEventBus`]: topic queues with ack/nack redelivery and publish
//!   failure injection
//! - [`InMemoryAttendanceStore`]: per-event locked catalog and attendance store
//! - [`InMemorySecondaryEventStore`]: consumer-side store with write failure
//!   injection
//! - [`mocks`]: fixed clock and recording notifier
//! - [`fixtures`]: ready-made events, users and message bodies
//!
//! ## Example
//!
//! ```ignore
//! use rsvp_testing::{fixtures, InMemoryAttendanceStore};
//!
//! #[tokio::test]
//! async fn joins_an_event() {
//!     let store = InMemoryAttendanceStore::new();
//!     store.seed(fixtures::event(1, 0, 2));
//!     // ...
//! }
//! ```

use chrono::{DateTime, Utc};
use rsvp_core::environment::Clock;

mod attendance_store;
mod event_bus;
mod projection_mocks;

pub use attendance_store::{InMemoryAttendanceStore, InMemoryDetailsLookup};
pub use event_bus::InMemoryEventBus;
pub use projection_mocks::InMemorySecondaryEventStore;

/// Mock implementations of collaborator traits.
pub mod mocks {
    #![allow(clippy::unwrap_used)]

    use super::{Clock, DateTime, Utc};
    use futures::future::BoxFuture;
    use rsvp_core::notification::{AttendanceNotice, Notifier};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use rsvp_testing::mocks::FixedClock;
    /// use rsvp_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Notifier that records every notice it receives.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingNotifier {
        notices: Arc<Mutex<Vec<AttendanceNotice>>>,
        fail: Arc<AtomicBool>,
    }

    impl RecordingNotifier {
        /// Create an empty recorder.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make notifications fail (they are still recorded).
        pub fn fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        /// Notices received so far.
        #[must_use]
        pub fn notices(&self) -> Vec<AttendanceNotice> {
            self.notices.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notice: AttendanceNotice) -> BoxFuture<'_, Result<(), String>> {
            Box::pin(async move {
                self.notices.lock().unwrap().push(notice);
                if self.fail.load(Ordering::SeqCst) {
                    Err("mail server unavailable".to_string())
                } else {
                    Ok(())
                }
            })
        }
    }
}

/// Ready-made domain values.
pub mod fixtures {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::missing_panics_doc)]

    use chrono::{NaiveDate, NaiveDateTime};
    use rsvp_core::event::{EventRecord, EventStatus, Location, NewEvent};
    use rsvp_core::event_bus::BusMessage;
    use rsvp_core::ids::{EventId, GroupId, LocationId, UserId};
    use rsvp_core::message::OPERATION_TYPE_ATTRIBUTE;
    use serde_json::{Value, json};

    /// Location id registered by [`details`].
    pub const LOCATION_ID: i64 = 1;

    /// `2025-06-01` at `hour:00`.
    #[must_use]
    pub fn time(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1)
            .and_then(|d| d.and_hms_opt(hour, 0, 0))
            .unwrap()
    }

    /// Parse a user id.
    #[must_use]
    pub fn user(raw: &str) -> UserId {
        UserId::parse(raw).unwrap()
    }

    /// Build an event id.
    #[must_use]
    pub fn event_id(raw: i64) -> EventId {
        EventId::new(raw).unwrap()
    }

    /// The address of [`LOCATION_ID`].
    #[must_use]
    pub fn location() -> Location {
        Location {
            street: "800 Macleod Trail SE".into(),
            city: "Calgary".into(),
            province: "AB".into(),
            country: "Canada".into(),
        }
    }

    /// Directory knowing [`LOCATION_ID`] and serving images from a CDN.
    #[must_use]
    pub fn details() -> crate::InMemoryDetailsLookup {
        crate::InMemoryDetailsLookup::new()
            .with_location(LocationId::new(LOCATION_ID).unwrap(), location())
            .with_image_base_url("https://cdn.example/images")
    }

    /// Scheduled event in group 1 with the given count and capacity.
    #[must_use]
    pub fn event(id: i64, count: u32, capacity: u32) -> EventRecord {
        EventRecord {
            event_id: event_id(id),
            group_id: GroupId::new(1).unwrap(),
            title: format!("Event {id}"),
            description: "Picnic in the park".into(),
            location_id: LocationId::new(LOCATION_ID).unwrap(),
            start_time: time(12),
            end_time: time(15),
            status: EventStatus::Scheduled,
            count,
            capacity,
            image_id: None,
        }
    }

    /// Valid creation input.
    #[must_use]
    pub fn new_event(group: i64, capacity: u32) -> NewEvent {
        NewEvent {
            group_id: GroupId::new(group).unwrap(),
            title: "Climbing".into(),
            description: "Indoor bouldering".into(),
            location_id: LocationId::new(LOCATION_ID).unwrap(),
            start_time: time(9),
            end_time: time(11),
            capacity,
            image_id: None,
        }
    }

    /// Complete event mutation body for `event_id`.
    #[must_use]
    pub fn snapshot_body(event_id: i64, title: &str, count: u32) -> Value {
        json!({
            "eventId": event_id,
            "groupId": 1,
            "eventTitle": title,
            "eventDescription": "Picnic in the park",
            "street": "800 Macleod Trail SE",
            "city": "Calgary",
            "province": "AB",
            "country": "Canada",
            "eventStartTime": "2025-06-01T12:00",
            "eventEndTime": [2025, 6, 1, 15, 0],
            "count": count,
            "capacity": 10,
            "status": "SCHEDULED"
        })
    }

    /// Wrap a JSON body as a bus message with the given `operationType`.
    #[must_use]
    pub fn bus_message(operation: &str, body: &Value) -> BusMessage {
        BusMessage::new(serde_json::to_vec(body).unwrap())
            .with_attribute(OPERATION_TYPE_ATTRIBUTE, operation)
    }
}

/// Filter used by [`init_test_tracing`] when `RUST_LOG` is unset.
pub const DEFAULT_TEST_FILTER: &str = "rsvp_core=debug,rsvp_runtime=debug,rsvp_postgres=debug,\
     rsvp_redpanda=debug,rsvp_projections=debug,rsvp_testing=debug";

/// Install a test-friendly tracing subscriber once.
///
/// Honors `RUST_LOG`; output is captured by the test harness.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_TEST_FILTER.into()),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, RecordingNotifier, test_clock};

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_test_filter_names_every_crate_target() {
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_TEST_FILTER).is_ok());
        for target in ["rsvp_core", "rsvp_runtime", "rsvp_postgres", "rsvp_redpanda", "rsvp_projections"] {
            let directive = format!("{target}=debug");
            assert!(
                DEFAULT_TEST_FILTER.split(',').any(|d| d.trim() == directive),
                "missing {directive}"
            );
        }
    }

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[tokio::test]
    async fn details_resolve_fixture_location_and_images() {
        use rsvp_core::ids::{ImageId, LocationId};
        use rsvp_core::store::EventDetailsLookup;

        let details = fixtures::details();
        let location = details
            .location(LocationId::new(fixtures::LOCATION_ID).unwrap())
            .await;
        assert_eq!(location.ok(), Some(fixtures::location()));

        let url = details
            .image_url(ImageId::new(5).unwrap())
            .await;
        assert_eq!(url.ok().flatten().as_deref(), Some("https://cdn.example/images/5"));
    }
}
