//! # RSVP Core
//!
//! Domain types and seams for attendance coordination and event mutation
//! propagation.
//!
//! ## Core Concepts
//!
//! - **Participation state machine**: pure decision over `(count, capacity,
//!   status)` and a requested answer ([`participation`])
//! - **Capacity invariant store**: atomic per-event read-modify-write that
//!   commits those decisions ([`store`])
//! - **Event mutation messages**: full snapshots sent on every change
//!   ([`message`], [`event_bus`])
//! - **Secondary records**: the consuming side's idempotent copy
//!   ([`projection`])
//!
//! ## Invariants
//!
//! - `count` equals the number of participations holding a seat
//! - `count <= capacity` unless the event is cancelled, in which case the
//!   count is frozen
//! - the commit that moves `count` to exactly `capacity` is the only one that
//!   publishes a capacity update
//!
//! ## Example
//!
//! ```ignore
//! use rsvp_core::participation::{AttendanceRequest, ParticipationStateMachine, ParticipationStatus};
//!
//! let decision = ParticipationStateMachine::decide(
//!     &event,
//!     current.as_ref(),
//!     AttendanceRequest::Set(ParticipationStatus::Attending),
//! )?;
//! if decision.publish_worthy {
//!     // event just became full
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod error;
pub mod event;
pub mod event_bus;
pub mod ids;
pub mod message;
pub mod notification;
pub mod participation;
pub mod projection;
pub mod store;

pub use error::{AttendanceError, ConflictReason};
pub use ids::{EventId, GroupId, ImageId, LocationId, ParticipantId, UserId};

/// Environment module - injected dependencies.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
