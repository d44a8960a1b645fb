//! # RSVP Runtime
//!
//! Services that sit between callers and the storage and bus seams of
//! `rsvp-core`.
//!
//! ## Core Components
//!
//! - **`ParticipationService`**: attendance transitions through the
//!   capacity invariant store, notification and capacity publishing
//! - **`EventService`**: event catalog changes, each followed by a snapshot
//! - **`EventMutationPublisher`**: snapshot enrichment and bus hand-off
//! - **Metrics**: Prometheus recorder and exporter
//!
//! ## Example
//!
//! ```ignore
//! use rsvp_runtime::{EventMutationPublisher, ParticipationService};
//!
//! let publisher = EventMutationPublisher::new(bus, details, "event-mutations");
//! let service = ParticipationService::new(store, publisher, notifier);
//!
//! let outcome = service.set_status(&user, event_id, ParticipationStatus::Attending).await?;
//! if outcome.published {
//!     // the event just became full
//! }
//! ```

/// Event catalog operations
pub mod events;

/// Prometheus metrics for observability
pub mod metrics;

/// Attendance operations
pub mod participation;

/// Event mutation publishing
pub mod publisher;

pub use events::EventService;
pub use participation::{ParticipationService, TransitionOutcome, TransitionRequest};
pub use publisher::EventMutationPublisher;
