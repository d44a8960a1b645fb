//! Consumer side of event propagation.
//!
//! # Overview
//!
//! Services that do not own events keep local copies of them:
//! - **[`CrossServiceEventConsumer`]**: applies event mutations from the bus
//!   to a [`SecondaryEventStore`](rsvp_core::projection::SecondaryEventStore)
//! - **[`PostgresSecondaryEventStore`]**: JSONB-backed store for those copies
//! - **[`GroupRoleSubscriber`]**: learns user to role mappings from the group
//!   channel into a [`RoleRegistry`]
//!
//! # Example
//!
//! ```ignore
//! use rsvp_projections::{CrossServiceEventConsumer, PostgresSecondaryEventStore};
//!
//! let store = Arc::new(PostgresSecondaryEventStore::new(pool, "secondary_events".into()));
//! let (mut consumer, shutdown) =
//!     CrossServiceEventConsumer::new(store, event_bus, "event-mutations", "analytics");
//!
//! tokio::spawn(async move { consumer.start().await });
//! // later
//! shutdown.send(true)?;
//! ```

use rsvp_core::event_bus::EventBusError;
use thiserror::Error;

pub mod consumer;
pub mod postgres;
pub mod roles;

pub use consumer::{CrossServiceEventConsumer, HandleOutcome};
pub use postgres::PostgresSecondaryEventStore;
pub use roles::{GroupRoleSubscriber, GroupRoleSubscription, RoleRegistry};

/// Failures that stop a consumer.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The bus refused the subscription.
    #[error("Failed to subscribe: {0}")]
    Subscription(#[from] EventBusError),
}
