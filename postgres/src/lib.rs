//! `PostgreSQL` stores for RSVP.
//!
//! This crate provides the production attendance store. It implements the
//! storage seams from `rsvp-core`:
//!
//! - [`CapacityInvariantStore`](rsvp_core::store::CapacityInvariantStore):
//!   one transaction per transition, holding a row lock on the event
//! - [`ParticipationQuery`](rsvp_core::store::ParticipationQuery) and
//!   [`EventRepository`](rsvp_core::store::EventRepository)
//! - [`EventDetailsLookup`](rsvp_core::store::EventDetailsLookup) for
//!   locations and image URLs
//!
//! # Example
//!
//! ```ignore
//! use rsvp_postgres::{PostgresAttendanceStore, PostgresEventDetails};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresAttendanceStore::connect("postgres://localhost/rsvp", 10).await?;
//!     store.migrate().await?;
//!     let details = PostgresEventDetails::new(store.pool().clone(), "https://cdn.example/images");
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod details;
pub mod error;
pub mod store;

pub use details::PostgresEventDetails;
pub use error::StoreError;
pub use store::PostgresAttendanceStore;
