//! # RSVP Service
//!
//! Wires the attendance store, the event bus and the consumers into one
//! process.
//!
//! - [`config`]: environment-driven settings
//! - [`App`]: connects everything, starts the consumers and stops them again
//! - [`TracingNotifier`]: logs committed attendance changes

pub mod app;
pub mod config;
pub mod notifier;

pub use app::App;
pub use config::ServiceConfig;
pub use notifier::TracingNotifier;
