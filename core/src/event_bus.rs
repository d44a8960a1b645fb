//! Message bus abstraction for cross-service propagation.
//!
//! The [`EventBus`] trait publishes [`BusMessage`]s to topics and delivers
//! them to subscribers as [`Delivery`] values that must be explicitly
//! acknowledged.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  Attendance request  │
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐
//! │ 1. Commit count in   │◄─── Source of truth
//! │    the event's row   │
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐
//! │ 2. Publish snapshot  │◄─── At-least-once delivery
//! └──────────┬───────────┘
//!            │
//!       ┌────┴─────┐
//!       ▼          ▼
//! ┌──────────┐ ┌──────────┐
//! │Analytics │ │  Search  │
//! └──────────┘ └──────────┘
//! ```
//!
//! # Key Principles
//!
//! - **Commit first**: state is committed before anything is published
//! - **At-least-once delivery**: a message may be delivered more than once
//! - **Idempotent apply**: subscribers key their writes by entity id
//! - **Ack after apply**: a delivery is acknowledged only once its effect is
//!   durable; a dropped or nacked delivery is redelivered
//!
//! # Implementations
//!
//! - `InMemoryEventBus` in `rsvp-testing` for tests
//! - `RedpandaEventBus` in `rsvp-redpanda` for production (Kafka-compatible)

use crate::message::MalformedMessageError;
use futures::Stream;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Topic not found or invalid
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// A message as handed to, and received from, the bus.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BusMessage {
    /// Body bytes. JSON for every channel in this system.
    pub data: Vec<u8>,
    /// String attributes (Kafka headers).
    pub attributes: BTreeMap<String, String>,
    /// Partitioning key; messages with the same key keep their relative order
    /// on buses that support it.
    pub ordering_key: Option<String>,
}

impl BusMessage {
    /// Create a message with no attributes.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            attributes: BTreeMap::new(),
            ordering_key: None,
        }
    }

    /// Add an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set the ordering key.
    #[must_use]
    pub fn with_ordering_key(mut self, key: impl Into<String>) -> Self {
        self.ordering_key = Some(key.into());
        self
    }

    /// Body as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedMessageError::InvalidEncoding`] for non UTF-8 bodies.
    pub fn body_str(&self) -> Result<&str, MalformedMessageError> {
        std::str::from_utf8(&self.data).map_err(|e| MalformedMessageError::InvalidEncoding(e.to_string()))
    }
}

/// Outcome reported back to the bus for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// Processed; do not redeliver.
    Ack,
    /// Not processed; redeliver.
    Nack,
}

type Settle = Box<dyn FnOnce(AckDecision) + Send>;

/// Settles a single delivery.
///
/// Dropping an unsettled handle counts as a nack.
pub struct AckHandle {
    settle: Option<Settle>,
}

impl AckHandle {
    /// Wrap the bus-specific settle callback.
    #[must_use]
    pub fn new(settle: impl FnOnce(AckDecision) + Send + 'static) -> Self {
        Self {
            settle: Some(Box::new(settle)),
        }
    }

    /// A handle that ignores the decision.
    #[must_use]
    pub fn noop() -> Self {
        Self { settle: None }
    }

    /// Acknowledge the delivery.
    pub fn ack(mut self) {
        self.settle(AckDecision::Ack);
    }

    /// Reject the delivery so it is redelivered.
    pub fn nack(mut self) {
        self.settle(AckDecision::Nack);
    }

    fn settle(&mut self, decision: AckDecision) {
        if let Some(settle) = self.settle.take() {
            settle(decision);
        }
    }
}

impl Drop for AckHandle {
    fn drop(&mut self) {
        self.settle(AckDecision::Nack);
    }
}

impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckHandle")
            .field("settled", &self.settle.is_none())
            .finish()
    }
}

/// A received message awaiting acknowledgement.
#[derive(Debug)]
pub struct Delivery {
    /// Topic it was received on.
    pub topic: String,
    /// The message.
    pub message: BusMessage,
    /// Delivery attempt, starting at 1.
    pub attempt: u32,
    /// Settles the delivery.
    pub ack: AckHandle,
}

/// Stream of deliveries from a subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// Trait for message bus implementations.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so publishers can hold an `Arc<dyn EventBus>`.
pub trait EventBus: Send + Sync {
    /// Publish a message to a topic.
    ///
    /// Returns once the bus client has accepted the message. That is not a
    /// delivery guarantee.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the client rejected it.
    fn publish(
        &self,
        topic: &str,
        message: &BusMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to one or more topics.
    ///
    /// Each [`Delivery`] must be acked or nacked. Implementations deliver at
    /// most one unsettled message per subscription at a time.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>>;
}
