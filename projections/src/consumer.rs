//! `CrossServiceEventConsumer` keeps a local copy of another service's events.
//!
//! # Overview
//!
//! The consumer:
//! - Subscribes to the event mutation topic
//! - Decodes each delivery into an [`EventMutation`]
//! - Upserts or removes the [`SecondaryEventRecord`] keyed by event id
//! - Acknowledges only after the local write succeeded
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  Event Bus  │ (Redpanda/Kafka)
//! └──────┬──────┘
//!        │ deliveries
//!        ▼
//! ┌──────────────────────────┐
//! │CrossServiceEventConsumer │
//! └──────┬──────────────┬────┘
//!        │ apply        │ ack / nack
//!        ▼              ▼
//! ┌──────────────┐ ┌─────────┐
//! │SecondaryStore│ │   Bus   │
//! └──────────────┘ └─────────┘
//! ```
//!
//! # Delivery outcomes
//!
//! | Situation | Local store | Settlement |
//! |---|---|---|
//! | `ADD` / `UPDATE` | upsert | ack after write |
//! | `DELETE` | remove (absent is fine) | ack after write |
//! | malformed body, unknown or missing operation | untouched | ack (dropped) |
//! | local write fails | untouched | nack (redelivered) |
//!
//! Writes are last-applied-wins. A `DELETE` overtaken by an older `ADD` for
//! the same id leaves the record present.

use crate::ConsumerError;
use futures::StreamExt;
use rsvp_core::environment::{Clock, SystemClock};
use rsvp_core::event_bus::{Delivery, EventBus};
use rsvp_core::message::EventMutation;
use rsvp_core::projection::{Result, SecondaryEventRecord, SecondaryEventStore};
use rsvp_runtime::metrics::ConsumerMetrics;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Applied locally and acknowledged.
    Applied,
    /// Malformed; acknowledged without touching the store.
    Dropped,
    /// Local apply failed; nacked for redelivery.
    Requeued,
}

impl HandleOutcome {
    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Dropped => "dropped",
            Self::Requeued => "requeued",
        }
    }
}

/// Applies event mutations from the bus to a [`SecondaryEventStore`].
///
/// # Example
///
/// ```ignore
/// let event_bus = Arc::new(RedpandaEventBus::builder()
///     .brokers("localhost:9092")
///     .consumer_group("analytics-events")
///     .build()?);
///
/// let (mut consumer, shutdown) = CrossServiceEventConsumer::new(
///     store,
///     event_bus,
///     "event-mutations",
///     "analytics-events",
/// );
///
/// // Runs until `shutdown.send(true)`
/// consumer.start().await?;
/// ```
pub struct CrossServiceEventConsumer<S>
where
    S: SecondaryEventStore,
{
    store: Arc<S>,
    event_bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    /// Topic to subscribe to
    topic: String,
    /// Consumer group, for logging; must match the bus configuration
    consumer_group: String,
    /// Shutdown signal
    shutdown: watch::Receiver<bool>,
}

impl<S> CrossServiceEventConsumer<S>
where
    S: SecondaryEventStore,
{
    /// Create a consumer.
    ///
    /// Returns the consumer and a shutdown sender. Send `true` to stop it
    /// after the delivery in flight, if any, is settled. Dropping the sender
    /// leaves the consumer running until its stream ends.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        event_bus: Arc<dyn EventBus>,
        topic: impl Into<String>,
        consumer_group: impl Into<String>,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let consumer = Self {
            store,
            event_bus,
            clock: Arc::new(SystemClock),
            topic: topic.into(),
            consumer_group: consumer_group.into(),
            shutdown: shutdown_rx,
        };

        (consumer, shutdown_tx)
    }

    /// Use `clock` to stamp applied records.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Consume until the shutdown signal or the end of the stream.
    ///
    /// Deliveries are handled one at a time; the shutdown signal is checked
    /// between deliveries, never in the middle of one.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Subscription`] if the topic cannot be
    /// subscribed to. Per-message failures never end the loop.
    pub async fn start(&mut self) -> std::result::Result<(), ConsumerError> {
        tracing::info!(
            topic = %self.topic,
            consumer_group = %self.consumer_group,
            "Starting event mutation consumer"
        );

        let mut deliveries = self.event_bus.subscribe(&[self.topic.as_str()]).await?;

        // Once the sender is gone no signal can arrive; only the stream ends the loop.
        let mut signal_open = true;

        while !*self.shutdown.borrow() {
            tokio::select! {
                biased;

                // Handle shutdown
                changed = self.shutdown.changed(), if signal_open => {
                    if changed.is_err() {
                        tracing::debug!(topic = %self.topic, "Shutdown sender dropped");
                        signal_open = false;
                    } else if *self.shutdown.borrow() {
                        tracing::info!(topic = %self.topic, "Shutdown signal received");
                        break;
                    }
                }

                next = deliveries.next() => {
                    match next {
                        Some(Ok(delivery)) => {
                            self.handle_delivery(delivery).await;
                        }
                        Some(Err(e)) => {
                            // The bus client reconnects on its own.
                            tracing::error!(topic = %self.topic, error = ?e, "Error receiving from bus");
                        }
                        None => {
                            tracing::warn!(topic = %self.topic, "Delivery stream ended");
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!(topic = %self.topic, "Event mutation consumer stopped");
        Ok(())
    }

    /// Decode, apply and settle one delivery.
    pub async fn handle_delivery(&self, delivery: Delivery) -> HandleOutcome {
        let Delivery {
            topic,
            message,
            attempt,
            ack,
        } = delivery;

        let outcome = match EventMutation::decode(&message) {
            Err(e) => {
                tracing::warn!(
                    topic = %topic,
                    attempt,
                    error = %e,
                    "Dropping malformed event mutation"
                );
                ack.ack();
                HandleOutcome::Dropped
            }
            Ok(mutation) => {
                let start = Instant::now();
                match self.apply(&mutation).await {
                    Ok(()) => {
                        ack.ack();
                        ConsumerMetrics::record_apply(start.elapsed());
                        tracing::debug!(
                            event_id = %mutation.event_id(),
                            operation = %mutation.operation(),
                            "Event mutation applied"
                        );
                        HandleOutcome::Applied
                    }
                    Err(e) => {
                        tracing::error!(
                            event_id = %mutation.event_id(),
                            operation = %mutation.operation(),
                            attempt,
                            error = %e,
                            "Failed to apply event mutation, requesting redelivery"
                        );
                        ack.nack();
                        HandleOutcome::Requeued
                    }
                }
            }
        };

        ConsumerMetrics::record_consumed(outcome.as_str());
        outcome
    }

    /// Apply a decoded mutation to the local store.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn apply(&self, mutation: &EventMutation) -> Result<()> {
        match mutation {
            EventMutation::Upsert { snapshot, .. } => {
                let record = SecondaryEventRecord::from_snapshot(snapshot, self.clock.now());
                self.store.upsert(&record).await
            }
            EventMutation::Delete { event_id } => {
                if !self.store.remove(*event_id).await? {
                    tracing::debug!(event_id = %event_id, "Delete for unknown event ignored");
                }
                Ok(())
            }
        }
    }
}
