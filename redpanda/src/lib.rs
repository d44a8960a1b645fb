//! Redpanda event bus for RSVP.
//!
//! Implements the [`EventBus`] trait from `rsvp-core` on top of rdkafka, so
//! any Kafka-compatible broker works (Redpanda, Apache Kafka, MSK, ...).
//!
//! # Message mapping
//!
//! | [`BusMessage`] | Kafka record |
//! |---|---|
//! | `data` | payload |
//! | `attributes` | headers (UTF-8 values) |
//! | `ordering_key` | key (same key, same partition) |
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ Attendance write │
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  1. Postgres    │
//! │   (commit)      │◄─── Source of truth
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  2. Redpanda    │
//! │   (publish)     │◄─── Distribution
//! └────────┬────────┘
//!          │
//!     ┌────┴──────┐
//!     │           │
//!     ▼           ▼
//! ┌─────────┐ ┌────────┐
//! │Analytics│ │ Search │
//! └─────────┘ └────────┘
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery**, driven by the subscriber's settlement:
//! - Each [`Delivery`] carries an [`AckHandle`](rsvp_core::event_bus::AckHandle)
//! - Ack commits the offset of that record
//! - Nack, or dropping the handle, seeks the partition back to the record so
//!   it is delivered again after `redelivery_delay`
//! - One record is in flight per subscription; the next is fetched only after
//!   the previous one is settled
//!
//! # Example
//!
//! ```no_run
//! use rsvp_redpanda::RedpandaEventBus;
//! use rsvp_core::event_bus::{BusMessage, EventBus};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let event_bus = RedpandaEventBus::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("analytics-events")
//!     .build()?;
//!
//! let message = BusMessage::new(br#"{"eventId":7}"#.to_vec())
//!     .with_attribute("operationType", "DELETE")
//!     .with_ordering_key("7");
//! event_bus.publish("event-mutations", &message).await?;
//!
//! let mut stream = event_bus.subscribe(&["event-mutations"]).await?;
//! while let Some(delivery) = stream.next().await {
//!     let delivery = delivery?;
//!     println!("{:?}", delivery.message.attributes);
//!     delivery.ack.ack();
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::Offset;
use rsvp_core::event_bus::{
    AckDecision, AckHandle, BusMessage, Delivery, DeliveryStream, EventBus, EventBusError,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Kafka-compatible [`EventBus`] backed by one shared producer.
///
/// Subscriptions each get their own consumer in the configured group
/// (or a group derived from the sorted topic names). A new group starts
/// at `auto_offset_reset`, `"latest"` unless set. Nacked records come
/// back after `redelivery_delay`, one second unless set.
///
/// ```no_run
/// use rsvp_redpanda::RedpandaEventBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let local = RedpandaEventBus::new("localhost:9092")?;
///
/// let replicated = RedpandaEventBus::builder()
///     .brokers("redpanda-0:9092,redpanda-1:9092")
///     .consumer_group("rsvp-service")
///     .producer_acks("all")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    producer: FutureProducer,
    brokers: String,
    /// Send timeout per publish
    timeout: Duration,
    consumer_group: Option<String>,
    auto_offset_reset: String,
    /// Pause before re-fetching a nacked record
    redelivery_delay: Duration,
}

impl RedpandaEventBus {
    /// Create a bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the event bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Bootstrap servers, comma-separated.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    fn consumer_group_for(&self, topics: &[String]) -> String {
        self.consumer_group.clone().unwrap_or_else(|| {
            // Same topics, same group.
            let mut sorted = topics.to_vec();
            sorted.sort();
            format!("rsvp-{}", sorted.join("-"))
        })
    }
}

/// Settings for a [`RedpandaEventBus`]. Only the brokers are required.
///
/// ```no_run
/// use rsvp_redpanda::RedpandaEventBus;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = RedpandaEventBus::builder()
///     .brokers("localhost:9092")
///     .compression("lz4")
///     .timeout(Duration::from_secs(10))
///     .auto_offset_reset("earliest")
///     .redelivery_delay(Duration::from_millis(250))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
    redelivery_delay: Option<Duration>,
}

impl RedpandaEventBusBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID for subscriptions.
    ///
    /// Instances sharing a group split the partitions between them. If not
    /// set, the group is derived from the subscribed topics.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Where new consumer groups start reading: "earliest", "latest" or
    /// "error".
    ///
    /// Default: "latest"
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Pause before a nacked record is fetched again.
    ///
    /// Default: 1 second
    #[must_use]
    pub const fn redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = Some(delay);
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self.brokers.ok_or_else(|| {
            EventBusError::ConnectionFailed("Brokers not configured".to_string())
        })?;
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "latest".to_string());
        let redelivery_delay = self.redelivery_delay.unwrap_or(Duration::from_secs(1));

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            auto_offset_reset = %auto_offset_reset,
            redelivery_delay_ms = u64::try_from(redelivery_delay.as_millis()).unwrap_or(u64::MAX),
            "RedpandaEventBus created"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            auto_offset_reset,
            redelivery_delay,
        })
    }
}

/// Encode message attributes as Kafka headers.
fn attributes_to_headers(attributes: &BTreeMap<String, String>) -> OwnedHeaders {
    attributes
        .iter()
        .fold(OwnedHeaders::new_with_capacity(attributes.len()), |headers, (key, value)| {
            headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_bytes()),
            })
        })
}

/// Rebuild a [`BusMessage`] from a received record.
///
/// Headers that are not valid UTF-8 are skipped.
fn to_bus_message(message: &BorrowedMessage<'_>) -> BusMessage {
    let mut attributes = BTreeMap::new();
    if let Some(headers) = message.headers() {
        for header in headers.iter() {
            match header.value.map(std::str::from_utf8) {
                Some(Ok(value)) => {
                    attributes.insert(header.key.to_string(), value.to_string());
                }
                Some(Err(_)) => {
                    tracing::debug!(header = header.key, "Skipping non-UTF-8 header");
                }
                None => {
                    attributes.insert(header.key.to_string(), String::new());
                }
            }
        }
    }

    BusMessage {
        data: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        attributes,
        ordering_key: message
            .key()
            .and_then(|key| std::str::from_utf8(key).ok())
            .map(str::to_string),
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        topic: &str,
        message: &BusMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let message = message.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let mut record = FutureRecord::<str, [u8]>::to(&topic)
                .payload(&message.data)
                .headers(attributes_to_headers(&message.attributes));

            // Same key, same partition: per-event ordering within one partition.
            if let Some(key) = message.ordering_key.as_deref() {
                record = record.key(key);
            }

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        key = ?message.ordering_key,
                        "Message published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(topic = %topic, error = %kafka_error, "Failed to publish message");
                    Err(EventBusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    #[allow(clippy::too_many_lines)] // One loop owns fetch, settlement and offsets
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let consumer_group_id = self.consumer_group_for(&topics);
        let brokers = self.brokers.clone();
        let auto_offset_reset = self.auto_offset_reset.clone();
        let redelivery_delay = self.redelivery_delay;

        Box::pin(async move {
            if topics.is_empty() {
                return Err(EventBusError::SubscriptionFailed {
                    topics,
                    reason: "no topics given".to_string(),
                });
            }

            // Manual commit: offsets move only on ack.
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group_id,
                auto_offset_reset = %auto_offset_reset,
                "Subscribed to topics"
            );

            let (tx, rx) = mpsc::channel(1);

            // The task owns the consumer; it ends when the receiver is dropped.
            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();
                // Attempt number of the record currently being redelivered.
                let mut redelivery: Option<(String, i32, i64, u32)> = None;

                while let Some(next) = stream.next().await {
                    let message = match next {
                        Ok(message) => message,
                        Err(e) => {
                            let err = EventBusError::TransportError(format!(
                                "Failed to receive message: {e}"
                            ));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                            continue;
                        }
                    };

                    let topic = message.topic().to_string();
                    let partition = message.partition();
                    let offset = message.offset();
                    let attempt = match &redelivery {
                        Some((t, p, o, attempt)) if *t == topic && *p == partition && *o == offset => {
                            *attempt
                        }
                        _ => 1,
                    };

                    let (ack_tx, ack_rx) = oneshot::channel();
                    let delivery = Delivery {
                        topic: topic.clone(),
                        message: to_bus_message(&message),
                        attempt,
                        ack: AckHandle::new(move |decision| {
                            let _ = ack_tx.send(decision);
                        }),
                    };

                    if tx.send(Ok(delivery)).await.is_err() {
                        tracing::debug!("Subscriber dropped, exiting consumer task");
                        break;
                    }

                    // A dropped handle reports Nack; a closed channel means the
                    // subscriber went away mid-delivery.
                    let decision = ack_rx.await.unwrap_or(AckDecision::Nack);

                    match decision {
                        AckDecision::Ack => {
                            redelivery = None;
                            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                tracing::warn!(
                                    topic = %topic,
                                    partition,
                                    offset,
                                    error = %e,
                                    "Failed to commit offset (message may be redelivered)"
                                );
                            }
                        }
                        AckDecision::Nack => {
                            tracing::debug!(topic = %topic, partition, offset, attempt, "Message nacked");
                            redelivery = Some((topic.clone(), partition, offset, attempt + 1));
                            if tx.is_closed() {
                                break;
                            }
                            tokio::time::sleep(redelivery_delay).await;
                            if let Err(e) = consumer.seek(
                                &topic,
                                partition,
                                Offset::Offset(offset),
                                Timeout::After(Duration::from_secs(5)),
                            ) {
                                tracing::error!(
                                    topic = %topic,
                                    partition,
                                    offset,
                                    error = %e,
                                    "Failed to seek back to nacked message"
                                );
                            }
                        }
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_event_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaEventBus>();
        assert_sync::<RedpandaEventBus>();
    }

    #[test]
    fn build_requires_brokers() {
        let err = RedpandaEventBus::builder().build().err().unwrap();
        assert!(matches!(err, EventBusError::ConnectionFailed(_)));
    }

    #[test]
    fn attributes_become_headers() {
        let mut attributes = BTreeMap::new();
        attributes.insert("operationType".to_string(), "UPDATE".to_string());
        attributes.insert("source".to_string(), "rsvp".to_string());

        let headers = attributes_to_headers(&attributes);
        assert_eq!(headers.count(), 2);
        let first = headers.get(0);
        assert_eq!(first.key, "operationType");
        assert_eq!(first.value, Some(b"UPDATE".as_slice()));
    }

    #[test]
    fn consumer_group_defaults_to_sorted_topics() {
        let bus = RedpandaEventBus::new("localhost:9092").unwrap();
        let group = bus.consumer_group_for(&["b".to_string(), "a".to_string()]);
        assert_eq!(group, "rsvp-a-b");
    }
}
