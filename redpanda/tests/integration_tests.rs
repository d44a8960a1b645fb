//! Integration tests for [`RedpandaEventBus`] with a real Kafka instance.
//!
//! These tests use testcontainers to spin up Kafka and validate:
//! - Body, attributes and ordering key survive the round trip
//! - Nack redelivers the same record with the next attempt number
//! - Ack commits, so a restarted subscriber in the group does not see it again
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they:
//! - Require Docker to be running (for testcontainers)
//! - Take 15-60 seconds per test to spin up Kafka
//!
//! To run explicitly:
//! ```bash
//! cargo test -p rsvp-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use futures::StreamExt;
use rsvp_core::event_bus::{BusMessage, Delivery, DeliveryStream, EventBus};
use rsvp_redpanda::RedpandaEventBus;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

fn mutation(event_id: i64, operation: &str) -> BusMessage {
    let body = serde_json::json!({ "eventId": event_id });
    BusMessage::new(serde_json::to_vec(&body).expect("serialize body"))
        .with_attribute("operationType", operation)
        .with_ordering_key(event_id.to_string())
}

/// Start Kafka and wait until it accepts a publish.
async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");

    let max_attempts = 60;
    for attempt in 1..=max_attempts {
        if let Ok(bus) = RedpandaEventBus::new(&brokers) {
            if bus.publish("warmup-topic", &mutation(0, "ADD")).await.is_ok() {
                // Give Kafka time to fully initialize
                tokio::time::sleep(Duration::from_millis(500)).await;
                return (kafka, brokers);
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(
            attempt != max_attempts,
            "Kafka failed to become ready after {max_attempts} attempts"
        );
    }
    unreachable!("loop returns or asserts")
}

fn bus(brokers: &str, group: &str) -> RedpandaEventBus {
    RedpandaEventBus::builder()
        .brokers(brokers)
        .consumer_group(group)
        .auto_offset_reset("earliest")
        .redelivery_delay(Duration::from_millis(100))
        .build()
        .expect("Failed to create event bus")
}

async fn next(stream: &mut DeliveryStream) -> Delivery {
    tokio::time::timeout(Duration::from_secs(20), stream.next())
        .await
        .expect("Timeout waiting for delivery")
        .expect("stream ended")
        .expect("Failed to receive delivery")
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_round_trip_keeps_attributes_and_key() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = bus(&brokers, "round-trip");

    bus.publish("event-mutations", &mutation(7, "UPDATE"))
        .await
        .expect("Failed to publish");

    let mut stream = bus
        .subscribe(&["event-mutations"])
        .await
        .expect("Failed to subscribe");
    let delivery = next(&mut stream).await;

    assert_eq!(delivery.topic, "event-mutations");
    assert_eq!(delivery.attempt, 1);
    assert_eq!(
        delivery.message.attributes.get("operationType").map(String::as_str),
        Some("UPDATE")
    );
    assert_eq!(delivery.message.ordering_key.as_deref(), Some("7"));
    assert_eq!(delivery.message.body_str().expect("utf-8"), r#"{"eventId":7}"#);
    delivery.ack.ack();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_nack_redelivers_same_record() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = bus(&brokers, "nack-test");

    bus.publish("nack-topic", &mutation(1, "ADD")).await.expect("publish 1");
    bus.publish("nack-topic", &mutation(2, "ADD")).await.expect("publish 2");

    let mut stream = bus.subscribe(&["nack-topic"]).await.expect("subscribe");

    let first = next(&mut stream).await;
    assert_eq!(first.message.ordering_key.as_deref(), Some("1"));
    first.ack.nack();

    let again = next(&mut stream).await;
    assert_eq!(again.message.ordering_key.as_deref(), Some("1"));
    assert_eq!(again.attempt, 2);
    again.ack.ack();

    let second = next(&mut stream).await;
    assert_eq!(second.message.ordering_key.as_deref(), Some("2"));
    assert_eq!(second.attempt, 1);
    second.ack.ack();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_acked_records_are_not_seen_again_by_group() {
    let (_kafka, brokers) = start_kafka().await;

    {
        let bus = bus(&brokers, "commit-test");
        bus.publish("commit-topic", &mutation(1, "ADD")).await.expect("publish 1");
        let mut stream = bus.subscribe(&["commit-topic"]).await.expect("subscribe");
        next(&mut stream).await.ack.ack();
        // Let the async commit reach the broker before the consumer goes away.
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    let bus = bus(&brokers, "commit-test");
    bus.publish("commit-topic", &mutation(2, "ADD")).await.expect("publish 2");
    let mut stream = bus.subscribe(&["commit-topic"]).await.expect("resubscribe");

    let delivery = next(&mut stream).await;
    assert_eq!(delivery.message.ordering_key.as_deref(), Some("2"));
    delivery.ack.ack();
}
