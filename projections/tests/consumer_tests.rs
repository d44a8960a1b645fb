//! Consumer loops against the in-memory bus and stores

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use rsvp_core::event_bus::{BusMessage, EventBus};
use rsvp_core::ids::{GroupId, UserId};
use rsvp_core::message::{GroupMember, GroupRole, GroupSnapshot, OperationType};
use rsvp_core::projection::SecondaryEventStore;
use rsvp_projections::{CrossServiceEventConsumer, GroupRoleSubscriber};
use rsvp_testing::{InMemoryEventBus, InMemorySecondaryEventStore, fixtures, test_clock};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const TOPIC: &str = "event-mutations";
const GROUP_TOPIC: &str = "group-mutations";

fn start(
    bus: &InMemoryEventBus,
    store: &InMemorySecondaryEventStore,
) -> (watch::Sender<bool>, JoinHandle<()>) {
    rsvp_testing::init_test_tracing();
    let (consumer, shutdown) = CrossServiceEventConsumer::new(
        Arc::new(store.clone()),
        Arc::new(bus.clone()),
        TOPIC,
        "analytics",
    );
    let mut consumer = consumer.with_clock(Arc::new(test_clock()));
    let handle = tokio::spawn(async move {
        consumer.start().await.unwrap();
    });
    (shutdown, handle)
}

async fn publish(bus: &InMemoryEventBus, topic: &str, message: BusMessage) {
    bus.publish(topic, &message).await.unwrap();
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn add_then_delete_removes_record() {
    let bus = InMemoryEventBus::new();
    let store = InMemorySecondaryEventStore::new();
    let (shutdown, handle) = start(&bus, &store);

    publish(&bus, TOPIC, fixtures::bus_message("ADD", &fixtures::snapshot_body(7, "Picnic", 0))).await;
    publish(&bus, TOPIC, fixtures::bus_message("DELETE", &json!({ "eventId": 7 }))).await;
    wait_until(|| bus.acked(TOPIC) == 2).await;

    assert!(store.get(fixtures::event_id(7)).await.unwrap().is_none());
    assert_eq!(store.write_count(), 2);

    shutdown.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn delete_then_add_keeps_record() {
    let bus = InMemoryEventBus::new();
    let store = InMemorySecondaryEventStore::new();
    let (shutdown, handle) = start(&bus, &store);

    publish(&bus, TOPIC, fixtures::bus_message("DELETE", &json!({ "eventId": 7 }))).await;
    publish(&bus, TOPIC, fixtures::bus_message("ADD", &fixtures::snapshot_body(7, "Picnic", 0))).await;
    wait_until(|| bus.acked(TOPIC) == 2).await;

    let record = store.get(fixtures::event_id(7)).await.unwrap().unwrap();
    assert_eq!(record.title, "Picnic");
    assert_eq!(record.location.city, "Calgary");

    shutdown.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn malformed_message_is_dropped_and_next_applies() {
    let bus = InMemoryEventBus::new();
    let store = InMemorySecondaryEventStore::new();
    let (shutdown, handle) = start(&bus, &store);

    let mut missing_title = fixtures::snapshot_body(5, "Run", 3);
    missing_title.as_object_mut().unwrap().remove("eventTitle");
    publish(&bus, TOPIC, fixtures::bus_message("ADD", &missing_title)).await;
    publish(&bus, TOPIC, BusMessage::new(b"{not json".to_vec())).await;
    publish(&bus, TOPIC, fixtures::bus_message("UPDATE", &fixtures::snapshot_body(5, "Run", 3))).await;
    wait_until(|| bus.acked(TOPIC) == 3).await;

    assert_eq!(bus.nacked(TOPIC), 0);
    assert_eq!(store.len(), 1);
    let record = store.get(fixtures::event_id(5)).await.unwrap().unwrap();
    assert_eq!(record.attendee_count, 3);

    shutdown.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn storage_failure_is_redelivered() {
    let bus = InMemoryEventBus::new();
    let store = InMemorySecondaryEventStore::new();
    store.fail_writes(true);
    let (shutdown, handle) = start(&bus, &store);

    publish(&bus, TOPIC, fixtures::bus_message("ADD", &fixtures::snapshot_body(9, "Swim", 1))).await;
    wait_until(|| bus.nacked(TOPIC) >= 1).await;
    assert!(store.is_empty());

    store.fail_writes(false);
    wait_until(|| bus.acked(TOPIC) == 1).await;
    assert!(store.snapshot(fixtures::event_id(9)).is_some());
    assert_eq!(bus.pending(TOPIC), 0);

    shutdown.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn shutdown_stops_idle_consumer() {
    let bus = InMemoryEventBus::new();
    let store = InMemorySecondaryEventStore::new();
    let (shutdown, handle) = start(&bus, &store);

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("consumer did not stop")
        .unwrap();

    // Nothing consumes after stop.
    publish(&bus, TOPIC, fixtures::bus_message("ADD", &fixtures::snapshot_body(1, "Late", 0))).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(bus.pending(TOPIC), 1);
    assert!(store.is_empty());
}

fn group_message(operation: OperationType, id: i64, members: &[(&str, GroupRole)]) -> BusMessage {
    GroupSnapshot {
        group_id: GroupId::new(id).unwrap(),
        members: members
            .iter()
            .map(|(user, role)| GroupMember {
                user_id: UserId::parse(user).unwrap(),
                role: *role,
                user_name: Some(format!("{user} name")),
            })
            .collect(),
    }
    .to_bus_message(operation)
    .unwrap()
}

#[tokio::test]
async fn group_subscriber_tracks_roles_and_clears_on_stop() {
    let bus = InMemoryEventBus::new();
    let subscription = GroupRoleSubscriber::subscribe(Arc::new(bus.clone()), GROUP_TOPIC)
        .await
        .unwrap();
    let registry = subscription.registry();
    assert!(registry.is_empty());

    let group = GroupId::new(4).unwrap();
    let admin = UserId::parse("ada").unwrap();

    publish(
        &bus,
        GROUP_TOPIC,
        group_message(OperationType::Add, 4, &[("ada", GroupRole::Admin), ("ben", GroupRole::Member)]),
    )
    .await;
    publish(&bus, GROUP_TOPIC, BusMessage::new(b"[]".to_vec())).await;
    wait_until(|| bus.acked(GROUP_TOPIC) == 2).await;

    assert_eq!(registry.role_of(group, &admin), Some(GroupRole::Admin));
    assert_eq!(registry.members(group).len(), 2);

    publish(
        &bus,
        GROUP_TOPIC,
        fixtures::bus_message("DELETE", &json!({ "groupId": 4 })),
    )
    .await;
    wait_until(|| bus.acked(GROUP_TOPIC) == 3).await;
    assert_eq!(registry.role_of(group, &admin), None);

    publish(
        &bus,
        GROUP_TOPIC,
        group_message(OperationType::Update, 5, &[("cal", GroupRole::Member)]),
    )
    .await;
    wait_until(|| bus.acked(GROUP_TOPIC) == 4).await;
    assert_eq!(registry.len(), 1);

    subscription.stop().await;
    assert!(registry.is_empty());
}

#[tokio::test]
async fn consumer_runs_on_after_shutdown_sender_is_dropped() {
    let bus = InMemoryEventBus::new();
    let store = InMemorySecondaryEventStore::new();
    let (shutdown, handle) = start(&bus, &store);
    drop(shutdown);

    publish(&bus, TOPIC, fixtures::bus_message("ADD", &fixtures::snapshot_body(3, "Hike", 2))).await;
    wait_until(|| bus.acked(TOPIC) == 1).await;

    assert_eq!(bus.pending(TOPIC), 0);
    assert!(store.snapshot(fixtures::event_id(3)).is_some());
    assert!(!handle.is_finished());
    handle.abort();
}

#[tokio::test]
async fn dropped_group_subscription_stops_and_clears_registry() {
    let bus = InMemoryEventBus::new();
    let subscription = GroupRoleSubscriber::subscribe(Arc::new(bus.clone()), GROUP_TOPIC)
        .await
        .unwrap();
    let registry = subscription.registry();

    publish(
        &bus,
        GROUP_TOPIC,
        group_message(OperationType::Add, 6, &[("dee", GroupRole::Admin)]),
    )
    .await;
    wait_until(|| bus.acked(GROUP_TOPIC) == 1).await;
    assert_eq!(registry.len(), 1);

    drop(subscription);
    wait_until(|| registry.is_empty()).await;

    // Nothing consumes after the drop.
    publish(
        &bus,
        GROUP_TOPIC,
        group_message(OperationType::Add, 7, &[("eve", GroupRole::Member)]),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(bus.acked(GROUP_TOPIC), 1);
    assert!(registry.is_empty());
}
