//! Attendance flows against the in-memory store and bus

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use rsvp_core::error::{AttendanceError, ConflictReason};
use rsvp_core::event::EventStatus;
use rsvp_core::message::{EventMutation, OperationType};
use rsvp_core::participation::ParticipationStatus;
use rsvp_runtime::{EventMutationPublisher, ParticipationService};
use rsvp_testing::{
    InMemoryAttendanceStore, InMemoryDetailsLookup, InMemoryEventBus, RecordingNotifier, fixtures,
};
use std::sync::Arc;

const TOPIC: &str = "event-mutations";

struct Harness {
    store: Arc<InMemoryAttendanceStore>,
    bus: InMemoryEventBus,
    notifier: RecordingNotifier,
    service: ParticipationService<InMemoryAttendanceStore>,
}

fn harness() -> Harness {
    rsvp_testing::init_test_tracing();
    let store = Arc::new(InMemoryAttendanceStore::new());
    let bus = InMemoryEventBus::new();
    let notifier = RecordingNotifier::new();
    let publisher =
        EventMutationPublisher::new(Arc::new(bus.clone()), Arc::new(fixtures::details()), TOPIC);
    let service = ParticipationService::new(Arc::clone(&store), publisher, Arc::new(notifier.clone()));
    Harness {
        store,
        bus,
        notifier,
        service,
    }
}

#[tokio::test]
async fn capacity_two_walkthrough() {
    let h = harness();
    h.store.seed(fixtures::event(1, 1, 2));
    let event = fixtures::event_id(1);
    let (a, b) = (fixtures::user("alice"), fixtures::user("bob"));

    // A takes the last seat: accepted, count 2, one UPDATE.
    let outcome = h
        .service
        .set_status(&a, event, ParticipationStatus::Attending)
        .await
        .unwrap();
    assert_eq!(outcome.count(), 2);
    assert!(outcome.published);

    let sent = h.bus.published(TOPIC);
    assert_eq!(sent.len(), 1);
    let decoded = EventMutation::decode(&sent[0]).unwrap();
    assert_eq!(decoded.operation(), OperationType::Update);
    let EventMutation::Upsert { snapshot, .. } = decoded else {
        unreachable!("update decodes as upsert")
    };
    assert_eq!(snapshot.count, 2);
    assert_eq!(snapshot.capacity, 2);

    // B is refused.
    let err = h
        .service
        .set_status(&b, event, ParticipationStatus::Attending)
        .await
        .unwrap_err();
    assert_eq!(err, AttendanceError::Conflict(ConflictReason::CapacityExceeded));

    // A leaves: count 1, nothing published.
    let outcome = h
        .service
        .set_status(&a, event, ParticipationStatus::NotAttending)
        .await
        .unwrap();
    assert_eq!(outcome.count(), 1);
    assert!(!outcome.published);
    assert_eq!(h.bus.published(TOPIC).len(), 1);
}

#[tokio::test]
async fn resubmitting_same_status_is_idempotent() {
    let h = harness();
    h.store.seed(fixtures::event(1, 0, 1));
    let user = fixtures::user("carol");

    let first = h
        .service
        .set_status(&user, fixtures::event_id(1), ParticipationStatus::Maybe)
        .await
        .unwrap();
    assert!(first.published);

    let second = h
        .service
        .set_status(&user, fixtures::event_id(1), ParticipationStatus::Maybe)
        .await
        .unwrap();
    assert!(second.commit.decision.is_noop());
    assert!(!second.published);
    assert_eq!(second.count(), 1);
    assert_eq!(h.bus.published(TOPIC).len(), 1);
    assert_eq!(h.notifier.notices().len(), 1);
}

#[tokio::test]
async fn cancelled_event_rejects_transitions() {
    let h = harness();
    let mut event = fixtures::event(1, 0, 5);
    event.status = EventStatus::Cancelled;
    h.store.seed(event);

    let err = h
        .service
        .set_status(&fixtures::user("dan"), fixtures::event_id(1), ParticipationStatus::Attending)
        .await
        .unwrap_err();
    assert_eq!(err, AttendanceError::Conflict(ConflictReason::EventCancelled));
}

#[tokio::test]
async fn unknown_event_is_not_found() {
    let h = harness();
    let err = h
        .service
        .set_status(&fixtures::user("erin"), fixtures::event_id(42), ParticipationStatus::Maybe)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn withdraw_releases_seat_and_notifies() {
    let h = harness();
    h.store.seed(fixtures::event(1, 0, 3));
    let user = fixtures::user("finn");
    let event = fixtures::event_id(1);

    h.service
        .set_status(&user, event, ParticipationStatus::Attending)
        .await
        .unwrap();
    let outcome = h.service.withdraw(&user, event).await.unwrap();
    assert_eq!(outcome.count(), 0);
    assert!(outcome.commit.participant.is_none());
    assert_eq!(h.service.participant_status(&user, event).await.unwrap(), None);

    let notices = h.notifier.notices();
    assert_eq!(notices.len(), 2);
    assert_eq!(notices[1].previous, Some(ParticipationStatus::Attending));
    assert_eq!(notices[1].current, None);

    assert_eq!(h.service.withdraw(&user, event).await.unwrap_err().kind(), "not_found");
}

#[tokio::test]
async fn notifier_failure_does_not_undo_commit() {
    let h = harness();
    h.store.seed(fixtures::event(1, 0, 3));
    h.notifier.fail(true);

    let outcome = h
        .service
        .set_status(&fixtures::user("gus"), fixtures::event_id(1), ParticipationStatus::Attending)
        .await
        .unwrap();
    assert_eq!(outcome.count(), 1);
    assert_eq!(h.notifier.notices().len(), 1);
}

#[tokio::test]
async fn publish_failure_is_transient_but_commit_stands() {
    let h = harness();
    h.store.seed(fixtures::event(1, 0, 1));
    h.bus.fail_publishes(true);

    let err = h
        .service
        .set_status(&fixtures::user("hana"), fixtures::event_id(1), ParticipationStatus::Attending)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "transient_messaging");
    assert_eq!(h.store.event(fixtures::event_id(1)).await.unwrap().count, 1);
}

#[tokio::test]
async fn snapshot_lookup_failure_is_transient_but_commit_stands() {
    let store = Arc::new(InMemoryAttendanceStore::new());
    let bus = InMemoryEventBus::new();
    // No locations known, so the filling commit cannot be enriched.
    let publisher =
        EventMutationPublisher::new(Arc::new(bus.clone()), Arc::new(InMemoryDetailsLookup::new()), TOPIC);
    let service = ParticipationService::new(
        Arc::clone(&store),
        publisher,
        Arc::new(RecordingNotifier::new()),
    );
    store.seed(fixtures::event(1, 0, 1));

    let err = service
        .set_status(&fixtures::user("ivy"), fixtures::event_id(1), ParticipationStatus::Attending)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "transient_messaging");
    assert_eq!(store.event(fixtures::event_id(1)).await.unwrap().count, 1);
    assert!(bus.published(TOPIC).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_publish_exactly_once() {
    let h = harness();
    h.store.yield_inside_commit(true);
    h.store.seed(fixtures::event(1, 0, 5));

    let mut handles = Vec::new();
    for i in 0..25 {
        let service = h.service.clone();
        handles.push(tokio::spawn(async move {
            service
                .set_status(
                    &fixtures::user(&format!("user-{i}")),
                    fixtures::event_id(1),
                    ParticipationStatus::Attending,
                )
                .await
        }));
    }
    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            accepted += 1;
        }
    }

    assert_eq!(accepted, 5);
    assert_eq!(h.bus.published(TOPIC).len(), 1);
    assert_eq!(h.store.event(fixtures::event_id(1)).await.unwrap().count, 5);
}

#[tokio::test]
async fn queries_reflect_commits() {
    let h = harness();
    h.store.seed(fixtures::event(1, 0, 4));
    h.store.seed(fixtures::event(2, 0, 4));
    let user = fixtures::user("ivy");

    h.service
        .set_status(&user, fixtures::event_id(1), ParticipationStatus::Maybe)
        .await
        .unwrap();
    h.service
        .set_status(&user, fixtures::event_id(2), ParticipationStatus::NotAttending)
        .await
        .unwrap();

    let mine = h.service.events_for_user(&user).await.unwrap();
    assert_eq!(mine.len(), 2);
    assert_eq!(mine[1].1, ParticipationStatus::NotAttending);
    assert_eq!(mine[1].0.count, 0);

    let everyone = h.service.participants(fixtures::event_id(1)).await.unwrap();
    assert_eq!(everyone, vec![(user, ParticipationStatus::Maybe)]);

    assert_eq!(
        h.service.participants(fixtures::event_id(9)).await.unwrap_err().kind(),
        "not_found"
    );
}
