//! Attendance operations.
//!
//! Every state change goes through
//! [`CapacityInvariantStore::apply_transition`] with the pure
//! [`ParticipationStateMachine`] as the decision. After the commit:
//!
//! 1. the notifier is told about a changed answer (failures only logged)
//! 2. if the commit filled the event, an `UPDATE` snapshot is published
//!
//! A publish failure is returned as
//! [`AttendanceError::TransientMessaging`] although the commit stands;
//! [`EventService::republish`](crate::events::EventService::republish)
//! re-emits the snapshot.

use crate::metrics::AttendanceMetrics;
use crate::publisher::EventMutationPublisher;
use rsvp_core::error::AttendanceError;
use rsvp_core::event::EventRecord;
use rsvp_core::ids::{EventId, UserId};
use rsvp_core::message::OperationType;
use rsvp_core::notification::{AttendanceNotice, Notifier};
use rsvp_core::participation::{AttendanceRequest, ParticipationStateMachine, ParticipationStatus};
use rsvp_core::store::{CapacityInvariantStore, CommitResult, EventRepository, ParticipationQuery};
use std::sync::Arc;
use std::time::Instant;

/// Parsed attendance request from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    /// Requesting user.
    pub user_id: UserId,
    /// Target event.
    pub event_id: EventId,
    /// Requested answer.
    pub status: ParticipationStatus,
}

impl TransitionRequest {
    /// Validate raw identifiers and status.
    ///
    /// # Errors
    ///
    /// Returns [`AttendanceError::Validation`] for any malformed part.
    pub fn parse(user_id: &str, event_id: i64, status: &str) -> Result<Self, AttendanceError> {
        Ok(Self {
            user_id: UserId::parse(user_id)?,
            event_id: EventId::new(event_id)?,
            status: status.parse()?,
        })
    }
}

/// Result of an accepted transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    /// What was committed.
    pub commit: CommitResult,
    /// Whether a capacity update was published.
    pub published: bool,
}

impl TransitionOutcome {
    /// Event count after the commit.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.commit.event.count
    }
}

/// Attendance operations over a store implementing the attendance, query and
/// catalog seams.
pub struct ParticipationService<S> {
    store: Arc<S>,
    publisher: EventMutationPublisher,
    notifier: Arc<dyn Notifier>,
}

impl<S> Clone for ParticipationService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            publisher: self.publisher.clone(),
            notifier: Arc::clone(&self.notifier),
        }
    }
}

impl<S> ParticipationService<S>
where
    S: CapacityInvariantStore + ParticipationQuery + EventRepository + 'static,
{
    /// Create the service.
    pub fn new(store: Arc<S>, publisher: EventMutationPublisher, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            publisher,
            notifier,
        }
    }

    /// Join an event or change the answer.
    ///
    /// Re-submitting the current answer is accepted and changes nothing.
    ///
    /// # Errors
    ///
    /// - [`AttendanceError::Conflict`] if the event is cancelled or full.
    /// - [`AttendanceError::NotFound`] for unknown events.
    /// - [`AttendanceError::TransientMessaging`] if the capacity update could
    ///   not be published; the change itself is committed.
    pub async fn set_status(
        &self,
        user_id: &UserId,
        event_id: EventId,
        status: ParticipationStatus,
    ) -> Result<TransitionOutcome, AttendanceError> {
        self.transition(user_id, event_id, AttendanceRequest::Set(status))
            .await
    }

    /// [`set_status`](Self::set_status) on a parsed request.
    ///
    /// # Errors
    ///
    /// Same as [`set_status`](Self::set_status).
    pub async fn submit(&self, request: &TransitionRequest) -> Result<TransitionOutcome, AttendanceError> {
        self.set_status(&request.user_id, request.event_id, request.status)
            .await
    }

    /// Remove the user's participation, releasing the seat it held.
    ///
    /// # Errors
    ///
    /// - [`AttendanceError::NotFound`] if the user has no participation.
    /// - [`AttendanceError::Conflict`] if the event is cancelled.
    pub async fn withdraw(
        &self,
        user_id: &UserId,
        event_id: EventId,
    ) -> Result<TransitionOutcome, AttendanceError> {
        self.transition(user_id, event_id, AttendanceRequest::Withdraw)
            .await
    }

    #[tracing::instrument(skip(self), fields(user_id = %user_id, event_id = %event_id))]
    async fn transition(
        &self,
        user_id: &UserId,
        event_id: EventId,
        request: AttendanceRequest,
    ) -> Result<TransitionOutcome, AttendanceError> {
        let start = Instant::now();
        let result = self
            .store
            .apply_transition(
                event_id,
                user_id,
                Box::new(move |event, current| {
                    ParticipationStateMachine::decide(event, current, request)
                }),
            )
            .await;

        let commit = match result {
            Ok(commit) => commit,
            Err(e) => {
                AttendanceMetrics::record_transition(e.kind(), start.elapsed());
                tracing::info!(error = %e, "Attendance transition rejected");
                return Err(e);
            }
        };

        let decision = commit.decision;
        let outcome = if decision.is_noop() { "noop" } else { "accepted" };
        AttendanceMetrics::record_transition(outcome, start.elapsed());
        tracing::info!(
            previous = ?decision.previous,
            next = ?decision.next_status(),
            count = commit.event.count,
            capacity = commit.event.capacity,
            "Attendance transition committed"
        );

        if decision.status_changed() {
            self.notify(AttendanceNotice {
                user_id: user_id.clone(),
                event: commit.event.clone(),
                previous: decision.previous,
                current: decision.next_status(),
            })
            .await;
        }

        let mut published = false;
        if decision.publish_worthy {
            AttendanceMetrics::record_capacity_reached();
            self.publisher
                .publish(OperationType::Update, &commit.event)
                .await?;
            published = true;
        }

        Ok(TransitionOutcome { commit, published })
    }

    async fn notify(&self, notice: AttendanceNotice) {
        let event_id = notice.event.event_id;
        if let Err(error) = self.notifier.notify(notice).await {
            tracing::warn!(event_id = %event_id, error = %error, "Attendance notification failed");
        }
    }

    /// The user's current answer, if any.
    ///
    /// # Errors
    ///
    /// Returns [`AttendanceError::Storage`] on engine failures.
    pub async fn participant_status(
        &self,
        user_id: &UserId,
        event_id: EventId,
    ) -> Result<Option<ParticipationStatus>, AttendanceError> {
        Ok(self
            .store
            .participant(event_id, user_id)
            .await?
            .map(|record| record.status))
    }

    /// Everyone who answered for an event.
    ///
    /// # Errors
    ///
    /// - [`AttendanceError::NotFound`] for unknown events.
    /// - [`AttendanceError::Storage`] on engine failures.
    pub async fn participants(
        &self,
        event_id: EventId,
    ) -> Result<Vec<(UserId, ParticipationStatus)>, AttendanceError> {
        if self.store.get(event_id).await?.is_none() {
            return Err(AttendanceError::not_found(format!("event {event_id}")));
        }
        Ok(self
            .store
            .participants(event_id)
            .await?
            .into_iter()
            .map(|record| (record.user_id, record.status))
            .collect())
    }

    /// Events the user answered for, with the answer.
    ///
    /// # Errors
    ///
    /// Returns [`AttendanceError::Storage`] on engine failures.
    pub async fn events_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<(EventRecord, ParticipationStatus)>, AttendanceError> {
        self.store.participations_for_user(user_id).await
    }
}
