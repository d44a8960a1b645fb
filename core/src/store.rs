//! Storage seams.
//!
//! [`CapacityInvariantStore`] is the only synchronization point for attendance:
//! it runs a decision against the event row and the caller's participation
//! inside one atomic unit scoped to that event. Events never share a lock.

use crate::error::AttendanceError;
use crate::event::{EventRecord, Location, NewEvent};
use crate::ids::{EventId, GroupId, ImageId, LocationId, UserId};
use crate::participation::{Decision, ParticipationRecord, ParticipationStatus};
use futures::future::BoxFuture;

/// Decision callback run inside the store's atomic unit.
///
/// It receives the event and the caller's participation as read under the
/// per-event lock. Returning an error aborts the unit without writes.
pub type DecisionFn = Box<
    dyn FnOnce(&EventRecord, Option<&ParticipationRecord>) -> Result<Decision, AttendanceError>
        + Send,
>;

/// Result of a committed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    /// The decision that was committed.
    pub decision: Decision,
    /// The event after the commit.
    pub event: EventRecord,
    /// The caller's participation after the commit, `None` once withdrawn.
    pub participant: Option<ParticipationRecord>,
}

/// Atomic per-event read-modify-write of the attendee count.
pub trait CapacityInvariantStore: Send + Sync {
    /// Read the event and `user_id`'s participation, run `decide`, and persist
    /// its outcome atomically.
    ///
    /// Calls for the same `event_id` are serialized; calls for different
    /// events run in parallel.
    ///
    /// # Errors
    ///
    /// - [`AttendanceError::NotFound`] if the event does not exist.
    /// - Whatever `decide` returns.
    /// - [`AttendanceError::Storage`] on engine failures.
    fn apply_transition<'a>(
        &'a self,
        event_id: EventId,
        user_id: &'a UserId,
        decide: DecisionFn,
    ) -> BoxFuture<'a, Result<CommitResult, AttendanceError>>;
}

/// Read access to participation records.
pub trait ParticipationQuery: Send + Sync {
    /// The user's participation in an event.
    ///
    /// # Errors
    ///
    /// Returns [`AttendanceError::Storage`] on engine failures.
    fn participant<'a>(
        &'a self,
        event_id: EventId,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, Result<Option<ParticipationRecord>, AttendanceError>>;

    /// All participations of an event.
    ///
    /// # Errors
    ///
    /// Returns [`AttendanceError::Storage`] on engine failures.
    fn participants(
        &self,
        event_id: EventId,
    ) -> BoxFuture<'_, Result<Vec<ParticipationRecord>, AttendanceError>>;

    /// All participations of a user, with their events.
    ///
    /// # Errors
    ///
    /// Returns [`AttendanceError::Storage`] on engine failures.
    fn participations_for_user<'a>(
        &'a self,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, Result<Vec<(EventRecord, ParticipationStatus)>, AttendanceError>>;
}

/// Event catalog persistence.
///
/// `update` must take the same per-event lock as
/// [`CapacityInvariantStore::apply_transition`] and must never change
/// `count` or `capacity`.
pub trait EventRepository: Send + Sync {
    /// Store a new event with a fresh id.
    ///
    /// # Errors
    ///
    /// Returns [`AttendanceError::Storage`] on engine failures.
    fn insert(&self, event: NewEvent) -> BoxFuture<'_, Result<EventRecord, AttendanceError>>;

    /// Load an event.
    ///
    /// # Errors
    ///
    /// Returns [`AttendanceError::Storage`] on engine failures.
    fn get(&self, event_id: EventId) -> BoxFuture<'_, Result<Option<EventRecord>, AttendanceError>>;

    /// Apply `change` to the event under its lock and store the result.
    ///
    /// # Errors
    ///
    /// - [`AttendanceError::NotFound`] if the event does not exist.
    /// - Whatever `change` returns.
    /// - [`AttendanceError::Storage`] on engine failures.
    fn update(
        &self,
        event_id: EventId,
        change: Box<dyn FnOnce(&EventRecord) -> Result<EventRecord, AttendanceError> + Send>,
    ) -> BoxFuture<'_, Result<EventRecord, AttendanceError>>;

    /// Remove an event and its participations, returning the last state.
    ///
    /// # Errors
    ///
    /// - [`AttendanceError::NotFound`] if the event does not exist.
    /// - [`AttendanceError::Storage`] on engine failures.
    fn delete(&self, event_id: EventId) -> BoxFuture<'_, Result<EventRecord, AttendanceError>>;

    /// All events.
    ///
    /// # Errors
    ///
    /// Returns [`AttendanceError::Storage`] on engine failures.
    fn list(&self) -> BoxFuture<'_, Result<Vec<EventRecord>, AttendanceError>>;

    /// Events of a group.
    ///
    /// # Errors
    ///
    /// Returns [`AttendanceError::Storage`] on engine failures.
    fn by_group(&self, group_id: GroupId) -> BoxFuture<'_, Result<Vec<EventRecord>, AttendanceError>>;
}

/// Resolves the references an event holds into snapshot fields.
pub trait EventDetailsLookup: Send + Sync {
    /// Address of a location.
    ///
    /// # Errors
    ///
    /// [`AttendanceError::NotFound`] for unknown locations,
    /// [`AttendanceError::Storage`] on engine failures.
    fn location(&self, location_id: LocationId) -> BoxFuture<'_, Result<Location, AttendanceError>>;

    /// Public URL of an image, `None` if it cannot be resolved.
    ///
    /// # Errors
    ///
    /// [`AttendanceError::Storage`] on engine failures.
    fn image_url(&self, image_id: ImageId) -> BoxFuture<'_, Result<Option<String>, AttendanceError>>;
}
