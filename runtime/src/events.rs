//! Event catalog operations. Every committed change publishes a snapshot.

use crate::publisher::EventMutationPublisher;
use rsvp_core::error::AttendanceError;
use rsvp_core::event::{EventChanges, EventRecord, EventStatus, NewEvent};
use rsvp_core::ids::{EventId, GroupId};
use rsvp_core::message::OperationType;
use rsvp_core::store::EventRepository;
use std::sync::Arc;

/// Create, change and remove events.
pub struct EventService<R> {
    repository: Arc<R>,
    publisher: EventMutationPublisher,
}

impl<R> Clone for EventService<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            publisher: self.publisher.clone(),
        }
    }
}

impl<R: EventRepository + 'static> EventService<R> {
    /// Create the service.
    pub const fn new(repository: Arc<R>, publisher: EventMutationPublisher) -> Self {
        Self {
            repository,
            publisher,
        }
    }

    /// Store a new event with a zero count and publish `ADD`.
    ///
    /// # Errors
    ///
    /// - [`AttendanceError::Validation`] for invalid input.
    /// - [`AttendanceError::TransientMessaging`] if publishing failed; the
    ///   event is stored.
    #[tracing::instrument(skip(self, event), fields(group_id = %event.group_id))]
    pub async fn create_event(&self, event: NewEvent) -> Result<EventRecord, AttendanceError> {
        event.validate()?;
        let created = self.repository.insert(event).await?;
        tracing::info!(event_id = %created.event_id, capacity = created.capacity, "Event created");
        self.publisher.publish(OperationType::Add, &created).await?;
        Ok(created)
    }

    /// Change descriptive fields or status and publish `UPDATE`.
    ///
    /// # Errors
    ///
    /// - [`AttendanceError::NotFound`] for unknown events.
    /// - [`AttendanceError::Validation`] if the result would be invalid.
    /// - [`AttendanceError::TransientMessaging`] if publishing failed.
    #[tracing::instrument(skip(self, changes))]
    pub async fn update_event(
        &self,
        event_id: EventId,
        changes: EventChanges,
    ) -> Result<EventRecord, AttendanceError> {
        let updated = self
            .repository
            .update(event_id, Box::new(move |event| changes.apply_to(event)))
            .await?;
        tracing::info!(status = %updated.status, "Event updated");
        self.publisher.publish(OperationType::Update, &updated).await?;
        Ok(updated)
    }

    /// Cancel an event, freezing its count, and publish `UPDATE`.
    ///
    /// # Errors
    ///
    /// Same as [`update_event`](Self::update_event).
    pub async fn cancel_event(&self, event_id: EventId) -> Result<EventRecord, AttendanceError> {
        self.update_event(
            event_id,
            EventChanges {
                status: Some(EventStatus::Cancelled),
                ..EventChanges::default()
            },
        )
        .await
    }

    /// Remove an event and publish `DELETE` with its last snapshot.
    ///
    /// # Errors
    ///
    /// - [`AttendanceError::NotFound`] for unknown events.
    /// - [`AttendanceError::TransientMessaging`] if publishing failed.
    #[tracing::instrument(skip(self))]
    pub async fn delete_event(&self, event_id: EventId) -> Result<EventRecord, AttendanceError> {
        let removed = self.repository.delete(event_id).await?;
        tracing::info!("Event deleted");
        self.publisher.publish(OperationType::Delete, &removed).await?;
        Ok(removed)
    }

    /// Publish an `UPDATE` snapshot of the current state.
    ///
    /// Recovers from a [`AttendanceError::TransientMessaging`] returned after
    /// a committed change.
    ///
    /// # Errors
    ///
    /// - [`AttendanceError::NotFound`] for unknown events.
    /// - [`AttendanceError::TransientMessaging`] if publishing failed.
    pub async fn republish(&self, event_id: EventId) -> Result<EventRecord, AttendanceError> {
        let event = self.get_event(event_id).await?;
        self.publisher.publish(OperationType::Update, &event).await?;
        Ok(event)
    }

    /// Load an event.
    ///
    /// # Errors
    ///
    /// [`AttendanceError::NotFound`] for unknown events.
    pub async fn get_event(&self, event_id: EventId) -> Result<EventRecord, AttendanceError> {
        self.repository
            .get(event_id)
            .await?
            .ok_or_else(|| AttendanceError::not_found(format!("event {event_id}")))
    }

    /// Scheduled events with free seats.
    ///
    /// # Errors
    ///
    /// Returns [`AttendanceError::Storage`] on engine failures.
    pub async fn available_events(&self) -> Result<Vec<EventRecord>, AttendanceError> {
        let mut events = self.repository.list().await?;
        events.retain(EventRecord::is_available);
        Ok(events)
    }

    /// Events of a group.
    ///
    /// # Errors
    ///
    /// Returns [`AttendanceError::Storage`] on engine failures.
    pub async fn events_for_group(&self, group_id: GroupId) -> Result<Vec<EventRecord>, AttendanceError> {
        self.repository.by_group(group_id).await
    }
}
