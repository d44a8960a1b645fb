//! Turns committed event changes into mutation messages.

use crate::metrics::PublisherMetrics;
use rsvp_core::error::AttendanceError;
use rsvp_core::event::EventRecord;
use rsvp_core::event_bus::EventBus;
use rsvp_core::message::{EventMutationMessage, EventSnapshot, OperationType};
use rsvp_core::store::EventDetailsLookup;
use std::sync::Arc;
use std::time::Instant;

/// Publishes full event snapshots to the event mutation topic.
///
/// Delivery is at-least-once. A successful return only means the bus client
/// accepted the message; nothing is retried here.
#[derive(Clone)]
pub struct EventMutationPublisher {
    bus: Arc<dyn EventBus>,
    details: Arc<dyn EventDetailsLookup>,
    topic: String,
}

impl EventMutationPublisher {
    /// Create a publisher for `topic`.
    pub fn new(
        bus: Arc<dyn EventBus>,
        details: Arc<dyn EventDetailsLookup>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            details,
            topic: topic.into(),
        }
    }

    /// Topic messages are published to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Build the self-contained snapshot of `event`.
    ///
    /// # Errors
    ///
    /// Propagates lookup failures for the event's location or image.
    pub async fn snapshot(&self, event: &EventRecord) -> Result<EventSnapshot, AttendanceError> {
        let location = self.details.location(event.location_id).await?;
        let image_url = match event.image_id {
            Some(image_id) => self.details.image_url(image_id).await?,
            None => None,
        };
        Ok(EventSnapshot::from_record(event, &location, image_url))
    }

    /// Publish `event` with the given operation.
    ///
    /// # Errors
    ///
    /// Returns [`AttendanceError::TransientMessaging`] if the snapshot could
    /// not be built or the bus rejected the message. Callers publish after
    /// committing, so the change stands either way.
    #[tracing::instrument(skip(self, event), fields(event_id = %event.event_id, topic = %self.topic))]
    pub async fn publish(
        &self,
        operation: OperationType,
        event: &EventRecord,
    ) -> Result<EventMutationMessage, AttendanceError> {
        let payload = self.snapshot(event).await.map_err(|e| {
            PublisherMetrics::record_publish_error();
            tracing::warn!(operation = %operation, error = %e, "Event snapshot lookup failed");
            AttendanceError::TransientMessaging(format!("snapshot lookup failed: {e}"))
        })?;
        let message = EventMutationMessage { operation, payload };
        let encoded = message
            .to_bus_message()
            .map_err(|e| AttendanceError::TransientMessaging(format!("encoding failed: {e}")))?;

        let start = Instant::now();
        if let Err(e) = self.bus.publish(&self.topic, &encoded).await {
            PublisherMetrics::record_publish_error();
            tracing::warn!(operation = %operation, error = %e, "Event mutation publish rejected");
            return Err(AttendanceError::TransientMessaging(e.to_string()));
        }
        PublisherMetrics::record_publish(operation.as_str(), start.elapsed());
        tracing::debug!(operation = %operation, "Event mutation published");
        Ok(message)
    }
}

impl std::fmt::Debug for EventMutationPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventMutationPublisher")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}
