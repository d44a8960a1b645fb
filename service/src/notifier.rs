//! Notifier used by the service process.

use futures::future::BoxFuture;
use rsvp_core::notification::{AttendanceNotice, Notifier};

/// Records every committed attendance change as a structured log line.
///
/// Delivery to mail or push providers happens downstream of the logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: AttendanceNotice) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async move {
            tracing::info!(
                user_id = %notice.user_id,
                event_id = %notice.event.event_id,
                previous = ?notice.previous,
                current = ?notice.current,
                count = notice.event.count,
                capacity = notice.event.capacity,
                "Attendance changed"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rsvp_core::participation::ParticipationStatus;
    use rsvp_testing::fixtures;

    #[tokio::test]
    async fn notify_never_fails() {
        let notice = AttendanceNotice {
            user_id: fixtures::user("ana"),
            event: fixtures::event(1, 1, 10),
            previous: None,
            current: Some(ParticipationStatus::Attending),
        };
        TracingNotifier.notify(notice).await.unwrap();
    }
}
