//! Side effects fired after a committed attendance change.

use crate::event::EventRecord;
use crate::ids::UserId;
use crate::participation::ParticipationStatus;
use futures::future::BoxFuture;

/// A committed change of a user's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceNotice {
    /// The user.
    pub user_id: UserId,
    /// The event after the commit.
    pub event: EventRecord,
    /// Answer before the change, `None` if the user had none.
    pub previous: Option<ParticipationStatus>,
    /// Answer after the change, `None` after a withdrawal.
    pub current: Option<ParticipationStatus>,
}

/// External collaborator told about committed changes (mail, push, ...).
///
/// Failures are logged by the caller and never undo the commit.
pub trait Notifier: Send + Sync {
    /// Deliver the notice.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure.
    fn notify(&self, notice: AttendanceNotice) -> BoxFuture<'_, Result<(), String>>;
}

/// Notifier that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notice: AttendanceNotice) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async { Ok(()) })
    }
}
