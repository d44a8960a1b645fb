//! Error taxonomy for attendance operations.
//!
//! Every error the core produces is either returned to a caller or logged and
//! skipped by a consumer; none of them is fatal to the process.
//!
//! | Variant | Raised by | Retried? |
//! |---|---|---|
//! | [`AttendanceError::Validation`] | malformed identifiers / input | never |
//! | [`AttendanceError::Conflict`] | capacity exceeded, cancelled event | not internally |
//! | [`AttendanceError::NotFound`] | unknown event or participant | no |
//! | [`AttendanceError::TransientMessaging`] | bus rejected a publish | caller decides |
//! | [`AttendanceError::Storage`] | storage engine failure | caller decides |
//!
//! Consumer-side decode failures use the separate
//! [`MalformedMessageError`](crate::message::MalformedMessageError): they never
//! reach a caller.

use thiserror::Error;

/// Why a transition was refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// The event is cancelled; its count is frozen.
    #[error("event cancelled")]
    EventCancelled,

    /// Accepting the transition would push the count above capacity.
    #[error("capacity exceeded")]
    CapacityExceeded,

    /// Another active participation already exists for the same user and event.
    #[error("duplicate active participation")]
    DuplicateParticipation,
}

/// Errors returned by attendance and event operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttendanceError {
    /// Malformed or missing input. Local, never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The request conflicts with the current event state.
    #[error("Conflict: {0}")]
    Conflict(ConflictReason),

    /// Unknown event or participant.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The bus client did not accept a message for delivery.
    ///
    /// Any state change that preceded the publish is already committed.
    #[error("Transient messaging failure: {0}")]
    TransientMessaging(String),

    /// The storage engine failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl AttendanceError {
    /// Shorthand for a validation error.
    #[must_use]
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Shorthand for a not-found error.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Short label used for metrics and log fields.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::TransientMessaging(_) => "transient_messaging",
            Self::Storage(_) => "storage",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_display_names_the_reason() {
        let err = AttendanceError::Conflict(ConflictReason::CapacityExceeded);
        assert_eq!(err.to_string(), "Conflict: capacity exceeded");

        let err = AttendanceError::Conflict(ConflictReason::EventCancelled);
        assert_eq!(err.to_string(), "Conflict: event cancelled");
    }

    #[test]
    fn kind_labels_are_stable() {
        assert_eq!(AttendanceError::validation("x").kind(), "validation");
        assert_eq!(AttendanceError::not_found("x").kind(), "not_found");
        assert_eq!(
            AttendanceError::TransientMessaging("down".into()).kind(),
            "transient_messaging"
        );
    }
}
