//! Storage failures and their mapping into [`AttendanceError`].

use rsvp_core::error::{AttendanceError, ConflictReason};
use thiserror::Error;

/// SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// Errors raised by the Postgres stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The driver or the server failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row does not decode into a domain value.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether the server rejected a write with a unique violation.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => {
                db.code().as_deref() == Some(UNIQUE_VIOLATION)
            }
            _ => false,
        }
    }
}

impl From<StoreError> for AttendanceError {
    fn from(error: StoreError) -> Self {
        if error.is_unique_violation() {
            return Self::Conflict(ConflictReason::DuplicateParticipation);
        }
        Self::Storage(error.to_string())
    }
}

/// Shorthand for `sqlx` results inside the stores.
pub(crate) fn db(error: sqlx::Error) -> AttendanceError {
    StoreError::Database(error).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_rows_are_storage_errors() {
        let err: AttendanceError = StoreError::Corrupt("count -1".into()).into();
        assert_eq!(err.kind(), "storage");
        assert!(err.to_string().contains("count -1"));
    }

    #[test]
    fn pool_failures_are_not_conflicts() {
        let err = StoreError::Database(sqlx::Error::PoolTimedOut);
        assert!(!err.is_unique_violation());
        assert_eq!(AttendanceError::from(err).kind(), "storage");
    }
}
