//! Strongly typed identifiers.
//!
//! Numeric identifiers are positive database keys. [`UserId`] is an opaque
//! string issued by the identity provider.

use crate::error::AttendanceError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Longest user identifier accepted.
pub const MAX_USER_ID_LEN: usize = 128;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Create an identifier, rejecting zero and negative values.
            ///
            /// # Errors
            ///
            /// Returns [`AttendanceError::Validation`] if `raw <= 0`.
            pub fn new(raw: i64) -> Result<Self, AttendanceError> {
                if raw > 0 {
                    Ok(Self(raw))
                } else {
                    Err(AttendanceError::validation(format!(
                        concat!($label, " must be positive, got {}"),
                        raw
                    )))
                }
            }

            /// The raw value.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl TryFrom<i64> for $name {
            type Error = AttendanceError;

            fn try_from(raw: i64) -> Result<Self, Self::Error> {
                Self::new(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Identifier of an event.
    EventId,
    "event id"
);
numeric_id!(
    /// Identifier of the group that owns an event.
    GroupId,
    "group id"
);
numeric_id!(
    /// Identifier of a participation record.
    ParticipantId,
    "participant id"
);
numeric_id!(
    /// Identifier of a stored address.
    LocationId,
    "location id"
);
numeric_id!(
    /// Identifier of an uploaded event image.
    ImageId,
    "image id"
);

/// Identifier of a user, as issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Parse a user identifier.
    ///
    /// Surrounding whitespace is trimmed. Empty values, values longer than
    /// [`MAX_USER_ID_LEN`] and values containing whitespace or control
    /// characters are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`AttendanceError::Validation`] for malformed identifiers.
    pub fn parse(raw: &str) -> Result<Self, AttendanceError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AttendanceError::validation("user id must not be empty"));
        }
        if trimmed.len() > MAX_USER_ID_LEN {
            return Err(AttendanceError::validation(format!(
                "user id longer than {MAX_USER_ID_LEN} bytes"
            )));
        }
        if trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(AttendanceError::validation(
                "user id must not contain whitespace or control characters",
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ids_reject_non_positive_values() {
        assert!(EventId::new(0).is_err());
        assert!(EventId::new(-3).is_err());
        assert_eq!(EventId::new(7).map(EventId::get), Ok(7));
    }

    #[test]
    fn user_id_is_trimmed() {
        assert_eq!(
            UserId::parse("  firebase-uid-1 ").map(|u| u.as_str().to_string()),
            Ok("firebase-uid-1".to_string())
        );
    }

    #[test]
    fn malformed_user_ids_are_rejected() {
        assert!(UserId::parse("").is_err());
        assert!(UserId::parse("   ").is_err());
        assert!(UserId::parse("two words").is_err());
        assert!(UserId::parse(&"x".repeat(MAX_USER_ID_LEN + 1)).is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn user_id_deserialization_validates() {
        let ok: UserId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(ok.as_str(), "abc");
        assert!(serde_json::from_str::<UserId>("\"\"").is_err());
    }
}
