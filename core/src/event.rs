//! Event records as stored by the owning service.

use crate::error::AttendanceError;
use crate::ids::{EventId, GroupId, ImageId, LocationId};
use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    /// Default status; accepts participants.
    Scheduled,
    /// Moved to a later date.
    Postponed,
    /// Cancelled. The attendee count is frozen.
    Cancelled,
    /// Already happened.
    Completed,
}

impl EventStatus {
    /// Upper-case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Postponed => "POSTPONED",
            Self::Cancelled => "CANCELLED",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = AttendanceError;

    /// Case-insensitive parse. `CANCELED` is accepted as a spelling of
    /// [`EventStatus::Cancelled`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SCHEDULED" => Ok(Self::Scheduled),
            "POSTPONED" => Ok(Self::Postponed),
            "CANCELLED" | "CANCELED" => Ok(Self::Cancelled),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(AttendanceError::validation(format!(
                "unknown event status '{other}'"
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for EventStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Postal address fields copied into every snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Location {
    /// Street and number.
    pub street: String,
    /// City.
    pub city: String,
    /// Province or state.
    pub province: String,
    /// Country.
    pub country: String,
}

/// An event owned by a group.
///
/// `capacity` is fixed at creation. `count` is only changed through
/// [`ParticipationStateMachine`](crate::participation::ParticipationStateMachine)
/// decisions committed by a
/// [`CapacityInvariantStore`](crate::store::CapacityInvariantStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event identifier.
    pub event_id: EventId,
    /// Owning group.
    pub group_id: GroupId,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Where the event takes place.
    pub location_id: LocationId,
    /// Start, local time without zone.
    pub start_time: NaiveDateTime,
    /// End, local time without zone.
    pub end_time: NaiveDateTime,
    /// Lifecycle status.
    pub status: EventStatus,
    /// Number of counting participations.
    pub count: u32,
    /// Upper bound for `count` while the event is not cancelled.
    pub capacity: u32,
    /// Optional cover image.
    pub image_id: Option<ImageId>,
}

impl EventRecord {
    /// `true` once every seat is taken.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.count >= self.capacity
    }

    /// `true` for cancelled events.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.status, EventStatus::Cancelled)
    }

    /// Scheduled and not full.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self.status, EventStatus::Scheduled) && !self.is_full()
    }
}

/// Input for creating an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Owning group.
    pub group_id: GroupId,
    /// Title, must not be blank.
    pub title: String,
    /// Description, must not be blank.
    pub description: String,
    /// Location.
    pub location_id: LocationId,
    /// Start time.
    pub start_time: NaiveDateTime,
    /// End time, not before `start_time`.
    pub end_time: NaiveDateTime,
    /// Capacity, at least one.
    pub capacity: u32,
    /// Optional cover image.
    pub image_id: Option<ImageId>,
}

impl NewEvent {
    /// Check field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`AttendanceError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), AttendanceError> {
        if self.title.trim().is_empty() {
            return Err(AttendanceError::validation("title must not be blank"));
        }
        if self.description.trim().is_empty() {
            return Err(AttendanceError::validation("description must not be blank"));
        }
        if self.capacity == 0 {
            return Err(AttendanceError::validation("capacity must be at least 1"));
        }
        if self.end_time < self.start_time {
            return Err(AttendanceError::validation(
                "end time must not be before start time",
            ));
        }
        Ok(())
    }

    /// Materialize the record under `event_id` with a zero count.
    #[must_use]
    pub fn into_record(self, event_id: EventId) -> EventRecord {
        EventRecord {
            event_id,
            group_id: self.group_id,
            title: self.title,
            description: self.description,
            location_id: self.location_id,
            start_time: self.start_time,
            end_time: self.end_time,
            status: EventStatus::Scheduled,
            count: 0,
            capacity: self.capacity,
            image_id: self.image_id,
        }
    }
}

/// Partial update of an event. Capacity and count cannot be changed here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventChanges {
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New location.
    pub location_id: Option<LocationId>,
    /// New start time.
    pub start_time: Option<NaiveDateTime>,
    /// New end time.
    pub end_time: Option<NaiveDateTime>,
    /// New status.
    pub status: Option<EventStatus>,
    /// New image.
    pub image_id: Option<ImageId>,
}

impl EventChanges {
    /// Apply the changes to `event`, validating the result.
    ///
    /// A cancelled event cannot be moved back to another status.
    ///
    /// # Errors
    ///
    /// Returns [`AttendanceError::Validation`] if the updated record would be
    /// invalid, leaving `event` untouched.
    pub fn apply_to(&self, event: &EventRecord) -> Result<EventRecord, AttendanceError> {
        let mut updated = event.clone();
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(AttendanceError::validation("title must not be blank"));
            }
            updated.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            if description.trim().is_empty() {
                return Err(AttendanceError::validation("description must not be blank"));
            }
            updated.description.clone_from(description);
        }
        if let Some(location_id) = self.location_id {
            updated.location_id = location_id;
        }
        if let Some(start) = self.start_time {
            updated.start_time = start;
        }
        if let Some(end) = self.end_time {
            updated.end_time = end;
        }
        if let Some(status) = self.status {
            if event.is_cancelled() && status != EventStatus::Cancelled {
                return Err(AttendanceError::validation(
                    "a cancelled event cannot be reopened",
                ));
            }
            updated.status = status;
        }
        if let Some(image_id) = self.image_id {
            updated.image_id = Some(image_id);
        }
        if updated.end_time < updated.start_time {
            return Err(AttendanceError::validation(
                "end time must not be before start time",
            ));
        }
        Ok(updated)
    }
}
