//! Participation records and the attendance state machine.
//!
//! [`ParticipationStateMachine::decide`] is pure: given the event as read
//! inside the store's atomic unit and the caller's current participation, it
//! either refuses the request or describes exactly what to write. The store
//! commits that description without further checks.
//!
//! Count deltas:
//!
//! | from \ to | Attending | Maybe | NotAttending | (withdraw) |
//! |---|---|---|---|---|
//! | none / NotAttending | +1 | +1 | 0 | 0 |
//! | Attending / Maybe | 0 | 0 | -1 | -1 |

use crate::error::{AttendanceError, ConflictReason};
use crate::event::EventRecord;
use crate::ids::{EventId, ParticipantId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A user's answer for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipationStatus {
    /// Going.
    Attending,
    /// Might go. Holds a seat.
    Maybe,
    /// Not going. Does not hold a seat.
    NotAttending,
}

impl ParticipationStatus {
    /// Whether this status holds a seat.
    #[must_use]
    pub const fn counts(self) -> bool {
        !matches!(self, Self::NotAttending)
    }

    /// Upper-case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Attending => "ATTENDING",
            Self::Maybe => "MAYBE",
            Self::NotAttending => "NOT_ATTENDING",
        }
    }
}

impl fmt::Display for ParticipationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParticipationStatus {
    type Err = AttendanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace([' ', '-'], "_").as_str() {
            "ATTENDING" => Ok(Self::Attending),
            "MAYBE" => Ok(Self::Maybe),
            "NOT_ATTENDING" | "NOTATTENDING" => Ok(Self::NotAttending),
            other => Err(AttendanceError::validation(format!(
                "unknown participation status '{other}'"
            ))),
        }
    }
}

/// A stored participation, unique per `(user_id, event_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipationRecord {
    /// Record identifier.
    pub participant_id: ParticipantId,
    /// Participating user.
    pub user_id: UserId,
    /// Event.
    pub event_id: EventId,
    /// Current answer.
    pub status: ParticipationStatus,
}

/// What the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceRequest {
    /// Create or update the participation with this status.
    Set(ParticipationStatus),
    /// Remove the participation.
    Withdraw,
}

/// Write to perform on the participation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantWrite {
    /// Insert the record, or overwrite its status.
    Upsert(ParticipationStatus),
    /// Delete the record.
    Remove,
}

/// An accepted transition, ready to be committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Status before the transition, `None` if there was no record.
    pub previous: Option<ParticipationStatus>,
    /// Write to apply to the participation record.
    pub write: ParticipantWrite,
    /// Event count read inside the atomic unit.
    pub previous_count: u32,
    /// Event count to commit.
    pub new_count: u32,
    /// The commit moves the count to exactly capacity from below.
    pub publish_worthy: bool,
}

impl Decision {
    /// Signed change of the event count.
    #[must_use]
    pub fn delta(&self) -> i64 {
        i64::from(self.new_count) - i64::from(self.previous_count)
    }

    /// Status after the transition, `None` if the record is removed.
    #[must_use]
    pub const fn next_status(&self) -> Option<ParticipationStatus> {
        match self.write {
            ParticipantWrite::Upsert(status) => Some(status),
            ParticipantWrite::Remove => None,
        }
    }

    /// Whether the user's answer changed.
    #[must_use]
    pub fn status_changed(&self) -> bool {
        self.previous != self.next_status()
    }

    /// Re-submission of the current status.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.status_changed() && self.new_count == self.previous_count
    }
}

/// Pure attendance decision logic.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParticipationStateMachine;

impl ParticipationStateMachine {
    /// Decide whether `request` is accepted for `event` given the caller's
    /// `current` participation.
    ///
    /// # Errors
    ///
    /// - [`ConflictReason::EventCancelled`] for every request on a cancelled
    ///   event, including withdrawal.
    /// - [`ConflictReason::CapacityExceeded`] if a seat is requested and the
    ///   event is full.
    /// - [`AttendanceError::NotFound`] when withdrawing without a record.
    pub fn decide(
        event: &EventRecord,
        current: Option<&ParticipationRecord>,
        request: AttendanceRequest,
    ) -> Result<Decision, AttendanceError> {
        if event.is_cancelled() {
            return Err(AttendanceError::Conflict(ConflictReason::EventCancelled));
        }

        let previous = current.map(|record| record.status);
        let held_seat = previous.is_some_and(ParticipationStatus::counts);

        let (write, wants_seat) = match request {
            AttendanceRequest::Set(status) => (ParticipantWrite::Upsert(status), status.counts()),
            AttendanceRequest::Withdraw => {
                if current.is_none() {
                    return Err(AttendanceError::not_found(format!(
                        "no participation in event {}",
                        event.event_id
                    )));
                }
                (ParticipantWrite::Remove, false)
            }
        };

        let previous_count = event.count;
        let new_count = match (held_seat, wants_seat) {
            (false, true) => {
                let next = previous_count.saturating_add(1);
                if next > event.capacity {
                    return Err(AttendanceError::Conflict(ConflictReason::CapacityExceeded));
                }
                next
            }
            (true, false) => previous_count.saturating_sub(1),
            _ => previous_count,
        };

        Ok(Decision {
            previous,
            write,
            previous_count,
            new_count,
            publish_worthy: new_count == event.capacity && previous_count < event.capacity,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::event::EventStatus;
    use crate::ids::{GroupId, LocationId};
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn event(count: u32, capacity: u32) -> EventRecord {
        let start = NaiveDate::from_ymd_opt(2025, 3, 14)
            .and_then(|d| d.and_hms_opt(19, 0, 0))
            .unwrap();
        EventRecord {
            event_id: EventId::new(1).unwrap(),
            group_id: GroupId::new(1).unwrap(),
            title: "Pi night".into(),
            description: "Pie and math".into(),
            location_id: LocationId::new(1).unwrap(),
            start_time: start,
            end_time: start,
            status: EventStatus::Scheduled,
            count,
            capacity,
            image_id: None,
        }
    }

    fn record(user: &str, status: ParticipationStatus) -> ParticipationRecord {
        ParticipationRecord {
            participant_id: ParticipantId::new(1).unwrap(),
            user_id: UserId::parse(user).unwrap(),
            event_id: EventId::new(1).unwrap(),
            status,
        }
    }

    #[test]
    fn joining_takes_a_seat() {
        let d = ParticipationStateMachine::decide(
            &event(0, 3),
            None,
            AttendanceRequest::Set(ParticipationStatus::Attending),
        )
        .unwrap();
        assert_eq!(d.new_count, 1);
        assert_eq!(d.delta(), 1);
        assert!(!d.publish_worthy);
        assert!(d.status_changed());
    }

    #[test]
    fn joining_as_not_attending_takes_no_seat() {
        let d = ParticipationStateMachine::decide(
            &event(0, 3),
            None,
            AttendanceRequest::Set(ParticipationStatus::NotAttending),
        )
        .unwrap();
        assert_eq!(d.delta(), 0);
        assert_eq!(d.write, ParticipantWrite::Upsert(ParticipationStatus::NotAttending));
    }

    #[test]
    fn last_seat_is_publish_worthy() {
        let d = ParticipationStateMachine::decide(
            &event(1, 2),
            None,
            AttendanceRequest::Set(ParticipationStatus::Attending),
        )
        .unwrap();
        assert_eq!(d.new_count, 2);
        assert!(d.publish_worthy);
    }

    #[test]
    fn full_event_rejects_new_seat() {
        let err = ParticipationStateMachine::decide(
            &event(2, 2),
            None,
            AttendanceRequest::Set(ParticipationStatus::Maybe),
        )
        .unwrap_err();
        assert_eq!(err, AttendanceError::Conflict(ConflictReason::CapacityExceeded));
    }

    #[test]
    fn switching_between_counting_statuses_keeps_count() {
        let current = record("a", ParticipationStatus::Attending);
        let d = ParticipationStateMachine::decide(
            &event(2, 2),
            Some(&current),
            AttendanceRequest::Set(ParticipationStatus::Maybe),
        )
        .unwrap();
        assert_eq!(d.delta(), 0);
        assert!(d.status_changed());
        assert!(!d.publish_worthy);
    }

    #[test]
    fn resubmitting_is_an_accepted_noop() {
        let current = record("a", ParticipationStatus::Attending);
        let d = ParticipationStateMachine::decide(
            &event(2, 2),
            Some(&current),
            AttendanceRequest::Set(ParticipationStatus::Attending),
        )
        .unwrap();
        assert!(d.is_noop());
        assert!(!d.publish_worthy);
        assert_eq!(d.write, ParticipantWrite::Upsert(ParticipationStatus::Attending));
    }

    #[test]
    fn leaving_frees_a_seat() {
        let current = record("a", ParticipationStatus::Maybe);
        let d = ParticipationStateMachine::decide(
            &event(2, 2),
            Some(&current),
            AttendanceRequest::Set(ParticipationStatus::NotAttending),
        )
        .unwrap();
        assert_eq!(d.new_count, 1);
        assert!(!d.publish_worthy);
    }

    #[test]
    fn withdraw_removes_record_and_seat() {
        let current = record("a", ParticipationStatus::Attending);
        let d = ParticipationStateMachine::decide(
            &event(1, 2),
            Some(&current),
            AttendanceRequest::Withdraw,
        )
        .unwrap();
        assert_eq!(d.write, ParticipantWrite::Remove);
        assert_eq!(d.new_count, 0);
        assert_eq!(d.next_status(), None);
    }

    #[test]
    fn withdraw_without_record_is_not_found() {
        let err =
            ParticipationStateMachine::decide(&event(0, 2), None, AttendanceRequest::Withdraw)
                .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn cancelled_event_rejects_everything() {
        let mut cancelled = event(1, 2);
        cancelled.status = EventStatus::Cancelled;
        let current = record("a", ParticipationStatus::Attending);

        for request in [
            AttendanceRequest::Set(ParticipationStatus::Attending),
            AttendanceRequest::Set(ParticipationStatus::NotAttending),
            AttendanceRequest::Withdraw,
        ] {
            let err =
                ParticipationStateMachine::decide(&cancelled, Some(&current), request).unwrap_err();
            assert_eq!(err, AttendanceError::Conflict(ConflictReason::EventCancelled));
        }
    }

    #[test]
    fn capacity_two_walkthrough() {
        // A joins the last seat, B is refused, A leaves again.
        let mut ev = event(1, 2);
        let a = ParticipationStateMachine::decide(
            &ev,
            None,
            AttendanceRequest::Set(ParticipationStatus::Attending),
        )
        .unwrap();
        assert!(a.publish_worthy);
        ev.count = a.new_count;

        let b = ParticipationStateMachine::decide(
            &ev,
            None,
            AttendanceRequest::Set(ParticipationStatus::Attending),
        );
        assert!(b.is_err());
        assert_eq!(ev.count, 2);

        let a_record = record("a", ParticipationStatus::Attending);
        let a_leaves = ParticipationStateMachine::decide(
            &ev,
            Some(&a_record),
            AttendanceRequest::Set(ParticipationStatus::NotAttending),
        )
        .unwrap();
        assert_eq!(a_leaves.new_count, 1);
        assert!(!a_leaves.publish_worthy);
    }

    fn status_strategy() -> impl Strategy<Value = ParticipationStatus> {
        prop_oneof![
            Just(ParticipationStatus::Attending),
            Just(ParticipationStatus::Maybe),
            Just(ParticipationStatus::NotAttending),
        ]
    }

    fn request_strategy() -> impl Strategy<Value = (usize, Option<ParticipationStatus>)> {
        (0usize..6, proptest::option::weighted(0.85, status_strategy()))
    }

    proptest! {
        /// Replays random requests from six users against one event and
        /// checks the count bookkeeping after every accepted commit.
        #[test]
        fn count_matches_seats_and_stays_within_capacity(
            capacity in 1u32..5,
            requests in proptest::collection::vec(request_strategy(), 1..60),
        ) {
            let mut ev = event(0, capacity);
            let mut records: HashMap<usize, ParticipationRecord> = HashMap::new();
            let mut publishes = 0usize;
            let mut reached_capacity = 0usize;

            for (user, status) in requests {
                let request = status.map_or(AttendanceRequest::Withdraw, AttendanceRequest::Set);
                let before = ev.count;
                match ParticipationStateMachine::decide(&ev, records.get(&user), request) {
                    Ok(decision) => {
                        prop_assert_eq!(decision.previous_count, before);
                        ev.count = decision.new_count;
                        match decision.write {
                            ParticipantWrite::Upsert(s) => {
                                records.insert(user, record(&format!("user-{user}"), s));
                            }
                            ParticipantWrite::Remove => {
                                records.remove(&user);
                            }
                        }
                        if decision.publish_worthy {
                            publishes += 1;
                        }
                        if ev.count == capacity && before < capacity {
                            reached_capacity += 1;
                        }
                    }
                    Err(_) => prop_assert_eq!(ev.count, before),
                }

                let seats = records.values().filter(|r| r.status.counts()).count();
                prop_assert_eq!(ev.count as usize, seats);
                prop_assert!(ev.count <= capacity);
            }
            prop_assert_eq!(publishes, reached_capacity);
        }

        #[test]
        fn resubmission_is_idempotent(
            count in 0u32..5,
            status in status_strategy(),
        ) {
            let ev = event(count, 5);
            let current = record("a", status);
            let d = ParticipationStateMachine::decide(
                &ev,
                Some(&current),
                AttendanceRequest::Set(status),
            ).expect("resubmission accepted");
            prop_assert!(d.is_noop());
            prop_assert!(!d.publish_worthy);
        }
    }
}
