//! Wire schema for the event and group mutation channels.
//!
//! Every message is a UTF-8 JSON body plus an `operationType` attribute with
//! one of `ADD`, `UPDATE` or `DELETE`. The body of an event mutation is a full
//! [`EventSnapshot`]; the body of a group mutation is a [`GroupSnapshot`].
//!
//! Times are written as `yyyy-MM-ddTHH:mm`. On ingestion they are also
//! accepted with seconds, or as an integer array
//! `[year, month, day, hour, minute, ...]` of which only the first five
//! elements are used.

use crate::event::{EventRecord, EventStatus, Location};
use crate::event_bus::BusMessage;
use crate::ids::{EventId, GroupId, UserId};
use chrono::{NaiveDate, NaiveDateTime};
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Name of the attribute carrying the operation type.
pub const OPERATION_TYPE_ATTRIBUTE: &str = "operationType";

/// Time format used on the wire.
pub const WIRE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

const ACCEPTED_TIME_FORMATS: [&str; 3] = [WIRE_TIME_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];

/// Errors raised while decoding an incoming message.
///
/// Consumers log these and acknowledge the message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedMessageError {
    /// The `operationType` attribute is absent.
    #[error("missing 'operationType' attribute")]
    MissingOperationType,

    /// The `operationType` attribute has an unknown value.
    #[error("unknown operation type '{0}'")]
    UnknownOperationType(String),

    /// The body is not UTF-8 JSON.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// The body is JSON but does not match the schema.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Kind of mutation carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    /// A new entity.
    Add,
    /// A changed entity.
    Update,
    /// A removed entity.
    Delete,
}

impl OperationType {
    /// Attribute value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Read the operation type from message attributes.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedMessageError::MissingOperationType`] or
    /// [`MalformedMessageError::UnknownOperationType`].
    pub fn from_attributes(
        attributes: &BTreeMap<String, String>,
    ) -> Result<Self, MalformedMessageError> {
        attributes
            .get(OPERATION_TYPE_ATTRIBUTE)
            .ok_or(MalformedMessageError::MissingOperationType)?
            .parse()
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = MalformedMessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADD" => Ok(Self::Add),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(MalformedMessageError::UnknownOperationType(other.to_string())),
        }
    }
}

/// Self-contained copy of an event as sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSnapshot {
    /// Event identifier.
    #[serde(deserialize_with = "lenient_id")]
    pub event_id: EventId,
    /// Owning group.
    #[serde(deserialize_with = "lenient_id")]
    pub group_id: GroupId,
    /// Title.
    pub event_title: String,
    /// Description.
    pub event_description: String,
    /// Street.
    pub street: String,
    /// City.
    pub city: String,
    /// Province.
    pub province: String,
    /// Country.
    pub country: String,
    /// Start time.
    #[serde(with = "wire_time")]
    pub event_start_time: NaiveDateTime,
    /// End time.
    #[serde(with = "wire_time")]
    pub event_end_time: NaiveDateTime,
    /// Attendee count.
    pub count: u32,
    /// Capacity.
    pub capacity: u32,
    /// Lifecycle status.
    pub status: EventStatus,
    /// Cover image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl EventSnapshot {
    /// Flatten an event and its resolved details.
    #[must_use]
    pub fn from_record(event: &EventRecord, location: &Location, image_url: Option<String>) -> Self {
        Self {
            event_id: event.event_id,
            group_id: event.group_id,
            event_title: event.title.clone(),
            event_description: event.description.clone(),
            street: location.street.clone(),
            city: location.city.clone(),
            province: location.province.clone(),
            country: location.country.clone(),
            event_start_time: event.start_time,
            event_end_time: event.end_time,
            count: event.count,
            capacity: event.capacity,
            status: event.status,
            image_url,
        }
    }

    /// The location fields.
    #[must_use]
    pub fn location(&self) -> Location {
        Location {
            street: self.street.clone(),
            city: self.city.clone(),
            province: self.province.clone(),
            country: self.country.clone(),
        }
    }
}

/// Outgoing event mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMutationMessage {
    /// Operation.
    pub operation: OperationType,
    /// Snapshot of the event.
    pub payload: EventSnapshot,
}

impl EventMutationMessage {
    /// Encode for the bus. The ordering key is the event id.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedMessageError::InvalidPayload`] if the snapshot
    /// cannot be serialized.
    pub fn to_bus_message(&self) -> Result<BusMessage, MalformedMessageError> {
        let data = serde_json::to_vec(&self.payload)
            .map_err(|e| MalformedMessageError::InvalidPayload(e.to_string()))?;
        Ok(BusMessage::new(data)
            .with_attribute(OPERATION_TYPE_ATTRIBUTE, self.operation.as_str())
            .with_ordering_key(self.payload.event_id.to_string()))
    }
}

/// Decoded incoming event mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventMutation {
    /// `ADD` or `UPDATE`: store the snapshot under its event id.
    Upsert {
        /// `ADD` or `UPDATE`.
        operation: OperationType,
        /// Snapshot to store.
        snapshot: Box<EventSnapshot>,
    },
    /// `DELETE`: remove the record, if any.
    Delete {
        /// Event to remove.
        event_id: EventId,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteBody {
    #[serde(deserialize_with = "lenient_id")]
    event_id: EventId,
}

impl EventMutation {
    /// Decode a message received from the bus.
    ///
    /// `DELETE` bodies only need `eventId`; the remaining snapshot fields
    /// are ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`MalformedMessageError`] describing the first problem found.
    pub fn decode(message: &BusMessage) -> Result<Self, MalformedMessageError> {
        let operation = OperationType::from_attributes(&message.attributes)?;
        let body = message.body_str()?;
        match operation {
            OperationType::Add | OperationType::Update => {
                let snapshot: EventSnapshot = serde_json::from_str(body)
                    .map_err(|e| MalformedMessageError::InvalidPayload(e.to_string()))?;
                Ok(Self::Upsert {
                    operation,
                    snapshot: Box::new(snapshot),
                })
            }
            OperationType::Delete => {
                let DeleteBody { event_id } = serde_json::from_str(body)
                    .map_err(|e| MalformedMessageError::InvalidPayload(e.to_string()))?;
                Ok(Self::Delete { event_id })
            }
        }
    }

    /// Event the mutation applies to.
    #[must_use]
    pub fn event_id(&self) -> EventId {
        match self {
            Self::Upsert { snapshot, .. } => snapshot.event_id,
            Self::Delete { event_id } => *event_id,
        }
    }

    /// Operation that produced the mutation.
    #[must_use]
    pub const fn operation(&self) -> OperationType {
        match self {
            Self::Upsert { operation, .. } => *operation,
            Self::Delete { .. } => OperationType::Delete,
        }
    }
}

/// Role of a user inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroupRole {
    /// May manage the group and its events.
    Admin,
    /// Regular member.
    Member,
}

/// One member entry of a group snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    /// Member.
    #[serde(rename = "userID", alias = "userId")]
    pub user_id: UserId,
    /// Role in the group.
    pub role: GroupRole,
    /// Display name, informational only.
    #[serde(rename = "userName", default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

/// Body of a group mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    /// Group.
    #[serde(rename = "groupId", alias = "groupID", deserialize_with = "lenient_id")]
    pub group_id: GroupId,
    /// Members with their roles.
    #[serde(rename = "groupMembers", default)]
    pub members: Vec<GroupMember>,
}

impl GroupSnapshot {
    /// Encode for the bus with the given operation.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedMessageError::InvalidPayload`] if serialization fails.
    pub fn to_bus_message(&self, operation: OperationType) -> Result<BusMessage, MalformedMessageError> {
        let data = serde_json::to_vec(self)
            .map_err(|e| MalformedMessageError::InvalidPayload(e.to_string()))?;
        Ok(BusMessage::new(data)
            .with_attribute(OPERATION_TYPE_ATTRIBUTE, operation.as_str())
            .with_ordering_key(self.group_id.to_string()))
    }
}

#[derive(Deserialize)]
struct GroupKey {
    #[serde(rename = "groupId", alias = "groupID", deserialize_with = "lenient_id")]
    group_id: GroupId,
}

/// Decoded incoming group mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupMutation {
    /// `ADD` or `UPDATE`: the member set replaces the known one.
    Replace(GroupSnapshot),
    /// `DELETE`: forget the group.
    Remove(GroupId),
}

impl GroupMutation {
    /// Decode a message received from the bus.
    ///
    /// # Errors
    ///
    /// Returns a [`MalformedMessageError`] describing the first problem found.
    pub fn decode(message: &BusMessage) -> Result<Self, MalformedMessageError> {
        let operation = OperationType::from_attributes(&message.attributes)?;
        let body = message.body_str()?;
        match operation {
            OperationType::Add | OperationType::Update => serde_json::from_str(body)
                .map(Self::Replace)
                .map_err(|e| MalformedMessageError::InvalidPayload(e.to_string())),
            OperationType::Delete => serde_json::from_str::<GroupKey>(body)
                .map(|key| Self::Remove(key.group_id))
                .map_err(|e| MalformedMessageError::InvalidPayload(e.to_string())),
        }
    }
}

/// Serde adapter for wire times.
pub mod wire_time {
    use super::{de, Deserializer, NaiveDate, NaiveDateTime, SeqAccess, Serializer, Visitor, ACCEPTED_TIME_FORMATS, WIRE_TIME_FORMAT};
    use std::fmt;

    /// Write as `yyyy-MM-ddTHH:mm`.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(WIRE_TIME_FORMAT))
    }

    /// Read a string or an integer array.
    ///
    /// # Errors
    ///
    /// Fails on any other shape or an out-of-range date.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        deserializer.deserialize_any(WireTimeVisitor)
    }

    /// Parse a wire time string.
    #[must_use]
    pub fn parse(raw: &str) -> Option<NaiveDateTime> {
        ACCEPTED_TIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    }

    struct WireTimeVisitor;

    impl<'de> Visitor<'de> for WireTimeVisitor {
        type Value = NaiveDateTime;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a \"yyyy-MM-ddTHH:mm\" string or [year, month, day, hour, minute]")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            parse(v).ok_or_else(|| E::custom(format!("invalid date time '{v}'")))
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut parts = [0i64; 5];
            for (index, slot) in parts.iter_mut().enumerate() {
                *slot = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(index, &self))?;
            }
            // Seconds and nanoseconds may follow; they are ignored.
            while seq.next_element::<de::IgnoredAny>()?.is_some() {}

            let [year, month, day, hour, minute] = parts;
            let field = |v: i64| u32::try_from(v).ok();
            i32::try_from(year)
                .ok()
                .zip(field(month))
                .zip(field(day))
                .and_then(|((y, m), d)| NaiveDate::from_ymd_opt(y, m, d))
                .zip(field(hour).zip(field(minute)))
                .and_then(|(date, (h, min))| date.and_hms_opt(h, min, 0))
                .ok_or_else(|| de::Error::custom(format!("invalid date time {parts:?}")))
        }
    }
}

/// Accept identifiers written as a JSON number or a numeric string.
fn lenient_id<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i64>,
    T::Error: fmt::Display,
{
    struct IdVisitor;

    impl Visitor<'_> for IdVisitor {
        type Value = i64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a positive integer id")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
            i64::try_from(v).map_err(E::custom)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
            v.trim().parse().map_err(E::custom)
        }
    }

    let raw = deserializer.deserialize_any(IdVisitor)?;
    T::try_from(raw).map_err(de::Error::custom)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body() -> serde_json::Value {
        json!({
            "eventId": 7,
            "groupId": 2,
            "eventTitle": "Hike",
            "eventDescription": "Morning hike",
            "street": "1 Trail Rd",
            "city": "Calgary",
            "province": "AB",
            "country": "Canada",
            "eventStartTime": "2025-07-01T08:30",
            "eventEndTime": [2025, 7, 1, 12, 0, 0],
            "count": 3,
            "capacity": 10,
            "status": "scheduled"
        })
    }

    fn message(operation: &str, body: &serde_json::Value) -> BusMessage {
        BusMessage::new(serde_json::to_vec(body).unwrap())
            .with_attribute(OPERATION_TYPE_ATTRIBUTE, operation)
    }

    #[test]
    fn decodes_string_and_array_times() {
        let decoded = EventMutation::decode(&message("ADD", &body())).unwrap();
        let EventMutation::Upsert { operation, snapshot } = decoded else {
            panic!("expected upsert");
        };
        assert_eq!(operation, OperationType::Add);
        assert_eq!(snapshot.event_start_time.to_string(), "2025-07-01 08:30:00");
        assert_eq!(snapshot.event_end_time.to_string(), "2025-07-01 12:00:00");
        assert_eq!(snapshot.status, EventStatus::Scheduled);
        assert_eq!(snapshot.image_url, None);
    }

    #[test]
    fn ids_may_be_numeric_strings() {
        let mut b = body();
        b["eventId"] = json!("7");
        let decoded = EventMutation::decode(&message("UPDATE", &b)).unwrap();
        assert_eq!(decoded.event_id().get(), 7);
    }

    #[test]
    fn missing_title_is_malformed() {
        let mut b = body();
        b.as_object_mut().unwrap().remove("eventTitle");
        let err = EventMutation::decode(&message("ADD", &b)).unwrap_err();
        assert!(matches!(err, MalformedMessageError::InvalidPayload(ref m) if m.contains("eventTitle")));
    }

    #[test]
    fn short_time_array_is_malformed() {
        let mut b = body();
        b["eventStartTime"] = json!([2025, 7, 1]);
        assert!(EventMutation::decode(&message("ADD", &b)).is_err());
    }

    #[test]
    fn delete_needs_only_the_id() {
        let decoded = EventMutation::decode(&message("DELETE", &json!({"eventId": 7}))).unwrap();
        assert_eq!(decoded, EventMutation::Delete { event_id: EventId::new(7).unwrap() });
    }

    #[test]
    fn operation_type_is_checked() {
        let no_attr = BusMessage::new(serde_json::to_vec(&body()).unwrap());
        assert_eq!(
            EventMutation::decode(&no_attr).unwrap_err(),
            MalformedMessageError::MissingOperationType
        );
        assert!(matches!(
            EventMutation::decode(&message("PATCH", &body())).unwrap_err(),
            MalformedMessageError::UnknownOperationType(_)
        ));
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let msg = BusMessage::new(vec![0xff, 0xfe]).with_attribute(OPERATION_TYPE_ATTRIBUTE, "ADD");
        assert!(matches!(
            EventMutation::decode(&msg).unwrap_err(),
            MalformedMessageError::InvalidEncoding(_)
        ));
    }

    #[test]
    fn outgoing_message_carries_attribute_and_key() {
        let snapshot: EventSnapshot = serde_json::from_value(body()).unwrap();
        let msg = EventMutationMessage {
            operation: OperationType::Update,
            payload: snapshot,
        }
        .to_bus_message()
        .unwrap();
        assert_eq!(msg.attributes.get(OPERATION_TYPE_ATTRIBUTE).map(String::as_str), Some("UPDATE"));
        assert_eq!(msg.ordering_key.as_deref(), Some("7"));

        let written: serde_json::Value = serde_json::from_slice(&msg.data).unwrap();
        assert_eq!(written["eventStartTime"], "2025-07-01T08:30");
        assert_eq!(written["status"], "SCHEDULED");
        assert!(written.get("imageUrl").is_none());
    }

    #[test]
    fn group_messages_decode() {
        let b = json!({
            "groupId": 4,
            "groupMembers": [
                {"userID": "u-1", "role": "ADMIN", "userName": "Ada"},
                {"userID": "u-2", "role": "MEMBER"}
            ]
        });
        let GroupMutation::Replace(snapshot) = GroupMutation::decode(&message("UPDATE", &b)).unwrap() else {
            panic!("expected replace");
        };
        assert_eq!(snapshot.members.len(), 2);
        assert_eq!(snapshot.members[0].role, GroupRole::Admin);

        let removed = GroupMutation::decode(&message("DELETE", &json!({"groupId": "4"}))).unwrap();
        assert_eq!(removed, GroupMutation::Remove(GroupId::new(4).unwrap()));
    }
}
