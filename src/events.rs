//! Real-time events and their wire envelope.
//!
//! The event stream delivers JSON envelopes of the form
//!
//! ```json
//! { "resource": "messages", "event": "created", "actorId": "...",
//!   "created": "2024-03-01T10:00:00Z", "data": { ... } }
//! ```
//!
//! [`RealtimeEvent::from_envelope`] turns one envelope into a typed event.
//! Only the combinations the reconciler handles are accepted.

use serde::{Deserialize, Serialize};

use crate::error::{ReadStatusError, Result};
use crate::model::Timestamp;

/// The resource families the event stream can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Rooms,
    Messages,
    Memberships,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Rooms,
        ResourceKind::Messages,
        ResourceKind::Memberships,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Rooms => "rooms",
            ResourceKind::Messages => "messages",
            ResourceKind::Memberships => "memberships",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
    Seen,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
            EventKind::Seen => "seen",
        };
        f.write_str(s)
    }
}

/// Raw envelope as it arrives on the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub resource: ResourceKind,
    pub event: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    pub created: Timestamp,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomUpdated {
    pub room_id: String,
    pub created: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageCreated {
    pub id: String,
    pub room_id: String,
    pub person_id: String,
    pub person_email: String,
    pub text: Option<String>,
    pub has_files: bool,
    pub created: Timestamp,
}

/// A person joined or left a space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MembershipChange {
    pub room_id: String,
    pub person_id: String,
    pub display_name: String,
    pub created: Timestamp,
}

/// A read receipt: `person_id` has seen `room_id` up to `last_seen_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MembershipSeen {
    pub room_id: String,
    pub person_id: String,
    pub display_name: String,
    pub actor_id: String,
    pub last_seen_id: Option<String>,
    pub created: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    RoomUpdated(RoomUpdated),
    MessageCreated(MessageCreated),
    MembershipCreated(MembershipChange),
    MembershipDeleted(MembershipChange),
    MembershipSeen(MembershipSeen),
}

impl RealtimeEvent {
    pub fn room_id(&self) -> &str {
        match self {
            RealtimeEvent::RoomUpdated(e) => &e.room_id,
            RealtimeEvent::MessageCreated(e) => &e.room_id,
            RealtimeEvent::MembershipCreated(e) | RealtimeEvent::MembershipDeleted(e) => {
                &e.room_id
            }
            RealtimeEvent::MembershipSeen(e) => &e.room_id,
        }
    }

    pub fn created(&self) -> Timestamp {
        match self {
            RealtimeEvent::RoomUpdated(e) => e.created,
            RealtimeEvent::MessageCreated(e) => e.created,
            RealtimeEvent::MembershipCreated(e) | RealtimeEvent::MembershipDeleted(e) => {
                e.created
            }
            RealtimeEvent::MembershipSeen(e) => e.created,
        }
    }

    /// `resource:event` label used in log lines.
    pub fn label(&self) -> &'static str {
        match self {
            RealtimeEvent::RoomUpdated(_) => "rooms:updated",
            RealtimeEvent::MessageCreated(_) => "messages:created",
            RealtimeEvent::MembershipCreated(_) => "memberships:created",
            RealtimeEvent::MembershipDeleted(_) => "memberships:deleted",
            RealtimeEvent::MembershipSeen(_) => "memberships:seen",
        }
    }

    pub fn resource(&self) -> ResourceKind {
        match self {
            RealtimeEvent::RoomUpdated(_) => ResourceKind::Rooms,
            RealtimeEvent::MessageCreated(_) => ResourceKind::Messages,
            _ => ResourceKind::Memberships,
        }
    }

    /// Decode a typed event from a raw envelope.
    pub fn from_envelope(env: EventEnvelope) -> Result<Self> {
        match (env.resource, env.event) {
            (ResourceKind::Rooms, EventKind::Updated) => {
                let data: RoomData = serde_json::from_value(env.data)?;
                Ok(RealtimeEvent::RoomUpdated(RoomUpdated {
                    room_id: data.id,
                    created: env.created,
                }))
            }
            (ResourceKind::Messages, EventKind::Created) => {
                let data: MessageData = serde_json::from_value(env.data)?;
                Ok(RealtimeEvent::MessageCreated(MessageCreated {
                    id: data.id,
                    room_id: data.room_id,
                    person_id: data.person_id,
                    person_email: data.person_email.unwrap_or_default(),
                    text: data.text,
                    has_files: !data.files.is_empty(),
                    created: env.created,
                }))
            }
            (ResourceKind::Memberships, kind @ (EventKind::Created | EventKind::Deleted)) => {
                let data: MembershipData = serde_json::from_value(env.data)?;
                let change = MembershipChange {
                    room_id: data.room_id,
                    person_id: data.person_id,
                    display_name: data.person_display_name.unwrap_or_default(),
                    created: env.created,
                };
                Ok(if kind == EventKind::Created {
                    RealtimeEvent::MembershipCreated(change)
                } else {
                    RealtimeEvent::MembershipDeleted(change)
                })
            }
            (ResourceKind::Memberships, EventKind::Seen) => {
                let data: MembershipData = serde_json::from_value(env.data)?;
                let actor_id = env.actor_id.unwrap_or_else(|| data.person_id.clone());
                Ok(RealtimeEvent::MembershipSeen(MembershipSeen {
                    room_id: data.room_id,
                    person_id: data.person_id,
                    display_name: data.person_display_name.unwrap_or_default(),
                    actor_id,
                    last_seen_id: data.last_seen_id,
                    created: env.created,
                }))
            }
            (resource, event) => Err(ReadStatusError::MalformedEvent(format!(
                "unsupported event {resource}:{event}"
            ))),
        }
    }

    /// Decode a typed event straight from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        let env: EventEnvelope = serde_json::from_str(text)?;
        Self::from_envelope(env)
    }
}

#[derive(Deserialize)]
struct RoomData {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageData {
    id: String,
    room_id: String,
    person_id: String,
    #[serde(default)]
    person_email: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MembershipData {
    room_id: String,
    person_id: String,
    #[serde(default)]
    person_display_name: Option<String>,
    #[serde(default)]
    last_seen_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_message_created_with_files() {
        let text = r#"{
            "resource": "messages", "event": "created", "actorId": "p1",
            "created": "2024-03-01T10:00:00Z",
            "data": {"id": "m1", "roomId": "r1", "personId": "p1",
                     "personEmail": "a@example.com", "files": ["f1"]}
        }"#;
        let ev = RealtimeEvent::from_json(text).unwrap();
        match ev {
            RealtimeEvent::MessageCreated(m) => {
                assert_eq!(m.room_id, "r1");
                assert!(m.has_files);
                assert!(m.text.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn decodes_room_updated_from_data_id() {
        let text = r#"{"resource": "rooms", "event": "updated",
            "created": "2024-03-01T10:00:00Z", "data": {"id": "r7", "title": "New"}}"#;
        let ev = RealtimeEvent::from_json(text).unwrap();
        assert_eq!(ev.room_id(), "r7");
        assert_eq!(ev.label(), "rooms:updated");
        assert_eq!(ev.resource(), ResourceKind::Rooms);
    }

    #[test]
    fn seen_without_actor_falls_back_to_person() {
        let text = r#"{"resource": "memberships", "event": "seen",
            "created": "2024-03-01T10:00:00Z",
            "data": {"roomId": "r1", "personId": "p2", "lastSeenId": "m9"}}"#;
        match RealtimeEvent::from_json(text).unwrap() {
            RealtimeEvent::MembershipSeen(s) => {
                assert_eq!(s.actor_id, "p2");
                assert_eq!(s.last_seen_id.as_deref(), Some("m9"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn membership_deleted_is_distinguished_from_created() {
        let text = r#"{"resource": "memberships", "event": "deleted",
            "created": "2024-03-01T10:00:00Z",
            "data": {"roomId": "r1", "personId": "p2", "personDisplayName": "Bob"}}"#;
        let ev = RealtimeEvent::from_json(text).unwrap();
        assert!(matches!(ev, RealtimeEvent::MembershipDeleted(ref c) if c.display_name == "Bob"));
    }

    #[test]
    fn unsupported_combination_is_rejected() {
        let text = r#"{"resource": "rooms", "event": "seen",
            "created": "2024-03-01T10:00:00Z", "data": {"id": "r1"}}"#;
        let err = RealtimeEvent::from_json(text).unwrap_err();
        assert!(err.to_string().contains("rooms:seen"), "{err}");
    }

    #[test]
    fn missing_data_field_is_malformed() {
        let text = r#"{"resource": "messages", "event": "created",
            "created": "2024-03-01T10:00:00Z", "data": {"id": "m1"}}"#;
        assert!(matches!(
            RealtimeEvent::from_json(text),
            Err(ReadStatusError::MalformedEvent(_))
        ));
    }
}
