//! Domain records: spaces, members, people, and the snapshot shapes the
//! collaboration service returns for them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// All timestamps are UTC instants as reported by the service.
pub type Timestamp = DateTime<Utc>;

/// The authenticated user (or any person) as returned by the identity lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
}

/// One space as returned by the "list/get with read status" queries.
///
/// `title` is absent for some spaces (e.g. direct conversations) and
/// `last_seen_activity` is absent when the user never read the space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceSnapshot {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "lastActivityDate")]
    pub last_activity: Timestamp,
    #[serde(
        rename = "lastSeenActivityDate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_seen_activity: Option<Timestamp>,
}

/// One membership row from the "list members with read status" query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSnapshot {
    #[serde(rename = "personId")]
    pub person_id: String,
    #[serde(rename = "personDisplayName", default)]
    pub display_name: String,
    #[serde(rename = "lastSeenDate", default, skip_serializing_if = "Option::is_none")]
    pub last_seen_activity: Option<Timestamp>,
    #[serde(
        rename = "lastActivityDate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_activity: Option<Timestamp>,
}

/// Read/unread classification of a space from the local user's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadClass {
    Read,
    Unread,
}

impl ReadClass {
    /// A space is unread when something happened after the user last looked.
    /// A missing last-seen marker is older than any activity.
    pub fn classify(last_activity: Timestamp, last_seen: Option<Timestamp>) -> Self {
        match last_seen {
            Some(seen) if seen >= last_activity => ReadClass::Read,
            _ => ReadClass::Unread,
        }
    }
}

impl std::fmt::Display for ReadClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadClass::Read => write!(f, "read"),
            ReadClass::Unread => write!(f, "unread"),
        }
    }
}

/// A space as held in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Space {
    pub id: String,
    pub title: String,
    pub last_activity: Timestamp,
    pub last_seen_activity: Option<Timestamp>,
    pub is_unread: bool,
}

impl Space {
    pub fn from_snapshot(snapshot: SpaceSnapshot) -> Self {
        let is_unread =
            ReadClass::classify(snapshot.last_activity, snapshot.last_seen_activity)
                == ReadClass::Unread;
        Space {
            id: snapshot.id,
            title: snapshot.title.unwrap_or_default(),
            last_activity: snapshot.last_activity,
            last_seen_activity: snapshot.last_seen_activity,
            is_unread,
        }
    }

    pub fn class(&self) -> ReadClass {
        if self.is_unread {
            ReadClass::Unread
        } else {
            ReadClass::Read
        }
    }

    /// The timestamp that ranks this space within its class: last activity
    /// for unread spaces, last seen for read ones.
    pub fn rank_timestamp(&self) -> Option<Timestamp> {
        match self.class() {
            ReadClass::Unread => Some(self.last_activity),
            ReadClass::Read => self.last_seen_activity,
        }
    }

    /// Whether the stored flag agrees with the stored timestamps.
    pub fn is_consistent(&self) -> bool {
        ReadClass::classify(self.last_activity, self.last_seen_activity) == self.class()
    }
}

/// A member of a highlighted space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub person_id: String,
    pub display_name: String,
    pub last_seen_activity: Option<Timestamp>,
    pub last_activity: Option<Timestamp>,
}

impl From<MemberSnapshot> for Member {
    fn from(m: MemberSnapshot) -> Self {
        Member {
            person_id: m.person_id,
            display_name: m.display_name,
            last_seen_activity: m.last_seen_activity,
            last_activity: m.last_activity,
        }
    }
}
