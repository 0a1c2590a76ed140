//! Member tracking for the highlighted spaces.
//!
//! Only the most recent read space and the most recent unread space carry a
//! member list; every other space is tracked by timestamps alone.

use serde::Serialize;

use crate::model::{Member, Space, Timestamp};

/// A count of members plus its display string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemberSummary {
    pub count: usize,
    pub text: String,
}

/// Format a list of display names for display.
///
/// - no names: `""`
/// - one name: `"Alice"`
/// - two names: `"Alice, Bob"`
/// - more: `"Alice, Bob, and 2 more"`
pub fn format_member_summary<'a, I>(names: I) -> MemberSummary
where
    I: IntoIterator<Item = &'a str>,
{
    let mut count = 0usize;
    let mut text = String::new();
    for name in names {
        match count {
            0 => text.push_str(name),
            1 => {
                text.push_str(", ");
                text.push_str(name);
            }
            _ => {}
        }
        count += 1;
    }
    if count > 2 {
        text.push_str(&format!(", and {} more", count - 2));
    }
    MemberSummary { count, text }
}

/// Mirror of one highlighted space, with its members and their read state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HighlightedSpace {
    pub id: String,
    pub title: String,
    pub last_activity: Timestamp,
    pub last_seen_activity: Option<Timestamp>,
    pub members: Vec<Member>,
    pub caught_up: MemberSummary,
    pub behind: MemberSummary,
}

impl HighlightedSpace {
    /// Mirror `space` with an empty member list.
    pub fn from_space(space: &Space) -> Self {
        HighlightedSpace {
            id: space.id.clone(),
            title: space.title.clone(),
            last_activity: space.last_activity,
            last_seen_activity: space.last_seen_activity,
            members: Vec::new(),
            caught_up: MemberSummary::default(),
            behind: MemberSummary::default(),
        }
    }

    /// Refresh the mirrored fields from the indexed space and recompute.
    /// An empty indexed title keeps the title fetched during enrichment.
    pub fn sync_from(&mut self, space: &Space, local_user_id: &str) {
        if !space.title.is_empty() {
            self.title = space.title.clone();
        }
        self.last_activity = space.last_activity;
        self.last_seen_activity = space.last_seen_activity;
        self.recompute(local_user_id);
    }

    pub fn set_members(&mut self, members: Vec<Member>, local_user_id: &str) {
        self.members = members;
        self.recompute(local_user_id);
    }

    /// Add a newly joined member. A new member has not seen anything yet.
    pub fn add_member(&mut self, person_id: &str, display_name: &str, local_user_id: &str) {
        if self.members.iter().any(|m| m.person_id == person_id) {
            tracing::debug!(space = %self.id, person = person_id, "member already listed");
            return;
        }
        self.members.push(Member {
            person_id: person_id.to_string(),
            display_name: display_name.to_string(),
            last_seen_activity: None,
            last_activity: None,
        });
        self.recompute(local_user_id);
    }

    /// Returns false when the person was not listed.
    pub fn remove_member(&mut self, person_id: &str, local_user_id: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.person_id != person_id);
        let removed = self.members.len() != before;
        if removed {
            self.recompute(local_user_id);
        }
        removed
    }

    /// Record a read receipt for one member. Returns false when the person
    /// was not listed.
    pub fn update_member_seen(&mut self, person_id: &str, at: Timestamp, local_user_id: &str) -> bool {
        let Some(member) = self.members.iter_mut().find(|m| m.person_id == person_id) else {
            return false;
        };
        member.last_seen_activity = Some(at);
        self.recompute(local_user_id);
        true
    }

    /// Rebuild both summaries. The local user is never listed.
    pub fn recompute(&mut self, local_user_id: &str) {
        let last_activity = self.last_activity;
        let others = || self.members.iter().filter(|m| m.person_id != local_user_id);
        self.caught_up = format_member_summary(
            others()
                .filter(|m| m.last_seen_activity.is_some_and(|s| s >= last_activity))
                .map(|m| m.display_name.as_str()),
        );
        self.behind = format_member_summary(
            others()
                .filter(|m| m.last_seen_activity.map_or(true, |s| s < last_activity))
                .map(|m| m.display_name.as_str()),
        );
    }
}
