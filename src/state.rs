//! The reconciled view handed to renderers, and the snapshot fold that seeds it.

use serde::Serialize;

use crate::events::{MembershipSeen, MessageCreated};
use crate::index::SpaceIndex;
use crate::members::HighlightedSpace;
use crate::model::{ReadClass, Space, SpaceSnapshot, Timestamp};

/// Display fields for the most recent message event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSummary {
    pub message_id: String,
    pub room_id: String,
    pub room_title: String,
    pub author_email: String,
    pub text: String,
    pub created: Timestamp,
}

impl MessageSummary {
    pub fn from_event(msg: &MessageCreated) -> Self {
        let text = match (&msg.text, msg.has_files) {
            (Some(text), true) => format!("{text} <and file attachments>"),
            (None, true) => "<file attachments>".to_string(),
            (Some(text), false) => text.clone(),
            (None, false) => String::new(),
        };
        MessageSummary {
            message_id: msg.id.clone(),
            room_id: msg.room_id.clone(),
            room_title: String::new(),
            author_email: msg.person_email.clone(),
            text,
            created: msg.created,
        }
    }
}

/// Display fields for the most recent read receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiptSummary {
    pub room_id: String,
    pub room_title: String,
    pub person_display_name: String,
    pub last_seen_id: Option<String>,
    pub created: Timestamp,
}

impl ReceiptSummary {
    pub fn from_event(seen: &MembershipSeen) -> Self {
        ReceiptSummary {
            room_id: seen.room_id.clone(),
            room_title: String::new(),
            person_display_name: seen.display_name.clone(),
            last_seen_id: seen.last_seen_id.clone(),
            created: seen.created,
        }
    }
}

/// Everything a renderer needs: counts, the two highlighted spaces with
/// their member summaries, and the latest message/receipt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationState {
    pub spaces: SpaceIndex,
    pub most_recent_read: Option<HighlightedSpace>,
    pub most_recent_unread: Option<HighlightedSpace>,
    pub initialized: bool,
    pub last_message: Option<MessageSummary>,
    pub last_receipt: Option<ReceiptSummary>,
}

impl ReconciliationState {
    /// Fold a bulk snapshot into a fresh state.
    ///
    /// The result is not initialized: members of the highlighted spaces are
    /// still empty and buffered events have not been replayed. Folding the
    /// same spaces again always yields the same state, so a partial page
    /// followed by the full list never double counts.
    pub fn fold<I>(snapshots: I) -> Self
    where
        I: IntoIterator<Item = SpaceSnapshot>,
    {
        let mut spaces = SpaceIndex::new();
        let mut last_read: Option<usize> = None;
        let mut last_unread: Option<usize> = None;

        for snapshot in snapshots {
            if spaces.contains(&snapshot.id) {
                tracing::debug!(space = %snapshot.id, "duplicate space in snapshot ignored");
                continue;
            }
            let space = Space::from_snapshot(snapshot);
            let pos = spaces.len();
            let slot = match space.class() {
                ReadClass::Unread => &mut last_unread,
                ReadClass::Read => &mut last_read,
            };
            let newer = match *slot {
                None => true,
                Some(best) => spaces
                    .get(best)
                    .map_or(true, |b| b.rank_timestamp() < space.rank_timestamp()),
            };
            if newer {
                *slot = Some(pos);
            }
            spaces.push_back(space);
        }

        let mirror = |pos: Option<usize>| {
            pos.and_then(|p| spaces.get(p))
                .map(HighlightedSpace::from_space)
        };
        let most_recent_read = mirror(last_read);
        let most_recent_unread = mirror(last_unread);

        ReconciliationState {
            spaces,
            most_recent_read,
            most_recent_unread,
            initialized: false,
            last_message: None,
            last_receipt: None,
        }
    }

    pub fn read_count(&self) -> usize {
        self.spaces.read_count()
    }

    pub fn unread_count(&self) -> usize {
        self.spaces.unread_count()
    }

    pub fn highlight(&self, class: ReadClass) -> Option<&HighlightedSpace> {
        match class {
            ReadClass::Read => self.most_recent_read.as_ref(),
            ReadClass::Unread => self.most_recent_unread.as_ref(),
        }
    }

    pub fn set_highlight(&mut self, class: ReadClass, value: Option<HighlightedSpace>) {
        match class {
            ReadClass::Read => self.most_recent_read = value,
            ReadClass::Unread => self.most_recent_unread = value,
        }
    }

    /// Highlights currently mirroring `space_id`.
    pub fn highlights_for_mut<'a>(
        &'a mut self,
        space_id: &'a str,
    ) -> impl Iterator<Item = &'a mut HighlightedSpace> + 'a {
        self.most_recent_read
            .iter_mut()
            .chain(self.most_recent_unread.iter_mut())
            .filter(move |h| h.id == space_id)
    }

    /// Check the structural invariants, returning a description of the
    /// first violation.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.read_count() + self.unread_count() != self.spaces.len() {
            return Err(format!(
                "read {} + unread {} != {} spaces",
                self.read_count(),
                self.unread_count(),
                self.spaces.len()
            ));
        }
        if let Some(bad) = self.spaces.iter().find(|s| !s.is_consistent()) {
            return Err(format!("space {} flag disagrees with its timestamps", bad.id));
        }
        for class in [ReadClass::Read, ReadClass::Unread] {
            let expected = self
                .spaces
                .most_recent(class)
                .and_then(|p| self.spaces.get(p))
                .map(|s| s.id.as_str());
            let actual = self.highlight(class).map(|h| h.id.as_str());
            if expected != actual {
                return Err(format!(
                    "most recent {class} is {actual:?}, expected {expected:?}"
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn snap(id: &str, activity: i64, seen: Option<i64>) -> SpaceSnapshot {
        SpaceSnapshot {
            id: id.to_string(),
            title: Some(format!("Space {id}")),
            last_activity: ts(activity),
            last_seen_activity: seen.map(ts),
        }
    }

    #[test]
    fn fold_classifies_and_counts() {
        let state = ReconciliationState::fold(vec![
            snap("a", 50, Some(10)),
            snap("b", 40, Some(45)),
            snap("c", 30, None),
        ]);
        assert_eq!(state.read_count(), 1);
        assert_eq!(state.unread_count(), 2);
        assert!(!state.initialized);
        assert_eq!(state.most_recent_unread.as_ref().unwrap().id, "a");
        assert_eq!(state.most_recent_read.as_ref().unwrap().id, "b");
        state.check_invariants().unwrap();
    }

    #[test]
    fn fold_read_class_ranks_by_last_seen_not_activity() {
        let state = ReconciliationState::fold(vec![
            snap("old-seen", 90, Some(90)),
            snap("new-seen", 20, Some(95)),
        ]);
        assert_eq!(state.most_recent_read.unwrap().id, "new-seen");
    }

    #[test]
    fn fold_tie_keeps_first_seen() {
        let state = ReconciliationState::fold(vec![snap("first", 10, None), snap("second", 10, None)]);
        assert_eq!(state.most_recent_unread.unwrap().id, "first");
    }

    #[test]
    fn fold_empty_has_no_highlights() {
        let state = ReconciliationState::fold(Vec::new());
        assert!(state.most_recent_read.is_none());
        assert!(state.most_recent_unread.is_none());
        state.check_invariants().unwrap();
    }

    #[test]
    fn fold_drops_duplicate_ids() {
        let state = ReconciliationState::fold(vec![snap("a", 5, None), snap("a", 9, Some(9))]);
        assert_eq!(state.spaces.len(), 1);
        assert_eq!(state.unread_count(), 1);
    }

    #[test]
    fn message_summary_decorates_attachments() {
        let mut msg = MessageCreated {
            id: "m".into(),
            room_id: "r".into(),
            person_id: "p".into(),
            person_email: "p@example.com".into(),
            text: Some("hi".into()),
            has_files: true,
            created: ts(1),
        };
        assert_eq!(MessageSummary::from_event(&msg).text, "hi <and file attachments>");
        msg.text = None;
        assert_eq!(MessageSummary::from_event(&msg).text, "<file attachments>");
        msg.has_files = false;
        assert_eq!(MessageSummary::from_event(&msg).text, "");
    }

    fn arb_snapshots() -> impl Strategy<Value = Vec<SpaceSnapshot>> {
        prop::collection::vec((0i64..1_000, prop::option::of(0i64..1_000)), 0..40).prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (activity, seen))| snap(&format!("s{i}"), activity, seen))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn fold_counts_always_sum_to_len(snaps in arb_snapshots()) {
            let state = ReconciliationState::fold(snaps.clone());
            prop_assert_eq!(state.read_count() + state.unread_count(), snaps.len());
            prop_assert!(state.check_invariants().is_ok());
        }

        #[test]
        fn refold_of_superset_matches_single_fold(snaps in arb_snapshots(), cut in 0usize..40) {
            let cut = cut.min(snaps.len());
            let partial = ReconciliationState::fold(snaps[..cut].to_vec());
            let full_after_partial = ReconciliationState::fold(snaps.clone());
            let full_once = ReconciliationState::fold(snaps);
            prop_assert!(partial.spaces.len() <= full_once.spaces.len());
            prop_assert_eq!(full_after_partial, full_once);
        }
    }
}
