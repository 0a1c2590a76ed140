//! Ordered index of the user's spaces.
//!
//! Spaces are kept most-recent-activity first. The index owns the read and
//! unread counters and adjusts them on every insert, removal and
//! reclassification, so `read_count + unread_count == len` holds by
//! construction.

use crate::model::{ReadClass, Space, Timestamp};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpaceIndex {
    spaces: Vec<Space>,
    read_count: usize,
    unread_count: usize,
}

impl SpaceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    pub fn read_count(&self) -> usize {
        self.read_count
    }

    pub fn unread_count(&self) -> usize {
        self.unread_count
    }

    pub fn iter(&self) -> impl Iterator<Item = &Space> {
        self.spaces.iter()
    }

    pub fn get(&self, idx: usize) -> Option<&Space> {
        self.spaces.get(idx)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.spaces.iter().position(|s| s.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn find(&self, id: &str) -> Option<&Space> {
        self.spaces.iter().find(|s| s.id == id)
    }

    /// Append at the back (snapshot order is already most-recent first).
    pub fn push_back(&mut self, space: Space) {
        self.count_in(space.class());
        self.spaces.push(space);
    }

    /// Insert at the front, as the most recently active space.
    pub fn insert_front(&mut self, space: Space) {
        self.count_in(space.class());
        self.spaces.insert(0, space);
    }

    pub fn remove(&mut self, idx: usize) -> Option<Space> {
        if idx >= self.spaces.len() {
            return None;
        }
        let space = self.spaces.remove(idx);
        self.count_out(space.class());
        Some(space)
    }

    /// Move the space at `idx` to the front and return its new position (0).
    pub fn move_to_front(&mut self, idx: usize) -> usize {
        if idx > 0 && idx < self.spaces.len() {
            let space = self.spaces.remove(idx);
            self.spaces.insert(0, space);
        }
        0
    }

    pub fn set_title(&mut self, idx: usize, title: &str) {
        if let Some(space) = self.spaces.get_mut(idx) {
            space.title = title.to_string();
        }
    }

    /// Advance the space's last activity to `at`. When the local user caused
    /// the activity, their last-seen marker moves with it.
    ///
    /// Returns the space's class after the update.
    pub fn record_activity(&mut self, idx: usize, at: Timestamp, by_local_user: bool) -> Option<ReadClass> {
        let space = self.spaces.get_mut(idx)?;
        if at > space.last_activity {
            space.last_activity = at;
        }
        if by_local_user {
            let seen = space.last_activity;
            space.last_seen_activity = Some(space.last_seen_activity.map_or(seen, |s| s.max(seen)));
        }
        Some(self.reclassify(idx))
    }

    /// The local user read the space at `at`. The space becomes read even if
    /// the receipt is older than its last activity.
    pub fn record_seen(&mut self, idx: usize, at: Timestamp) -> Option<ReadClass> {
        let space = self.spaces.get_mut(idx)?;
        let seen = at.max(space.last_activity);
        space.last_seen_activity = Some(space.last_seen_activity.map_or(seen, |s| s.max(seen)));
        Some(self.reclassify(idx))
    }

    /// Position of the most recent space of `class`: greatest last activity
    /// among unread spaces, greatest last seen among read ones. On equal
    /// timestamps the earlier position wins.
    pub fn most_recent(&self, class: ReadClass) -> Option<usize> {
        let mut best: Option<(usize, Option<Timestamp>)> = None;
        for (idx, space) in self.spaces.iter().enumerate() {
            if space.class() != class {
                continue;
            }
            let rank = space.rank_timestamp();
            match best {
                Some((_, best_rank)) if rank <= best_rank => {}
                _ => best = Some((idx, rank)),
            }
        }
        best.map(|(idx, _)| idx)
    }

    fn reclassify(&mut self, idx: usize) -> ReadClass {
        let space = &mut self.spaces[idx];
        let before = space.class();
        let after = ReadClass::classify(space.last_activity, space.last_seen_activity);
        if before != after {
            space.is_unread = after == ReadClass::Unread;
            self.count_out(before);
            self.count_in(after);
        }
        after
    }

    fn count_in(&mut self, class: ReadClass) {
        match class {
            ReadClass::Read => self.read_count += 1,
            ReadClass::Unread => self.unread_count += 1,
        }
    }

    fn count_out(&mut self, class: ReadClass) {
        match class {
            ReadClass::Read => self.read_count = self.read_count.saturating_sub(1),
            ReadClass::Unread => self.unread_count = self.unread_count.saturating_sub(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SpaceSnapshot;
    use chrono::{TimeZone, Utc};

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn space(id: &str, activity: i64, seen: Option<i64>) -> Space {
        Space::from_snapshot(SpaceSnapshot {
            id: id.to_string(),
            title: Some(id.to_uppercase()),
            last_activity: ts(activity),
            last_seen_activity: seen.map(ts),
        })
    }

    fn sample() -> SpaceIndex {
        let mut idx = SpaceIndex::new();
        idx.push_back(space("a", 50, Some(10))); // unread
        idx.push_back(space("b", 40, Some(45))); // read
        idx.push_back(space("c", 30, None)); // unread
        idx.push_back(space("d", 20, Some(20))); // read
        idx
    }

    #[test]
    fn counts_track_inserts_and_removals() {
        let mut idx = sample();
        assert_eq!((idx.read_count(), idx.unread_count()), (2, 2));
        idx.insert_front(space("e", 60, None));
        assert_eq!(idx.unread_count(), 3);
        assert_eq!(idx.position("e"), Some(0));
        let removed = idx.remove(idx.position("b").unwrap()).unwrap();
        assert_eq!(removed.id, "b");
        assert_eq!(idx.read_count(), 1);
        assert_eq!(idx.read_count() + idx.unread_count(), idx.len());
    }

    #[test]
    fn remove_out_of_range_is_none() {
        let mut idx = sample();
        assert!(idx.remove(99).is_none());
        assert_eq!(idx.len(), 4);
    }

    #[test]
    fn move_to_front_keeps_relative_order() {
        let mut idx = sample();
        idx.move_to_front(2);
        let ids: Vec<&str> = idx.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b", "d"]);
    }

    #[test]
    fn local_activity_marks_space_read() {
        let mut idx = sample();
        let class = idx.record_activity(0, ts(70), true);
        assert_eq!(class, Some(ReadClass::Read));
        assert_eq!(idx.unread_count(), 1);
        assert_eq!(idx.read_count(), 3);
        assert!(idx.get(0).unwrap().is_consistent());
    }

    #[test]
    fn remote_activity_marks_read_space_unread() {
        let mut idx = sample();
        let class = idx.record_activity(1, ts(80), false);
        assert_eq!(class, Some(ReadClass::Unread));
        assert_eq!(idx.get(1).unwrap().last_activity, ts(80));
        assert_eq!((idx.read_count(), idx.unread_count()), (1, 3));
    }

    #[test]
    fn stale_receipt_still_marks_read() {
        let mut idx = sample();
        idx.record_seen(0, ts(5));
        let a = idx.get(0).unwrap();
        assert!(!a.is_unread);
        assert!(a.is_consistent());
    }

    #[test]
    fn most_recent_per_class() {
        let idx = sample();
        assert_eq!(idx.most_recent(ReadClass::Unread), Some(0));
        assert_eq!(idx.most_recent(ReadClass::Read), Some(1));
    }

    #[test]
    fn most_recent_first_wins_on_tie() {
        let mut idx = SpaceIndex::new();
        idx.push_back(space("x", 10, None));
        idx.push_back(space("y", 10, None));
        assert_eq!(idx.most_recent(ReadClass::Unread), Some(0));
        assert_eq!(idx.most_recent(ReadClass::Read), None);
    }
}
