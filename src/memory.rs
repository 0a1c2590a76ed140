//! In-memory [`ReadStatusApi`] for offline runs and tests.
//!
//! Spaces can be registered as "unlisted" to reproduce the lossy bulk list:
//! they are returned by point lookups but missing from
//! `list_spaces_with_read_status`. Individual operations can be made to fail
//! with [`MemoryApi::fail`] or held back with [`MemoryApi::hold`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::api::ReadStatusApi;
use crate::error::{ReadStatusError, Result};
use crate::model::{MemberSnapshot, Person, SpaceSnapshot};

/// Operation names accepted by [`MemoryApi::fail`] and [`MemoryApi::calls`].
pub mod op {
    pub const CURRENT_USER: &str = "current_user";
    pub const LIST_SPACES: &str = "list_spaces";
    pub const GET_SPACE: &str = "get_space";
    pub const GET_SPACE_READ_STATUS: &str = "get_space_read_status";
    pub const LIST_MEMBERS: &str = "list_members";
    pub const UPDATE_LAST_SEEN: &str = "update_last_seen";

    /// Scope suffix of the unbounded `list_spaces` call, as in `list_spaces:all`.
    pub const ALL: &str = "all";
}

#[derive(Default)]
struct Inner {
    spaces: Vec<SpaceSnapshot>,
    unlisted: HashSet<String>,
    members: HashMap<String, Vec<MemberSnapshot>>,
    failing: HashSet<String>,
    gates: HashMap<String, Arc<Notify>>,
    last_seen_ids: HashMap<String, String>,
    calls: HashMap<String, usize>,
}

pub struct MemoryApi {
    me: Person,
    latency: Option<Duration>,
    inner: Mutex<Inner>,
}

impl MemoryApi {
    pub fn new(me: Person) -> Self {
        MemoryApi {
            me,
            latency: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Delay every call by `latency`, so events can queue up mid-load.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn insert_space(&self, space: SpaceSnapshot) {
        self.with_inner(|inner| {
            inner.spaces.retain(|s| s.id != space.id);
            inner.unlisted.remove(&space.id);
            inner.spaces.push(space);
        });
    }

    /// Register a space that point lookups find but the bulk list misses.
    pub fn insert_unlisted_space(&self, space: SpaceSnapshot) {
        let id = space.id.clone();
        self.insert_space(space);
        self.with_inner(|inner| {
            inner.unlisted.insert(id);
        });
    }

    pub fn set_members(&self, space_id: &str, members: Vec<MemberSnapshot>) {
        self.with_inner(|inner| {
            inner.members.insert(space_id.to_string(), members);
        });
    }

    /// Make every call of `operation` fail. `operation` is one of [`op`],
    /// optionally suffixed with `:<space id>` to fail only for that space
    /// (`list_spaces:all` fails only the unbounded list).
    pub fn fail(&self, operation: &str) {
        self.with_inner(|inner| {
            inner.failing.insert(operation.to_string());
        });
    }

    pub fn recover(&self, operation: &str) {
        self.with_inner(|inner| {
            inner.failing.remove(operation);
        });
    }

    /// Hold the next call of `operation` (named as for [`fail`](Self::fail))
    /// until the returned handle is notified.
    pub fn hold(&self, operation: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.with_inner(|inner| {
            inner.gates.insert(operation.to_string(), Arc::clone(&gate));
        });
        gate
    }

    /// Message id the local user last marked as read in `space_id`.
    pub fn last_seen_id(&self, space_id: &str) -> Option<String> {
        self.with_inner(|inner| inner.last_seen_ids.get(space_id).cloned())
    }

    /// How many times `operation` was called.
    pub fn calls(&self, operation: &str) -> usize {
        self.with_inner(|inner| inner.calls.get(operation).copied().unwrap_or(0))
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    async fn enter(&self, operation: &str, target: Option<&str>) -> Result<()> {
        let scoped = target.map(|t| format!("{operation}:{t}"));
        let gate = self.with_inner(|inner| {
            inner
                .gates
                .remove(operation)
                .or_else(|| scoped.as_ref().and_then(|s| inner.gates.remove(s)))
        });
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.with_inner(|inner| {
            *inner.calls.entry(operation.to_string()).or_insert(0) += 1;
            let failing = inner.failing.contains(operation)
                || scoped.as_ref().is_some_and(|s| inner.failing.contains(s));
            if failing {
                Err(ReadStatusError::fetch(operation, "injected failure"))
            } else {
                Ok(())
            }
        })
    }

    fn lookup(&self, id: &str) -> Option<SpaceSnapshot> {
        self.with_inner(|inner| inner.spaces.iter().find(|s| s.id == id).cloned())
    }
}

#[async_trait]
impl ReadStatusApi for MemoryApi {
    async fn current_user(&self) -> Result<Person> {
        self.enter(op::CURRENT_USER, None)
            .await
            .map_err(|e| ReadStatusError::Auth(e.to_string()))?;
        Ok(self.me.clone())
    }

    async fn list_spaces_with_read_status(&self, limit: Option<usize>) -> Result<Vec<SpaceSnapshot>> {
        self.enter(op::LIST_SPACES, limit.is_none().then_some(op::ALL)).await?;
        Ok(self.with_inner(|inner| {
            let mut listed: Vec<SpaceSnapshot> = inner
                .spaces
                .iter()
                .filter(|s| !inner.unlisted.contains(&s.id))
                .cloned()
                .collect();
            listed.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
            if let Some(limit) = limit {
                listed.truncate(limit);
            }
            listed
        }))
    }

    async fn get_space(&self, id: &str) -> Result<SpaceSnapshot> {
        self.enter(op::GET_SPACE, Some(id)).await?;
        self.lookup(id)
            .map(|mut s| {
                s.last_seen_activity = None;
                s
            })
            .ok_or_else(|| ReadStatusError::fetch(format!("space {id}"), "not found"))
    }

    async fn get_space_with_read_status(&self, id: &str) -> Result<SpaceSnapshot> {
        self.enter(op::GET_SPACE_READ_STATUS, Some(id)).await?;
        self.lookup(id)
            .ok_or_else(|| ReadStatusError::fetch(format!("space {id}"), "not found"))
    }

    async fn list_members_with_read_status(&self, space_id: &str) -> Result<Vec<MemberSnapshot>> {
        self.enter(op::LIST_MEMBERS, Some(space_id)).await?;
        Ok(self.with_inner(|inner| inner.members.get(space_id).cloned().unwrap_or_default()))
    }

    async fn update_last_seen(&self, space_id: &str, message_id: &str) -> Result<()> {
        self.enter(op::UPDATE_LAST_SEEN, Some(space_id)).await?;
        self.with_inner(|inner| {
            let space = inner
                .spaces
                .iter_mut()
                .find(|s| s.id == space_id)
                .ok_or_else(|| ReadStatusError::fetch(format!("space {space_id}"), "not found"))?;
            space.last_seen_activity = Some(space.last_activity);
            inner.last_seen_ids.insert(space_id.to_string(), message_id.to_string());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn api() -> MemoryApi {
        MemoryApi::new(Person {
            id: "me".into(),
            display_name: "Me".into(),
        })
    }

    fn snap(id: &str, activity: i64) -> SpaceSnapshot {
        SpaceSnapshot {
            id: id.into(),
            title: Some(id.into()),
            last_activity: Utc.timestamp_opt(activity, 0).unwrap(),
            last_seen_activity: None,
        }
    }

    #[tokio::test]
    async fn list_is_most_recent_first_and_limited() {
        let api = api();
        api.insert_space(snap("old", 1));
        api.insert_space(snap("new", 9));
        api.insert_space(snap("mid", 5));
        let ids: Vec<String> = api
            .list_spaces_with_read_status(Some(2))
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, ["new", "mid"]);
    }

    #[tokio::test]
    async fn unlisted_space_only_found_by_point_lookup() {
        let api = api();
        api.insert_unlisted_space(snap("hidden", 3));
        assert!(api.list_spaces_with_read_status(None).await.unwrap().is_empty());
        assert_eq!(api.get_space_with_read_status("hidden").await.unwrap().id, "hidden");
        assert_eq!(api.calls(op::GET_SPACE_READ_STATUS), 1);
    }

    #[tokio::test]
    async fn scoped_failure_only_hits_one_space() {
        let api = api();
        api.fail("list_members:r1");
        assert!(api.list_members_with_read_status("r1").await.is_err());
        assert!(api.list_members_with_read_status("r2").await.is_ok());
        api.recover("list_members:r1");
        assert!(api.list_members_with_read_status("r1").await.is_ok());
    }

    #[tokio::test]
    async fn unbounded_list_can_fail_alone() {
        let api = api();
        api.insert_space(snap("a", 1));
        api.fail("list_spaces:all");
        assert_eq!(api.list_spaces_with_read_status(Some(5)).await.unwrap().len(), 1);
        assert!(api.list_spaces_with_read_status(None).await.is_err());
        assert_eq!(api.calls(op::LIST_SPACES), 2);
    }

    #[tokio::test]
    async fn held_call_waits_for_release() {
        let api = Arc::new(api());
        api.insert_space(snap("a", 1));
        let gate = api.hold("list_spaces:all");

        let pending = tokio::spawn({
            let api = Arc::clone(&api);
            async move { api.list_spaces_with_read_status(None).await }
        });
        // The bounded list is not held.
        assert_eq!(api.list_spaces_with_read_status(Some(1)).await.unwrap().len(), 1);
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        gate.notify_one();
        assert_eq!(pending.await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_last_seen_marks_space_read() {
        let api = api();
        api.insert_space(snap("a", 7));
        api.update_last_seen("a", "m7").await.unwrap();

        let a = api.get_space_with_read_status("a").await.unwrap();
        assert_eq!(a.last_seen_activity, Some(a.last_activity));
        assert_eq!(api.last_seen_id("a").as_deref(), Some("m7"));
        assert_eq!(api.calls(op::UPDATE_LAST_SEEN), 1);
        assert!(api.update_last_seen("missing", "m1").await.is_err());
    }

    #[tokio::test]
    async fn identity_failure_is_auth_error() {
        let api = api();
        api.fail(op::CURRENT_USER);
        assert!(matches!(api.current_user().await, Err(ReadStatusError::Auth(_))));
    }
}
