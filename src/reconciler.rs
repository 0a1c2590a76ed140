//! # Read-state reconciler
//!
//! ## Responsibility
//! Owns the [`ReconciliationState`] for one session. Seeds it from a bulk
//! snapshot, enriches the two highlighted spaces with member read status,
//! replays events buffered during loading, and applies live events.
//!
//! ## Guarantees
//! - Events are applied one at a time, in the order they are handed in.
//! - A failing event leaves the state exactly as it was before the event.
//! - After any applied event the highlighted spaces are the most recent
//!   space of their class (see [`SpaceIndex::most_recent`]).
//!
//! ## NOT Responsible For
//! - Deciding when to buffer (that is the session)
//! - Transport or rendering

use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::ReadStatusApi;
use crate::error::{ReadStatusError, Result};
use crate::events::{MembershipChange, MembershipSeen, MessageCreated, RealtimeEvent, RoomUpdated};
use crate::index::SpaceIndex;
use crate::members::HighlightedSpace;
use crate::model::{Member, Person, ReadClass, Space, SpaceSnapshot};
use crate::state::{MessageSummary, ReceiptSummary, ReconciliationState};

/// Outcome of replaying a drained event buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub applied: usize,
    /// Local-user membership events already reflected by the snapshot.
    pub skipped: usize,
    pub failed: usize,
}

pub struct Reconciler<A: ReadStatusApi + ?Sized> {
    api: Arc<A>,
    me: Person,
    state: ReconciliationState,
}

impl<A: ReadStatusApi + ?Sized> Reconciler<A> {
    pub fn new(api: Arc<A>, me: Person) -> Self {
        Reconciler {
            api,
            me,
            state: ReconciliationState::default(),
        }
    }

    pub fn state(&self) -> &ReconciliationState {
        &self.state
    }

    pub fn me(&self) -> &Person {
        &self.me
    }

    pub fn is_initialized(&self) -> bool {
        self.state.initialized
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Fold `snapshots` into a fresh state and enrich its highlighted spaces.
    ///
    /// The state stays uninitialized until [`replay`](Self::replay) runs. On
    /// error the previous spaces are kept but the state is still marked
    /// uninitialized.
    pub async fn load_snapshot(&mut self, snapshots: Vec<SpaceSnapshot>) -> Result<()> {
        self.state.initialized = false;
        let mut next = ReconciliationState::fold(snapshots);
        debug!(
            spaces = next.spaces.len(),
            read = next.read_count(),
            unread = next.unread_count(),
            "snapshot folded"
        );

        for class in [ReadClass::Unread, ReadClass::Read] {
            if let Some(candidate) = next.highlight(class).cloned() {
                let enriched = self.enrich(candidate).await?;
                backfill_title(&mut next.spaces, &enriched);
                next.set_highlight(class, Some(enriched));
            }
        }

        next.last_message = self.state.last_message.take();
        next.last_receipt = self.state.last_receipt.take();
        self.state = next;
        Ok(())
    }

    /// Apply events captured while loading, then mark the state initialized.
    ///
    /// Local-user membership events the snapshot already reflects are
    /// dropped: a join for a space that is indexed, or a leave for one that
    /// is not.
    pub async fn replay(&mut self, events: Vec<RealtimeEvent>) -> ReplayReport {
        let mut report = ReplayReport::default();
        for event in events {
            if self.already_reflected(&event) {
                debug!(event = event.label(), room = event.room_id(), "buffered event already in snapshot");
                report.skipped += 1;
                continue;
            }
            if self.apply(event).await {
                report.applied += 1;
            } else {
                report.failed += 1;
            }
        }
        self.state.initialized = true;
        report
    }

    fn already_reflected(&self, event: &RealtimeEvent) -> bool {
        match event {
            RealtimeEvent::MembershipCreated(c) if c.person_id == self.me.id => {
                self.state.spaces.contains(&c.room_id)
            }
            RealtimeEvent::MembershipDeleted(c) if c.person_id == self.me.id => {
                !self.state.spaces.contains(&c.room_id)
            }
            _ => false,
        }
    }

    // -----------------------------------------------------------------------
    // Live events
    // -----------------------------------------------------------------------

    /// Apply one event. Returns false when the event failed; the failure is
    /// logged and the state is left as it was.
    pub async fn apply(&mut self, event: RealtimeEvent) -> bool {
        let label = event.label();
        let room = event.room_id().to_string();
        let saved = self.state.clone();
        debug!(event = label, room = %room, "applying event");

        let result = match event {
            RealtimeEvent::RoomUpdated(e) => self.on_room_updated(e).await,
            RealtimeEvent::MessageCreated(e) => self.on_message_created(e).await,
            RealtimeEvent::MembershipCreated(e) => self.on_membership_created(e).await,
            RealtimeEvent::MembershipDeleted(e) => self.on_membership_deleted(e).await,
            RealtimeEvent::MembershipSeen(e) => self.on_membership_seen(e).await,
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(event = label, room = %room, error = %e, "event dropped");
                self.state = saved;
                false
            }
        }
    }

    async fn on_room_updated(&mut self, e: RoomUpdated) -> Result<()> {
        let before = self.state.spaces.len();
        let idx = self.resolve(&e.room_id).await?;
        let room = self.api.get_space(&e.room_id).await?;
        let title = room.title.unwrap_or_default();

        self.state.spaces.set_title(idx, &title);
        for h in self.state.highlights_for_mut(&e.room_id) {
            h.title = title.clone();
        }
        if self.state.spaces.len() > before {
            self.rehighlight(None).await?;
        }
        Ok(())
    }

    async fn on_message_created(&mut self, e: MessageCreated) -> Result<()> {
        let mut summary = MessageSummary::from_event(&e);
        let idx = self.resolve(&e.room_id).await?;
        let by_me = e.person_id == self.me.id;

        self.state.spaces.record_activity(idx, e.created, by_me);
        self.state.spaces.move_to_front(idx);
        self.rehighlight(Some(&e.room_id)).await?;

        summary.room_title = self.title_of(&e.room_id);
        self.state.last_message = Some(summary);
        Ok(())
    }

    async fn on_membership_created(&mut self, e: MembershipChange) -> Result<()> {
        let me = self.me.id.clone();
        if e.person_id != me {
            for h in self.state.highlights_for_mut(&e.room_id) {
                h.add_member(&e.person_id, &e.display_name, &me);
            }
            return Ok(());
        }

        if self.state.spaces.contains(&e.room_id) {
            debug!(room = %e.room_id, "already a member, space is indexed");
            return Ok(());
        }
        self.state.spaces.insert_front(Space {
            id: e.room_id.clone(),
            title: String::new(),
            last_activity: e.created,
            last_seen_activity: None,
            is_unread: true,
        });
        self.rehighlight(Some(&e.room_id)).await
    }

    async fn on_membership_deleted(&mut self, e: MembershipChange) -> Result<()> {
        let me = self.me.id.clone();
        if e.person_id != me {
            for h in self.state.highlights_for_mut(&e.room_id) {
                if !h.remove_member(&e.person_id, &me) {
                    debug!(room = %e.room_id, person = %e.person_id, "departed member was not listed");
                }
            }
            return Ok(());
        }

        let Some(idx) = self.state.spaces.position(&e.room_id) else {
            debug!(room = %e.room_id, "left a space that is not indexed");
            return Ok(());
        };
        self.state.spaces.remove(idx);
        self.rehighlight(None).await
    }

    async fn on_membership_seen(&mut self, e: MembershipSeen) -> Result<()> {
        let mut receipt = ReceiptSummary::from_event(&e);
        let me = self.me.id.clone();
        let before = self.state.spaces.len();
        let idx = self.resolve(&e.room_id).await?;

        if e.actor_id == me {
            self.state.spaces.record_seen(idx, e.created);
            self.rehighlight(None).await?;
        } else {
            for h in self.state.highlights_for_mut(&e.room_id) {
                if !h.update_member_seen(&e.person_id, e.created, &me) {
                    warn!(room = %e.room_id, person = %e.person_id, "read receipt for unlisted member");
                }
            }
            if self.state.spaces.len() > before {
                self.rehighlight(None).await?;
            }
        }

        receipt.room_title = match self.title_of(&e.room_id) {
            t if t.is_empty() => self.api.get_space(&e.room_id).await?.title.unwrap_or_default(),
            t => t,
        };
        self.state.last_receipt = Some(receipt);
        Ok(())
    }

    /// Mark the last received message as read for the local user.
    ///
    /// Returns the marked message id, or `None` when no message has arrived
    /// yet. The state itself changes only when the resulting local
    /// `memberships:seen` event is applied.
    pub async fn mark_last_message_read(&self) -> Result<Option<String>> {
        let Some(m) = self.state.last_message.as_ref() else {
            return Ok(None);
        };
        self.api.update_last_seen(&m.room_id, &m.message_id).await?;
        Ok(Some(m.message_id.clone()))
    }

    // -----------------------------------------------------------------------
    // Lookup and enrichment
    // -----------------------------------------------------------------------

    /// Position of space `id`, fetching and indexing it if the bulk list
    /// missed it. A fetched space is inserted at the front.
    pub async fn resolve(&mut self, id: &str) -> Result<usize> {
        if let Some(idx) = self.state.spaces.position(id) {
            return Ok(idx);
        }
        debug!(room = id, "space not indexed, fetching it directly");
        let snapshot = self
            .api
            .get_space_with_read_status(id)
            .await
            .map_err(|e| ReadStatusError::LookupMiss {
                id: id.to_string(),
                detail: e.to_string(),
            })?;
        self.state.spaces.insert_front(Space::from_snapshot(snapshot));
        Ok(0)
    }

    /// Load the member list (and the title, when unknown) of a highlight.
    async fn enrich(&self, mut h: HighlightedSpace) -> Result<HighlightedSpace> {
        let members = if h.title.is_empty() {
            let (room, members) = futures_util::try_join!(
                self.api.get_space(&h.id),
                self.api.list_members_with_read_status(&h.id)
            )?;
            h.title = room.title.unwrap_or_default();
            members
        } else {
            self.api.list_members_with_read_status(&h.id).await?
        };
        h.set_members(members.into_iter().map(Member::from).collect(), &self.me.id);
        Ok(h)
    }

    /// Point both highlights at the most recent space of their class.
    ///
    /// A highlight that still targets the same space (or that moves from one
    /// class to the other) keeps its member list and is only resynced;
    /// `refresh` forces a member reload for that space.
    async fn rehighlight(&mut self, refresh: Option<&str>) -> Result<()> {
        let me = self.me.id.clone();
        let mut previous = [
            self.state.most_recent_read.take(),
            self.state.most_recent_unread.take(),
        ];

        for class in [ReadClass::Read, ReadClass::Unread] {
            let target = self
                .state
                .spaces
                .most_recent(class)
                .and_then(|p| self.state.spaces.get(p))
                .cloned();
            let next = match target {
                None => None,
                Some(space) => {
                    let reusable = previous
                        .iter_mut()
                        .find(|slot| matches!(slot, Some(h) if h.id == space.id))
                        .and_then(Option::take);
                    match reusable {
                        Some(mut h) if refresh != Some(space.id.as_str()) => {
                            h.sync_from(&space, &me);
                            Some(h)
                        }
                        _ => {
                            let h = self.enrich(HighlightedSpace::from_space(&space)).await?;
                            backfill_title(&mut self.state.spaces, &h);
                            Some(h)
                        }
                    }
                }
            };
            self.state.set_highlight(class, next);
        }
        Ok(())
    }

    fn title_of(&self, id: &str) -> String {
        let highlighted = [ReadClass::Read, ReadClass::Unread]
            .into_iter()
            .filter_map(|c| self.state.highlight(c))
            .find(|h| h.id == id && !h.title.is_empty())
            .map(|h| h.title.clone());
        highlighted
            .or_else(|| self.state.spaces.find(id).map(|s| s.title.clone()))
            .unwrap_or_default()
    }
}

fn backfill_title(spaces: &mut SpaceIndex, h: &HighlightedSpace) {
    if let Some(idx) = spaces.position(&h.id) {
        if spaces.get(idx).is_some_and(|s| s.title.is_empty()) {
            spaces.set_title(idx, &h.title);
        }
    }
}
