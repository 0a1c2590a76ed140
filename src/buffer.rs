//! Holding area for events that arrive before the snapshot is ready.

use crate::events::RealtimeEvent;

/// Ordered, unbounded queue of events captured while loading.
///
/// Draining consumes the buffer, so a drained buffer cannot be pushed to or
/// replayed a second time. Each loading phase starts with a fresh one.
#[derive(Debug, Default)]
pub struct EventBuffer {
    events: Vec<RealtimeEvent>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer that starts with `events`, which are replayed ahead of
    /// anything pushed later.
    pub fn carrying(events: Vec<RealtimeEvent>) -> Self {
        EventBuffer { events }
    }

    pub fn push(&mut self, event: RealtimeEvent) {
        tracing::debug!(event = event.label(), room = event.room_id(), "buffering event while loading");
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Hand back every buffered event in arrival order.
    pub fn drain(self) -> Vec<RealtimeEvent> {
        self.events
    }
}
