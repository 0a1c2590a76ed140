//! Renderers: consumers of state-change notifications.
//!
//! [`TerminalRenderer`] prints the read-status table; [`WatchRenderer`]
//! publishes every state through `tokio::sync::watch` for embedding.

use std::io::{self, Write};

use colored::*;
use tokio::sync::watch;

use crate::members::HighlightedSpace;
use crate::session::SessionPhase;
use crate::state::ReconciliationState;

/// Receives a notification after every handler completes.
pub trait Renderer: Send {
    fn on_state_change(&mut self, state: &ReconciliationState);

    fn on_phase_change(&mut self, _phase: SessionPhase) {}
}

// ---------------------------------------------------------------------------
// Terminal
// ---------------------------------------------------------------------------

/// Prints the read-status table to a writer (stdout by default).
pub struct TerminalRenderer<W: Write + Send = io::Stdout> {
    out: W,
}

impl TerminalRenderer<io::Stdout> {
    pub fn stdout() -> Self {
        TerminalRenderer { out: io::stdout() }
    }
}

impl<W: Write + Send> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        TerminalRenderer { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_highlight(&mut self, label: &str, count: usize, h: Option<&HighlightedSpace>) -> io::Result<()> {
        writeln!(self.out, "  {:<14} {}", format!("{label} spaces:"), count.to_string().bold())?;
        match h {
            Some(h) => {
                let title = if h.title.is_empty() { "(untitled)" } else { h.title.as_str() };
                writeln!(self.out, "    most recent: {}", title.bright_white())?;
                writeln!(self.out, "      caught up: {}", h.caught_up.text.green())?;
                writeln!(self.out, "      behind:    {}", h.behind.text.yellow())?;
            }
            None => writeln!(self.out, "    most recent: {}", "none".dimmed())?,
        }
        Ok(())
    }

    fn write_state(&mut self, state: &ReconciliationState) -> io::Result<()> {
        writeln!(self.out, "{}", "Read status".bright_cyan().bold())?;
        self.write_highlight("read", state.read_count(), state.most_recent_read.as_ref())?;
        self.write_highlight("unread", state.unread_count(), state.most_recent_unread.as_ref())?;
        if let Some(m) = &state.last_message {
            writeln!(
                self.out,
                "  last message:  [{}] {} in {}: {}",
                m.created.format("%H:%M:%S"),
                m.author_email.bright_blue(),
                m.room_title.bright_white(),
                m.text
            )?;
        }
        if let Some(r) = &state.last_receipt {
            writeln!(
                self.out,
                "  last receipt:  [{}] {} read {} up to {}",
                r.created.format("%H:%M:%S"),
                r.person_display_name.bright_blue(),
                r.room_title.bright_white(),
                r.last_seen_id.as_deref().unwrap_or("-")
            )?;
        }
        self.out.flush()
    }
}

impl<W: Write + Send> Renderer for TerminalRenderer<W> {
    fn on_state_change(&mut self, state: &ReconciliationState) {
        if let Err(e) = self.write_state(state) {
            tracing::warn!(error = %e, "failed to write read status");
        }
    }

    fn on_phase_change(&mut self, phase: SessionPhase) {
        let label = match phase {
            SessionPhase::Unauthenticated => "unauthorized".bright_red(),
            SessionPhase::Authorizing => "authorizing".yellow(),
            SessionPhase::LoadingSnapshot => "initializing".yellow(),
            SessionPhase::Ready => "initialized".green(),
        };
        let _ = writeln!(self.out, "[{}]", label);
    }
}

// ---------------------------------------------------------------------------
// Watch channel
// ---------------------------------------------------------------------------

/// Receiving side of a [`WatchRenderer`].
#[derive(Clone)]
pub struct StateWatch {
    pub state: watch::Receiver<ReconciliationState>,
    pub phase: watch::Receiver<SessionPhase>,
}

/// Publishes the latest state and phase; slow readers only see the newest.
pub struct WatchRenderer {
    state: watch::Sender<ReconciliationState>,
    phase: watch::Sender<SessionPhase>,
}

impl WatchRenderer {
    pub fn new() -> (Self, StateWatch) {
        let (state_tx, state_rx) = watch::channel(ReconciliationState::default());
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Unauthenticated);
        (
            WatchRenderer {
                state: state_tx,
                phase: phase_tx,
            },
            StateWatch {
                state: state_rx,
                phase: phase_rx,
            },
        )
    }
}

impl Renderer for WatchRenderer {
    fn on_state_change(&mut self, state: &ReconciliationState) {
        self.state.send_replace(state.clone());
    }

    fn on_phase_change(&mut self, phase: SessionPhase) {
        self.phase.send_replace(phase);
    }
}
