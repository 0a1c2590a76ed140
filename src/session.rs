//! # Session
//!
//! Drives one authenticated session from identity lookup to a live,
//! continuously reconciled state.
//!
//! ## Lifecycle
//! 1. `Authorizing`: look up the current user.
//! 2. `LoadingSnapshot`: fetch the first page of spaces; if it is full, start
//!    the unbounded fetch in the background. Fold and enrich, buffering every
//!    event that arrives meanwhile, then replay the buffer.
//! 3. `Ready`: apply events from the intake queue one at a time. When the
//!    background fetch lands, go through `LoadingSnapshot` again with it and
//!    replay every event applied since the fetch was issued.
//! 4. Any identity or loading failure ends in `Unauthenticated`.
//!
//! All events from every subscription arrive on a single `mpsc` intake
//! queue, so arrival order is the order of application. Commands (such as
//! marking the last message read) arrive on a second, optional queue and
//! are only served while `Ready`.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn, Instrument};

use crate::api::ReadStatusApi;
use crate::buffer::EventBuffer;
use crate::error::{ReadStatusError, Result};
use crate::events::RealtimeEvent;
use crate::model::SpaceSnapshot;
use crate::reconciler::Reconciler;
use crate::render::Renderer;
use crate::state::ReconciliationState;

/// Default size of the first, fast page of spaces.
pub const DEFAULT_INITIAL_FETCH: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    Unauthenticated,
    Authorizing,
    LoadingSnapshot,
    Ready,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionPhase::Unauthenticated => "unauthenticated",
            SessionPhase::Authorizing => "authorizing",
            SessionPhase::LoadingSnapshot => "loading",
            SessionPhase::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// User requests served by a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Mark the last received message as read.
    MarkLastMessageRead,
}

type FullFetch = oneshot::Receiver<Result<Vec<SpaceSnapshot>>>;

pub struct Session<A: ReadStatusApi + ?Sized + 'static, R: Renderer> {
    api: Arc<A>,
    renderer: R,
    initial_fetch: usize,
    commands: Option<mpsc::Receiver<SessionCommand>>,
    phase: SessionPhase,
    id: uuid::Uuid,
}

impl<A: ReadStatusApi + ?Sized + 'static, R: Renderer> Session<A, R> {
    pub fn new(api: Arc<A>, renderer: R) -> Self {
        Session {
            api,
            renderer,
            initial_fetch: DEFAULT_INITIAL_FETCH,
            commands: None,
            phase: SessionPhase::Unauthenticated,
            id: uuid::Uuid::new_v4(),
        }
    }

    /// Override the size of the first page (default 30).
    pub fn initial_fetch(mut self, n: usize) -> Self {
        self.initial_fetch = n.max(1);
        self
    }

    /// Serve [`SessionCommand`]s from `commands` while ready.
    pub fn commands(mut self, commands: mpsc::Receiver<SessionCommand>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Run until `shutdown` resolves or the intake queue closes, returning the
    /// final state.
    ///
    /// # Errors
    /// - [`ReadStatusError::Auth`] when the identity lookup fails.
    /// - [`ReadStatusError::Fetch`] when a snapshot fetch or its enrichment
    ///   fails.
    pub async fn run<S>(
        mut self,
        mut intake: mpsc::Receiver<RealtimeEvent>,
        shutdown: S,
    ) -> Result<ReconciliationState>
    where
        S: Future<Output = ()>,
    {
        let span = tracing::info_span!("session", session_id = %self.id);
        async move {
            tokio::pin!(shutdown);
            let mut buffer = EventBuffer::new();
            let mut commands = self.commands.take();

            self.set_phase(SessionPhase::Authorizing);
            let identity = buffered(self.api.current_user(), &mut intake, &mut buffer).await;
            let me = match identity {
                Ok(me) => me,
                Err(e) => return Err(self.fail(e)),
            };
            info!(user = %me.display_name, "authorized");

            self.set_phase(SessionPhase::LoadingSnapshot);
            info!(
                limit = self.initial_fetch,
                "looking up status of the most recent spaces for {}", me.display_name
            );
            let first_page = buffered(
                self.api.list_spaces_with_read_status(Some(self.initial_fetch)),
                &mut intake,
                &mut buffer,
            )
            .await;
            let first = match first_page {
                Ok(spaces) => spaces,
                Err(e) => return Err(self.fail(e)),
            };

            let mut full_fetch = if first.len() == self.initial_fetch {
                Some(self.spawn_full_fetch())
            } else {
                None
            };
            // Events applied since the full fetch was issued; its result
            // predates them, so they are replayed on top of it.
            let mut since_full: Option<Vec<RealtimeEvent>> = full_fetch.as_ref().map(|_| Vec::new());

            let mut reconciler = Reconciler::new(Arc::clone(&self.api), me);
            self.load(&mut reconciler, first, &mut intake, buffer, since_full.as_mut())
                .await?;

            loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        info!("shutdown requested");
                        break;
                    }
                    full = wait_full(&mut full_fetch), if full_fetch.is_some() => {
                        full_fetch = None;
                        let spaces = match full_fetch_outcome(full) {
                            Ok(spaces) => spaces,
                            Err(e) => return Err(self.fail(e)),
                        };
                        let buffer = EventBuffer::carrying(since_full.take().unwrap_or_default());
                        info!(
                            spaces = spaces.len(),
                            carried = buffer.len(),
                            "full space list received, reloading"
                        );
                        self.load(&mut reconciler, spaces, &mut intake, buffer, None).await?;
                    }
                    command = next_command(&mut commands), if commands.is_some() => match command {
                        Some(SessionCommand::MarkLastMessageRead) => mark_read(&reconciler).await,
                        None => {
                            debug!("command queue closed");
                            commands = None;
                        }
                    },
                    event = intake.recv() => match event {
                        Some(event) => {
                            if let Some(log) = since_full.as_mut() {
                                log.push(event.clone());
                            }
                            reconciler.apply(event).await;
                            self.renderer.on_state_change(reconciler.state());
                        }
                        None => {
                            info!("event intake closed");
                            break;
                        }
                    },
                }
            }

            Ok(reconciler.state().clone())
        }
        .instrument(span)
        .await
    }

    /// Fold, enrich and replay one snapshot, buffering events meanwhile.
    ///
    /// Events already in `buffer` are replayed before the ones that arrive
    /// during the load. Every replayed event is also appended to `log`.
    async fn load(
        &mut self,
        reconciler: &mut Reconciler<A>,
        spaces: Vec<SpaceSnapshot>,
        intake: &mut mpsc::Receiver<RealtimeEvent>,
        mut buffer: EventBuffer,
        log: Option<&mut Vec<RealtimeEvent>>,
    ) -> Result<()> {
        self.set_phase(SessionPhase::LoadingSnapshot);
        info!(
            spaces = spaces.len(),
            "{} is a member of {} spaces, calculating read states",
            reconciler.me().display_name,
            spaces.len()
        );

        if let Err(e) = buffered(reconciler.load_snapshot(spaces), intake, &mut buffer).await {
            error!(error = %e, "failed to get details of the most recent spaces");
            return Err(self.fail(e));
        }

        let events = buffer.drain();
        if let Some(log) = log {
            log.extend(events.iter().cloned());
        }
        let buffered_events = events.len();
        let report = reconciler.replay(events).await;
        if report.failed > 0 {
            warn!(failed = report.failed, "some buffered events could not be applied");
        }
        info!(
            buffered = buffered_events,
            applied = report.applied,
            skipped = report.skipped,
            read = reconciler.state().read_count(),
            unread = reconciler.state().unread_count(),
            "read states ready"
        );

        self.set_phase(SessionPhase::Ready);
        self.renderer.on_state_change(reconciler.state());
        Ok(())
    }

    fn spawn_full_fetch(&self) -> FullFetch {
        let (tx, rx) = oneshot::channel();
        let api = Arc::clone(&self.api);
        debug!("first page is full, fetching every space in the background");
        tokio::spawn(
            async move {
                let result = api.list_spaces_with_read_status(None).await;
                let _ = tx.send(result);
            }
            .in_current_span(),
        );
        rx
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "session phase");
        }
        self.phase = phase;
        self.renderer.on_phase_change(phase);
    }

    fn fail(&mut self, e: ReadStatusError) -> ReadStatusError {
        error!(error = %e, "session failed");
        self.set_phase(SessionPhase::Unauthenticated);
        e
    }
}

/// Await `fut`, routing every event that arrives in the meantime to `buffer`.
async fn buffered<F>(
    fut: F,
    intake: &mut mpsc::Receiver<RealtimeEvent>,
    buffer: &mut EventBuffer,
) -> F::Output
where
    F: Future,
{
    tokio::pin!(fut);
    let mut open = true;
    loop {
        tokio::select! {
            biased;
            out = &mut fut => return out,
            event = intake.recv(), if open => match event {
                Some(event) => buffer.push(event),
                None => open = false,
            },
        }
    }
}

/// Flatten the background fetch result; a dropped sender means the task
/// died before producing one.
fn full_fetch_outcome(
    received: std::result::Result<Result<Vec<SpaceSnapshot>>, oneshot::error::RecvError>,
) -> Result<Vec<SpaceSnapshot>> {
    received.unwrap_or_else(|_| {
        Err(ReadStatusError::fetch(
            "full space list",
            "background fetch task ended without a result",
        ))
    })
}

async fn next_command(rx: &mut Option<mpsc::Receiver<SessionCommand>>) -> Option<SessionCommand> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn mark_read<A: ReadStatusApi + ?Sized>(reconciler: &Reconciler<A>) {
    match reconciler.mark_last_message_read().await {
        Ok(Some(id)) => info!(message_id = %id, "marked last message as read"),
        Ok(None) => info!("no message received yet, nothing to mark as read"),
        Err(e) => warn!(error = %e, "could not mark last message as read"),
    }
}

async fn wait_full(
    rx: &mut Option<FullFetch>,
) -> std::result::Result<Result<Vec<SpaceSnapshot>>, oneshot::error::RecvError> {
    match rx.as_mut() {
        Some(rx) => rx.await,
        None => std::future::pending().await,
    }
}
