//! # read-status
//!
//! Keeps a live view of which collaboration spaces the local user has read.
//!
//! A [`Session`] looks up the user, folds a bulk snapshot of spaces into a
//! [`ReconciliationState`], enriches the most recent read and unread space
//! with member read status, and then applies real-time events from an
//! [`EventSource`] one at a time. Events that arrive while a snapshot is
//! loading are buffered and replayed afterwards.
//!
//! ```rust,ignore
//! let api = Arc::new(HttpReadStatusApi::builder(url).access_token(token).build()?);
//! let (tx, rx) = mpsc::channel(1024);
//! let _subs = subscribe_all(&WsEventSource::new(events_url, token), &tx).await?;
//! let state = Session::new(api, TerminalRenderer::stdout())
//!     .run(rx, async { let _ = tokio::signal::ctrl_c().await; })
//!     .await?;
//! ```

pub mod api;
pub mod buffer;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod index;
pub mod members;
pub mod memory;
pub mod model;
pub mod reconciler;
pub mod render;
pub mod session;
pub mod state;
pub mod subscription;

pub use api::ReadStatusApi;
pub use config::Config;
pub use error::{ReadStatusError, Result};
pub use events::{RealtimeEvent, ResourceKind};
pub use http::HttpReadStatusApi;
pub use memory::MemoryApi;
pub use model::{Member, Person, ReadClass, Space, SpaceSnapshot, Timestamp};
pub use reconciler::{Reconciler, ReplayReport};
pub use render::{Renderer, StateWatch, TerminalRenderer, WatchRenderer};
pub use session::{Session, SessionCommand, SessionPhase};
pub use state::ReconciliationState;
pub use subscription::{subscribe_all, EventSource, Subscription, WsEventSource};
