//! Real-time event delivery.
//!
//! An [`EventSource`] opens one subscription per [`ResourceKind`]; every
//! subscription forwards into the same intake queue, so the session sees a
//! single ordered stream. A [`Subscription`] handle aborts its forwarding
//! task when cancelled or dropped.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn, Instrument};

use crate::error::{ReadStatusError, Result};
use crate::events::{RealtimeEvent, ResourceKind};

/// Consecutive failures after which reconnect attempts are logged as errors.
const LOUD_FAILURES: u32 = 5;

#[async_trait]
pub trait EventSource: Send + Sync {
    /// Start forwarding events of `kind` into `intake`.
    async fn subscribe(&self, kind: ResourceKind, intake: mpsc::Sender<RealtimeEvent>) -> Result<Subscription>;
}

/// Subscribe to every resource kind, stopping at the first failure.
pub async fn subscribe_all<E: EventSource + ?Sized>(
    source: &E,
    intake: &mpsc::Sender<RealtimeEvent>,
) -> Result<Vec<Subscription>> {
    let mut subscriptions = Vec::with_capacity(ResourceKind::ALL.len());
    for kind in ResourceKind::ALL {
        subscriptions.push(source.subscribe(kind, intake.clone()).await?);
    }
    Ok(subscriptions)
}

/// Handle to a running subscription.
pub struct Subscription {
    kind: ResourceKind,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(kind: ResourceKind, task: JoinHandle<()>) -> Self {
        Subscription { kind, task }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn cancel(&self) {
        debug!(resource = %self.kind, "cancelling subscription");
        self.task.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Exponential reconnect backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Backoff { base, max: max.max(base) }
    }

    /// Upper bound of the delay after `failures` consecutive failures.
    pub fn ceiling(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.min(16);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// A delay in `[ceiling / 2, ceiling]`.
    pub fn delay(&self, failures: u32) -> Duration {
        let ceiling = self.ceiling(failures);
        let half = ceiling / 2;
        let spread = u64::try_from((ceiling - half).as_millis()).unwrap_or(u64::MAX);
        let jitter = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=spread)
        };
        half + Duration::from_millis(jitter)
    }
}

// ---------------------------------------------------------------------------
// WebSocket source
// ---------------------------------------------------------------------------

/// WebSocket event source: one connection per resource kind on
/// `{events_url}?resource={kind}`, authenticated with a bearer token.
#[derive(Debug, Clone)]
pub struct WsEventSource {
    events_url: String,
    access_token: String,
    backoff: Backoff,
}

enum StreamEnd {
    /// The server closed the stream; reconnect.
    Closed,
    /// The session stopped reading; stop for good.
    IntakeClosed,
}

impl WsEventSource {
    pub fn new(events_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        WsEventSource {
            events_url: events_url.into(),
            access_token: access_token.into(),
            backoff: Backoff::default(),
        }
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Handshake request for `kind`.
    pub fn request(&self, kind: ResourceKind) -> Result<Request> {
        let sep = if self.events_url.contains('?') { '&' } else { '?' };
        let url = format!("{}{sep}resource={}", self.events_url, kind.as_str());
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ReadStatusError::Config(format!("events url {url}: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.access_token))
            .map_err(|e| ReadStatusError::Config(format!("access token: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);
        Ok(request)
    }

    /// Reconnect until the intake queue closes.
    async fn pump(self, kind: ResourceKind, intake: mpsc::Sender<RealtimeEvent>) {
        let mut consecutive_failures: u32 = 0;
        loop {
            match self.stream_once(kind, &intake).await {
                Ok(StreamEnd::IntakeClosed) => {
                    debug!("intake closed, subscription ending");
                    return;
                }
                Ok(StreamEnd::Closed) => {
                    consecutive_failures = 0;
                    info!("event stream closed by server, reconnecting");
                }
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    if consecutive_failures >= LOUD_FAILURES {
                        error!(error = %e, consecutive_failures, "event stream failed repeatedly, will retry");
                    } else {
                        warn!(error = %e, "event stream failed, will retry");
                    }
                }
            }
            if intake.is_closed() {
                return;
            }
            tokio::time::sleep(self.backoff.delay(consecutive_failures)).await;
        }
    }

    async fn stream_once(&self, kind: ResourceKind, intake: &mpsc::Sender<RealtimeEvent>) -> Result<StreamEnd> {
        let request = self.request(kind)?;
        let (mut ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ReadStatusError::Transport(e.to_string()))?;
        info!("event stream connected");

        while let Some(msg) = ws.next().await {
            match msg.map_err(|e| ReadStatusError::Transport(e.to_string()))? {
                Message::Text(text) => match RealtimeEvent::from_json(&text) {
                    Ok(event) if event.resource() == kind => {
                        if intake.send(event).await.is_err() {
                            return Ok(StreamEnd::IntakeClosed);
                        }
                    }
                    Ok(event) => debug!(event = event.label(), "event for another resource ignored"),
                    Err(e) => warn!(error = %e, "dropping undecodable event"),
                },
                Message::Close(frame) => {
                    debug!(?frame, "close frame received");
                    break;
                }
                _ => {}
            }
        }
        Ok(StreamEnd::Closed)
    }
}

#[async_trait]
impl EventSource for WsEventSource {
    async fn subscribe(&self, kind: ResourceKind, intake: mpsc::Sender<RealtimeEvent>) -> Result<Subscription> {
        // Surface a bad URL or token now instead of inside the retry loop.
        self.request(kind)?;
        let span = tracing::info_span!("subscription", resource = %kind);
        let task = tokio::spawn(self.clone().pump(kind, intake).instrument(span));
        Ok(Subscription::new(kind, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_doubles_until_max() {
        let b = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000));
        assert_eq!(b.ceiling(0), Duration::from_millis(100));
        assert_eq!(b.ceiling(1), Duration::from_millis(200));
        assert_eq!(b.ceiling(3), Duration::from_millis(800));
        assert_eq!(b.ceiling(4), Duration::from_millis(1000));
        assert_eq!(b.ceiling(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn delay_stays_within_half_and_full_ceiling() {
        let b = Backoff::default();
        for failures in 0..10 {
            let ceiling = b.ceiling(failures);
            for _ in 0..20 {
                let d = b.delay(failures);
                assert!(d >= ceiling / 2 && d <= ceiling, "{d:?} vs {ceiling:?}");
            }
        }
    }

    #[test]
    fn max_below_base_is_raised() {
        let b = Backoff::new(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(b.max, Duration::from_secs(2));
    }

    #[test]
    fn request_carries_resource_and_bearer() {
        let source = WsEventSource::new("wss://events.example.com/stream", "tok");
        let req = source.request(ResourceKind::Messages).unwrap();
        assert_eq!(req.uri().query(), Some("resource=messages"));
        assert_eq!(req.headers()[AUTHORIZATION], "Bearer tok");

        let source = WsEventSource::new("wss://events.example.com/stream?v=2", "tok");
        let req = source.request(ResourceKind::Rooms).unwrap();
        assert_eq!(req.uri().query(), Some("v=2&resource=rooms"));
    }

    #[tokio::test]
    async fn bad_url_fails_at_subscribe() {
        let source = WsEventSource::new("not a url", "tok");
        let (tx, _rx) = mpsc::channel(1);
        let err = source.subscribe(ResourceKind::Rooms, tx).await.err();
        assert!(matches!(err, Some(ReadStatusError::Config(_))));
    }

    #[tokio::test]
    async fn dropping_subscription_stops_forwarding() {
        let (tx, mut rx) = mpsc::channel::<RealtimeEvent>(1);
        let task = tokio::spawn(async move {
            let _keep = tx;
            std::future::pending::<()>().await;
        });
        let sub = Subscription::new(ResourceKind::Memberships, task);
        assert!(sub.is_active());
        assert_eq!(sub.kind(), ResourceKind::Memberships);
        drop(sub);
        assert!(rx.recv().await.is_none());
    }
}
