#![deny(
    non_ascii_idents,
    non_shorthand_field_patterns,
    path_statements,
    unused_comparisons,
    while_true,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_must_use
)]

//! Reconnecting, auto-pinging WebSocket client: a writer guarded by an
//! async mutex, a read loop spawned alongside a heartbeat loop, both
//! reporting back to a supervisor that reconnects on close and replays
//! remembered subscriptions. Supports a configurable ping policy (idle vs
//! periodic) and application-level ping/pong payloads, for venues whose
//! keepalive is a text frame rather than a protocol-level ping.

mod connection;

use std::sync::Arc;
use std::time::Duration;

use mmb_utils::cancellation::CancellationToken2;
use mmb_utils::infrastructure::spawn_future;
use mmb_utils::rate_limiter::RateLimiter;
use parking_lot::Mutex;
use tokio::sync::Notify;
use url::Url;

use connection::WsConnection;

#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("not connected")]
    NotConnected,
}

/// Either ping only when the link has been idle for `idle_timeout`, or
/// unconditionally every `interval`.
#[derive(Debug, Clone, Copy)]
pub enum PingPolicy {
    WhenIdle { idle_timeout: Duration },
    Periodically { interval: Duration },
}

/// Some venues (OKX) use an application-level `"ping"`/`"pong"` text frame
/// pair instead of the WS protocol ping/pong opcodes.
#[derive(Debug, Clone)]
pub struct AppLevelPing {
    pub request_payload: String,
    pub reply_payload: String,
}

#[derive(Debug, Clone)]
pub struct WsClientConfig {
    pub url: Url,
    pub ping_policy: PingPolicy,
    /// Connection is failed and reconnect is forced if no pong is observed
    /// within this window of sending a ping.
    pub ping_reply_timeout: Duration,
    pub reconnect_interval: Duration,
    pub app_level_ping: Option<AppLevelPing>,
    /// Burst/period for the subscribe-frame rate limiter, e.g. 3/s for
    /// Binance.
    pub subscribe_rate_period: Duration,
}

type FrameHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

struct Inner {
    config: WsClientConfig,
    handler: FrameHandler,
    connection: Mutex<Option<Arc<WsConnection>>>,
    subscriptions: Mutex<Vec<String>>,
    rate_limiter: RateLimiter,
    cancellation: CancellationToken2,
    disconnected: Arc<Notify>,
}

/// A reconnecting WS client for one venue/account combination. `connect()`
/// spawns a supervisor task that loops: connect, replay remembered
/// subscriptions in insertion order, wait for disconnect, sleep
/// `reconnect_interval`, repeat.
pub struct WsClient {
    inner: Arc<Inner>,
}

impl WsClient {
    pub fn new(config: WsClientConfig, handler: FrameHandler) -> Self {
        let rate_limiter = RateLimiter::one_per(config.subscribe_rate_period);
        WsClient {
            inner: Arc::new(Inner {
                config,
                handler,
                connection: Mutex::new(None),
                subscriptions: Mutex::new(Vec::new()),
                rate_limiter,
                cancellation: CancellationToken2::new(),
                disconnected: Arc::new(Notify::new()),
            }),
        }
    }

    /// Spawns the supervisor task. Returns immediately; the first
    /// connection attempt happens in the background.
    pub fn connect(&self) {
        let inner = self.inner.clone();
        spawn_future("ws supervisor", async move {
            supervise(inner).await;
        });
    }

    pub async fn disconnect(&self) {
        self.inner.cancellation.cancel();
        if let Some(connection) = self.inner.connection.lock().take() {
            connection.close().await;
        }
    }

    pub async fn send(&self, payload: String) -> Result<(), WsError> {
        let connection = self.inner.connection.lock().clone();
        match connection {
            Some(connection) => connection.send_text(payload).await.map_err(WsError::from),
            None => Err(WsError::NotConnected),
        }
    }

    /// Idempotent: a repeat subscribe to an already-remembered channel is a
    /// debug-logged no-op rather than a duplicate frame.
    pub async fn subscribe(&self, frame: String) {
        {
            let mut subscriptions = self.inner.subscriptions.lock();
            if subscriptions.contains(&frame) {
                log::debug!("already subscribed, skipping duplicate frame: {frame}");
                return;
            }
            subscriptions.push(frame.clone());
        }
        if let Err(err) = self.send_rate_limited(frame).await {
            log::warn!("subscribe frame failed to send, will be replayed on reconnect: {err}");
        }
    }

    async fn send_rate_limited(&self, frame: String) -> Result<(), WsError> {
        self.inner.rate_limiter.acquire().await;
        self.send(frame).await
    }
}

async fn supervise(inner: Arc<Inner>) {
    loop {
        if inner.cancellation.is_cancellation_requested() {
            return;
        }

        match WsConnection::open(inner.config.clone(), inner.handler.clone(), inner.disconnected.clone()).await {
            Ok(connection) => {
                *inner.connection.lock() = Some(connection);
                replay_subscriptions(&inner).await;
                inner.disconnected.notified().await;
                *inner.connection.lock() = None;
            }
            Err(err) => {
                log::warn!("ws connect failed, retrying: {err}");
            }
        }

        if inner.cancellation.is_cancellation_requested() {
            return;
        }
        inner
            .cancellation
            .sleep_or_cancelled(inner.config.reconnect_interval)
            .await;
    }
}

async fn replay_subscriptions(inner: &Arc<Inner>) {
    let frames = inner.subscriptions.lock().clone();
    for frame in frames {
        inner.rate_limiter.acquire().await;
        let connection = inner.connection.lock().clone();
        if let Some(connection) = connection {
            if let Err(err) = connection.send_text(frame).await {
                log::warn!("failed to replay subscription after reconnect: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> FrameHandler {
        Arc::new(|_bytes| {})
    }

    #[tokio::test]
    async fn subscribe_is_idempotent_in_the_remembered_set() {
        let config = WsClientConfig {
            url: Url::parse("wss://example.invalid/stream").unwrap(),
            ping_policy: PingPolicy::WhenIdle {
                idle_timeout: Duration::from_secs(30),
            },
            ping_reply_timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(1),
            app_level_ping: None,
            subscribe_rate_period: Duration::from_millis(1),
        };
        let client = WsClient::new(config, handler());

        client.inner.subscriptions.lock().push("bookl1:BTCUSDT".to_string());
        let before = client.inner.subscriptions.lock().len();
        client.subscribe("bookl1:BTCUSDT".to_string()).await;
        assert_eq!(client.inner.subscriptions.lock().len(), before);
    }
}
