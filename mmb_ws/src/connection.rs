//! Single-socket connection: writer behind an async mutex, a read loop and
//! a heartbeat loop each spawned once at connect time. Heartbeats support a
//! configurable ping policy and an optional application-level ping/pong
//! payload, on top of the usual protocol-level ping frame.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use mmb_utils::infrastructure::spawn_future;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsProtocolError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::{FrameHandler, PingPolicy, WsClientConfig};

type Writer = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type Reader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub struct WsConnection {
    writer: tokio::sync::Mutex<Writer>,
    last_traffic: Mutex<Instant>,
    config: WsClientConfig,
    disconnected: Arc<Notify>,
    closed: Mutex<bool>,
}

impl WsConnection {
    pub async fn open(
        config: WsClientConfig,
        handler: FrameHandler,
        disconnected: Arc<Notify>,
    ) -> Result<Arc<Self>, WsProtocolError> {
        let (stream, response) = connect_async(config.url.clone()).await?;
        log::trace!("ws connected, status {}", response.status());

        let (writer, reader) = stream.split();
        let connection = Arc::new(WsConnection {
            writer: tokio::sync::Mutex::new(writer),
            last_traffic: Mutex::new(Instant::now()),
            config: config.clone(),
            disconnected,
            closed: Mutex::new(false),
        });

        spawn_future("ws read loop", {
            let connection = connection.clone();
            async move { connection.read_loop(reader, handler).await }
        });
        spawn_future("ws heartbeat", {
            let connection = connection.clone();
            async move { connection.heartbeat_loop().await }
        });

        Ok(connection)
    }

    pub async fn send_text(&self, text: String) -> Result<(), WsProtocolError> {
        self.writer.lock().await.send(Message::Text(text)).await
    }

    pub async fn close(&self) {
        self.mark_closed();
        let _ = self.writer.lock().await.close().await;
    }

    fn mark_closed(&self) {
        let mut closed = self.closed.lock();
        if !*closed {
            *closed = true;
            self.disconnected.notify_one();
        }
    }

    async fn read_loop(self: Arc<Self>, mut reader: Reader, handler: FrameHandler) {
        while let Some(message) = reader.next().await {
            *self.last_traffic.lock() = Instant::now();
            match message {
                Ok(Message::Text(text)) => {
                    let is_app_pong = self
                        .config
                        .app_level_ping
                        .as_ref()
                        .is_some_and(|app_ping| text == app_ping.reply_payload);
                    if is_app_pong {
                        *self.last_traffic.lock() = Instant::now();
                    } else {
                        handler(text.into_bytes())
                    }
                }
                Ok(Message::Binary(bytes)) => handler(bytes),
                Ok(Message::Ping(payload)) => {
                    if let Err(err) = self.writer.lock().await.send(Message::Pong(payload)).await {
                        log::error!("failed to answer ping with pong: {err}");
                    }
                }
                Ok(Message::Pong(payload)) => {
                    if let Some(app_ping) = &self.config.app_level_ping {
                        if payload == app_ping.reply_payload.as_bytes() {
                            *self.last_traffic.lock() = Instant::now();
                        }
                    }
                }
                Ok(Message::Close(reason)) => {
                    log::info!("ws closed by venue: {reason:?}");
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    log::error!("ws read error, forcing reconnect: {err}");
                    break;
                }
            }
        }
        self.mark_closed();
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        match self.config.ping_policy {
            PingPolicy::Periodically { interval } => self.heartbeat_periodic(interval).await,
            PingPolicy::WhenIdle { idle_timeout } => self.heartbeat_when_idle(idle_timeout).await,
        }
    }

    async fn heartbeat_periodic(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if *self.closed.lock() {
                return;
            }
            let Some(sent_at) = self.send_ping().await else {
                return;
            };
            if !self.await_pong_within(sent_at, self.config.ping_reply_timeout).await {
                log::warn!("no pong observed within timeout, forcing reconnect");
                self.close().await;
                return;
            }
        }
    }

    async fn heartbeat_when_idle(&self, idle_timeout: Duration) {
        loop {
            tokio::time::sleep(idle_timeout).await;
            if *self.closed.lock() {
                return;
            }
            let idle_for = self.last_traffic.lock().elapsed();
            if idle_for < idle_timeout {
                continue;
            }
            let Some(sent_at) = self.send_ping().await else {
                return;
            };
            if !self.await_pong_within(sent_at, self.config.ping_reply_timeout).await {
                log::warn!("no pong observed within timeout, forcing reconnect");
                self.close().await;
                return;
            }
        }
    }

    /// Sends a ping frame (or the app-level ping payload) and returns the
    /// send timestamp on success, leaving `last_traffic` untouched — only
    /// genuine incoming traffic (read loop) is allowed to advance it, so
    /// [`Self::await_pong_within`] can tell "pong arrived" apart from "we
    /// just sent a ping".
    async fn send_ping(&self) -> Option<Instant> {
        let sent_at = Instant::now();
        let result = match &self.config.app_level_ping {
            Some(app_ping) => self.send_text(app_ping.request_payload.clone()).await.map(|_| ()),
            None => self.writer.lock().await.send(Message::Ping(Vec::new())).await,
        };
        if let Err(err) = result {
            log::error!("failed to send ping: {err}");
            self.close().await;
            return None;
        }
        Some(sent_at)
    }

    /// Polls until `last_traffic` advances past `sent_at`, meaning some
    /// frame (ideally the pong) arrived after this ping was sent, or
    /// `timeout` elapses with none observed.
    async fn await_pong_within(&self, sent_at: Instant, timeout: Duration) -> bool {
        wait_for_traffic_after(&self.last_traffic, sent_at, timeout).await
    }
}

/// Polls `last_traffic` until it advances past `sent_at` or `timeout`
/// elapses. Free function (rather than a `WsConnection` method) so it can
/// be unit-tested without standing up a real socket.
async fn wait_for_traffic_after(last_traffic: &Mutex<Instant>, sent_at: Instant, timeout: Duration) -> bool {
    let deadline = sent_at + timeout;
    loop {
        if *last_traffic.lock() >= sent_at {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_level_ping_reply_is_recognized_by_payload_not_opcode() {
        let app_ping = crate::AppLevelPing {
            request_payload: "ping".to_string(),
            reply_payload: "pong".to_string(),
        };
        assert!(Message::Text("pong".to_string()) == Message::Text(app_ping.reply_payload.clone()));
        assert_ne!(Message::Text("pong2".to_string()), Message::Text(app_ping.reply_payload));
    }

    #[tokio::test(start_paused = true)]
    async fn no_traffic_after_ping_times_out() {
        let last_traffic = Mutex::new(Instant::now() - Duration::from_secs(60));
        let sent_at = Instant::now();

        let waited = wait_for_traffic_after(&last_traffic, sent_at, Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!waited.await);
    }

    #[tokio::test(start_paused = true)]
    async fn traffic_observed_after_ping_is_not_a_timeout() {
        let last_traffic = Mutex::new(Instant::now() - Duration::from_secs(60));
        let sent_at = Instant::now();

        tokio::time::advance(Duration::from_secs(2)).await;
        *last_traffic.lock() = Instant::now();

        assert!(wait_for_traffic_after(&last_traffic, sent_at, Duration::from_secs(10)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_traffic_from_before_the_ping_does_not_count_as_a_pong() {
        // Regression test: `last_traffic` updated before `sent_at` (e.g. the
        // ping send itself, previously mis-recorded there) must not satisfy
        // the wait — only traffic strictly at-or-after `sent_at` does.
        let last_traffic = Mutex::new(Instant::now());
        tokio::time::advance(Duration::from_secs(1)).await;
        let sent_at = Instant::now();

        let waited = wait_for_traffic_after(&last_traffic, sent_at, Duration::from_secs(5));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!waited.await);
    }
}
