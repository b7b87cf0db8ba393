//! `PublicConnector`/`PrivateConnector` capability surfaces. One instance
//! per `(venue, account_type)`. Venue crates implement these over an
//! `mmb_ws::WsClient` + `mmb_rest::RestClient` pair and a
//! `dyn VenueCapability` for wire translation.

use async_trait::async_trait;
use uuid::Uuid;

/// Public market-data connector. Subscription/decoding happens on
/// its own WS connection; historical candles are paginated synchronously.
#[async_trait]
pub trait PublicConnector: Send + Sync {
    fn connect(&self);

    async fn subscribe_bookl1(&self, symbol: &str);
    async fn subscribe_trades(&self, symbol: &str);
    async fn subscribe_klines(&self, symbol: &str, interval: &str);

    /// Paginates candles by walking forward in batches until either the
    /// venue returns a short batch or the cursor passes `end_time_ms`.
    /// The per-batch `limit` is venue-dependent.
    async fn request_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_time_ms: i64,
        end_time_ms: i64,
        limit: u32,
    ) -> anyhow::Result<Vec<mmb_domain::events::Kline>>;
}

/// Private (authenticated) connector. `connect()` drives the listen-key or
/// login handshake; everything after that is event-driven via the WS read
/// loop calling back into the cache/registry/bus, so this trait only
/// exposes the outgoing operations a strategy (via the EMS) can invoke.
#[async_trait]
pub trait PrivateConnector: Send + Sync {
    async fn connect(&self) -> anyhow::Result<()>;

    async fn create_order(&self, uuid: Uuid, submit: &mmb_domain::order::OrderSubmit) -> anyhow::Result<()>;
    async fn cancel_order(&self, target_uuid: Uuid) -> anyhow::Result<()>;

    async fn init_account_balance(&self) -> anyhow::Result<()>;
    async fn init_positions(&self) -> anyhow::Result<()>;
}

/// Shape of the listen-key keepalive loop every Binance account type needs:
/// acquire once, then refresh on a fixed cadence, reacquiring on any 4xx
/// instead of dying.
#[async_trait]
pub trait ListenKeyLifecycle: Send + Sync {
    async fn acquire_listen_key(&self) -> anyhow::Result<String>;
    async fn keepalive_listen_key(&self, listen_key: &str) -> anyhow::Result<()>;

    /// Drives `acquire` then `keepalive` every `refresh_every`, reacquiring
    /// and logging on failure rather than tearing down the connector.
    async fn run_keepalive_loop(&self, refresh_every: std::time::Duration, cancel: mmb_utils::cancellation::CancellationToken2) {
        let mut listen_key = match self.acquire_listen_key().await {
            Ok(key) => key,
            Err(err) => {
                log::error!("failed to acquire initial listen key: {err:#}");
                return;
            }
        };
        loop {
            cancel.sleep_or_cancelled(refresh_every).await;
            if cancel.is_cancellation_requested() {
                return;
            }
            if let Err(err) = self.keepalive_listen_key(&listen_key).await {
                log::warn!("listen key keepalive failed, reacquiring: {err:#}");
                match self.acquire_listen_key().await {
                    Ok(key) => listen_key = key,
                    Err(err) => {
                        log::error!("failed to reacquire listen key: {err:#}");
                    }
                }
            }
        }
    }
}
