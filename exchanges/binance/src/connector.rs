//! Binance `PublicConnector`/`PrivateConnector`/`ListenKeyLifecycle`. REST
//! call shapes (query construction, signing, which path per account type)
//! and the WS stream-name convention (`"{symbol_lower}@{channel}"`) follow
//! Binance's documented spot/futures REST and WS APIs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mmb_cache::{Cache, CacheOrderEntry};
use mmb_domain::balance::{Balance, BalanceEvent};
use mmb_domain::events::Kline;
use mmb_domain::market::{AccountType, Venue};
use mmb_domain::order::{Order, OrderSubmit};
use mmb_domain::position::{signed_amount_from_venue, Position, VenuePositionSide};
use mmb_ems::OrderSink;
use mmb_exchange::{ListenKeyLifecycle, PrivateConnector, PublicConnector, VenueCapability};
use mmb_registry::OrderRegistry;
use mmb_rest::{ErrorHandlerData, RestClient, UriBuilder};
use mmb_utils::time::now_ms;
use mmb_ws::WsClient;
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use crate::capability::BinanceCapability;
use crate::endpoints;
use crate::headers::{BinanceErrorHandler, BinanceHeaders};

type BinanceRestClient = RestClient<BinanceErrorHandler, BinanceHeaders>;

/// `submit.symbol`/`position.symbol` carry the normalized `"BTC/USDT"` form;
/// Binance's wire form drops the separator.
fn venue_symbol(normalized: &str) -> String {
    normalized.replace('/', "").to_uppercase()
}

pub fn new_rest_client(api_key: String, is_usd_m_futures: bool, account_label: String) -> BinanceRestClient {
    RestClient::new(
        ErrorHandlerData::new(true, account_label, BinanceErrorHandler),
        BinanceHeaders { api_key, is_usd_m_futures },
    )
}

pub struct BinancePublicConnector {
    pub ws: WsClient,
    pub rest: BinanceRestClient,
    pub host: String,
}

#[async_trait]
impl PublicConnector for BinancePublicConnector {
    fn connect(&self) {
        self.ws.connect();
    }

    async fn subscribe_bookl1(&self, symbol: &str) {
        self.ws.subscribe(format!("{}@bookTicker", venue_symbol(symbol).to_lowercase())).await;
    }

    async fn subscribe_trades(&self, symbol: &str) {
        self.ws.subscribe(format!("{}@aggTrade", venue_symbol(symbol).to_lowercase())).await;
    }

    async fn subscribe_klines(&self, symbol: &str, interval: &str) {
        self.ws
            .subscribe(format!("{}@kline_{interval}", venue_symbol(symbol).to_lowercase()))
            .await;
    }

    /// Walks forward in `limit`-sized batches until a short batch is
    /// returned or the cursor passes `end_time_ms`.
    async fn request_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_time_ms: i64,
        end_time_ms: i64,
        limit: u32,
    ) -> anyhow::Result<Vec<Kline>> {
        let mut out = Vec::new();
        let mut cursor = start_time_ms;

        while cursor < end_time_ms {
            let mut builder = UriBuilder::from_path("/api/v3/klines");
            builder.add_kv("symbol", symbol);
            builder.add_kv("interval", interval);
            builder.add_kv("startTime", cursor);
            builder.add_kv("endTime", end_time_ms);
            builder.add_kv("limit", limit);
            let uri = builder.build_uri(&self.host, true);

            let response = self.rest.get(uri, "request_klines").await?;
            let rows: Vec<Value> = serde_json::from_str(&response.content)?;
            let batch_len = rows.len();
            for row in &rows {
                out.push(decode_kline_row(row, symbol, interval)?);
            }

            if batch_len < limit as usize {
                break;
            }
            cursor = out
                .last()
                .map(|k: &Kline| k.ts)
                .map(|ts| ts.timestamp_millis() + 1)
                .unwrap_or(end_time_ms);
        }

        Ok(out)
    }
}

fn decode_kline_row(row: &Value, symbol: &str, interval: &str) -> anyhow::Result<Kline> {
    let get = |i: usize| -> anyhow::Result<&str> {
        row.get(i)
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("kline row missing field {i}"))
    };
    let open_time = row
        .get(0)
        .and_then(Value::as_i64)
        .ok_or_else(|| anyhow::anyhow!("kline row missing open time"))?;
    let close_time = row
        .get(6)
        .and_then(Value::as_i64)
        .ok_or_else(|| anyhow::anyhow!("kline row missing close time"))?;
    Ok(Kline {
        exchange: Venue::Binance,
        symbol: symbol.to_string(),
        interval: interval.to_string(),
        open: get(1)?.parse()?,
        high: get(2)?.parse()?,
        low: get(3)?.parse()?,
        close: get(4)?.parse()?,
        volume: get(5)?.parse()?,
        start: mmb_utils::time::ms_to_date_time(open_time as u64),
        ts: mmb_utils::time::ms_to_date_time(close_time as u64),
        confirm: true,
    })
}

pub struct BinancePrivateConnector {
    pub venue: Venue,
    pub account_type: AccountType,
    pub rest: BinanceRestClient,
    pub host: String,
    pub secret: String,
    pub cache: Arc<Cache>,
    pub registry: Arc<OrderRegistry>,
    pub capability: BinanceCapability,
    pub bus: Arc<mmb_bus::MessageBus>,
}

impl BinancePrivateConnector {
    fn sign(&self, builder: &mut UriBuilder) {
        builder.add_kv("timestamp", now_ms());
        let signature = self.capability.sign_request(&self.secret, builder.query());
        builder.add_kv("signature", signature);
    }

    async fn do_create_order(&self, uuid: Uuid, submit: &OrderSubmit) -> anyhow::Result<()> {
        let path = endpoints::order_path(self.account_type);
        let mut builder = UriBuilder::from_path(path);
        builder.add_kv("symbol", venue_symbol(&submit.symbol));
        builder.add_kv("side", self.capability.to_venue_side(submit.side));
        builder.add_kv("type", self.capability.to_venue_order_type(submit.order_type));
        builder.add_kv("quantity", submit.amount);
        builder.add_kv("newClientOrderId", uuid);
        if let Some(price) = submit.price {
            builder.add_kv("price", price);
            builder.add_kv("timeInForce", self.capability.to_venue_tif(submit.time_in_force));
        }
        self.sign(&mut builder);

        let (uri, query) = builder.build_uri_and_query(&self.host, false);
        let response = self.rest.post(uri, Some(query), "create_order").await?;

        let body: Value = serde_json::from_str(&response.content)?;
        if let Some(order_id) = body["orderId"].as_i64() {
            self.registry.acknowledge(uuid, order_id.to_string());
        }
        Ok(())
    }

    async fn do_cancel_order(&self, target_uuid: Uuid) -> anyhow::Result<()> {
        let path = endpoints::order_path(self.account_type);
        let mut builder = UriBuilder::from_path(path);
        if let Some(venue_order_id) = self.registry.venue_order_id(target_uuid) {
            builder.add_kv("orderId", venue_order_id);
        } else {
            builder.add_kv("origClientOrderId", target_uuid);
        }
        self.sign(&mut builder);

        let uri = builder.build_uri(&self.host, true);
        self.rest.delete(uri, "cancel_order").await?;
        Ok(())
    }

    /// Applies a decoded order-update frame against the registry/cache,
    /// then publishes on the new status's bus topic so the strategy host's
    /// `on_*_order` callbacks fire. Called from the private WS read loop.
    pub async fn apply_order_update(&self, update: mmb_exchange::DecodedOrderUpdate) {
        let uuid = self.registry.resolve_uuid(&update.venue_order_id).await;
        let Some(order_ref) = self.registry.order_ref(uuid) else {
            return;
        };
        let applied = order_ref.fn_mut(|order: &mut Order| {
            order.exchange_order_id = Some(update.venue_order_id.clone());
            order.filled = update.filled;
            order.last_filled = update.last_filled;
            order.last_filled_price = update.last_filled_price;
            order.average = update.average;
            order.cum_cost = update.cum_cost;
            order.fee = update.fee;
            order.fee_currency.clone_from(&update.fee_currency);
            order.remaining = order.amount - order.filled;
            order.apply_status(update.status)
        });
        if let Err(err) = applied {
            log::warn!("dropping illegal order transition: {err}");
            return;
        }
        self.cache.apply_order(CacheOrderEntry {
            order_ref: order_ref.clone(),
            venue: self.venue,
            account_type: self.account_type,
        });
        if let Some(topic) = update.status.bus_topic() {
            self.bus.publish(topic, order_ref.deep_clone());
        }
    }

    fn publish_balance(&self) {
        if let Some(balance) = self.cache.balance(self.venue, self.account_type) {
            self.bus.publish(
                "balance",
                BalanceEvent {
                    venue: self.venue,
                    account_type: self.account_type,
                    balance,
                },
            );
        }
    }
}

#[async_trait]
impl OrderSink for BinancePrivateConnector {
    async fn create_order(&self, uuid: Uuid, submit: &OrderSubmit) -> anyhow::Result<()> {
        self.do_create_order(uuid, submit).await
    }

    async fn cancel_order(&self, target_uuid: Uuid) -> anyhow::Result<()> {
        self.do_cancel_order(target_uuid).await
    }
}

#[async_trait]
impl PrivateConnector for BinancePrivateConnector {
    async fn connect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn create_order(&self, uuid: Uuid, submit: &OrderSubmit) -> anyhow::Result<()> {
        self.do_create_order(uuid, submit).await
    }

    async fn cancel_order(&self, target_uuid: Uuid) -> anyhow::Result<()> {
        self.do_cancel_order(target_uuid).await
    }

    async fn init_account_balance(&self) -> anyhow::Result<()> {
        let mut builder = UriBuilder::from_path("/api/v3/account");
        self.sign(&mut builder);
        let uri = builder.build_uri(&self.host, true);
        let response = self.rest.get(uri, "init_account_balance").await?;

        let body: Value = serde_json::from_str(&response.content)?;
        let updates = body["balances"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("account response missing balances array"))?
            .iter()
            .filter_map(|entry| {
                let asset = entry["asset"].as_str()?.to_string();
                let free: Decimal = entry["free"].as_str()?.parse().ok()?;
                let locked: Decimal = entry["locked"].as_str()?.parse().ok()?;
                Some((asset, Balance { free, locked }))
            })
            .collect::<Vec<_>>();
        self.cache.apply_balance(self.venue, self.account_type, updates);
        self.publish_balance();
        Ok(())
    }

    async fn init_positions(&self) -> anyhow::Result<()> {
        let mut builder = UriBuilder::from_path("/fapi/v2/positionRisk");
        self.sign(&mut builder);
        let uri = builder.build_uri(&self.host, true);
        let response = self.rest.get(uri, "init_positions").await?;

        let rows: Vec<Value> = serde_json::from_str(&response.content)?;
        for row in rows {
            let Some(symbol) = row["symbol"].as_str() else { continue };
            let Some(amount_raw) = row["positionAmt"].as_str().and_then(|s| s.parse::<Decimal>().ok()) else {
                continue;
            };
            let pos_side = match row["positionSide"].as_str() {
                Some("LONG") => VenuePositionSide::Long,
                Some("SHORT") => VenuePositionSide::Short,
                _ => VenuePositionSide::Net,
            };
            let entry_price = row["entryPrice"]
                .as_str()
                .and_then(|s| s.parse::<Decimal>().ok())
                .unwrap_or(Decimal::ZERO);
            let unrealized = row["unRealizedProfit"]
                .as_str()
                .and_then(|s| s.parse::<Decimal>().ok())
                .unwrap_or(Decimal::ZERO);
            let position = Position::new(
                symbol,
                self.venue,
                signed_amount_from_venue(pos_side, amount_raw),
                entry_price,
                unrealized,
                Decimal::ZERO,
            );
            self.cache.apply_position(self.venue, symbol.to_string(), position);
        }
        Ok(())
    }
}

#[async_trait]
impl ListenKeyLifecycle for BinancePrivateConnector {
    async fn acquire_listen_key(&self) -> anyhow::Result<String> {
        let path = endpoints::listen_key_path(self.account_type);
        let uri = UriBuilder::from_path(path).build_uri(&self.host, false);
        let response = self.rest.post(uri, None, "acquire_listen_key").await?;
        let body: Value = serde_json::from_str(&response.content)?;
        body["listenKey"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("listen key response missing listenKey field"))
    }

    async fn keepalive_listen_key(&self, listen_key: &str) -> anyhow::Result<()> {
        let path = endpoints::listen_key_path(self.account_type);
        let mut builder = UriBuilder::from_path(path);
        builder.add_kv("listenKey", listen_key);
        let uri = builder.build_uri(&self.host, true);
        self.rest.put(uri, "keepalive_listen_key").await?;
        Ok(())
    }
}

/// `/fapi/.../listenKey` every ~29 minutes, comfortably under Binance's
/// documented 60 minute expiry.
pub const LISTEN_KEY_REFRESH_INTERVAL: Duration = Duration::from_secs(29 * 60);
