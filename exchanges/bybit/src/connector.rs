//! Bybit `PublicConnector`/`PrivateConnector`. Bybit, like OKX,
//! authenticates WS connections with a one-time signed login frame rather
//! than a Binance-style listen key, so there is no `ListenKeyLifecycle`
//! impl here either. WS topic names (`orderbook.1.{symbol}`, `publicTrade`,
//! `kline.{interval}`, `order`, `position`, `wallet`) and REST call shapes
//! follow Bybit's v5 unified-trading-account API.

use std::sync::Arc;

use async_trait::async_trait;
use mmb_cache::{Cache, CacheOrderEntry};
use mmb_domain::balance::{Balance, BalanceEvent};
use mmb_domain::events::Kline;
use mmb_domain::market::{AccountType, Venue};
use mmb_domain::order::{Order, OrderSubmit};
use mmb_domain::position::{signed_amount_from_venue, Position, VenuePositionSide};
use mmb_ems::OrderSink;
use mmb_exchange::{PrivateConnector, PublicConnector, VenueCapability};
use mmb_registry::OrderRegistry;
use mmb_rest::{ErrorHandlerData, RestClient, UriBuilder};
use mmb_utils::time::now_ms;
use mmb_ws::WsClient;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::capability::BybitCapability;
use crate::endpoints;
use crate::headers::{BybitErrorHandler, BybitHeaders};

type BybitRestClient = RestClient<BybitErrorHandler, BybitHeaders>;

/// `submit.symbol`/`position.symbol` carry the normalized `"BTC/USDT"` form;
/// Bybit's wire form drops the separator, same as Binance.
fn venue_symbol(normalized: &str) -> String {
    normalized.replace('/', "").to_uppercase()
}

pub fn new_rest_client(api_key: String, secret: String, account_label: String) -> BybitRestClient {
    RestClient::new(ErrorHandlerData::new(true, account_label, BybitErrorHandler), BybitHeaders { api_key, secret })
}

/// `linear`/`spot`/`inverse`/`option`; Bybit's `category` query parameter
/// drives routing to the correct order book internally, unlike Binance's
/// distinct hostnames per market.
fn category_for(account_type: AccountType) -> &'static str {
    match account_type {
        AccountType::Spot => "spot",
        AccountType::Futures | AccountType::Margin | AccountType::PortfolioMargin | AccountType::IsolatedMargin => "linear",
        AccountType::Demo | AccountType::Aws | AccountType::Live => "linear",
    }
}

pub struct BybitPublicConnector {
    pub ws: WsClient,
    pub rest: BybitRestClient,
    pub host: String,
    pub account_type: AccountType,
}

#[async_trait]
impl PublicConnector for BybitPublicConnector {
    fn connect(&self) {
        self.ws.connect();
    }

    async fn subscribe_bookl1(&self, symbol: &str) {
        self.ws.subscribe(topic_frame(&format!("orderbook.1.{}", venue_symbol(symbol)))).await;
    }

    async fn subscribe_trades(&self, symbol: &str) {
        self.ws.subscribe(topic_frame(&format!("publicTrade.{}", venue_symbol(symbol)))).await;
    }

    async fn subscribe_klines(&self, symbol: &str, interval: &str) {
        self.ws.subscribe(topic_frame(&format!("kline.{interval}.{}", venue_symbol(symbol)))).await;
    }

    /// Walks forward in `limit`-sized batches, same shape as the Binance
    /// connector's pagination; Bybit's `/v5/market/kline` takes the same
    /// `start`/`end`/`limit` triple.
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
            let mut builder = UriBuilder::from_path(endpoints::KLINE_PATH);
            builder.add_kv("category", category_for(self.account_type));
            builder.add_kv("symbol", venue_symbol(symbol));
            builder.add_kv("interval", interval);
            builder.add_kv("start", cursor);
            builder.add_kv("end", end_time_ms);
            builder.add_kv("limit", limit);
            let uri = builder.build_uri(&self.host, true);

            let response = self.rest.get(uri, "request_klines").await?;
            let envelope: Value = serde_json::from_str(&response.content)?;
            let rows = envelope["result"]["list"]
                .as_array()
                .ok_or_else(|| anyhow::anyhow!("kline response missing result.list"))?;
            let batch_len = rows.len();
            for row in rows.iter().rev() {
                out.push(decode_kline_row(row, symbol, interval)?);
            }

            if batch_len < limit as usize {
                break;
            }
            cursor = out
                .last()
                .map(|k: &Kline| k.ts.timestamp_millis() + 1)
                .unwrap_or(end_time_ms);
        }

        Ok(out)
    }
}

fn topic_frame(topic: &str) -> String {
    json!({ "op": "subscribe", "args": [topic] }).to_string()
}

fn decode_kline_row(row: &Value, symbol: &str, interval: &str) -> anyhow::Result<Kline> {
    let get = |i: usize| -> anyhow::Result<&str> {
        row.get(i)
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("kline row missing field {i}"))
    };
    let open_time: i64 = get(0)?.parse()?;
    Ok(Kline {
        exchange: Venue::Bybit,
        symbol: symbol.to_string(),
        interval: interval.to_string(),
        open: get(1)?.parse()?,
        high: get(2)?.parse()?,
        low: get(3)?.parse()?,
        close: get(4)?.parse()?,
        volume: get(5)?.parse()?,
        start: mmb_utils::time::ms_to_date_time(open_time as u64),
        ts: mmb_utils::time::ms_to_date_time(open_time as u64),
        confirm: true,
    })
}

pub struct BybitPrivateConnector {
    pub venue: Venue,
    pub account_type: AccountType,
    pub rest: BybitRestClient,
    pub ws: WsClient,
    pub host: String,
    pub api_key: String,
    pub secret: String,
    pub cache: Arc<Cache>,
    pub registry: Arc<OrderRegistry>,
    pub capability: BybitCapability,
    pub bus: Arc<mmb_bus::MessageBus>,
}

impl BybitPrivateConnector {
    /// WS login frame: sign `"GET/realtime" + expires_ms`, send once right
    /// after the socket opens, matching Bybit's documented v5 WS auth flow.
    pub fn login_frame(&self) -> String {
        let expires = now_ms() + 10_000;
        let message = format!("GET/realtime{expires}");
        let sign = self.capability.sign_request(&self.secret, message.as_bytes());
        json!({ "op": "auth", "args": [self.api_key, expires, sign] }).to_string()
    }

    async fn do_create_order(&self, uuid: Uuid, submit: &OrderSubmit) -> anyhow::Result<()> {
        let body = json!({
            "category": category_for(self.account_type),
            "symbol": venue_symbol(&submit.symbol),
            "side": self.capability.to_venue_side(submit.side),
            "orderType": self.capability.to_venue_order_type(submit.order_type),
            "qty": submit.amount.to_string(),
            "price": submit.price.map(|p| p.to_string()),
            "orderLinkId": uuid.simple().to_string(),
            "timeInForce": self.capability.to_venue_tif(submit.time_in_force),
        })
        .to_string();

        let uri = UriBuilder::from_path(endpoints::ORDER_PATH).build_uri(&self.host, false);
        let response = self.rest.post(uri, Some(body.into_bytes().into()), "create_order").await?;

        let envelope: Value = serde_json::from_str(&response.content)?;
        if let Some(order_id) = envelope["result"]["orderId"].as_str() {
            self.registry.acknowledge(uuid, order_id.to_string());
        }
        Ok(())
    }

    async fn do_cancel_order(&self, target_uuid: Uuid) -> anyhow::Result<()> {
        let mut fields = serde_json::Map::new();
        fields.insert("category".to_string(), Value::String(category_for(self.account_type).to_string()));
        if let Some(venue_order_id) = self.registry.venue_order_id(target_uuid) {
            fields.insert("orderId".to_string(), Value::String(venue_order_id));
        } else {
            fields.insert("orderLinkId".to_string(), Value::String(target_uuid.simple().to_string()));
        }
        let body = Value::Object(fields).to_string();

        let uri = UriBuilder::from_path(endpoints::CANCEL_ORDER_PATH).build_uri(&self.host, false);
        self.rest.post(uri, Some(body.into_bytes().into()), "cancel_order").await?;
        Ok(())
    }

    /// Applies a decoded order-update frame against the registry/cache,
    /// then publishes on the new status's bus topic, same shape as the
    /// Binance/OKX connectors.
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
impl OrderSink for BybitPrivateConnector {
    async fn create_order(&self, uuid: Uuid, submit: &OrderSubmit) -> anyhow::Result<()> {
        self.do_create_order(uuid, submit).await
    }

    async fn cancel_order(&self, target_uuid: Uuid) -> anyhow::Result<()> {
        self.do_cancel_order(target_uuid).await
    }
}

#[async_trait]
impl PrivateConnector for BybitPrivateConnector {
    async fn connect(&self) -> anyhow::Result<()> {
        self.ws.connect();
        self.ws.send(self.login_frame()).await?;
        self.ws.subscribe(topic_frame("order")).await;
        self.ws.subscribe(topic_frame("position")).await;
        self.ws.subscribe(topic_frame("wallet")).await;
        Ok(())
    }

    async fn create_order(&self, uuid: Uuid, submit: &OrderSubmit) -> anyhow::Result<()> {
        self.do_create_order(uuid, submit).await
    }

    async fn cancel_order(&self, target_uuid: Uuid) -> anyhow::Result<()> {
        self.do_cancel_order(target_uuid).await
    }

    async fn init_account_balance(&self) -> anyhow::Result<()> {
        let mut builder = UriBuilder::from_path(endpoints::BALANCE_PATH);
        builder.add_kv("accountType", "UNIFIED");
        let uri = builder.build_uri(&self.host, true);
        let response = self.rest.get(uri, "init_account_balance").await?;

        let envelope: Value = serde_json::from_str(&response.content)?;
        let coins = envelope["result"]["list"][0]["coin"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("balance response missing result.list[0].coin"))?;
        let updates = coins
            .iter()
            .filter_map(|entry| {
                let asset = entry["coin"].as_str()?.to_string();
                let total: Decimal = entry["walletBalance"].as_str()?.parse().ok()?;
                let locked: Decimal = entry["locked"].as_str().and_then(|s| s.parse().ok()).unwrap_or(Decimal::ZERO);
                Some((asset, Balance { free: total - locked, locked }))
            })
            .collect::<Vec<_>>();
        self.cache.apply_balance(self.venue, self.account_type, updates);
        self.publish_balance();
        Ok(())
    }

    async fn init_positions(&self) -> anyhow::Result<()> {
        let mut builder = UriBuilder::from_path(endpoints::POSITIONS_PATH);
        builder.add_kv("category", category_for(self.account_type));
        builder.add_kv("settleCoin", "USDT");
        let uri = builder.build_uri(&self.host, true);
        let response = self.rest.get(uri, "init_positions").await?;

        let envelope: Value = serde_json::from_str(&response.content)?;
        let rows = envelope["result"]["list"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("positions response missing result.list"))?;
        for row in rows {
            let Some(symbol) = row["symbol"].as_str() else { continue };
            let Some(size) = row["size"].as_str().and_then(|s| s.parse::<Decimal>().ok()) else {
                continue;
            };
            let pos_side = match row["side"].as_str() {
                Some("Buy") => VenuePositionSide::Long,
                Some("Sell") => VenuePositionSide::Short,
                _ => VenuePositionSide::Net,
            };
            let entry_price = row["avgPrice"].as_str().and_then(|s| s.parse::<Decimal>().ok()).unwrap_or(Decimal::ZERO);
            let unrealized = row["unrealisedPnl"].as_str().and_then(|s| s.parse::<Decimal>().ok()).unwrap_or(Decimal::ZERO);
            let position = Position::new(symbol, self.venue, signed_amount_from_venue(pos_side, size), entry_price, unrealized, Decimal::ZERO);
            self.cache.apply_position(self.venue, symbol.to_string(), position);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_frame_wraps_single_topic() {
        let frame = topic_frame("order");
        assert_eq!(frame, r#"{"args":["order"],"op":"subscribe"}"#);
    }

    #[test]
    fn category_routes_spot_and_derivatives_separately() {
        assert_eq!(category_for(AccountType::Spot), "spot");
        assert_eq!(category_for(AccountType::Futures), "linear");
    }
}
