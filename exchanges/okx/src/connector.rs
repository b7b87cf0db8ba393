//! OKX `PublicConnector`/`PrivateConnector`. WS channel naming (`bbo-tbt`,
//! `trades`, `candle{interval}`, `orders`, `positions`, `account`) and the
//! app-level `"ping"`/`"pong"` keepalive follow OKX's public v5 WS API. OKX
//! has no listen-key handshake (unlike Binance): private channels
//! authenticate via a signed WS login frame sent once per connection, so
//! there is no `ListenKeyLifecycle` impl here.

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

use crate::capability::OkxCapability;
use crate::endpoints;
use crate::headers::{OkxErrorHandler, OkxHeaders};

type OkxRestClient = RestClient<OkxErrorHandler, OkxHeaders>;

/// `submit.symbol`/`position.symbol` carry the normalized `"BTC/USDT"` form;
/// OKX's instrument id hyphenates instead.
fn venue_symbol(normalized: &str) -> String {
    normalized.replace('/', "-").to_uppercase()
}

pub fn new_rest_client(api_key: String, secret: String, passphrase: String, account_label: String) -> OkxRestClient {
    RestClient::new(
        ErrorHandlerData::new(true, account_label, OkxErrorHandler),
        OkxHeaders { api_key, secret, passphrase },
    )
}

pub struct OkxPublicConnector {
    pub ws: WsClient,
    pub rest: OkxRestClient,
    pub host: String,
}

#[async_trait]
impl PublicConnector for OkxPublicConnector {
    fn connect(&self) {
        self.ws.connect();
    }

    async fn subscribe_bookl1(&self, symbol: &str) {
        self.ws.subscribe(channel_frame("bbo-tbt", symbol)).await;
    }

    async fn subscribe_trades(&self, symbol: &str) {
        self.ws.subscribe(channel_frame("trades", symbol)).await;
    }

    async fn subscribe_klines(&self, symbol: &str, interval: &str) {
        self.ws.subscribe(channel_frame(&format!("candle{interval}"), symbol)).await;
    }

    /// OKX paginates candles backward from `after` (exclusive); walking the
    /// same forward window the other venues use means fetching the whole
    /// range in one oldest-to-newest pass and re-querying with `before` set
    /// to the last row's timestamp until a short batch or the cursor
    /// reaches `end_time_ms`.
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
            let mut builder = UriBuilder::from_path(endpoints::CANDLES_PATH);
            builder.add_kv("instId", venue_symbol(symbol));
            builder.add_kv("bar", interval);
            builder.add_kv("after", cursor);
            builder.add_kv("limit", limit);
            let uri = builder.build_uri(&self.host, true);

            let response = self.rest.get(uri, "request_klines").await?;
            let envelope: Value = serde_json::from_str(&response.content)?;
            let rows = envelope["data"]
                .as_array()
                .ok_or_else(|| anyhow::anyhow!("candles response missing data array"))?;
            let batch_len = rows.len();
            for row in rows.iter().rev() {
                out.push(decode_candle_row(row, symbol, interval)?);
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

fn channel_frame(channel: &str, symbol: &str) -> String {
    json!({
        "op": "subscribe",
        "args": [{ "channel": channel, "instId": venue_symbol(symbol) }]
    })
    .to_string()
}

fn decode_candle_row(row: &Value, symbol: &str, interval: &str) -> anyhow::Result<Kline> {
    let get = |i: usize| -> anyhow::Result<&str> {
        row.get(i)
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("candle row missing field {i}"))
    };
    let open_time: i64 = get(0)?.parse()?;
    Ok(Kline {
        exchange: Venue::Okx,
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

pub struct OkxPrivateConnector {
    pub venue: Venue,
    pub account_type: AccountType,
    pub rest: OkxRestClient,
    pub ws: WsClient,
    pub host: String,
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
    pub cache: Arc<Cache>,
    pub registry: Arc<OrderRegistry>,
    pub capability: OkxCapability,
    pub bus: Arc<mmb_bus::MessageBus>,
}

impl OkxPrivateConnector {
    /// WS login frame per OKX's documented scheme: sign
    /// `timestamp + "GET" + "/users/self/verify"`, base64-encode, send once
    /// right after the socket opens.
    pub fn login_frame(&self) -> String {
        let timestamp = (now_ms() / 1000).to_string();
        let message = format!("{timestamp}GET/users/self/verify");
        let sign = self.capability.sign_request(&self.secret, message.as_bytes());
        json!({
            "op": "login",
            "args": [{
                "apiKey": self.api_key,
                "passphrase": self.passphrase,
                "timestamp": timestamp,
                "sign": sign,
            }]
        })
        .to_string()
    }

    async fn do_create_order(&self, uuid: Uuid, submit: &OrderSubmit) -> anyhow::Result<()> {
        let body = json!({
            "instId": venue_symbol(&submit.symbol),
            "tdMode": "cash",
            "clOrdId": uuid.simple().to_string(),
            "side": self.capability.to_venue_side(submit.side),
            "ordType": self.capability.to_venue_order_type(submit.order_type),
            "sz": submit.amount.to_string(),
            "px": submit.price.map(|p| p.to_string()),
        })
        .to_string();

        let uri = UriBuilder::from_path(endpoints::ORDER_PATH).build_uri(&self.host, false);
        let response = self.rest.post(uri, Some(body.into_bytes().into()), "create_order").await?;

        let envelope: Value = serde_json::from_str(&response.content)?;
        if let Some(order_id) = envelope["data"][0]["ordId"].as_str() {
            self.registry.acknowledge(uuid, order_id.to_string());
        }
        Ok(())
    }

    async fn do_cancel_order(&self, target_uuid: Uuid) -> anyhow::Result<()> {
        let mut fields = serde_json::Map::new();
        if let Some(venue_order_id) = self.registry.venue_order_id(target_uuid) {
            fields.insert("ordId".to_string(), Value::String(venue_order_id));
        } else {
            fields.insert("clOrdId".to_string(), Value::String(target_uuid.simple().to_string()));
        }
        let body = Value::Object(fields).to_string();

        let uri = UriBuilder::from_path(endpoints::CANCEL_ORDER_PATH).build_uri(&self.host, false);
        self.rest.post(uri, Some(body.into_bytes().into()), "cancel_order").await?;
        Ok(())
    }

    /// Applies a decoded order-update frame against the registry/cache,
    /// then publishes on the new status's bus topic so the strategy host's
    /// `on_*_order` callbacks fire. Called from the private WS read loop
    /// once it recognizes an `orders`-channel frame.
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
impl OrderSink for OkxPrivateConnector {
    async fn create_order(&self, uuid: Uuid, submit: &OrderSubmit) -> anyhow::Result<()> {
        self.do_create_order(uuid, submit).await
    }

    async fn cancel_order(&self, target_uuid: Uuid) -> anyhow::Result<()> {
        self.do_cancel_order(target_uuid).await
    }
}

#[async_trait]
impl PrivateConnector for OkxPrivateConnector {
    async fn connect(&self) -> anyhow::Result<()> {
        self.ws.connect();
        self.ws.send(self.login_frame()).await?;
        for channel in ["orders", "positions", "account"] {
            self.ws.subscribe(json!({ "op": "subscribe", "args": [{ "channel": channel }] }).to_string()).await;
        }
        Ok(())
    }

    async fn create_order(&self, uuid: Uuid, submit: &OrderSubmit) -> anyhow::Result<()> {
        self.do_create_order(uuid, submit).await
    }

    async fn cancel_order(&self, target_uuid: Uuid) -> anyhow::Result<()> {
        self.do_cancel_order(target_uuid).await
    }

    async fn init_account_balance(&self) -> anyhow::Result<()> {
        let uri = UriBuilder::from_path(endpoints::BALANCE_PATH).build_uri(&self.host, false);
        let response = self.rest.get(uri, "init_account_balance").await?;

        let envelope: Value = serde_json::from_str(&response.content)?;
        let details = envelope["data"][0]["details"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("balance response missing data[0].details"))?;
        let updates = details
            .iter()
            .filter_map(|entry| {
                let asset = entry["ccy"].as_str()?.to_string();
                let free: Decimal = entry["availBal"].as_str()?.parse().ok()?;
                let total: Decimal = entry["cashBal"].as_str()?.parse().ok()?;
                Some((asset, Balance { free, locked: total - free }))
            })
            .collect::<Vec<_>>();
        self.cache.apply_balance(self.venue, self.account_type, updates);
        self.publish_balance();
        Ok(())
    }

    /// Reconciles hedge-mode (`posSide` = `long`/`short`, magnitude-only
    /// `pos`) and one-way mode (`posSide` = `net`, already-signed `pos`)
    /// the same way `_init_position` does in the original connector.
    async fn init_positions(&self) -> anyhow::Result<()> {
        let uri = UriBuilder::from_path(endpoints::POSITIONS_PATH).build_uri(&self.host, false);
        let response = self.rest.get(uri, "init_positions").await?;

        let envelope: Value = serde_json::from_str(&response.content)?;
        let rows = envelope["data"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("positions response missing data array"))?;
        for row in rows {
            let Some(symbol) = row["instId"].as_str() else { continue };
            let Some(pos_raw) = row["pos"].as_str().and_then(|s| s.parse::<Decimal>().ok()) else {
                continue;
            };
            let pos_side = match row["posSide"].as_str() {
                Some("long") => VenuePositionSide::Long,
                Some("short") => VenuePositionSide::Short,
                _ => VenuePositionSide::Net,
            };
            let entry_price = row["avgPx"].as_str().and_then(|s| s.parse::<Decimal>().ok()).unwrap_or(Decimal::ZERO);
            let unrealized = row["upl"].as_str().and_then(|s| s.parse::<Decimal>().ok()).unwrap_or(Decimal::ZERO);
            let realized = row["realizedPnl"].as_str().and_then(|s| s.parse::<Decimal>().ok()).unwrap_or(Decimal::ZERO);
            let position = Position::new(
                symbol,
                self.venue,
                signed_amount_from_venue(pos_side, pos_raw),
                entry_price,
                unrealized,
                realized,
            );
            self.cache.apply_position(self.venue, symbol.to_string(), position);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_frame_hyphenates_symbol() {
        let frame = channel_frame("trades", "BTC/USDT");
        assert!(frame.contains(r#""instId":"BTC-USDT""#));
        assert!(frame.contains(r#""channel":"trades""#));
    }
}
