//! `VenueCapability` for Bybit. Order field names
//! (`orderId`/`orderLinkId`/`orderStatus`/`cumExecQty`/`avgPrice`/
//! `cumExecFee`) and the `orderStatus` vocabulary follow Bybit's documented
//! v5 private WS order schema.

use mmb_domain::events::{BookL1, Kline, Trade, TradeSide};
use mmb_domain::instrument::InstrumentId;
use mmb_domain::market::Venue;
use mmb_domain::order::{OrderStatus, OrderType, Side, TimeInForce};
use mmb_exchange::{DecodeError, DecodedOrderUpdate, PublicEvent, VenueCapability};
use rust_decimal::Decimal;
use serde_json::Value;

pub struct BybitCapability;

impl VenueCapability for BybitCapability {
    /// `BTC/USDT` -> `"BTCUSDT"`; Bybit, like Binance, concatenates.
    fn parse_symbol(&self, instrument: &InstrumentId) -> String {
        instrument.symbol.replace('/', "").to_uppercase()
    }

    fn sign_request(&self, secret: &str, query: &[u8]) -> String {
        mmb_rest::hmac_sha256_hex(secret, query)
    }

    fn decode_order_update(&self, payload: &[u8]) -> Result<DecodedOrderUpdate, DecodeError> {
        let envelope: Value = serde_json::from_slice(payload).map_err(|err| DecodeError::Malformed(err.to_string()))?;
        let data = envelope["data"]
            .as_array()
            .and_then(|rows| rows.first())
            .ok_or_else(|| DecodeError::Malformed("order topic frame missing data[0]".to_string()))?;

        let status = venue_order_status(string_field(data, "orderStatus")?)?;
        let filled = decimal_field(data, "cumExecQty").unwrap_or(Decimal::ZERO);
        let average = decimal_field(data, "avgPrice").ok().filter(|a| !a.is_zero());
        let cum_cost = decimal_field(data, "cumExecValue").unwrap_or(Decimal::ZERO);
        let fee = decimal_field(data, "cumExecFee").unwrap_or(Decimal::ZERO);

        Ok(DecodedOrderUpdate {
            venue_order_id: string_field(data, "orderId")?.to_string(),
            client_order_id: data["orderLinkId"].as_str().filter(|s| !s.is_empty()).map(str::to_string),
            symbol: string_field(data, "symbol")?.to_string(),
            status,
            filled,
            last_filled: Decimal::ZERO,
            last_filled_price: None,
            average,
            cum_cost,
            fee,
            fee_currency: None,
        })
    }

    /// Dispatches on the `"."`-separated `topic` prefix: `orderbook.*`
    /// carries a depth snapshot/delta (best level only is used),
    /// `publicTrade.*` carries prints, `kline.*` carries OHLCV.
    fn decode_public_frame(&self, payload: &[u8]) -> Result<Option<PublicEvent>, DecodeError> {
        let envelope: Value = serde_json::from_slice(payload).map_err(|err| DecodeError::Malformed(err.to_string()))?;
        let Some(topic) = envelope["topic"].as_str() else {
            return Ok(None);
        };

        if topic.starts_with("orderbook.") {
            return decode_orderbook(&envelope["data"]).map(|b| Some(PublicEvent::BookL1(b)));
        }
        if topic.starts_with("publicTrade.") {
            let Some(row) = envelope["data"].as_array().and_then(|rows| rows.first()) else {
                return Ok(None);
            };
            return decode_public_trade(row).map(|t| Some(PublicEvent::Trade(t)));
        }
        if topic.starts_with("kline.") {
            let Some(row) = envelope["data"].as_array().and_then(|rows| rows.first()) else {
                return Ok(None);
            };
            let symbol = topic.rsplit('.').next().unwrap_or_default();
            return decode_kline_row(row, symbol).map(|k| Some(PublicEvent::Kline(k)));
        }
        Ok(None)
    }

    fn to_venue_side(&self, side: Side) -> &'static str {
        match side {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }

    fn from_venue_side(&self, raw: &str) -> Result<Side, DecodeError> {
        match raw {
            "Buy" => Ok(Side::Buy),
            "Sell" => Ok(Side::Sell),
            other => Err(DecodeError::UnknownEnumValue {
                field: "side",
                value: other.to_string(),
            }),
        }
    }

    fn to_venue_order_type(&self, order_type: OrderType) -> &'static str {
        match order_type {
            OrderType::Limit => "Limit",
            OrderType::Market => "Market",
            OrderType::StopLoss => "Market",
            OrderType::TakeProfit => "Market",
        }
    }

    fn from_venue_order_type(&self, raw: &str) -> Result<OrderType, DecodeError> {
        match raw {
            "Limit" => Ok(OrderType::Limit),
            "Market" => Ok(OrderType::Market),
            other => Err(DecodeError::UnknownEnumValue {
                field: "orderType",
                value: other.to_string(),
            }),
        }
    }

    fn to_venue_tif(&self, tif: TimeInForce) -> &'static str {
        match tif {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
            TimeInForce::Gtx => "PostOnly",
        }
    }

    fn from_venue_tif(&self, raw: &str) -> Result<TimeInForce, DecodeError> {
        match raw {
            "GTC" => Ok(TimeInForce::Gtc),
            "IOC" => Ok(TimeInForce::Ioc),
            "FOK" => Ok(TimeInForce::Fok),
            "PostOnly" => Ok(TimeInForce::Gtx),
            other => Err(DecodeError::UnknownEnumValue {
                field: "timeInForce",
                value: other.to_string(),
            }),
        }
    }
}

fn venue_order_status(raw: &str) -> Result<OrderStatus, DecodeError> {
    match raw {
        "New" | "Untriggered" => Ok(OrderStatus::Accepted),
        "PartiallyFilled" => Ok(OrderStatus::PartiallyFilled),
        "Filled" => Ok(OrderStatus::Filled),
        "Cancelled" | "PartiallyFilledCanceled" | "Deactivated" => Ok(OrderStatus::Canceled),
        "Rejected" => Ok(OrderStatus::Failed),
        other => Err(DecodeError::UnknownEnumValue {
            field: "orderStatus",
            value: other.to_string(),
        }),
    }
}

fn decimal_field(value: &Value, key: &str) -> Result<Decimal, DecodeError> {
    value[key]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DecodeError::Malformed(format!("missing or empty field {key:?}")))?
        .parse()
        .map_err(|err| DecodeError::Malformed(format!("invalid decimal field {key:?}: {err}")))
}

fn string_field<'a>(value: &'a Value, key: &str) -> Result<&'a str, DecodeError> {
    value[key]
        .as_str()
        .ok_or_else(|| DecodeError::Malformed(format!("missing or non-string field {key:?}")))
}

fn level_price_and_size(level: &Value) -> Result<(Decimal, Decimal), DecodeError> {
    let price: Decimal = level[0]
        .as_str()
        .ok_or_else(|| DecodeError::Malformed("missing price in book level".to_string()))?
        .parse()
        .map_err(|err| DecodeError::Malformed(format!("invalid book level price: {err}")))?;
    let size: Decimal = level[1]
        .as_str()
        .ok_or_else(|| DecodeError::Malformed("missing size in book level".to_string()))?
        .parse()
        .map_err(|err| DecodeError::Malformed(format!("invalid book level size: {err}")))?;
    Ok((price, size))
}

fn decode_orderbook(data: &Value) -> Result<BookL1, DecodeError> {
    let best_bid = data["b"]
        .as_array()
        .and_then(|levels| levels.first())
        .ok_or_else(|| DecodeError::Malformed("orderbook frame missing b[0]".to_string()))?;
    let best_ask = data["a"]
        .as_array()
        .and_then(|levels| levels.first())
        .ok_or_else(|| DecodeError::Malformed("orderbook frame missing a[0]".to_string()))?;
    let (bid, bid_size) = level_price_and_size(best_bid)?;
    let (ask, ask_size) = level_price_and_size(best_ask)?;
    let ts = data["ts"].as_i64().unwrap_or_default();
    Ok(BookL1 {
        exchange: Venue::Bybit,
        symbol: string_field(data, "s")?.to_string(),
        bid,
        ask,
        bid_size,
        ask_size,
        ts: mmb_utils::time::ms_to_date_time(ts as u64),
    })
}

fn decode_public_trade(row: &Value) -> Result<Trade, DecodeError> {
    let ts = row["T"].as_i64().unwrap_or_default();
    Ok(Trade {
        exchange: Venue::Bybit,
        symbol: string_field(row, "s")?.to_string(),
        price: decimal_field(row, "p")?,
        size: decimal_field(row, "v")?,
        side: match row["S"].as_str() {
            Some("Buy") => Some(TradeSide::Buy),
            Some("Sell") => Some(TradeSide::Sell),
            _ => None,
        },
        ts: mmb_utils::time::ms_to_date_time(ts as u64),
    })
}

fn decode_kline_row(row: &Value, symbol: &str) -> Result<Kline, DecodeError> {
    let start = row["start"].as_i64().unwrap_or_default();
    let end = row["end"].as_i64().unwrap_or_default();
    Ok(Kline {
        exchange: Venue::Bybit,
        symbol: symbol.to_string(),
        interval: string_field(row, "interval")?.to_string(),
        open: decimal_field(row, "open")?,
        high: decimal_field(row, "high")?,
        low: decimal_field(row, "low")?,
        close: decimal_field(row, "close")?,
        volume: decimal_field(row, "volume")?,
        start: mmb_utils::time::ms_to_date_time(start as u64),
        ts: mmb_utils::time::ms_to_date_time(end as u64),
        confirm: row["confirm"].as_bool().unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmb_domain::market::{MarketType, Venue};
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_symbol_concatenates() {
        let instrument = InstrumentId {
            symbol: "BTC/USDT".to_string(),
            venue: Venue::Bybit,
            instrument_type: MarketType::Linear,
            expiry: None,
        };
        assert_eq!(BybitCapability.parse_symbol(&instrument), "BTCUSDT");
    }

    #[test]
    fn decodes_order_topic_frame() {
        let payload = br#"{
            "topic":"order",
            "data":[{
                "symbol":"BTCUSDT","orderId":"1321003749386327552","orderLinkId":"mycl",
                "orderStatus":"PartiallyFilled","cumExecQty":"0.01","cumExecValue":"500",
                "avgPrice":"50000","cumExecFee":"0.03"
            }]
        }"#;
        let update = BybitCapability.decode_order_update(payload).unwrap();
        assert_eq!(update.venue_order_id, "1321003749386327552");
        assert_eq!(update.status, OrderStatus::PartiallyFilled);
    }

    #[test]
    fn unknown_order_status_is_rejected() {
        let payload = br#"{"topic":"order","data":[{"symbol":"BTCUSDT","orderId":"1","orderStatus":"Weird","cumExecQty":"0"}]}"#;
        assert!(BybitCapability.decode_order_update(payload).is_err());
    }

    #[test]
    fn decodes_orderbook_frame() {
        let payload = br#"{
            "topic":"orderbook.1.BTCUSDT",
            "data":{"s":"BTCUSDT","b":[["41999.9","2"]],"a":[["42000.1","1"]],"ts":1630048897897}
        }"#;
        let event = BybitCapability.decode_public_frame(payload).unwrap().unwrap();
        match event {
            mmb_exchange::PublicEvent::BookL1(book) => assert_eq!(book.symbol, "BTCUSDT"),
            other => panic!("expected BookL1, got {other:?}"),
        }
    }

    #[test]
    fn decodes_public_trade_frame() {
        let payload = br#"{"topic":"publicTrade.BTCUSDT","data":[{"T":1630048897897,"s":"BTCUSDT","S":"Buy","v":"0.1","p":"42000"}]}"#;
        let event = BybitCapability.decode_public_frame(payload).unwrap().unwrap();
        match event {
            mmb_exchange::PublicEvent::Trade(trade) => assert_eq!(trade.side, Some(TradeSide::Buy)),
            other => panic!("expected Trade, got {other:?}"),
        }
    }

    #[test]
    fn decodes_kline_frame() {
        let payload = br#"{
            "topic":"kline.1.BTCUSDT",
            "data":[{"start":1,"end":2,"interval":"1","open":"1","high":"2","low":"0.5","close":"1.5","volume":"10","confirm":true}]
        }"#;
        let event = BybitCapability.decode_public_frame(payload).unwrap().unwrap();
        match event {
            mmb_exchange::PublicEvent::Kline(kline) => {
                assert_eq!(kline.symbol, "BTCUSDT");
                assert!(kline.confirm);
            }
            other => panic!("expected Kline, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_topic_decodes_to_none() {
        let payload = br#"{"topic":"wallet","data":[{}]}"#;
        assert!(BybitCapability.decode_public_frame(payload).unwrap().is_none());
    }
}
