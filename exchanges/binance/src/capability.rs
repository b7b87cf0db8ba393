//! `VenueCapability` for Binance. Symbol parsing, signing and side/type/TIF
//! mapping follow Binance's documented vocabulary; `decode_order_update`
//! handles both the spot `executionReport` and the futures
//! `ORDER_TRADE_UPDATE` user-data-stream schemas.

use mmb_domain::events::{BookL1, Kline, Trade, TradeSide};
use mmb_domain::instrument::InstrumentId;
use mmb_domain::market::Venue;
use mmb_domain::order::{OrderStatus, OrderType, Side, TimeInForce};
use mmb_exchange::{DecodeError, DecodedOrderUpdate, PublicEvent, VenueCapability};
use rust_decimal::Decimal;
use serde_json::Value;

pub struct BinanceCapability;

impl VenueCapability for BinanceCapability {
    fn parse_symbol(&self, instrument: &InstrumentId) -> String {
        instrument.symbol.replace('/', "").to_uppercase()
    }

    fn sign_request(&self, secret: &str, query: &[u8]) -> String {
        mmb_rest::hmac_sha256_hex(secret, query)
    }

    fn decode_order_update(&self, payload: &[u8]) -> Result<DecodedOrderUpdate, DecodeError> {
        let value: Value =
            serde_json::from_slice(payload).map_err(|err| DecodeError::Malformed(err.to_string()))?;
        match value["e"].as_str() {
            Some("executionReport") => decode_execution_report(&value),
            Some("ORDER_TRADE_UPDATE") => decode_order_trade_update(&value),
            Some(other) => Err(DecodeError::UnknownEnumValue {
                field: "e",
                value: other.to_string(),
            }),
            None => Err(DecodeError::Malformed("missing event type field \"e\"".to_string())),
        }
    }

    /// Bare (no `"e"` field) bookTicker frames are told apart from
    /// `"aggTrade"`/`"kline"` events by event type, matching the three
    /// streams this connector subscribes to.
    fn decode_public_frame(&self, payload: &[u8]) -> Result<Option<PublicEvent>, DecodeError> {
        let value: Value =
            serde_json::from_slice(payload).map_err(|err| DecodeError::Malformed(err.to_string()))?;
        match value["e"].as_str() {
            Some("aggTrade") => decode_agg_trade(&value).map(|t| Some(PublicEvent::Trade(t))),
            Some("kline") => decode_kline_event(&value).map(|k| Some(PublicEvent::Kline(k))),
            Some(_) => Ok(None),
            None if value.get("b").is_some() && value.get("a").is_some() => {
                decode_book_ticker(&value).map(|b| Some(PublicEvent::BookL1(b)))
            }
            None => Ok(None),
        }
    }

    fn to_venue_side(&self, side: Side) -> &'static str {
        match side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    fn from_venue_side(&self, raw: &str) -> Result<Side, DecodeError> {
        match raw {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(DecodeError::UnknownEnumValue {
                field: "side",
                value: other.to_string(),
            }),
        }
    }

    fn to_venue_order_type(&self, order_type: OrderType) -> &'static str {
        match order_type {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::StopLoss => "STOP_LOSS",
            OrderType::TakeProfit => "TAKE_PROFIT",
        }
    }

    fn from_venue_order_type(&self, raw: &str) -> Result<OrderType, DecodeError> {
        match raw {
            "LIMIT" | "LIMIT_MAKER" => Ok(OrderType::Limit),
            "MARKET" => Ok(OrderType::Market),
            "STOP_LOSS" | "STOP" | "STOP_MARKET" => Ok(OrderType::StopLoss),
            "TAKE_PROFIT" | "TAKE_PROFIT_MARKET" => Ok(OrderType::TakeProfit),
            other => Err(DecodeError::UnknownEnumValue {
                field: "type",
                value: other.to_string(),
            }),
        }
    }

    fn to_venue_tif(&self, tif: TimeInForce) -> &'static str {
        match tif {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
            TimeInForce::Gtx => "GTX",
        }
    }

    fn from_venue_tif(&self, raw: &str) -> Result<TimeInForce, DecodeError> {
        match raw {
            "GTC" => Ok(TimeInForce::Gtc),
            "IOC" => Ok(TimeInForce::Ioc),
            "FOK" => Ok(TimeInForce::Fok),
            "GTX" => Ok(TimeInForce::Gtx),
            other => Err(DecodeError::UnknownEnumValue {
                field: "timeInForce",
                value: other.to_string(),
            }),
        }
    }
}

fn venue_order_status(raw: &str) -> Result<OrderStatus, DecodeError> {
    match raw {
        "NEW" => Ok(OrderStatus::Accepted),
        "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
        "FILLED" => Ok(OrderStatus::Filled),
        "PENDING_CANCEL" => Ok(OrderStatus::Canceling),
        "CANCELED" => Ok(OrderStatus::Canceled),
        "EXPIRED" | "EXPIRED_IN_MATCH" => Ok(OrderStatus::Expired),
        "REJECTED" => Ok(OrderStatus::Failed),
        other => Err(DecodeError::UnknownEnumValue {
            field: "status",
            value: other.to_string(),
        }),
    }
}

fn decimal_field(value: &Value, key: &str) -> Result<Decimal, DecodeError> {
    value[key]
        .as_str()
        .ok_or_else(|| DecodeError::Malformed(format!("missing or non-string field {key:?}")))?
        .parse()
        .map_err(|err| DecodeError::Malformed(format!("invalid decimal field {key:?}: {err}")))
}

fn string_field<'a>(value: &'a Value, key: &str) -> Result<&'a str, DecodeError> {
    value[key]
        .as_str()
        .ok_or_else(|| DecodeError::Malformed(format!("missing or non-string field {key:?}")))
}

/// Spot user-data stream order update: short single-letter keys.
fn decode_execution_report(value: &Value) -> Result<DecodedOrderUpdate, DecodeError> {
    let status = venue_order_status(string_field(value, "X")?)?;
    let last_filled = decimal_field(value, "l")?;
    let last_filled_price = decimal_field(value, "L").ok();
    let fee = decimal_field(value, "n").unwrap_or(Decimal::ZERO);
    let filled = decimal_field(value, "z")?;
    let cum_cost = decimal_field(value, "Z").unwrap_or(Decimal::ZERO);
    Ok(DecodedOrderUpdate {
        venue_order_id: value["i"].as_i64().map(|id| id.to_string()).unwrap_or_default(),
        client_order_id: value["c"].as_str().map(str::to_string),
        symbol: string_field(value, "s")?.to_string(),
        status,
        filled,
        last_filled,
        last_filled_price,
        average: if filled.is_zero() { None } else { Some(cum_cost / filled) },
        cum_cost,
        fee,
        fee_currency: value["N"].as_str().map(str::to_string),
    })
}

/// Futures user-data stream order update: nested under an `"o"` object.
fn decode_order_trade_update(value: &Value) -> Result<DecodedOrderUpdate, DecodeError> {
    let order = &value["o"];
    if order.is_null() {
        return Err(DecodeError::Malformed("ORDER_TRADE_UPDATE missing \"o\" object".to_string()));
    }
    let status = venue_order_status(string_field(order, "X")?)?;
    let last_filled = decimal_field(order, "l")?;
    let last_filled_price = decimal_field(order, "L").ok();
    let fee = decimal_field(order, "n").unwrap_or(Decimal::ZERO);
    let filled = decimal_field(order, "z")?;
    let average = decimal_field(order, "ap").ok().filter(|a| !a.is_zero());
    let cum_cost = average.map(|a| a * filled).unwrap_or(Decimal::ZERO);
    Ok(DecodedOrderUpdate {
        venue_order_id: order["i"].as_i64().map(|id| id.to_string()).unwrap_or_default(),
        client_order_id: order["c"].as_str().map(str::to_string),
        symbol: string_field(order, "s")?.to_string(),
        status,
        filled,
        last_filled,
        last_filled_price,
        average,
        cum_cost,
        fee,
        fee_currency: order["N"].as_str().map(str::to_string),
    })
}

fn decode_book_ticker(value: &Value) -> Result<BookL1, DecodeError> {
    Ok(BookL1 {
        exchange: Venue::Binance,
        symbol: string_field(value, "s")?.to_string(),
        bid: decimal_field(value, "b")?,
        ask: decimal_field(value, "a")?,
        bid_size: decimal_field(value, "B")?,
        ask_size: decimal_field(value, "A")?,
        ts: mmb_utils::time::ms_to_date_time(mmb_utils::time::now_ms()),
    })
}

fn decode_agg_trade(value: &Value) -> Result<Trade, DecodeError> {
    let trade_time = value["T"].as_i64().unwrap_or_default();
    let is_buyer_maker = value["m"].as_bool().unwrap_or(false);
    Ok(Trade {
        exchange: Venue::Binance,
        symbol: string_field(value, "s")?.to_string(),
        price: decimal_field(value, "p")?,
        size: decimal_field(value, "q")?,
        side: Some(if is_buyer_maker { TradeSide::Sell } else { TradeSide::Buy }),
        ts: mmb_utils::time::ms_to_date_time(trade_time as u64),
    })
}

fn decode_kline_event(value: &Value) -> Result<Kline, DecodeError> {
    let candle = &value["k"];
    if candle.is_null() {
        return Err(DecodeError::Malformed("kline event missing \"k\" object".to_string()));
    }
    let start = candle["t"].as_i64().unwrap_or_default();
    let close_time = candle["T"].as_i64().unwrap_or_default();
    Ok(Kline {
        exchange: Venue::Binance,
        symbol: string_field(candle, "s")?.to_string(),
        interval: string_field(candle, "i")?.to_string(),
        open: decimal_field(candle, "o")?,
        high: decimal_field(candle, "h")?,
        low: decimal_field(candle, "l")?,
        close: decimal_field(candle, "c")?,
        volume: decimal_field(candle, "v")?,
        start: mmb_utils::time::ms_to_date_time(start as u64),
        ts: mmb_utils::time::ms_to_date_time(close_time as u64),
        confirm: candle["x"].as_bool().unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmb_domain::market::{MarketType, Venue};
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_symbol_strips_slash() {
        let instrument = InstrumentId {
            symbol: "BTC/USDT".to_string(),
            venue: Venue::Binance,
            instrument_type: MarketType::Spot,
            expiry: None,
        };
        assert_eq!(BinanceCapability.parse_symbol(&instrument), "BTCUSDT");
    }

    #[test]
    fn decodes_spot_execution_report() {
        let payload = br#"{
            "e":"executionReport","s":"BTCUSDT","c":"my-id","i":123456,
            "X":"PARTIALLY_FILLED","l":"0.01","L":"50000.0","z":"0.02","Z":"1000.0",
            "n":"0.00001","N":"BTC"
        }"#;
        let update = BinanceCapability.decode_order_update(payload).unwrap();
        assert_eq!(update.venue_order_id, "123456");
        assert_eq!(update.status, OrderStatus::PartiallyFilled);
        assert_eq!(update.filled, Decimal::new(2, 2));
        assert_eq!(update.average, Some(Decimal::new(50000, 0)));
    }

    #[test]
    fn decodes_futures_order_trade_update() {
        let payload = br#"{
            "e":"ORDER_TRADE_UPDATE",
            "o":{"s":"BTCUSDT","c":"my-id","i":987,"X":"FILLED","l":"1","L":"100","z":"1","ap":"100","n":"0.1","N":"USDT"}
        }"#;
        let update = BinanceCapability.decode_order_update(payload).unwrap();
        assert_eq!(update.venue_order_id, "987");
        assert_eq!(update.status, OrderStatus::Filled);
        assert_eq!(update.cum_cost, Decimal::new(100, 0));
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let payload = br#"{"e":"aggTrade"}"#;
        let err = BinanceCapability.decode_order_update(payload).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownEnumValue { field: "e", .. }));
    }

    #[test]
    fn side_and_tif_round_trip() {
        let cap = BinanceCapability;
        assert_eq!(cap.from_venue_side(cap.to_venue_side(Side::Buy)).unwrap(), Side::Buy);
        assert_eq!(cap.from_venue_tif(cap.to_venue_tif(TimeInForce::Ioc)).unwrap(), TimeInForce::Ioc);
    }

    #[test]
    fn decodes_book_ticker_frame() {
        let payload = br#"{"u":1,"s":"BTCUSDT","b":"50000.0","B":"1.5","a":"50001.0","A":"2.0"}"#;
        let event = BinanceCapability.decode_public_frame(payload).unwrap().unwrap();
        match event {
            mmb_exchange::PublicEvent::BookL1(book) => {
                assert_eq!(book.symbol, "BTCUSDT");
                assert_eq!(book.bid, Decimal::new(500000, 1));
            }
            other => panic!("expected BookL1, got {other:?}"),
        }
    }

    #[test]
    fn decodes_agg_trade_frame() {
        let payload = br#"{"e":"aggTrade","s":"BTCUSDT","p":"50000.0","q":"0.1","T":1700000000000,"m":true}"#;
        let event = BinanceCapability.decode_public_frame(payload).unwrap().unwrap();
        match event {
            mmb_exchange::PublicEvent::Trade(trade) => {
                assert_eq!(trade.side, Some(mmb_domain::events::TradeSide::Sell));
            }
            other => panic!("expected Trade, got {other:?}"),
        }
    }

    #[test]
    fn decodes_kline_frame() {
        let payload = br#"{"e":"kline","s":"BTCUSDT","k":{"t":1,"T":2,"s":"BTCUSDT","i":"1m","o":"1","h":"2","l":"0.5","c":"1.5","v":"10","x":true}}"#;
        let event = BinanceCapability.decode_public_frame(payload).unwrap().unwrap();
        match event {
            mmb_exchange::PublicEvent::Kline(kline) => {
                assert!(kline.confirm);
                assert_eq!(kline.interval, "1m");
            }
            other => panic!("expected Kline, got {other:?}"),
        }
    }

    #[test]
    fn non_market_data_event_types_decode_to_none() {
        let payload = br#"{"e":"executionReport"}"#;
        assert!(BinanceCapability.decode_public_frame(payload).unwrap().is_none());
    }
}
