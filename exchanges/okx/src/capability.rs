//! `VenueCapability` for OKX. Signing reuses `mmb_rest::hmac_sha256_base64`,
//! OKX's documented REST/WS signature encoding.

use mmb_domain::events::{BookL1, Kline, Trade, TradeSide};
use mmb_domain::instrument::InstrumentId;
use mmb_domain::market::Venue;
use mmb_domain::order::{OrderStatus, OrderType, Side, TimeInForce};
use mmb_exchange::{DecodeError, DecodedOrderUpdate, PublicEvent, VenueCapability};
use rust_decimal::Decimal;
use serde_json::Value;

pub struct OkxCapability;

impl VenueCapability for OkxCapability {
    /// `BTC/USDT` -> `"BTC-USDT"`; OKX hyphenates rather than concatenating.
    fn parse_symbol(&self, instrument: &InstrumentId) -> String {
        instrument.symbol.replace('/', "-").to_uppercase()
    }

    /// `base64(hmac_sha256(secret, timestamp + method + path + body))`; the
    /// `query` parameter here is that pre-built message, not a URL query
    /// string — OKX signs the request line, not just the query.
    fn sign_request(&self, secret: &str, query: &[u8]) -> String {
        mmb_rest::hmac_sha256_base64(secret, query)
    }

    fn decode_order_update(&self, payload: &[u8]) -> Result<DecodedOrderUpdate, DecodeError> {
        let envelope: Value = serde_json::from_slice(payload).map_err(|err| DecodeError::Malformed(err.to_string()))?;
        let data = envelope["data"]
            .as_array()
            .and_then(|rows| rows.first())
            .ok_or_else(|| DecodeError::Malformed("orders channel frame missing data[0]".to_string()))?;

        let status = venue_order_status(string_field(data, "state")?)?;
        let filled = decimal_field(data, "accFillSz").unwrap_or(Decimal::ZERO);
        let last_filled = decimal_field(data, "fillSz").unwrap_or(Decimal::ZERO);
        let last_filled_price = decimal_field(data, "fillPx").ok();
        let average = decimal_field(data, "avgPx").ok().filter(|a| !a.is_zero());
        let cum_cost = average.map(|a| a * filled).unwrap_or(Decimal::ZERO);
        let fee = decimal_field(data, "fee").unwrap_or(Decimal::ZERO);

        Ok(DecodedOrderUpdate {
            venue_order_id: string_field(data, "ordId")?.to_string(),
            client_order_id: data["clOrdId"].as_str().filter(|s| !s.is_empty()).map(str::to_string),
            symbol: string_field(data, "instId")?.to_string(),
            status,
            filled,
            last_filled,
            last_filled_price,
            average,
            cum_cost,
            fee,
            fee_currency: data["feeCcy"].as_str().map(str::to_string),
        })
    }

    /// Dispatches on `arg.channel`: `"bbo-tbt"`/`"books5"` carry best
    /// bid/ask, `"trades"` carries prints, `"candle*"` carries OHLCV.
    fn decode_public_frame(&self, payload: &[u8]) -> Result<Option<PublicEvent>, DecodeError> {
        let envelope: Value = serde_json::from_slice(payload).map_err(|err| DecodeError::Malformed(err.to_string()))?;
        let Some(channel) = envelope["arg"]["channel"].as_str() else {
            return Ok(None);
        };
        let symbol = envelope["arg"]["instId"].as_str().unwrap_or_default().to_string();
        let Some(row) = envelope["data"].as_array().and_then(|rows| rows.first()) else {
            return Ok(None);
        };

        if channel == "bbo-tbt" || channel == "books5" {
            return decode_bbo(row, &symbol).map(|b| Some(PublicEvent::BookL1(b)));
        }
        if channel == "trades" {
            return decode_trade_row(row, &symbol).map(|t| Some(PublicEvent::Trade(t)));
        }
        if let Some(interval) = channel.strip_prefix("candle") {
            return decode_candle_row(row, &symbol, interval).map(|k| Some(PublicEvent::Kline(k)));
        }
        Ok(None)
    }

    fn to_venue_side(&self, side: Side) -> &'static str {
        match side {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    fn from_venue_side(&self, raw: &str) -> Result<Side, DecodeError> {
        match raw {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(DecodeError::UnknownEnumValue {
                field: "side",
                value: other.to_string(),
            }),
        }
    }

    fn to_venue_order_type(&self, order_type: OrderType) -> &'static str {
        match order_type {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
            OrderType::StopLoss => "conditional",
            OrderType::TakeProfit => "conditional",
        }
    }

    fn from_venue_order_type(&self, raw: &str) -> Result<OrderType, DecodeError> {
        match raw {
            "limit" | "post_only" | "fok" | "ioc" => Ok(OrderType::Limit),
            "market" => Ok(OrderType::Market),
            "conditional" | "trigger" => Ok(OrderType::StopLoss),
            other => Err(DecodeError::UnknownEnumValue {
                field: "ordType",
                value: other.to_string(),
            }),
        }
    }

    fn to_venue_tif(&self, tif: TimeInForce) -> &'static str {
        match tif {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
            TimeInForce::Gtx => "GTC",
        }
    }

    fn from_venue_tif(&self, raw: &str) -> Result<TimeInForce, DecodeError> {
        match raw {
            "GTC" => Ok(TimeInForce::Gtc),
            "IOC" => Ok(TimeInForce::Ioc),
            "FOK" => Ok(TimeInForce::Fok),
            other => Err(DecodeError::UnknownEnumValue {
                field: "timeInForce",
                value: other.to_string(),
            }),
        }
    }
}

fn venue_order_status(raw: &str) -> Result<OrderStatus, DecodeError> {
    match raw {
        "live" => Ok(OrderStatus::Accepted),
        "partially_filled" => Ok(OrderStatus::PartiallyFilled),
        "filled" => Ok(OrderStatus::Filled),
        "canceled" => Ok(OrderStatus::Canceled),
        "mmp_canceled" => Ok(OrderStatus::Canceled),
        other => Err(DecodeError::UnknownEnumValue {
            field: "state",
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

fn decode_bbo(row: &Value, symbol: &str) -> Result<BookL1, DecodeError> {
    let best_bid = row["bids"]
        .as_array()
        .and_then(|levels| levels.first())
        .ok_or_else(|| DecodeError::Malformed("bbo frame missing bids[0]".to_string()))?;
    let best_ask = row["asks"]
        .as_array()
        .and_then(|levels| levels.first())
        .ok_or_else(|| DecodeError::Malformed("bbo frame missing asks[0]".to_string()))?;
    let (bid, bid_size) = level_price_and_size(best_bid)?;
    let (ask, ask_size) = level_price_and_size(best_ask)?;
    let ts = row["ts"].as_str().and_then(|s| s.parse::<u64>().ok()).unwrap_or_default();
    Ok(BookL1 {
        exchange: Venue::Okx,
        symbol: symbol.to_string(),
        bid,
        ask,
        bid_size,
        ask_size,
        ts: mmb_utils::time::ms_to_date_time(ts),
    })
}

fn decode_trade_row(row: &Value, symbol: &str) -> Result<Trade, DecodeError> {
    let ts = row["ts"].as_str().and_then(|s| s.parse::<u64>().ok()).unwrap_or_default();
    Ok(Trade {
        exchange: Venue::Okx,
        symbol: symbol.to_string(),
        price: decimal_field(row, "px")?,
        size: decimal_field(row, "sz")?,
        side: match row["side"].as_str() {
            Some("buy") => Some(TradeSide::Buy),
            Some("sell") => Some(TradeSide::Sell),
            _ => None,
        },
        ts: mmb_utils::time::ms_to_date_time(ts),
    })
}

fn decode_candle_row(row: &Value, symbol: &str, interval: &str) -> Result<Kline, DecodeError> {
    let array = row
        .as_array()
        .ok_or_else(|| DecodeError::Malformed("candle row is not an array".to_string()))?;
    let field = |i: usize| -> Result<&str, DecodeError> {
        array
            .get(i)
            .and_then(Value::as_str)
            .ok_or_else(|| DecodeError::Malformed(format!("candle row missing field {i}")))
    };
    let parse = |s: &str| -> Result<Decimal, DecodeError> {
        s.parse()
            .map_err(|err| DecodeError::Malformed(format!("invalid candle decimal: {err}")))
    };
    let start: u64 = field(0)?
        .parse()
        .map_err(|err| DecodeError::Malformed(format!("invalid candle timestamp: {err}")))?;
    Ok(Kline {
        exchange: Venue::Okx,
        symbol: symbol.to_string(),
        interval: interval.to_string(),
        open: parse(field(1)?)?,
        high: parse(field(2)?)?,
        low: parse(field(3)?)?,
        close: parse(field(4)?)?,
        volume: parse(field(5)?)?,
        start: mmb_utils::time::ms_to_date_time(start),
        ts: mmb_utils::time::ms_to_date_time(start),
        confirm: array.get(8).and_then(Value::as_str) == Some("1"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmb_domain::market::{MarketType, Venue};
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_symbol_hyphenates() {
        let instrument = InstrumentId {
            symbol: "BTC/USDT".to_string(),
            venue: Venue::Okx,
            instrument_type: MarketType::Spot,
            expiry: None,
        };
        assert_eq!(OkxCapability.parse_symbol(&instrument), "BTC-USDT");
    }

    #[test]
    fn decodes_orders_channel_frame() {
        let payload = br#"{
            "arg":{"channel":"orders","instType":"SPOT"},
            "data":[{
                "instId":"BTC-USDT","ordId":"312269865356374016","clOrdId":"mycl",
                "state":"partially_filled","accFillSz":"0.01","fillSz":"0.01",
                "fillPx":"50000","avgPx":"50000","fee":"-0.0001","feeCcy":"BTC"
            }]
        }"#;
        let update = OkxCapability.decode_order_update(payload).unwrap();
        assert_eq!(update.venue_order_id, "312269865356374016");
        assert_eq!(update.status, OrderStatus::PartiallyFilled);
        assert_eq!(update.cum_cost, Decimal::new(50000, 0) * Decimal::new(1, 2));
    }

    #[test]
    fn side_round_trips() {
        let cap = OkxCapability;
        assert_eq!(cap.from_venue_side(cap.to_venue_side(Side::Sell)).unwrap(), Side::Sell);
    }

    #[test]
    fn decodes_bbo_frame() {
        let payload = br#"{
            "arg":{"channel":"bbo-tbt","instId":"BTC-USDT"},
            "data":[{"asks":[["42000.1","1","0","1"]],"bids":[["41999.9","2","0","1"]],"ts":"1630048897897"}]
        }"#;
        let event = OkxCapability.decode_public_frame(payload).unwrap().unwrap();
        match event {
            mmb_exchange::PublicEvent::BookL1(book) => {
                assert_eq!(book.symbol, "BTC-USDT");
                assert_eq!(book.bid, Decimal::new(419999, 1));
            }
            other => panic!("expected BookL1, got {other:?}"),
        }
    }

    #[test]
    fn decodes_trades_frame() {
        let payload = br#"{
            "arg":{"channel":"trades","instId":"BTC-USDT"},
            "data":[{"instId":"BTC-USDT","px":"42219.9","sz":"0.12","side":"sell","ts":"1630048897897"}]
        }"#;
        let event = OkxCapability.decode_public_frame(payload).unwrap().unwrap();
        match event {
            mmb_exchange::PublicEvent::Trade(trade) => assert_eq!(trade.side, Some(TradeSide::Sell)),
            other => panic!("expected Trade, got {other:?}"),
        }
    }

    #[test]
    fn decodes_candle_frame() {
        let payload = br#"{
            "arg":{"channel":"candle1m","instId":"BTC-USDT"},
            "data":[["1630048500000","42000","42005","41998","42001","10","420000","420000","1"]]
        }"#;
        let event = OkxCapability.decode_public_frame(payload).unwrap().unwrap();
        match event {
            mmb_exchange::PublicEvent::Kline(kline) => {
                assert_eq!(kline.interval, "1m");
                assert!(kline.confirm);
            }
            other => panic!("expected Kline, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_channel_decodes_to_none() {
        let payload = br#"{"arg":{"channel":"account"},"data":[{}]}"#;
        assert!(OkxCapability.decode_public_frame(payload).unwrap().is_none());
    }
}
