//! `InstrumentId`: the parsed `(symbol, exchange, instrument_type)` tuple.
//! A regex-driven `FromStr`, a hand-written `Display` that is the exact
//! inverse, and serde via those two.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::market::{MarketType, Venue, VenueParseError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentIdParseError(pub String);

impl Display for InstrumentIdParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "invalid instrument id: {}", self.0)
    }
}

impl std::error::Error for InstrumentIdParseError {}

impl From<VenueParseError> for InstrumentIdParseError {
    fn from(err: VenueParseError) -> Self {
        InstrumentIdParseError(err.to_string())
    }
}

static PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<symbol>[A-Za-z0-9/]+)(?:-(?P<suffix>PERP|\d{6}))?\.(?P<venue>[A-Za-z]+)$").expect("static regex"));

/// A venue-qualified instrument: `BASE/QUOTE.VENUE` (spot), `BASEQUOTE.VENUE`
/// (spot, ccxt compound form with no separating hyphen), `BASEQUOTE-PERP.VENUE`
/// (linear perpetual) or `BASEQUOTE-YYMMDD.VENUE` (inverse, dated).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstrumentId {
    /// The compound or slash-separated symbol, excluding the `-PERP`/date
    /// suffix and the venue suffix, e.g. `"BTC/USDT"` or `"BTCUSDT"`.
    pub symbol: String,
    pub venue: Venue,
    pub instrument_type: MarketType,
    /// Present only for [`MarketType::Inverse`]; the contract's settlement
    /// date, parsed from the `YYMMDD` suffix.
    pub expiry: Option<NaiveDate>,
}

impl InstrumentId {
    pub fn spot(symbol: impl Into<String>, venue: Venue) -> Self {
        InstrumentId {
            symbol: symbol.into(),
            venue,
            instrument_type: MarketType::Spot,
            expiry: None,
        }
    }

    pub fn linear(symbol: impl Into<String>, venue: Venue) -> Self {
        InstrumentId {
            symbol: symbol.into(),
            venue,
            instrument_type: MarketType::Linear,
            expiry: None,
        }
    }

    pub fn inverse(symbol: impl Into<String>, venue: Venue, expiry: NaiveDate) -> Self {
        InstrumentId {
            symbol: symbol.into(),
            venue,
            instrument_type: MarketType::Inverse,
            expiry: Some(expiry),
        }
    }

    /// `base/quote` split, only meaningful when [`Self::symbol`] contains a
    /// `/`; compound spot and derivative symbols return `None`.
    pub fn base_quote(&self) -> Option<(&str, &str)> {
        self.symbol.split_once('/')
    }
}

impl FromStr for InstrumentId {
    type Err = InstrumentIdParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let captures = PATTERN
            .captures(text)
            .ok_or_else(|| InstrumentIdParseError(format!("does not match grammar: {text}")))?;

        let symbol = captures["symbol"].to_string();
        let venue: Venue = captures["venue"].parse()?;

        match captures.name("suffix").map(|m| m.as_str()) {
            Some("PERP") => Ok(InstrumentId {
                symbol,
                venue,
                instrument_type: MarketType::Linear,
                expiry: None,
            }),
            Some(date) => {
                let expiry = NaiveDate::parse_from_str(date, "%y%m%d").map_err(|err| {
                    InstrumentIdParseError(format!("invalid expiry {date}: {err}"))
                })?;
                Ok(InstrumentId {
                    symbol,
                    venue,
                    instrument_type: MarketType::Inverse,
                    expiry: Some(expiry),
                })
            }
            None => Ok(InstrumentId {
                symbol,
                venue,
                instrument_type: MarketType::Spot,
                expiry: None,
            }),
        }
    }
}

impl Display for InstrumentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match (self.instrument_type, self.expiry) {
            (MarketType::Linear, _) => write!(f, "{}-PERP.{}", self.symbol, self.venue),
            (MarketType::Inverse, Some(expiry)) => {
                write!(f, "{}-{}.{}", self.symbol, expiry.format("%y%m%d"), self.venue)
            }
            _ => write!(f, "{}.{}", self.symbol, self.venue),
        }
    }
}

struct InstrumentIdVisitor;

impl<'de> Visitor<'de> for InstrumentIdVisitor {
    type Value = InstrumentId;

    fn expecting(&self, formatter: &mut Formatter) -> fmt::Result {
        write!(formatter, "a normalized instrument id string")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        v.parse()
            .map_err(|err| de::Error::invalid_value(de::Unexpected::Str(v), &format!("{err}").as_str()))
    }
}

impl<'de> Deserialize<'de> for InstrumentId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(InstrumentIdVisitor)
    }
}

impl Serialize for InstrumentId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("BTC/USDT.BINANCE", MarketType::Spot)]
    #[case("BTCUSDT-PERP.BINANCE", MarketType::Linear)]
    #[case("BTCUSD-241227.BINANCE", MarketType::Inverse)]
    #[case("BTCUSDT.BINANCE", MarketType::Spot)]
    fn classifies_instrument_type(#[case] input: &str, #[case] expected: MarketType) {
        let id: InstrumentId = input.parse().unwrap();
        assert_eq!(id.instrument_type, expected);
    }

    #[rstest]
    #[case("BTC/USDT.BINANCE")]
    #[case("BTCUSDT-PERP.BINANCE")]
    #[case("BTCUSD-241227.BINANCE")]
    #[case("BTCUSDT.OKX")]
    fn round_trips_through_str(#[case] input: &str) {
        let id: InstrumentId = input.parse().unwrap();
        assert_eq!(id.to_string(), input);
    }

    #[test]
    fn inverse_settle_currency_is_base() {
        let id: InstrumentId = "BTCUSD-241227.BINANCE".parse().unwrap();
        assert_eq!(id.symbol, "BTCUSD");
        assert_eq!(id.expiry.unwrap().format("%y%m%d").to_string(), "241227");
    }

    #[test]
    fn rejects_malformed_input() {
        assert!("not-an-instrument".parse::<InstrumentId>().is_err());
    }
}
