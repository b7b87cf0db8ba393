//! Venue-qualified instrument metadata: a closed three-venue enum
//! (Binance/OKX/Bybit) rather than a generic interned exchange-id table,
//! since this runtime only ever talks to those three.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Venue {
    Binance,
    Okx,
    Bybit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueParseError(pub String);

impl Display for VenueParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "invalid venue: {}", self.0)
    }
}

impl std::error::Error for VenueParseError {}

impl FromStr for Venue {
    type Err = VenueParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BINANCE" => Ok(Venue::Binance),
            "OKX" => Ok(Venue::Okx),
            "BYBIT" => Ok(Venue::Bybit),
            other => Err(VenueParseError(other.to_string())),
        }
    }
}

impl Display for Venue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Venue::Binance => "BINANCE",
            Venue::Okx => "OKX",
            Venue::Bybit => "BYBIT",
        };
        write!(f, "{s}")
    }
}

/// Account type a venue session is opened under. Each venue's EMS primary
/// account priority table ranks a subset of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    Demo,
    Aws,
    Live,
    Spot,
    Futures,
    Margin,
    PortfolioMargin,
    IsolatedMargin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    Spot,
    Linear,
    Inverse,
    Option,
}

/// Decimal precision for amount/price fields, expressed as a number of
/// significant decimal places — what `amount_to_precision` needs directly,
/// rather than a raw tick size a caller would have to derive that from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precision {
    pub amount: u32,
    pub price: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub min_cost: Option<Decimal>,
    pub max_cost: Option<Decimal>,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            min_amount: None,
            max_amount: None,
            min_price: None,
            max_price: None,
            min_cost: None,
            max_cost: None,
        }
    }
}

/// Venue-qualified instrument metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    /// Exchange-local id, e.g. `"BTCUSDT"` on Binance.
    pub exchange_symbol: String,
    /// Normalized symbol, e.g. `"BTC/USDT"` or `"BTCUSDT-PERP.BINANCE"`.
    pub symbol: String,
    pub venue: Venue,
    pub market_type: MarketType,
    pub precision: Precision,
    pub limits: Limits,
    /// Contract size for derivatives; `1` for spot.
    pub contract_size: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_round_trips_through_str() {
        for v in [Venue::Binance, Venue::Okx, Venue::Bybit] {
            let s = v.to_string();
            assert_eq!(s.parse::<Venue>().unwrap(), v);
        }
    }

    #[test]
    fn venue_parse_is_case_insensitive() {
        assert_eq!("binance".parse::<Venue>().unwrap(), Venue::Binance);
    }

    #[test]
    fn unknown_venue_is_rejected() {
        assert!("DERIBIT".parse::<Venue>().is_err());
    }
}
