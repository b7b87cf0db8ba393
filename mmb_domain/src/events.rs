//! Market-data events published on the bus topics `bookl1`, `trade`,
//! `kline`. All tagged with `exchange` and `symbol`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::market::Venue;
use crate::DateTime;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookL1 {
    pub exchange: Venue,
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub bid_size: Decimal,
    pub ask_size: Decimal,
    pub ts: DateTime,
}

impl BookL1 {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub exchange: Venue,
    pub symbol: String,
    pub price: Decimal,
    pub size: Decimal,
    pub side: Option<TradeSide>,
    pub ts: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kline {
    pub exchange: Venue,
    pub symbol: String,
    /// e.g. `"1m"`, `"1h"`, `"1d"`.
    pub interval: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub start: DateTime,
    pub ts: DateTime,
    /// `true` once the interval has closed; `false` for an in-progress bar.
    pub confirm: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_book() -> BookL1 {
        BookL1 {
            exchange: Venue::Binance,
            symbol: "BTC/USDT".into(),
            bid: dec!(100),
            ask: dec!(101),
            bid_size: dec!(1),
            ask_size: dec!(1),
            ts: mmb_utils::time::ms_to_date_time(mmb_utils::time::now_ms()),
        }
    }

    #[test]
    fn mid_is_average_of_bid_and_ask() {
        let book = sample_book();
        assert_eq!(book.mid(), dec!(100.5));
    }

    #[test]
    fn spread_is_ask_minus_bid() {
        let book = sample_book();
        assert_eq!(book.spread(), dec!(1));
    }
}
