//! `Position`, plus hedge-mode/one-way reconciliation for venues that
//! report a raw `(posSide, pos)` pair instead of a signed amount.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::market::Venue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSideTag {
    Long,
    Short,
    Flat,
}

/// Venue `posSide` value carried on a position-update frame. `Net` is
/// one-way mode; `Long`/`Short` are hedge mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenuePositionSide {
    Net,
    Long,
    Short,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub exchange: Venue,
    pub signed_amount: Decimal,
    pub entry_price: Decimal,
    pub side: PositionSideTag,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
}

impl Position {
    /// Builds the `side` tag from `signed_amount`, enforcing the invariant
    /// `side == LONG ⇔ signed_amount > 0` (etc.) at the single construction
    /// site rather than letting it drift out of sync.
    pub fn new(
        symbol: impl Into<String>,
        exchange: Venue,
        signed_amount: Decimal,
        entry_price: Decimal,
        unrealized_pnl: Decimal,
        realized_pnl: Decimal,
    ) -> Self {
        Position {
            symbol: symbol.into(),
            exchange,
            signed_amount,
            entry_price,
            side: side_for(signed_amount),
            unrealized_pnl,
            realized_pnl,
        }
    }

    pub fn apply_signed_amount(&mut self, signed_amount: Decimal) {
        self.signed_amount = signed_amount;
        self.side = side_for(signed_amount);
    }
}

fn side_for(signed_amount: Decimal) -> PositionSideTag {
    use std::cmp::Ordering;
    match signed_amount.cmp(&Decimal::ZERO) {
        Ordering::Greater => PositionSideTag::Long,
        Ordering::Less => PositionSideTag::Short,
        Ordering::Equal => PositionSideTag::Flat,
    }
}

/// Recomputes a signed position amount from a venue's raw `(posSide, pos)`
/// pair. `pos` is always a non-negative magnitude under hedge mode
/// (`Long`/`Short`) and already signed under one-way mode (`Net`).
pub fn signed_amount_from_venue(pos_side: VenuePositionSide, pos: Decimal) -> Decimal {
    match pos_side {
        VenuePositionSide::Net => pos,
        VenuePositionSide::Long => pos.abs(),
        VenuePositionSide::Short => -pos.abs(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn net_mode_preserves_sign() {
        assert_eq!(
            signed_amount_from_venue(VenuePositionSide::Net, dec!(-0.5)),
            dec!(-0.5)
        );
    }

    #[test]
    fn hedge_long_is_always_positive() {
        assert_eq!(
            signed_amount_from_venue(VenuePositionSide::Long, dec!(0.5)),
            dec!(0.5)
        );
    }

    #[test]
    fn hedge_short_is_always_negative() {
        assert_eq!(
            signed_amount_from_venue(VenuePositionSide::Short, dec!(0.5)),
            dec!(-0.5)
        );
    }

    #[test]
    fn side_tag_matches_sign_invariant() {
        let pos = Position::new("BTC/USDT", Venue::Okx, dec!(-0.5), dec!(100), Decimal::ZERO, Decimal::ZERO);
        assert_eq!(pos.side, PositionSideTag::Short);
        let pos = Position::new("BTC/USDT", Venue::Okx, Decimal::ZERO, dec!(100), Decimal::ZERO, Decimal::ZERO);
        assert_eq!(pos.side, PositionSideTag::Flat);
    }
}
