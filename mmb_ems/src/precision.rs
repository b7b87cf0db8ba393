//! Snapping order amount/price to venue precision, using plain
//! decimal-place counts since that's what [`mmb_domain::market::Precision`]
//! carries.

use mmb_domain::market::Precision;
use mmb_domain::order::PrecisionMode;
use rust_decimal::{Decimal, RoundingStrategy};

pub fn amount_to_precision(amount: Decimal, precision: &Precision, mode: PrecisionMode) -> Decimal {
    round_dp(amount, precision.amount, mode)
}

pub fn price_to_precision(price: Decimal, precision: &Precision, mode: PrecisionMode) -> Decimal {
    round_dp(price, precision.price, mode)
}

fn round_dp(value: Decimal, dp: u32, mode: PrecisionMode) -> Decimal {
    let strategy = match mode {
        PrecisionMode::Round => RoundingStrategy::MidpointNearestEven,
        PrecisionMode::Ceil => RoundingStrategy::ToPositiveInfinity,
        PrecisionMode::Floor => RoundingStrategy::ToNegativeInfinity,
    };
    value.round_dp_with_strategy(dp, strategy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn precision(amount: u32, price: u32) -> Precision {
        Precision { amount, price }
    }

    #[test]
    fn round_uses_banker_rounding_at_the_midpoint() {
        let p = precision(2, 2);
        // 123.455 at 2dp is an exact midpoint; banker's rounding goes to the even neighbor.
        assert_eq!(amount_to_precision(dec!(123.455), &p, PrecisionMode::Round), dec!(123.46));
        assert_eq!(amount_to_precision(dec!(123.445), &p, PrecisionMode::Round), dec!(123.44));
    }

    #[test]
    fn ceil_always_rounds_up() {
        let p = precision(2, 2);
        assert_eq!(amount_to_precision(dec!(1.001), &p, PrecisionMode::Ceil), dec!(1.01));
    }

    #[test]
    fn floor_always_rounds_down() {
        let p = precision(2, 2);
        assert_eq!(amount_to_precision(dec!(1.009), &p, PrecisionMode::Floor), dec!(1.00));
    }

    #[test]
    fn amount_to_precision_is_idempotent() {
        let p = precision(3, 3);
        let once = amount_to_precision(dec!(0.123456), &p, PrecisionMode::Floor);
        let twice = amount_to_precision(once, &p, PrecisionMode::Floor);
        assert_eq!(once, twice);
    }
}
