//! TWAP/VWAP parent order. Shaped after [`crate::order::Order`]'s
//! mutable/aggregate split, but tracks its children instead of venue fields.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::order::Side;
use crate::DateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlgoOrderStatus {
    Running,
    Canceling,
    Finished,
    Canceled,
    Failed,
}

impl AlgoOrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AlgoOrderStatus::Finished | AlgoOrderStatus::Canceled | AlgoOrderStatus::Failed
        )
    }
}

/// Parent order for a TWAP/VWAP slice sequence. `uuid` is generated with
/// an `"ALGO-"` prefix by the EMS at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgoOrder {
    pub uuid: Uuid,
    pub symbol: String,
    pub side: Side,
    pub amount: Decimal,
    pub duration_s: u64,
    pub wait_s: u64,
    pub status: AlgoOrderStatus,
    pub children: Vec<Uuid>,
    pub filled: Decimal,
    pub cost: Decimal,
    pub average: Option<Decimal>,
    pub consecutive_failures: u32,
    pub created_at: DateTime,
}

impl AlgoOrder {
    /// Recomputes `filled`, `cost` and `average` from the children's fill
    /// state. Called on every child update.
    pub fn recompute_aggregates(&mut self, children_filled: Decimal, children_cost: Decimal) {
        self.filled = children_filled;
        self.cost = children_cost;
        self.average = if self.filled.is_zero() {
            None
        } else {
            Some(self.cost / self.filled)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn new_algo() -> AlgoOrder {
        AlgoOrder {
            uuid: Uuid::nil(),
            symbol: "BTC/USDT".into(),
            side: Side::Sell,
            amount: dec!(0.3),
            duration_s: 60,
            wait_s: 3,
            status: AlgoOrderStatus::Running,
            children: Vec::new(),
            filled: Decimal::ZERO,
            cost: Decimal::ZERO,
            average: None,
            consecutive_failures: 0,
            created_at: mmb_utils::time::ms_to_date_time(mmb_utils::time::now_ms()),
        }
    }

    #[test]
    fn average_is_none_until_any_fill() {
        let algo = new_algo();
        assert_eq!(algo.average, None);
    }

    #[test]
    fn recompute_aggregates_derives_average() {
        let mut algo = new_algo();
        algo.recompute_aggregates(dec!(0.1), dec!(1000));
        assert_eq!(algo.average, Some(dec!(10000)));
    }
}
