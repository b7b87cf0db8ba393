//! The normalized `Order` and its lifecycle FSM: a header/props split, with
//! its own closed `OrderStatus` state machine and transition table.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::DateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
    TakeProfit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
    Gtx,
}

/// Hedge-mode position side. `Net` applies under one-way mode, where side
/// is derived from sign rather than carried explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
    Net,
}

/// Order lifecycle states, terminal = `Filled`, `Canceled`, `Expired`,
/// `Failed`. `CancelFailed` has no legal outgoing transition either, so it
/// is treated as terminal for transition-checking purposes too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Initialized,
    Pending,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceling,
    Canceled,
    Expired,
    Failed,
    CancelFailed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Expired
                | OrderStatus::Failed
                | OrderStatus::CancelFailed
        )
    }

    /// Bus topic a transition into this status is published on by the
    /// private connector that applied it; the strategy host's `on_*_order`
    /// callbacks subscribe to exactly these. `Initialized`/`Expired` never
    /// arrive over a venue order-update frame, so they have none.
    pub fn bus_topic(self) -> Option<&'static str> {
        match self {
            OrderStatus::Pending => Some("pending"),
            OrderStatus::Accepted => Some("accepted"),
            OrderStatus::PartiallyFilled => Some("partially_filled"),
            OrderStatus::Filled => Some("filled"),
            OrderStatus::Canceling => Some("canceling"),
            OrderStatus::Canceled => Some("canceled"),
            OrderStatus::Failed => Some("failed"),
            OrderStatus::CancelFailed => Some("cancel_failed"),
            OrderStatus::Initialized | OrderStatus::Expired => None,
        }
    }

    /// Whether `self -> next` is a legal edge in the lifecycle diagram. The
    /// table is an explicit allow-list: any pair not present here is
    /// rejected and must be logged by the caller as a
    /// [`StateError`](crate::order::StateError).
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Initialized, Pending)
                | (Initialized, Failed)
                | (Pending, Accepted)
                | (Pending, PartiallyFilled)
                | (Pending, Filled)
                | (Pending, Canceling)
                | (Pending, Canceled)
                | (Pending, CancelFailed)
                | (Canceling, Canceled)
                | (Canceling, PartiallyFilled)
                | (Canceling, Filled)
                | (Accepted, PartiallyFilled)
                | (Accepted, Filled)
                | (Accepted, Canceling)
                | (Accepted, Canceled)
                | (Accepted, Expired)
                | (Accepted, CancelFailed)
                | (PartiallyFilled, PartiallyFilled)
                | (PartiallyFilled, Filled)
                | (PartiallyFilled, Canceling)
                | (PartiallyFilled, Canceled)
                | (PartiallyFilled, Expired)
                | (PartiallyFilled, CancelFailed)
        )
    }
}

/// An illegal FSM transition was attempted. The caller logs this and drops
/// the offending event; it is never propagated to the strategy.
#[derive(Debug, Clone, thiserror::Error)]
#[error("illegal order transition {from:?} -> {to:?} for order {uuid}")]
pub struct StateError {
    pub uuid: Uuid,
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// Normalized order. Mutable fields are updated only through
/// [`Order::apply_status`], which enforces the FSM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub uuid: Uuid,
    pub exchange_order_id: Option<String>,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub average: Option<Decimal>,
    pub last_filled: Decimal,
    pub last_filled_price: Option<Decimal>,
    pub fee: Decimal,
    pub fee_currency: Option<String>,
    pub cost: Decimal,
    pub cum_cost: Decimal,
    pub reduce_only: bool,
    pub position_side: PositionSide,
    pub status: OrderStatus,
    pub timestamp: DateTime,
}

impl Order {
    /// Validates `next` against the FSM and, if legal, mutates `self.status`
    /// in place. Returns the rejected transition as a [`StateError`] instead
    /// of applying it when illegal; the caller is responsible for logging
    /// and dropping the event.
    pub fn apply_status(&mut self, next: OrderStatus) -> Result<(), StateError> {
        if self.status == next && self.status.is_terminal() {
            // Duplicate terminal events are idempotent no-ops.
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(StateError {
                uuid: self.uuid,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        !self.status.is_terminal() && self.status != OrderStatus::Initialized
    }
}

/// Kind of submission placed on an EMS queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmitType {
    Create,
    Cancel,
    Twap,
    CancelTwap,
    Vwap,
    CancelVwap,
}

/// Rounding mode for `amount_to_precision`/`price_to_precision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecisionMode {
    Round,
    Ceil,
    Floor,
}

/// Strategy-authored order intent, forwarded to an EMS via `submit_order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSubmit {
    pub submit_type: SubmitType,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub reduce_only: bool,
    pub position_side: PositionSide,
    pub precision_mode: PrecisionMode,
    /// Set for `CANCEL`/`CANCEL_TWAP`/`CANCEL_VWAP` submits.
    pub target_uuid: Option<Uuid>,
    /// Set for `TWAP`/`VWAP` submits.
    pub duration_s: Option<u64>,
    pub wait_s: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn order_with_status(status: OrderStatus) -> Order {
        Order {
            uuid: Uuid::nil(),
            exchange_order_id: None,
            client_order_id: None,
            symbol: "BTC/USDT".into(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::Gtc,
            amount: Decimal::ONE,
            price: None,
            filled: Decimal::ZERO,
            remaining: Decimal::ONE,
            average: None,
            last_filled: Decimal::ZERO,
            last_filled_price: None,
            fee: Decimal::ZERO,
            fee_currency: None,
            cost: Decimal::ZERO,
            cum_cost: Decimal::ZERO,
            reduce_only: false,
            position_side: PositionSide::Net,
            status,
            timestamp: mmb_utils::time::ms_to_date_time(mmb_utils::time::now_ms()),
        }
    }

    #[rstest]
    #[case(OrderStatus::Initialized, OrderStatus::Pending, true)]
    #[case(OrderStatus::Initialized, OrderStatus::Accepted, false)]
    #[case(OrderStatus::Pending, OrderStatus::Canceled, true)]
    #[case(OrderStatus::Canceling, OrderStatus::Accepted, false)]
    #[case(OrderStatus::PartiallyFilled, OrderStatus::PartiallyFilled, true)]
    #[case(OrderStatus::Filled, OrderStatus::Pending, false)]
    fn transition_table_matches_diagram(
        #[case] from: OrderStatus,
        #[case] to: OrderStatus,
        #[case] expected: bool,
    ) {
        assert_eq!(from.can_transition_to(to), expected);
    }

    #[test]
    fn full_lifecycle_to_filled() {
        let mut order = order_with_status(OrderStatus::Initialized);
        order.apply_status(OrderStatus::Pending).unwrap();
        order.apply_status(OrderStatus::Accepted).unwrap();
        order.apply_status(OrderStatus::PartiallyFilled).unwrap();
        order.apply_status(OrderStatus::Filled).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
    }

    #[test]
    fn duplicate_terminal_event_is_noop() {
        let mut order = order_with_status(OrderStatus::Filled);
        order.apply_status(OrderStatus::Filled).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut order = order_with_status(OrderStatus::Canceled);
        let err = order.apply_status(OrderStatus::Filled).unwrap_err();
        assert_eq!(err.from, OrderStatus::Canceled);
        assert_eq!(order.status, OrderStatus::Canceled);
    }

    #[test]
    fn terminal_and_non_terminal_arrivals_both_have_topics() {
        assert_eq!(OrderStatus::PartiallyFilled.bus_topic(), Some("partially_filled"));
        assert_eq!(OrderStatus::Failed.bus_topic(), Some("failed"));
    }

    #[test]
    fn initialized_and_expired_have_no_topic() {
        assert_eq!(OrderStatus::Initialized.bus_topic(), None);
        assert_eq!(OrderStatus::Expired.bus_topic(), None);
    }
}
