//! Wires a [`Strategy`] into the bus and exposes the submission helpers it
//! calls into. Built on the same idiom `mmb_bus`/`mmb_ems` already
//! establish: `Arc`-shared state, `DashMap` indices, one `Ems` per venue.

use std::sync::Arc;

use dashmap::DashMap;
use mmb_bus::MessageBus;
use mmb_domain::balance::BalanceEvent;
use mmb_domain::events::{BookL1, Kline, Trade};
use mmb_domain::market::{AccountType, Venue};
use mmb_domain::order::{Order, OrderSubmit, OrderType, PositionSide, PrecisionMode, Side, SubmitType, TimeInForce};
use mmb_ems::Ems;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::strategy::Strategy;

/// Bus topics a strategy's callbacks are wired to, in the order
/// `StrategyHost::wire` subscribes them. Kept as a single list so the set
/// a test exercises and the set `wire` actually subscribes can't drift.
pub const ORDER_TOPICS: [&str; 8] = [
    "pending",
    "accepted",
    "partially_filled",
    "filled",
    "canceling",
    "canceled",
    "failed",
    "cancel_failed",
];

/// Owns the bus subscription wiring for one [`Strategy`] plus the
/// `Ems` handle(s) its submission helpers forward to. One host per running
/// strategy; multiple venues share the same host by registering one `Ems`
/// each.
pub struct StrategyHost {
    bus: Arc<MessageBus>,
    ems_by_venue: DashMap<Venue, Arc<Ems>>,
}

impl StrategyHost {
    pub fn new(bus: Arc<MessageBus>) -> Arc<Self> {
        Arc::new(StrategyHost {
            bus,
            ems_by_venue: DashMap::new(),
        })
    }

    pub fn register_ems(&self, venue: Venue, ems: Arc<Ems>) {
        self.ems_by_venue.insert(venue, ems);
    }

    fn ems(&self, venue: Venue) -> Option<Arc<Ems>> {
        self.ems_by_venue.get(&venue).map(|entry| entry.clone())
    }

    /// Subscribes every callback in `strategy` to its bus topic. Each
    /// closure clones the `Arc<dyn Strategy>` and calls straight through —
    /// the bus's own re-entrancy guard is what keeps this safe even if a
    /// callback itself publishes (e.g. an order fill that triggers a fresh
    /// submission, whose EMS events publish back onto the bus).
    pub fn wire(&self, strategy: Arc<dyn Strategy>) {
        let s = strategy.clone();
        self.bus.subscribe::<BookL1, _>("bookl1", move |event| s.on_bookl1(event));
        let s = strategy.clone();
        self.bus.subscribe::<Trade, _>("trade", move |event| s.on_trade(event));
        let s = strategy.clone();
        self.bus.subscribe::<Kline, _>("kline", move |event| s.on_kline(event));

        let s = strategy.clone();
        self.bus.subscribe::<Order, _>("pending", move |order| s.on_pending_order(order));
        let s = strategy.clone();
        self.bus.subscribe::<Order, _>("accepted", move |order| s.on_accepted_order(order));
        let s = strategy.clone();
        self.bus
            .subscribe::<Order, _>("partially_filled", move |order| s.on_partially_filled_order(order));
        let s = strategy.clone();
        self.bus.subscribe::<Order, _>("filled", move |order| s.on_filled_order(order));
        let s = strategy.clone();
        self.bus.subscribe::<Order, _>("canceling", move |order| s.on_canceling_order(order));
        let s = strategy.clone();
        self.bus.subscribe::<Order, _>("canceled", move |order| s.on_canceled_order(order));
        let s = strategy.clone();
        self.bus.subscribe::<Order, _>("failed", move |order| s.on_failed_order(order));
        let s = strategy.clone();
        self.bus
            .subscribe::<Order, _>("cancel_failed", move |order| s.on_cancel_failed_order(order));

        let s = strategy;
        self.bus.subscribe::<BalanceEvent, _>("balance", move |event| s.on_balance(event));
    }

    /// Forwards a strategy-authored `OrderSubmit` straight to `venue`'s EMS.
    pub fn submit_order(&self, venue: Venue, submit: OrderSubmit, account_type: Option<AccountType>) -> Option<Uuid> {
        let ems = self.ems(venue)?;
        ems.submit_order(submit, account_type)
    }

    pub fn cancel_order(&self, venue: Venue, target_uuid: Uuid, account_type: Option<AccountType>) -> Option<Uuid> {
        self.submit_order(
            venue,
            OrderSubmit {
                submit_type: SubmitType::Cancel,
                symbol: String::new(),
                side: Side::Buy,
                order_type: OrderType::Market,
                time_in_force: TimeInForce::Gtc,
                amount: Decimal::ZERO,
                price: None,
                reduce_only: false,
                position_side: PositionSide::Net,
                precision_mode: PrecisionMode::Round,
                target_uuid: Some(target_uuid),
                duration_s: None,
                wait_s: None,
            },
            account_type,
        )
    }

    /// Builds and submits a `TWAP` order over `duration_s`, slicing every
    /// `wait_s`.
    #[allow(clippy::too_many_arguments)]
    pub fn create_twap(
        &self,
        venue: Venue,
        symbol: impl Into<String>,
        side: Side,
        amount: Decimal,
        duration_s: u64,
        wait_s: u64,
        account_type: Option<AccountType>,
    ) -> Option<Uuid> {
        self.submit_order(
            venue,
            OrderSubmit {
                submit_type: SubmitType::Twap,
                symbol: symbol.into(),
                side,
                order_type: OrderType::Market,
                time_in_force: TimeInForce::Gtc,
                amount,
                price: None,
                reduce_only: false,
                position_side: PositionSide::Net,
                precision_mode: PrecisionMode::Round,
                target_uuid: None,
                duration_s: Some(duration_s),
                wait_s: Some(wait_s),
            },
            account_type,
        )
    }

    pub fn cancel_twap(&self, venue: Venue, target_uuid: Uuid, account_type: Option<AccountType>) -> Option<Uuid> {
        self.submit_order(
            venue,
            OrderSubmit {
                submit_type: SubmitType::CancelTwap,
                symbol: String::new(),
                side: Side::Buy,
                order_type: OrderType::Market,
                time_in_force: TimeInForce::Gtc,
                amount: Decimal::ZERO,
                price: None,
                reduce_only: false,
                position_side: PositionSide::Net,
                precision_mode: PrecisionMode::Round,
                target_uuid: Some(target_uuid),
                duration_s: None,
                wait_s: None,
            },
            account_type,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        filled: AtomicUsize,
        last_symbol: Mutex<Option<String>>,
    }

    impl Strategy for Recorder {
        fn on_filled_order(&self, order: &Order) {
            self.filled.fetch_add(1, Ordering::SeqCst);
            *self.last_symbol.lock().unwrap() = Some(order.symbol.clone());
        }
    }

    fn sample_order(symbol: &str) -> Order {
        Order {
            uuid: Uuid::nil(),
            exchange_order_id: None,
            client_order_id: None,
            symbol: symbol.to_string(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::Gtc,
            amount: Decimal::ONE,
            price: None,
            filled: Decimal::ONE,
            remaining: Decimal::ZERO,
            average: None,
            last_filled: Decimal::ONE,
            last_filled_price: None,
            fee: Decimal::ZERO,
            fee_currency: None,
            cost: Decimal::ZERO,
            cum_cost: Decimal::ZERO,
            reduce_only: false,
            position_side: PositionSide::Net,
            status: mmb_domain::order::OrderStatus::Filled,
            timestamp: mmb_utils::time::ms_to_date_time(mmb_utils::time::now_ms()),
        }
    }

    #[test]
    fn wired_strategy_receives_filled_order_published_on_bus() {
        let bus = Arc::new(MessageBus::new());
        let host = StrategyHost::new(bus.clone());
        let strategy = Arc::new(Recorder::default());
        host.wire(strategy.clone());

        bus.publish("filled", sample_order("BTC/USDT"));

        assert_eq!(strategy.filled.load(Ordering::SeqCst), 1);
        assert_eq!(strategy.last_symbol.lock().unwrap().as_deref(), Some("BTC/USDT"));
    }

    #[test]
    fn submit_order_without_a_registered_ems_returns_none() {
        let bus = Arc::new(MessageBus::new());
        let host = StrategyHost::new(bus);
        let submitted = host.cancel_order(Venue::Binance, Uuid::new_v4(), None);
        assert!(submitted.is_none());
    }

    #[test]
    fn order_topics_list_has_one_entry_per_wired_lifecycle_callback() {
        assert_eq!(ORDER_TOPICS.len(), 8);
    }
}
