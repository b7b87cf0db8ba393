//! The callback surface a strategy implements. Callbacks are plain
//! synchronous functions called back into from the engine, not `async fn`s,
//! because the work they do (read the cache, call `Ems::submit_order`) is
//! itself synchronous — no need to reach for `async_trait` where nothing
//! async is happening.

use mmb_domain::balance::BalanceEvent;
use mmb_domain::events::{BookL1, Kline, Trade};
use mmb_domain::order::Order;

/// One implementation per trading strategy. Every method defaults to a
/// no-op so a strategy only overrides the callbacks it cares about, the
/// same way `Demo(Strategy)` in the original TWAP example only overrides
/// a handful of `on_*` hooks.
pub trait Strategy: Send + Sync {
    fn on_bookl1(&self, _event: &BookL1) {}
    fn on_trade(&self, _event: &Trade) {}
    fn on_kline(&self, _event: &Kline) {}

    fn on_pending_order(&self, _order: &Order) {}
    fn on_accepted_order(&self, _order: &Order) {}
    fn on_partially_filled_order(&self, _order: &Order) {}
    fn on_filled_order(&self, _order: &Order) {}
    fn on_canceling_order(&self, _order: &Order) {}
    fn on_canceled_order(&self, _order: &Order) {}
    fn on_failed_order(&self, _order: &Order) {}
    fn on_cancel_failed_order(&self, _order: &Order) {}

    fn on_balance(&self, _event: &BalanceEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl Strategy for Noop {}

    #[test]
    fn default_methods_accept_every_event_without_panicking() {
        let strategy = Noop;
        strategy.on_balance(&BalanceEvent {
            venue: mmb_domain::market::Venue::Binance,
            account_type: mmb_domain::market::AccountType::Live,
            balance: mmb_domain::balance::AccountBalance::default(),
        });
    }
}
