#![deny(
    non_ascii_idents,
    non_shorthand_field_patterns,
    path_statements,
    unused_comparisons,
    while_true,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_must_use
)]

//! Per-venue execution management system: one submission queue per
//! account type, a fixed account-type priority table for submits that
//! don't name one, precision snapping before dispatch, and a TWAP
//! supervisor for algo orders. Built in the idiom the rest of this
//! workspace already establishes — `DashMap` state, `spawn_future`-managed
//! workers, bus-published order events.

mod precision;
mod priority;
mod twap;

pub use precision::{amount_to_precision, price_to_precision};
pub use priority::primary_account_type;
pub use twap::CONSECUTIVE_FAILURE_THRESHOLD;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use mmb_bus::MessageBus;
use mmb_cache::{Cache, CacheOrderEntry};
use mmb_domain::algo_order::AlgoOrder;
use mmb_domain::market::{AccountType, Precision, Venue};
use mmb_domain::order::{Order, OrderStatus, OrderSubmit, SubmitType};
use mmb_registry::{OrderRef, OrderRegistry};
use mmb_utils::cancellation::CancellationToken2;
use mmb_utils::infrastructure::spawn_future;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Implemented by each venue's private connector. The EMS's queue workers
/// call straight through to it; the connector itself is responsible for
/// signing, rate limiting, and the actual POST.
#[async_trait]
pub trait OrderSink: Send + Sync {
    async fn create_order(&self, uuid: Uuid, submit: &OrderSubmit) -> anyhow::Result<()>;
    async fn cancel_order(&self, target_uuid: Uuid) -> anyhow::Result<()>;
}

struct QueuedSubmit {
    uuid: Uuid,
    submit: OrderSubmit,
    account_type: AccountType,
}

const DEFAULT_PRECISION: Precision = Precision { amount: 8, price: 8 };

pub struct Ems {
    venue: Venue,
    cache: Arc<Cache>,
    bus: Arc<MessageBus>,
    registry: Arc<OrderRegistry>,
    queues: DashMap<AccountType, mpsc::UnboundedSender<QueuedSubmit>>,
    market_precision: DashMap<String, Precision>,
    twap_cancellation: DashMap<Uuid, CancellationToken2>,
}

impl Ems {
    pub fn new(venue: Venue, cache: Arc<Cache>, bus: Arc<MessageBus>, registry: Arc<OrderRegistry>) -> Arc<Self> {
        Arc::new(Ems {
            venue,
            cache,
            bus,
            registry,
            queues: DashMap::new(),
            market_precision: DashMap::new(),
            twap_cancellation: DashMap::new(),
        })
    }

    pub fn register_market(&self, symbol: impl Into<String>, precision: Precision) {
        self.market_precision.insert(symbol.into(), precision);
    }

    fn precision_for(&self, symbol: &str) -> Precision {
        self.market_precision
            .get(symbol)
            .map(|entry| *entry)
            .unwrap_or_else(|| {
                log::warn!("no registered precision for {symbol}, defaulting to {DEFAULT_PRECISION:?}");
                DEFAULT_PRECISION
            })
    }

    /// Registers a private connector's submission sink for `account_type` and
    /// spawns its worker task: a set of worker tasks, one per queue.
    pub fn register_connector(self: &Arc<Self>, account_type: AccountType, sink: Arc<dyn OrderSink>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedSubmit>();
        self.queues.insert(account_type, tx);

        let ems = self.clone();
        spawn_future(&format!("ems worker {account_type:?}"), async move {
            while let Some(queued) = rx.recv().await {
                ems.process(queued, &sink).await;
            }
        });
    }

    fn available_account_types(&self) -> Vec<AccountType> {
        self.queues.iter().map(|entry| *entry.key()).collect()
    }

    fn resolve_account_type(&self, account_type: Option<AccountType>) -> Option<AccountType> {
        match account_type {
            Some(account_type) if self.queues.contains_key(&account_type) => Some(account_type),
            Some(_) | None => {
                let available = self.available_account_types();
                primary_account_type(self.venue, &available)
            }
        }
    }

    /// Places `submit` on the chosen queue (or spawns a TWAP supervisor) and
    /// returns the generated `uuid` immediately.
    pub fn submit_order(self: &Arc<Self>, mut submit: OrderSubmit, account_type: Option<AccountType>) -> Option<Uuid> {
        let precision = self.precision_for(&submit.symbol);
        submit.amount = amount_to_precision(submit.amount, &precision, submit.precision_mode);
        if let Some(price) = submit.price {
            submit.price = Some(price_to_precision(price, &precision, submit.precision_mode));
        }

        let uuid = Uuid::new_v4();
        match submit.submit_type {
            SubmitType::Create | SubmitType::Cancel => {
                let account_type = self.resolve_account_type(account_type)?;
                let queue = self.queues.get(&account_type)?;
                let _ = queue.send(QueuedSubmit { uuid, submit, account_type });
            }
            SubmitType::Twap => {
                let cancel = CancellationToken2::new();
                self.twap_cancellation.insert(uuid, cancel.clone());
                let algo = twap::new_algo_order(uuid, &submit);
                self.cache.apply_algo_order(algo.clone());
                self.publish_algo_order(algo);
                twap::spawn(self.clone(), uuid, submit, cancel);
            }
            SubmitType::CancelTwap => {
                if let Some(target) = submit.target_uuid {
                    if let Some((_, cancel)) = self.twap_cancellation.remove(&target) {
                        cancel.cancel();
                    }
                }
            }
            SubmitType::Vwap | SubmitType::CancelVwap => {
                log::warn!("VWAP submission received but no VWAP engine is implemented; dropping");
            }
        }
        Some(uuid)
    }

    /// Used internally by the TWAP supervisor to submit child `CREATE`s on
    /// the primary account type.
    pub(crate) fn submit_child(self: &Arc<Self>, submit: OrderSubmit) -> Uuid {
        self.submit_order(submit, None).unwrap_or_else(Uuid::new_v4)
    }

    pub(crate) fn submit_cancel(self: &Arc<Self>, target_uuid: Uuid) {
        let account_type = self.cache.order(target_uuid).map(|entry| entry.account_type);
        self.submit_order(
            OrderSubmit {
                submit_type: SubmitType::Cancel,
                symbol: String::new(),
                side: mmb_domain::order::Side::Buy,
                order_type: mmb_domain::order::OrderType::Market,
                time_in_force: mmb_domain::order::TimeInForce::Gtc,
                amount: rust_decimal::Decimal::ZERO,
                price: None,
                reduce_only: false,
                position_side: mmb_domain::order::PositionSide::Net,
                precision_mode: mmb_domain::order::PrecisionMode::Floor,
                target_uuid: Some(target_uuid),
                duration_s: None,
                wait_s: None,
            },
            account_type,
        );
    }

    pub(crate) fn append_twap_child(&self, parent_uuid: Uuid, child_uuid: Uuid) {
        if let Some(mut algo) = self.cache.algo_order(parent_uuid) {
            algo.children.push(child_uuid);
            self.cache.apply_algo_order(algo);
        }
    }

    pub(crate) fn publish_algo_order(&self, algo: AlgoOrder) {
        self.bus.publish("algo_order", algo);
    }

    async fn process(self: &Arc<Self>, queued: QueuedSubmit, sink: &Arc<dyn OrderSink>) {
        match queued.submit.submit_type {
            SubmitType::Create => self.process_create(queued, sink).await,
            SubmitType::Cancel => self.process_cancel(queued, sink).await,
            _ => unreachable!("only CREATE/CANCEL submits are ever enqueued onto a connector's worker"),
        }
    }

    async fn process_create(self: &Arc<Self>, queued: QueuedSubmit, sink: &Arc<dyn OrderSink>) {
        let order = Order {
            uuid: queued.uuid,
            exchange_order_id: None,
            client_order_id: None,
            symbol: queued.submit.symbol.clone(),
            side: queued.submit.side,
            order_type: queued.submit.order_type,
            time_in_force: queued.submit.time_in_force,
            amount: queued.submit.amount,
            price: queued.submit.price,
            filled: rust_decimal::Decimal::ZERO,
            remaining: queued.submit.amount,
            average: None,
            last_filled: rust_decimal::Decimal::ZERO,
            last_filled_price: None,
            fee: rust_decimal::Decimal::ZERO,
            fee_currency: None,
            cost: rust_decimal::Decimal::ZERO,
            cum_cost: rust_decimal::Decimal::ZERO,
            reduce_only: queued.submit.reduce_only,
            position_side: queued.submit.position_side,
            status: OrderStatus::Pending,
            timestamp: mmb_utils::time::ms_to_date_time(mmb_utils::time::now_ms()),
        };
        let order_ref = OrderRef::new(order.clone());
        self.registry.insert_pending(order_ref.clone());

        self.cache.apply_order(CacheOrderEntry {
            order_ref: order_ref.clone(),
            venue: self.venue,
            account_type: queued.account_type,
        });
        self.bus.publish("pending", order.clone());

        if let Err(err) = sink.create_order(queued.uuid, &queued.submit).await {
            log::error!("create_order failed for {}: {err:#}", queued.uuid);
            if order_ref.fn_mut(|o| o.apply_status(OrderStatus::Failed)).is_ok() {
                self.bus.publish("failed", order_ref.deep_clone());
            }
        }
    }

    async fn process_cancel(self: &Arc<Self>, queued: QueuedSubmit, sink: &Arc<dyn OrderSink>) {
        let Some(target_uuid) = queued.submit.target_uuid else {
            log::error!("CANCEL submit with no target_uuid");
            return;
        };
        let Some(order_ref) = self.registry.order_ref(target_uuid) else {
            log::warn!("CANCEL submit for unknown order {target_uuid}");
            return;
        };

        if let Err(err) = sink.cancel_order(target_uuid).await {
            log::error!("cancel_order failed for {target_uuid}: {err:#}");
            if order_ref.fn_mut(|o| o.apply_status(OrderStatus::CancelFailed)).is_ok() {
                self.bus.publish("cancel_failed", order_ref.deep_clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmb_domain::order::{OrderType, PositionSide, Side, TimeInForce};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct RecordingSink {
        created: Arc<AtomicU32>,
        fail_first_n: u32,
    }

    #[async_trait]
    impl OrderSink for RecordingSink {
        async fn create_order(&self, _uuid: Uuid, _submit: &OrderSubmit) -> anyhow::Result<()> {
            let count = self.created.fetch_add(1, Ordering::SeqCst);
            if count < self.fail_first_n {
                anyhow::bail!("simulated rejection");
            }
            Ok(())
        }

        async fn cancel_order(&self, _target_uuid: Uuid) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn sample_submit() -> OrderSubmit {
        OrderSubmit {
            submit_type: SubmitType::Create,
            symbol: "BTC/USDT".into(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::Gtc,
            amount: dec!(1.23456789),
            price: Some(dec!(100.123456)),
            reduce_only: false,
            position_side: PositionSide::Net,
            precision_mode: mmb_domain::order::PrecisionMode::Floor,
            target_uuid: None,
            duration_s: None,
            wait_s: None,
        }
    }

    fn new_ems(venue: Venue) -> Arc<Ems> {
        let bus = Arc::new(MessageBus::new());
        let cache = Arc::new(Cache::new());
        let registry = Arc::new(OrderRegistry::new(bus.clone()));
        Ems::new(venue, cache, bus, registry)
    }

    #[tokio::test]
    async fn submit_order_snaps_amount_and_price_to_registered_precision() {
        let ems = new_ems(Venue::Binance);
        ems.register_market("BTC/USDT", Precision { amount: 3, price: 2 });
        let received = Arc::new(Mutex::new(None));
        struct Capture(Arc<Mutex<Option<OrderSubmit>>>);
        #[async_trait]
        impl OrderSink for Capture {
            async fn create_order(&self, _uuid: Uuid, submit: &OrderSubmit) -> anyhow::Result<()> {
                *self.0.lock().unwrap() = Some(submit.clone());
                Ok(())
            }
            async fn cancel_order(&self, _target_uuid: Uuid) -> anyhow::Result<()> {
                Ok(())
            }
        }
        ems.register_connector(AccountType::Live, Arc::new(Capture(received.clone())));

        let uuid = ems.submit_order(sample_submit(), Some(AccountType::Live)).unwrap();
        for _ in 0..50 {
            if received.lock().unwrap().is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let captured = received.lock().unwrap().clone().expect("order should have reached the sink");
        assert_eq!(captured.amount, dec!(1.234));
        assert_eq!(captured.price, Some(dec!(100.12)));

        let cached = ems.cache.order(uuid).expect("order should be cached as pending");
        assert_eq!(cached.order_ref.status(), OrderStatus::Pending);
    }

    #[tokio::test]
    async fn failed_create_transitions_order_to_failed() {
        let ems = new_ems(Venue::Binance);
        ems.register_market("BTC/USDT", Precision { amount: 8, price: 8 });
        ems.register_connector(
            AccountType::Live,
            Arc::new(RecordingSink {
                created: Arc::new(AtomicU32::new(0)),
                fail_first_n: 1,
            }),
        );

        let uuid = ems.submit_order(sample_submit(), Some(AccountType::Live)).unwrap();
        for _ in 0..50 {
            if ems.cache.order(uuid).map(|e| e.order_ref.status()) == Some(OrderStatus::Failed) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(ems.cache.order(uuid).unwrap().order_ref.status(), OrderStatus::Failed);
    }

    #[test]
    fn resolve_account_type_falls_back_to_priority_when_unregistered() {
        let ems = new_ems(Venue::Okx);
        ems.queues.insert(AccountType::Live, mpsc::unbounded_channel().0);
        assert_eq!(ems.resolve_account_type(Some(AccountType::Demo)), Some(AccountType::Live));
    }
}
