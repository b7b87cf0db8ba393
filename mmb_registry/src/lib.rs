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

//! `uuid ↔ venue_order_id` registry. `OrderRef` is a cheap
//! `Arc<RwLock<_>>` handle with `fn_ref`/`fn_mut` accessors, wrapping this
//! runtime's own [`mmb_domain::order::Order`].

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use mmb_domain::order::{Order, OrderStatus};
use parking_lot::RwLock;
use tokio::sync::Notify;
use uuid::Uuid;

/// Lookup by venue id waits at most this long for the race between a fast
/// WS ack and the still-pending REST response before synthesizing a
/// reconciled order.
pub const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct OrderRef(Arc<RwLock<Order>>);

impl OrderRef {
    pub fn new(order: Order) -> Self {
        OrderRef(Arc::new(RwLock::new(order)))
    }

    pub fn fn_ref<T>(&self, f: impl FnOnce(&Order) -> T) -> T {
        f(&self.0.read())
    }

    pub fn fn_mut<T>(&self, f: impl FnOnce(&mut Order) -> T) -> T {
        f(&mut self.0.write())
    }

    pub fn uuid(&self) -> Uuid {
        self.fn_ref(|order| order.uuid)
    }

    pub fn status(&self) -> OrderStatus {
        self.fn_ref(|order| order.status)
    }

    pub fn deep_clone(&self) -> Order {
        self.fn_ref(|order| order.clone())
    }
}

/// Published on `mmb_bus`'s `order_registry` topic alongside the warning
/// log when a venue order id cannot be resolved in time: a reconciled
/// synthetic order was created in its place.
#[derive(Debug, Clone)]
pub struct RegistryEvent {
    pub venue_order_id: String,
    pub synthesized_uuid: Uuid,
}

pub struct OrderRegistry {
    by_uuid: DashMap<Uuid, OrderRef>,
    uuid_by_venue_id: DashMap<String, Uuid>,
    venue_id_by_uuid: DashMap<Uuid, String>,
    waiters: DashMap<String, Arc<Notify>>,
    registration_timeout: Duration,
    bus: Arc<mmb_bus::MessageBus>,
}

impl OrderRegistry {
    pub fn new(bus: Arc<mmb_bus::MessageBus>) -> Self {
        Self::with_registration_timeout(bus, DEFAULT_REGISTRATION_TIMEOUT)
    }

    pub fn with_registration_timeout(bus: Arc<mmb_bus::MessageBus>, registration_timeout: Duration) -> Self {
        OrderRegistry {
            by_uuid: DashMap::new(),
            uuid_by_venue_id: DashMap::new(),
            venue_id_by_uuid: DashMap::new(),
            waiters: DashMap::new(),
            registration_timeout,
            bus,
        }
    }

    /// Registers a freshly submitted order (status `PENDING`) before its
    /// venue order id is known.
    pub fn insert_pending(&self, order_ref: OrderRef) {
        self.by_uuid.insert(order_ref.uuid(), order_ref);
    }

    pub fn order_ref(&self, uuid: Uuid) -> Option<OrderRef> {
        self.by_uuid.get(&uuid).map(|entry| entry.clone())
    }

    /// Completes the mapping once the venue acknowledges an order,
    /// unblocking anyone waiting on [`Self::resolve_uuid`] for this venue id.
    pub fn acknowledge(&self, uuid: Uuid, venue_order_id: String) {
        self.uuid_by_venue_id.insert(venue_order_id.clone(), uuid);
        self.venue_id_by_uuid.insert(uuid, venue_order_id.clone());
        if let Some((_, notify)) = self.waiters.remove(&venue_order_id) {
            notify.notify_waiters();
        }
    }

    /// Resolves a venue order id to the local `uuid`, waiting up to
    /// `registration_timeout` for the race between a WS ack and a pending
    /// REST response. On timeout, synthesizes a new uuid, logs a warning,
    /// and publishes a [`RegistryEvent::Reconciled`]-equivalent [`RegistryEvent`].
    pub async fn resolve_uuid(&self, venue_order_id: &str) -> Uuid {
        if let Some(uuid) = self.uuid_by_venue_id.get(venue_order_id) {
            return *uuid;
        }

        let notify = self
            .waiters
            .entry(venue_order_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();

        if let Some(uuid) = self.uuid_by_venue_id.get(venue_order_id) {
            return *uuid;
        }

        match tokio::time::timeout(self.registration_timeout, notify.notified()).await {
            Ok(()) => self
                .uuid_by_venue_id
                .get(venue_order_id)
                .map(|entry| *entry)
                .unwrap_or_else(|| self.reconcile_unknown(venue_order_id)),
            Err(_) => self.reconcile_unknown(venue_order_id),
        }
    }

    fn reconcile_unknown(&self, venue_order_id: &str) -> Uuid {
        self.waiters.remove(venue_order_id);
        let uuid = Uuid::new_v4();
        log::warn!("reconciled unknown venue order id '{venue_order_id}' as new local order {uuid}");
        self.acknowledge(uuid, venue_order_id.to_string());
        self.bus.publish(
            "order_registry",
            RegistryEvent {
                venue_order_id: venue_order_id.to_string(),
                synthesized_uuid: uuid,
            },
        );
        uuid
    }

    pub fn venue_order_id(&self, uuid: Uuid) -> Option<String> {
        self.venue_id_by_uuid.get(&uuid).map(|entry| entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmb_domain::order::{OrderStatus, PositionSide, Side, TimeInForce, OrderType};
    use rust_decimal::Decimal;

    fn sample_order(uuid: Uuid) -> Order {
        Order {
            uuid,
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
            status: OrderStatus::Pending,
            timestamp: mmb_utils::time::ms_to_date_time(mmb_utils::time::now_ms()),
        }
    }

    #[tokio::test]
    async fn resolves_immediately_once_acknowledged() {
        let bus = Arc::new(mmb_bus::MessageBus::new());
        let registry = OrderRegistry::new(bus);
        let uuid = Uuid::new_v4();
        registry.insert_pending(OrderRef::new(sample_order(uuid)));
        registry.acknowledge(uuid, "venue-123".into());

        let resolved = registry.resolve_uuid("venue-123").await;
        assert_eq!(resolved, uuid);
    }

    #[tokio::test]
    async fn resolves_after_delayed_acknowledge_within_timeout() {
        let bus = Arc::new(mmb_bus::MessageBus::new());
        let registry = Arc::new(OrderRegistry::with_registration_timeout(
            bus,
            Duration::from_millis(500),
        ));
        let uuid = Uuid::new_v4();

        let registry2 = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            registry2.acknowledge(uuid, "venue-456".into());
        });

        let resolved = registry.resolve_uuid("venue-456").await;
        assert_eq!(resolved, uuid);
    }

    #[tokio::test]
    async fn synthesizes_reconciled_order_on_timeout() {
        let bus = Arc::new(mmb_bus::MessageBus::new());
        let registry = OrderRegistry::with_registration_timeout(bus, Duration::from_millis(20));
        let resolved = registry.resolve_uuid("never-registered").await;
        assert_eq!(registry.venue_order_id(resolved).as_deref(), Some("never-registered"));
    }
}
