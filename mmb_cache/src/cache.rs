use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use mmb_domain::algo_order::AlgoOrder;
use mmb_domain::balance::{AccountBalance, Balance};
use mmb_domain::market::{AccountType, Venue};
use mmb_domain::position::Position;
use mmb_registry::OrderRef;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::kv_store::KvStore;

pub const DEFAULT_CACHE_SYNC_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_CACHE_EXPIRE_TIME: Duration = Duration::from_secs(3600);

/// An order plus the account context the cache needs for its indices but
/// which is not part of the venue-agnostic `Order` type itself.
#[derive(Debug, Clone)]
pub struct CacheOrderEntry {
    pub order_ref: OrderRef,
    pub venue: Venue,
    pub account_type: AccountType,
}

enum Buffered {
    Order(CacheOrderEntry),
    Position(Venue, String, Position),
    Balance(Venue, AccountType, Vec<(String, Balance)>),
}

/// Inverse of the `{account_type:?}` formatting `snapshot` keys balances
/// under. Matched against the `Debug` spelling directly rather than adding
/// a `FromStr` impl to `AccountType` for a format only this module writes.
fn parse_account_type(s: &str) -> Option<AccountType> {
    match s {
        "Demo" => Some(AccountType::Demo),
        "Aws" => Some(AccountType::Aws),
        "Live" => Some(AccountType::Live),
        "Spot" => Some(AccountType::Spot),
        "Futures" => Some(AccountType::Futures),
        "Margin" => Some(AccountType::Margin),
        "PortfolioMargin" => Some(AccountType::PortfolioMargin),
        "IsolatedMargin" => Some(AccountType::IsolatedMargin),
        _ => None,
    }
}

/// Single-writer, many-reader in-memory store keyed by `uuid` for orders,
/// `(venue, symbol)` for positions, `(venue, account_type)` for balances.
/// Mutations go through `apply_order`/`apply_position`/`apply_balance`,
/// each re-deriving the affected indices — single-threaded dispatch (via
/// `mmb_bus`) removes the need for locks on the hot path; the internal
/// `DashMap`s exist for safe concurrent reads during snapshot, not to permit
/// concurrent writers.
pub struct Cache {
    orders: DashMap<Uuid, CacheOrderEntry>,
    positions: DashMap<(Venue, String), Position>,
    balances: DashMap<(Venue, AccountType), AccountBalance>,
    algo_orders: DashMap<Uuid, AlgoOrder>,

    open_orders_by_symbol: DashMap<(Venue, String), HashSet<Uuid>>,
    open_orders_by_account: DashMap<(Venue, AccountType), HashSet<Uuid>>,
    symbol_open_orders: DashMap<String, HashSet<Uuid>>,
    symbol_orders: DashMap<String, HashSet<Uuid>>,

    restoring: AtomicBool,
    buffer: Mutex<Vec<Buffered>>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    pub fn new() -> Self {
        Cache {
            orders: DashMap::new(),
            positions: DashMap::new(),
            balances: DashMap::new(),
            algo_orders: DashMap::new(),
            open_orders_by_symbol: DashMap::new(),
            open_orders_by_account: DashMap::new(),
            symbol_open_orders: DashMap::new(),
            symbol_orders: DashMap::new(),
            restoring: AtomicBool::new(false),
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn apply_order(&self, entry: CacheOrderEntry) {
        if self.restoring.load(Ordering::Acquire) {
            self.buffer.lock().push(Buffered::Order(entry));
            return;
        }
        self.apply_order_now(entry);
    }

    fn apply_order_now(&self, entry: CacheOrderEntry) {
        let uuid = entry.order_ref.uuid();
        let symbol = entry.order_ref.fn_ref(|order| order.symbol.clone());
        let is_open = entry.order_ref.fn_ref(|order| order.is_open());

        self.symbol_orders.entry(symbol.clone()).or_default().insert(uuid);

        let symbol_key = (entry.venue, symbol.clone());
        let account_key = (entry.venue, entry.account_type);

        if is_open {
            self.open_orders_by_symbol.entry(symbol_key).or_default().insert(uuid);
            self.open_orders_by_account.entry(account_key).or_default().insert(uuid);
            self.symbol_open_orders.entry(symbol).or_default().insert(uuid);
        } else {
            if let Some(mut set) = self.open_orders_by_symbol.get_mut(&symbol_key) {
                set.remove(&uuid);
            }
            if let Some(mut set) = self.open_orders_by_account.get_mut(&account_key) {
                set.remove(&uuid);
            }
            if let Some(mut set) = self.symbol_open_orders.get_mut(&symbol) {
                set.remove(&uuid);
            }
        }

        self.orders.insert(uuid, entry);
    }

    pub fn apply_position(&self, venue: Venue, symbol: String, position: Position) {
        if self.restoring.load(Ordering::Acquire) {
            self.buffer.lock().push(Buffered::Position(venue, symbol, position));
            return;
        }
        self.positions.insert((venue, symbol), position);
    }

    /// Replaces balances for the reported assets; unreported assets are
    /// left untouched.
    pub fn apply_balance(&self, venue: Venue, account_type: AccountType, updates: Vec<(String, Balance)>) {
        if self.restoring.load(Ordering::Acquire) {
            self.buffer.lock().push(Buffered::Balance(venue, account_type, updates));
            return;
        }
        self.balances
            .entry((venue, account_type))
            .or_default()
            .apply(updates);
    }

    pub fn apply_algo_order(&self, algo: AlgoOrder) {
        self.algo_orders.insert(algo.uuid, algo);
    }

    pub fn order(&self, uuid: Uuid) -> Option<CacheOrderEntry> {
        self.orders.get(&uuid).map(|entry| entry.clone())
    }

    pub fn position(&self, venue: Venue, symbol: &str) -> Option<Position> {
        self.positions.get(&(venue, symbol.to_string())).map(|entry| entry.clone())
    }

    pub fn balance(&self, venue: Venue, account_type: AccountType) -> Option<AccountBalance> {
        self.balances.get(&(venue, account_type)).map(|entry| entry.clone())
    }

    pub fn algo_order(&self, uuid: Uuid) -> Option<AlgoOrder> {
        self.algo_orders.get(&uuid).map(|entry| entry.clone())
    }

    pub fn open_orders_by_symbol(&self, venue: Venue, symbol: &str) -> HashSet<Uuid> {
        self.open_orders_by_symbol
            .get(&(venue, symbol.to_string()))
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    pub fn open_orders_by_account(&self, venue: Venue, account_type: AccountType) -> HashSet<Uuid> {
        self.open_orders_by_account
            .get(&(venue, account_type))
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    pub fn symbol_open_orders(&self, symbol: &str) -> HashSet<Uuid> {
        self.symbol_open_orders.get(symbol).map(|entry| entry.clone()).unwrap_or_default()
    }

    pub fn symbol_orders(&self, symbol: &str) -> HashSet<Uuid> {
        self.symbol_orders.get(symbol).map(|entry| entry.clone()).unwrap_or_default()
    }

    /// Evicts orders past `cache_expire_time` that are in a terminal state,
    /// called on each snapshot tick.
    pub fn evict_expired(&self, now: mmb_utils::DateTime, expire_after: Duration) {
        let expired: Vec<Uuid> = self
            .orders
            .iter()
            .filter(|entry| {
                let (status_terminal, age) = entry
                    .value()
                    .order_ref
                    .fn_ref(|order| (order.status.is_terminal(), now - order.timestamp));
                status_terminal && age.to_std().map(|age| age >= expire_after).unwrap_or(false)
            })
            .map(|entry| *entry.key())
            .collect();
        for uuid in expired {
            self.orders.remove(&uuid);
        }
    }

    /// Writes a full snapshot to `store`, keyed by kind and identity.
    pub async fn snapshot(&self, store: &dyn KvStore) -> anyhow::Result<()> {
        for entry in self.orders.iter() {
            let order = entry.value().order_ref.deep_clone();
            let key = format!("orders/{}", order.uuid);
            store.set(&key, serde_json::to_vec(&order)?).await?;
        }
        for entry in self.positions.iter() {
            let (venue, symbol) = entry.key();
            let key = format!("positions/{venue}/{symbol}");
            store.set(&key, serde_json::to_vec(entry.value())?).await?;
        }
        for entry in self.balances.iter() {
            let (venue, account_type) = entry.key();
            for (asset, balance) in &entry.value().balances {
                let key = format!("balances/{venue}/{account_type:?}/{asset}");
                store.set(&key, serde_json::to_vec(balance)?).await?;
            }
        }
        for entry in self.algo_orders.iter() {
            let key = format!("algo/{}", entry.key());
            store.set(&key, serde_json::to_vec(entry.value())?).await?;
        }
        for entry in self.open_orders_by_symbol.iter() {
            let (venue, _symbol) = entry.key();
            let key = format!("index/open_orders/{venue}");
            let ids: Vec<Uuid> = entry.value().iter().copied().collect();
            store.set(&key, serde_json::to_vec(&ids)?).await?;
        }
        Ok(())
    }

    /// Restores orders, positions, balances and algo orders from `store`
    /// before connectors are allowed to publish. While restoring,
    /// concurrent `apply_*` calls are buffered and replayed afterward
    /// rather than lost. `venue`/`account_type` are applied to restored
    /// orders, which don't carry that context themselves; positions and
    /// balances recover it from their own keys (`positions/{venue}/{symbol}`,
    /// `balances/{venue}/{account_type}/{asset}`), since one `Cache` can
    /// hold entries for several venues/account types at once.
    pub async fn restore(&self, store: &dyn KvStore, venue: Venue, account_type: AccountType) -> anyhow::Result<()> {
        self.restoring.store(true, Ordering::Release);

        let order_keys = store.scan("orders/").await?;
        for key in order_keys {
            if let Some(bytes) = store.get(&key).await? {
                let order: mmb_domain::order::Order = serde_json::from_slice(&bytes)?;
                let entry = CacheOrderEntry {
                    order_ref: OrderRef::new(order),
                    venue,
                    account_type,
                };
                self.apply_order_now(entry);
            }
        }

        let position_keys = store.scan("positions/").await?;
        for key in position_keys {
            let Some(bytes) = store.get(&key).await? else { continue };
            let Some(rest) = key.strip_prefix("positions/") else { continue };
            let Some((venue_str, symbol)) = rest.split_once('/') else { continue };
            let Ok(key_venue) = venue_str.parse::<Venue>() else { continue };
            let position: Position = serde_json::from_slice(&bytes)?;
            self.positions.insert((key_venue, symbol.to_string()), position);
        }

        let balance_keys = store.scan("balances/").await?;
        for key in balance_keys {
            let Some(bytes) = store.get(&key).await? else { continue };
            let Some(rest) = key.strip_prefix("balances/") else { continue };
            let mut parts = rest.splitn(3, '/');
            let (Some(venue_str), Some(account_str), Some(asset)) = (parts.next(), parts.next(), parts.next()) else {
                continue;
            };
            let Ok(key_venue) = venue_str.parse::<Venue>() else { continue };
            let Some(key_account) = parse_account_type(account_str) else { continue };
            let balance: Balance = serde_json::from_slice(&bytes)?;
            self.balances
                .entry((key_venue, key_account))
                .or_default()
                .apply([(asset.to_string(), balance)]);
        }

        let algo_keys = store.scan("algo/").await?;
        for key in algo_keys {
            if let Some(bytes) = store.get(&key).await? {
                let algo: AlgoOrder = serde_json::from_slice(&bytes)?;
                self.algo_orders.insert(algo.uuid, algo);
            }
        }

        self.restoring.store(false, Ordering::Release);
        self.drain_buffer();
        Ok(())
    }

    fn drain_buffer(&self) {
        let buffered = std::mem::take(&mut *self.buffer.lock());
        for item in buffered {
            match item {
                Buffered::Order(entry) => self.apply_order_now(entry),
                Buffered::Position(venue, symbol, position) => {
                    self.positions.insert((venue, symbol), position);
                }
                Buffered::Balance(venue, account_type, updates) => {
                    self.balances.entry((venue, account_type)).or_default().apply(updates);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv_store::InMemoryKvStore;
    use mmb_domain::order::{Order, OrderStatus, OrderType, PositionSide, Side, TimeInForce};
    use rust_decimal::Decimal;

    fn sample_order(uuid: Uuid, symbol: &str, status: OrderStatus) -> Order {
        Order {
            uuid,
            exchange_order_id: None,
            client_order_id: None,
            symbol: symbol.to_string(),
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

    fn entry(uuid: Uuid, symbol: &str, status: OrderStatus) -> CacheOrderEntry {
        CacheOrderEntry {
            order_ref: OrderRef::new(sample_order(uuid, symbol, status)),
            venue: Venue::Binance,
            account_type: AccountType::Live,
        }
    }

    #[test]
    fn open_order_appears_in_all_open_indices() {
        let cache = Cache::new();
        let uuid = Uuid::new_v4();
        cache.apply_order(entry(uuid, "BTC/USDT", OrderStatus::Accepted));

        assert!(cache.open_orders_by_symbol(Venue::Binance, "BTC/USDT").contains(&uuid));
        assert!(cache.open_orders_by_account(Venue::Binance, AccountType::Live).contains(&uuid));
        assert!(cache.symbol_open_orders("BTC/USDT").contains(&uuid));
        assert!(cache.symbol_orders("BTC/USDT").contains(&uuid));
    }

    #[test]
    fn terminal_order_is_removed_from_open_indices_but_not_symbol_orders() {
        let cache = Cache::new();
        let uuid = Uuid::new_v4();
        cache.apply_order(entry(uuid, "BTC/USDT", OrderStatus::Accepted));
        cache.apply_order(entry(uuid, "BTC/USDT", OrderStatus::Filled));

        assert!(!cache.open_orders_by_symbol(Venue::Binance, "BTC/USDT").contains(&uuid));
        assert!(cache.symbol_orders("BTC/USDT").contains(&uuid));
    }

    #[tokio::test]
    async fn snapshot_then_restore_round_trips_orders() {
        let cache = Cache::new();
        let uuid = Uuid::new_v4();
        cache.apply_order(entry(uuid, "BTC/USDT", OrderStatus::Accepted));

        let store = InMemoryKvStore::default();
        cache.snapshot(&store).await.unwrap();

        let restored = Cache::new();
        restored.restore(&store, Venue::Binance, AccountType::Live).await.unwrap();

        assert!(restored.order(uuid).is_some());
        assert!(restored.open_orders_by_symbol(Venue::Binance, "BTC/USDT").contains(&uuid));
    }

    #[tokio::test]
    async fn snapshot_then_restore_round_trips_positions_and_balances() {
        use rust_decimal_macros::dec;

        let cache = Cache::new();
        cache.apply_position(
            Venue::Okx,
            "BTC/USDT".to_string(),
            Position::new(
                "BTC/USDT",
                Venue::Okx,
                dec!(1.5),
                dec!(30000),
                Decimal::ZERO,
                Decimal::ZERO,
            ),
        );
        cache.apply_balance(
            Venue::Okx,
            AccountType::PortfolioMargin,
            vec![
                ("BTC".to_string(), Balance { free: dec!(1), locked: dec!(0.5) }),
                ("USDT".to_string(), Balance { free: dec!(100), locked: dec!(0) }),
            ],
        );

        let store = InMemoryKvStore::default();
        cache.snapshot(&store).await.unwrap();

        let restored = Cache::new();
        restored.restore(&store, Venue::Binance, AccountType::Live).await.unwrap();

        let position = restored.position(Venue::Okx, "BTC/USDT").unwrap();
        assert_eq!(position.signed_amount, dec!(1.5));

        let balance = restored.balance(Venue::Okx, AccountType::PortfolioMargin).unwrap();
        assert_eq!(balance.get("BTC").unwrap().free, dec!(1));
        assert_eq!(balance.get("USDT").unwrap().free, dec!(100));
    }

    #[tokio::test]
    async fn events_during_restore_are_buffered_and_replayed() {
        let cache = Arc::new(Cache::new());
        cache.restoring.store(true, Ordering::Release);

        let uuid = Uuid::new_v4();
        cache.apply_order(entry(uuid, "ETH/USDT", OrderStatus::Accepted));
        assert!(cache.order(uuid).is_none());

        cache.restoring.store(false, Ordering::Release);
        cache.drain_buffer();
        assert!(cache.order(uuid).is_some());
    }
}
