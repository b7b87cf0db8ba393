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

//! TWAP demo runtime: load config, build the engine (bus, cache, registry,
//! one EMS per venue, connectors), run until shutdown. The bundled strategy
//! waits for the first book update on the configured symbol, then fires one
//! `create_twap` and logs every order-lifecycle callback after that.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mmb_bus::MessageBus;
use mmb_cache::{Cache, KvStore, RedisKvStore, SqliteKvStore};
use mmb_config::{Config, StorageSettings};
use mmb_domain::balance::BalanceEvent;
use mmb_domain::events::{BookL1, Kline, Trade};
use mmb_domain::market::{AccountType, Precision, Venue};
use mmb_domain::order::{Order, Side};
use mmb_ems::{Ems, OrderSink};
use mmb_exchange::{DecodedOrderUpdate, ListenKeyLifecycle, PrivateConnector, PublicConnector, PublicEvent, VenueCapability};
use mmb_registry::OrderRegistry;
use mmb_strategy::{Scheduler, Strategy, StrategyHost};
use mmb_task::TaskManager;
use mmb_ws::{AppLevelPing, PingPolicy, WsClient, WsClientConfig};
use url::Url;

const DEMO_SYMBOL: &str = "BTC/USDT";
const DEMO_INTERVAL: &str = "1m";
const DEMO_PRECISION: Precision = Precision { amount: 6, price: 2 };
const DEMO_TWAP_AMOUNT: &str = "0.01";
const DEMO_TWAP_DURATION_S: u64 = 300;
const DEMO_TWAP_WAIT_S: u64 = 30;

type FrameHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mmb_utils::logger::init_logger();

    if let Err(err) = run().await {
        log::error!("fatal error: {err:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let config = Config::load(Path::new("config.toml"), Path::new("secrets.toml"))?;

    let bus = Arc::new(MessageBus::new());
    let cache = Arc::new(Cache::new());
    let registry = Arc::new(OrderRegistry::new(bus.clone()));
    let task_manager = Arc::new(TaskManager::new());
    let strategy_host = StrategyHost::new(bus.clone());
    let store = connect_kv_store(&config.storage).await?;

    let mut ems_by_venue: HashMap<Venue, Arc<Ems>> = HashMap::new();
    let mut public_started: HashSet<Venue> = HashSet::new();
    let mut demo_venue = None;

    for exchange in &config.exchanges {
        let ems = ems_by_venue
            .entry(exchange.venue)
            .or_insert_with(|| Ems::new(exchange.venue, cache.clone(), bus.clone(), registry.clone()))
            .clone();
        ems.register_market(DEMO_SYMBOL, DEMO_PRECISION);

        if public_started.insert(exchange.venue) {
            start_public_connector(exchange.venue, &bus)?;
        }

        cache.restore(store.as_ref(), exchange.venue, exchange.account_type).await?;

        match exchange.venue {
            Venue::Binance => {
                start_binance_private(exchange, cache.clone(), registry.clone(), bus.clone(), &ems, &task_manager).await?
            }
            Venue::Okx => start_okx_private(exchange, cache.clone(), registry.clone(), bus.clone(), &ems, &task_manager).await?,
            Venue::Bybit => {
                start_bybit_private(exchange, cache.clone(), registry.clone(), bus.clone(), &ems, &task_manager).await?
            }
        }

        strategy_host.register_ems(exchange.venue, ems);
        demo_venue.get_or_insert((exchange.venue, Some(exchange.account_type)));
    }

    let Some((venue, account_type)) = demo_venue else {
        anyhow::bail!("config.toml has no [[exchange]] entries; nothing to trade");
    };
    let strategy = Arc::new(DemoStrategy::new(strategy_host.clone(), venue, account_type));
    strategy_host.wire(strategy);

    let scheduler = Scheduler::new();
    let cache_sync_interval = Duration::from_secs(config.ems.cache_sync_interval_s);
    let cache_expire_time = Duration::from_secs(config.ems.cache_expire_time_s);
    let sync_cache = cache.clone();
    let sync_store = store.clone();
    scheduler.schedule("cache sync", cache_sync_interval, move || {
        let cache = sync_cache.clone();
        let store = sync_store.clone();
        mmb_utils::infrastructure::spawn_future("cache sync", async move {
            cache.evict_expired(mmb_utils::time::ms_to_date_time(mmb_utils::time::now_ms()), cache_expire_time);
            if let Err(err) = cache.snapshot(store.as_ref()).await {
                log::error!("cache snapshot failed: {err:#}");
            }
        });
    });

    tokio::signal::ctrl_c().await?;
    log::info!("shutdown signal received, draining tasks");
    scheduler.shutdown();
    task_manager.shutdown().await;
    Ok(())
}

/// Builds the `KvStore` the cache snapshots into/restores from, picked by
/// `[storage] backend` in `config.toml`.
async fn connect_kv_store(storage: &StorageSettings) -> anyhow::Result<Arc<dyn KvStore>> {
    match storage {
        StorageSettings::Redis(redis) => {
            let auth = redis
                .password
                .as_deref()
                .map(|password| format!(":{password}@"))
                .unwrap_or_default();
            let url = format!("redis://{auth}{}:{}/{}", redis.host, redis.port, redis.db);
            Ok(Arc::new(RedisKvStore::connect(&url)?))
        }
        StorageSettings::Sqlite { path } => Ok(Arc::new(SqliteKvStore::connect(path).await?)),
    }
}

/// Builds a throwaway public-market-data connector for `venue` and
/// subscribes it to the demo symbol's book ticker, trades and klines.
/// Public connectors carry no credentials, so the REST client is built with
/// empty strings — `request_klines` is unused by this demo.
fn start_public_connector(venue: Venue, bus: &Arc<MessageBus>) -> anyhow::Result<()> {
    match venue {
        Venue::Binance => {
            let connector = mmb_exchange_binance::BinancePublicConnector {
                ws: WsClient::new(ws_config(Url::parse("wss://stream.binance.com:9443/ws")?, None), public_handler(bus.clone(), mmb_exchange_binance::BinanceCapability)),
                rest: mmb_exchange_binance::new_rest_client(String::new(), false, "public".to_string()),
                host: "https://api.binance.com".to_string(),
            };
            connector.connect();
            spawn_public_subscriptions(connector);
        }
        Venue::Okx => {
            let app_level_ping = Some(AppLevelPing {
                request_payload: "ping".to_string(),
                reply_payload: "pong".to_string(),
            });
            let connector = mmb_exchange_okx::OkxPublicConnector {
                ws: WsClient::new(
                    ws_config(Url::parse("wss://ws.okx.com:8443/ws/v5/public")?, app_level_ping),
                    public_handler(bus.clone(), mmb_exchange_okx::OkxCapability),
                ),
                rest: mmb_exchange_okx::new_rest_client(String::new(), String::new(), String::new(), "public".to_string()),
                host: "https://www.okx.com".to_string(),
            };
            connector.connect();
            spawn_public_subscriptions(connector);
        }
        Venue::Bybit => {
            let connector = mmb_exchange_bybit::BybitPublicConnector {
                ws: WsClient::new(
                    ws_config(Url::parse("wss://stream.bybit.com/v5/public/spot")?, None),
                    public_handler(bus.clone(), mmb_exchange_bybit::BybitCapability),
                ),
                rest: mmb_exchange_bybit::new_rest_client(String::new(), String::new(), "public".to_string()),
                host: "https://api.bybit.com".to_string(),
                account_type: AccountType::Spot,
            };
            connector.connect();
            spawn_public_subscriptions(connector);
        }
    }
    Ok(())
}

fn spawn_public_subscriptions<C: PublicConnector + 'static>(connector: C) {
    mmb_utils::infrastructure::spawn_future("public market data subscriptions", async move {
        connector.subscribe_bookl1(DEMO_SYMBOL).await;
        connector.subscribe_trades(DEMO_SYMBOL).await;
        connector.subscribe_klines(DEMO_SYMBOL, DEMO_INTERVAL).await;
    });
}

/// Decodes a public WS frame via `capability` and republishes it on the bus
/// topic the strategy host already wires `on_bookl1`/`on_trade`/`on_kline`
/// to. Malformed frames are logged and dropped; a recognized frame with
/// nothing in it (`Ok(None)`) is silently ignored.
fn public_handler<C: VenueCapability + Send + Sync + 'static>(bus: Arc<MessageBus>, capability: C) -> FrameHandler {
    Arc::new(move |bytes: Vec<u8>| match capability.decode_public_frame(&bytes) {
        Ok(Some(PublicEvent::BookL1(event))) => bus.publish("bookl1", event),
        Ok(Some(PublicEvent::Trade(event))) => bus.publish("trade", event),
        Ok(Some(PublicEvent::Kline(event))) => bus.publish("kline", event),
        Ok(None) => {}
        Err(err) => log::debug!("dropping unrecognized public frame: {err}"),
    })
}

/// Decodes a private order-update frame and forwards it to `tx`, leaving
/// the actual registry/cache mutation to whatever owns the connector (it
/// can't be done from inside the handler itself: the connector holding the
/// `WsClient` that owns this handler hasn't finished constructing yet for
/// OKX/Bybit, and doesn't exist at all yet for Binance).
fn private_handler<C: VenueCapability + Send + Sync + 'static>(
    capability: C,
    tx: tokio::sync::mpsc::UnboundedSender<DecodedOrderUpdate>,
) -> FrameHandler {
    Arc::new(move |bytes: Vec<u8>| match capability.decode_order_update(&bytes) {
        Ok(update) => {
            let _ = tx.send(update);
        }
        Err(err) => log::debug!("dropping non-order-update private frame: {err}"),
    })
}

fn ws_config(url: Url, app_level_ping: Option<AppLevelPing>) -> WsClientConfig {
    WsClientConfig {
        url,
        ping_policy: PingPolicy::WhenIdle {
            idle_timeout: Duration::from_secs(30),
        },
        ping_reply_timeout: Duration::from_secs(10),
        reconnect_interval: Duration::from_secs(5),
        app_level_ping,
        subscribe_rate_period: Duration::from_millis(350),
    }
}

/// Binance's private connector owns no `ws` field of its own: the
/// listen-key handshake has to happen here, before any socket exists.
async fn start_binance_private(
    exchange: &mmb_config::ExchangeSettings,
    cache: Arc<Cache>,
    registry: Arc<OrderRegistry>,
    bus: Arc<MessageBus>,
    ems: &Arc<Ems>,
    task_manager: &Arc<TaskManager>,
) -> anyhow::Result<()> {
    let is_usd_m_futures = exchange.account_type == AccountType::Futures;
    let rest = mmb_exchange_binance::new_rest_client(exchange.api_key.clone(), is_usd_m_futures, format!("binance-{:?}", exchange.account_type));
    let host = if is_usd_m_futures { "https://fapi.binance.com" } else { "https://api.binance.com" }.to_string();

    let connector = Arc::new(mmb_exchange_binance::BinancePrivateConnector {
        venue: Venue::Binance,
        account_type: exchange.account_type,
        rest,
        host,
        secret: exchange.secret.clone(),
        cache,
        registry,
        capability: mmb_exchange_binance::BinanceCapability,
        bus,
    });
    connector.init_account_balance().await?;

    let listen_key = connector.acquire_listen_key().await?;
    let ws_url = Url::parse(&format!("wss://stream.binance.com:9443/ws/{listen_key}"))?;

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let ws = WsClient::new(ws_config(ws_url, None), private_handler(mmb_exchange_binance::BinanceCapability, tx));
    ws.connect();

    spawn_order_update_drain(task_manager, connector.clone(), rx);

    let keepalive_connector = connector.clone();
    task_manager.create_task("binance listen key keepalive", move |cancel| async move {
        keepalive_connector
            .run_keepalive_loop(mmb_exchange_binance::LISTEN_KEY_REFRESH_INTERVAL, cancel)
            .await;
    });

    ems.register_connector(exchange.account_type, connector as Arc<dyn OrderSink>);
    Ok(())
}

async fn start_okx_private(
    exchange: &mmb_config::ExchangeSettings,
    cache: Arc<Cache>,
    registry: Arc<OrderRegistry>,
    bus: Arc<MessageBus>,
    ems: &Arc<Ems>,
    task_manager: &Arc<TaskManager>,
) -> anyhow::Result<()> {
    let rest = mmb_exchange_okx::new_rest_client(
        exchange.api_key.clone(),
        exchange.secret.clone(),
        exchange.passphrase.clone().unwrap_or_default(),
        format!("okx-{:?}", exchange.account_type),
    );

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let app_level_ping = Some(AppLevelPing {
        request_payload: "ping".to_string(),
        reply_payload: "pong".to_string(),
    });
    let ws = WsClient::new(
        ws_config(Url::parse("wss://ws.okx.com:8443/ws/v5/private")?, app_level_ping),
        private_handler(mmb_exchange_okx::OkxCapability, tx),
    );

    let connector = Arc::new(mmb_exchange_okx::OkxPrivateConnector {
        venue: Venue::Okx,
        account_type: exchange.account_type,
        rest,
        ws,
        host: "https://www.okx.com".to_string(),
        api_key: exchange.api_key.clone(),
        secret: exchange.secret.clone(),
        passphrase: exchange.passphrase.clone().unwrap_or_default(),
        cache,
        registry,
        capability: mmb_exchange_okx::OkxCapability,
        bus,
    });
    connector.connect().await?;
    connector.init_account_balance().await?;
    connector.init_positions().await?;

    spawn_order_update_drain(task_manager, connector.clone(), rx);
    ems.register_connector(exchange.account_type, connector as Arc<dyn OrderSink>);
    Ok(())
}

async fn start_bybit_private(
    exchange: &mmb_config::ExchangeSettings,
    cache: Arc<Cache>,
    registry: Arc<OrderRegistry>,
    bus: Arc<MessageBus>,
    ems: &Arc<Ems>,
    task_manager: &Arc<TaskManager>,
) -> anyhow::Result<()> {
    let rest = mmb_exchange_bybit::new_rest_client(exchange.api_key.clone(), exchange.secret.clone(), format!("bybit-{:?}", exchange.account_type));

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let ws = WsClient::new(
        ws_config(Url::parse("wss://stream.bybit.com/v5/private")?, None),
        private_handler(mmb_exchange_bybit::BybitCapability, tx),
    );

    let connector = Arc::new(mmb_exchange_bybit::BybitPrivateConnector {
        venue: Venue::Bybit,
        account_type: exchange.account_type,
        rest,
        ws,
        host: "https://api.bybit.com".to_string(),
        api_key: exchange.api_key.clone(),
        secret: exchange.secret.clone(),
        cache,
        registry,
        capability: mmb_exchange_bybit::BybitCapability,
        bus,
    });
    connector.connect().await?;
    connector.init_account_balance().await?;
    connector.init_positions().await?;

    spawn_order_update_drain(task_manager, connector.clone(), rx);
    ems.register_connector(exchange.account_type, connector as Arc<dyn OrderSink>);
    Ok(())
}

/// One task per private connector, applying decoded order updates against
/// the registry/cache/bus in the order the WS read loop produced them.
fn spawn_order_update_drain<C>(task_manager: &Arc<TaskManager>, connector: Arc<C>, mut rx: tokio::sync::mpsc::UnboundedReceiver<DecodedOrderUpdate>)
where
    C: ApplyOrderUpdate + Send + Sync + 'static,
{
    task_manager.create_task("private order update drain", move |cancel| async move {
        loop {
            tokio::select! {
                _ = cancel.when_cancelled() => return,
                update = rx.recv() => {
                    let Some(update) = update else { return };
                    connector.apply_order_update(update).await;
                }
            }
        }
    });
}

/// Every private connector exposes `apply_order_update` as an inherent
/// method (it isn't part of `PrivateConnector`, since the EMS never calls
/// it — only the WS read loop does), so this adapter trait is what lets
/// `spawn_order_update_drain` stay generic over all three.
#[async_trait::async_trait]
trait ApplyOrderUpdate {
    async fn apply_order_update(&self, update: DecodedOrderUpdate);
}

#[async_trait::async_trait]
impl ApplyOrderUpdate for mmb_exchange_binance::BinancePrivateConnector {
    async fn apply_order_update(&self, update: DecodedOrderUpdate) {
        mmb_exchange_binance::BinancePrivateConnector::apply_order_update(self, update).await
    }
}

#[async_trait::async_trait]
impl ApplyOrderUpdate for mmb_exchange_okx::OkxPrivateConnector {
    async fn apply_order_update(&self, update: DecodedOrderUpdate) {
        mmb_exchange_okx::OkxPrivateConnector::apply_order_update(self, update).await
    }
}

#[async_trait::async_trait]
impl ApplyOrderUpdate for mmb_exchange_bybit::BybitPrivateConnector {
    async fn apply_order_update(&self, update: DecodedOrderUpdate) {
        mmb_exchange_bybit::BybitPrivateConnector::apply_order_update(self, update).await
    }
}

/// Fires one TWAP on the first book update, then just logs the lifecycle,
/// mirroring `Demo(Strategy)` in the original TWAP example.
struct DemoStrategy {
    host: Arc<StrategyHost>,
    venue: Venue,
    account_type: Option<AccountType>,
    started: AtomicBool,
}

impl DemoStrategy {
    fn new(host: Arc<StrategyHost>, venue: Venue, account_type: Option<AccountType>) -> Self {
        DemoStrategy {
            host,
            venue,
            account_type,
            started: AtomicBool::new(false),
        }
    }
}

impl Strategy for DemoStrategy {
    fn on_bookl1(&self, event: &BookL1) {
        // `event.symbol` carries whatever wire-native form the venue used
        // (Binance's compound `"BTCUSDT"`, OKX/Bybit's hyphenated form), not
        // the normalized `DEMO_SYMBOL`, so only the venue is filtered here.
        if event.exchange != self.venue {
            return;
        }
        if self.started.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return;
        }
        log::info!("first book update seen ({} @ {}), starting TWAP", event.symbol, event.mid());
        let amount = DEMO_TWAP_AMOUNT.parse().expect("valid decimal literal");
        self.host.create_twap(
            self.venue,
            DEMO_SYMBOL,
            Side::Buy,
            amount,
            DEMO_TWAP_DURATION_S,
            DEMO_TWAP_WAIT_S,
            self.account_type,
        );
    }

    fn on_trade(&self, _event: &Trade) {}
    fn on_kline(&self, _event: &Kline) {}

    fn on_accepted_order(&self, order: &Order) {
        log::info!("order {} accepted", order.uuid);
    }

    fn on_partially_filled_order(&self, order: &Order) {
        log::info!("order {} partially filled: {}/{}", order.uuid, order.filled, order.amount);
    }

    fn on_filled_order(&self, order: &Order) {
        log::info!("order {} filled", order.uuid);
    }

    fn on_canceled_order(&self, order: &Order) {
        log::info!("order {} canceled", order.uuid);
    }

    fn on_failed_order(&self, order: &Order) {
        log::warn!("order {} failed", order.uuid);
    }

    fn on_balance(&self, event: &BalanceEvent) {
        log::debug!("balance update for {:?}/{:?}", event.venue, event.account_type);
    }
}
