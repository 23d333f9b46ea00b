//! Engine lifecycle tests against an in-memory exchange
//!
//! The market feed points at a closed local port, so it keeps reconnecting
//! in the background while engines run off prices seeded into the cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use multibot::api::Exchange;
use multibot::config::{ConfigStore, FeedSettings, IndicatorParams, SymbolSettings};
use multibot::execution::{EngineControl, EngineDeps, MoneyManager, RetryPolicy, TradingEngine};
use multibot::feed::{MarketDataFeed, PriceCache};
use multibot::indicators::{columns, IndicatorProvider, IndicatorSnapshot, TechnicalIndicators};
use multibot::notify::RecordingNotifier;
use multibot::orchestration::{BotRegistry, Supervisor};
use multibot::performance::PerformanceTracker;
use multibot::{AssetBalance, Candle, ExchangeFilters, OrderFill, Side, SymbolId};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;
use tokio::time::Duration;

struct IdleExchange;

#[async_trait]
impl Exchange for IdleExchange {
    async fn klines(&self, _: &SymbolId, _: &str, _: u32) -> multibot::Result<Vec<Candle>> {
        Ok(Vec::new())
    }
    async fn balances(&self) -> multibot::Result<Vec<AssetBalance>> {
        Ok(Vec::new())
    }
    async fn filters(&self, _: &SymbolId) -> multibot::Result<ExchangeFilters> {
        Ok(ExchangeFilters {
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            max_qty: dec!(100),
            min_notional: None,
        })
    }
    async fn market_order(
        &self,
        symbol: &SymbolId,
        side: Side,
        quantity: Decimal,
        client_order_id: &str,
    ) -> multibot::Result<OrderFill> {
        Ok(fill(symbol, side, quantity, client_order_id))
    }
    async fn find_order(&self, _: &SymbolId, _: &str) -> multibot::Result<Option<OrderFill>> {
        Ok(None)
    }
    async fn create_listen_key(&self) -> multibot::Result<String> {
        Ok("key".to_string())
    }
    async fn keepalive_listen_key(&self, _: &str) -> multibot::Result<()> {
        Ok(())
    }
}

fn fill(symbol: &SymbolId, side: Side, quantity: Decimal, client_order_id: &str) -> OrderFill {
    OrderFill {
        symbol: symbol.clone(),
        side,
        order_id: 1,
        client_order_id: client_order_id.to_string(),
        executed_qty: quantity,
        avg_price: None,
        status: "FILLED".to_string(),
    }
}

/// Funded account that records every order it fills
#[derive(Default)]
struct FundedExchange {
    orders: Mutex<Vec<(SymbolId, Side)>>,
}

#[async_trait]
impl Exchange for FundedExchange {
    async fn klines(&self, _: &SymbolId, _: &str, _: u32) -> multibot::Result<Vec<Candle>> {
        Ok(Vec::new())
    }
    async fn balances(&self) -> multibot::Result<Vec<AssetBalance>> {
        Ok(vec![AssetBalance {
            asset: "USDC".to_string(),
            free: dec!(10000),
            locked: Decimal::ZERO,
        }])
    }
    async fn filters(&self, symbol: &SymbolId) -> multibot::Result<ExchangeFilters> {
        IdleExchange.filters(symbol).await
    }
    async fn market_order(
        &self,
        symbol: &SymbolId,
        side: Side,
        quantity: Decimal,
        client_order_id: &str,
    ) -> multibot::Result<OrderFill> {
        self.orders.lock().push((symbol.clone(), side));
        Ok(fill(symbol, side, quantity, client_order_id))
    }
    async fn find_order(&self, _: &SymbolId, _: &str) -> multibot::Result<Option<OrderFill>> {
        Ok(None)
    }
    async fn create_listen_key(&self) -> multibot::Result<String> {
        Ok("key".to_string())
    }
    async fn keepalive_listen_key(&self, _: &str) -> multibot::Result<()> {
        Ok(())
    }
}

/// Every cycle sees RSI and OBV crossing up together
struct AlwaysEntry;

impl IndicatorProvider for AlwaysEntry {
    fn compute(&self, _: Vec<Candle>, _: &IndicatorParams) -> multibot::Result<IndicatorSnapshot> {
        let candles = (0..2)
            .map(|i| Candle {
                open_time: Utc.timestamp_opt(i * 14_400, 0).unwrap(),
                open: 100.0,
                high: 100.0,
                low: 100.0,
                close: 100.0,
                volume: 1.0,
            })
            .collect();
        let mut snapshot = IndicatorSnapshot::new(candles);
        snapshot.insert(columns::RSI, vec![Some(40.0), Some(55.0)])?;
        snapshot.insert(columns::RSI_MA, vec![Some(50.0), Some(50.0)])?;
        snapshot.insert(columns::OBV, vec![Some(-5.0), Some(5.0)])?;
        snapshot.insert(columns::LOWER_BAND, vec![Some(0.0), Some(0.0)])?;
        snapshot.insert(columns::UPPER_BAND, vec![Some(50.0), Some(50.0)])?;
        snapshot.insert(columns::LC_MA1, vec![Some(90.0), Some(90.0)])?;
        Ok(snapshot)
    }
}

fn sym(raw: &str) -> SymbolId {
    SymbolId::parse(raw).unwrap()
}

struct Harness {
    _dir: TempDir,
    deps: EngineDeps,
    notifier: Arc<RecordingNotifier>,
}

impl Harness {
    fn new(symbols: &[&str]) -> Self {
        Self::build(symbols, Arc::new(IdleExchange), Arc::new(TechnicalIndicators), true)
    }

    fn build(
        symbols: &[&str],
        exchange: Arc<dyn Exchange>,
        indicators: Arc<dyn IndicatorProvider>,
        seed_prices: bool,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            ConfigStore::open(
                dir.path().join("dynamic_config.json"),
                SymbolSettings::default(),
                symbols.iter().map(|s| sym(s)).collect(),
            )
            .unwrap(),
        );

        let cache = PriceCache::new();
        if seed_prices {
            for raw in ["BTCUSDC", "ETHUSDC", "SOLUSDC"] {
                cache.update(&sym(raw), dec!(100));
            }
        }

        let retry = RetryPolicy::fixed(1, Duration::from_millis(10));
        let notifier = Arc::new(RecordingNotifier::default());

        let deps = EngineDeps {
            exchange: exchange.clone(),
            cache,
            config: store,
            indicators,
            refiner: None,
            money: Arc::new(MoneyManager::new(exchange, retry.clone())),
            notifier: notifier.clone(),
            performance: Arc::new(PerformanceTracker::new(dir.path().join("performance_log.json"))),
            retry,
            bot_name: "TestBot".to_string(),
        };

        Self {
            _dir: dir,
            deps,
            notifier,
        }
    }

    fn engine(&self, raw: &str) -> TradingEngine {
        TradingEngine::new(sym(raw), self.deps.clone())
    }

    fn supervisor(&self) -> Supervisor {
        let feed = Arc::new(MarketDataFeed::new(
            "ws://127.0.0.1:9",
            FeedSettings::default(),
            self.deps.config.clone(),
            self.deps.cache.clone(),
            self.deps.notifier.clone(),
        ));
        Supervisor::new(
            self.deps.clone(),
            Arc::new(BotRegistry::new()),
            feed,
            None,
            Duration::from_secs(30),
        )
    }
}

#[tokio::test(start_paused = true)]
async fn test_registry_start_is_idempotent() {
    let harness = Harness::new(&["BTCUSDC"]);
    let registry = BotRegistry::new();
    let builds = AtomicUsize::new(0);

    let first = registry.start(sym("BTCUSDC"), || {
        builds.fetch_add(1, Ordering::SeqCst);
        harness.engine("BTCUSDC")
    });
    let second = registry.start(sym("BTCUSDC"), || {
        builds.fetch_add(1, Ordering::SeqCst);
        harness.engine("BTCUSDC")
    });

    assert!(first);
    assert!(!second);
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert_eq!(registry.len(), 1);

    for task in registry.stop_all() {
        task.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_registry_stop_twice_is_harmless() {
    let harness = Harness::new(&["BTCUSDC"]);
    let registry = BotRegistry::new();
    registry.start(sym("BTCUSDC"), || harness.engine("BTCUSDC"));

    assert!(registry.stop(&sym("BTCUSDC")));
    assert!(!registry.stop(&sym("BTCUSDC")));
    assert!(!registry.is_registered(&sym("BTCUSDC")));

    for task in registry.stop_all() {
        task.await.unwrap();
    }
}

async fn wait_until_stopped(registry: &BotRegistry, symbol: &SymbolId) {
    for _ in 0..600 {
        if !registry.is_stopping(symbol) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("engine for {} never stopped", symbol);
}

#[tokio::test(start_paused = true)]
async fn test_restart_waits_for_engine_mid_cycle() {
    let exchange = Arc::new(FundedExchange::default());
    let harness = Harness::build(&["BTCUSDC"], exchange.clone(), Arc::new(AlwaysEntry), false);
    let registry = BotRegistry::new();
    let btc = sym("BTCUSDC");

    // Cold cache: the first engine sits waiting for a feed price
    assert!(registry.start(btc.clone(), || harness.engine("BTCUSDC")));
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(registry.stop(&btc));
    assert!(registry.is_stopping(&btc));
    assert!(!registry.start(btc.clone(), || harness.engine("BTCUSDC")));

    // The old engine wakes up with a buy signal after its stop request
    harness.deps.cache.update(&btc, dec!(100));
    wait_until_stopped(&registry, &btc).await;
    assert!(exchange.orders.lock().is_empty());

    assert!(registry.start(btc.clone(), || harness.engine("BTCUSDC")));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(*exchange.orders.lock(), vec![(btc.clone(), Side::Buy)]);

    for task in registry.stop_all() {
        task.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_defers_restart_until_old_engine_returns() {
    let exchange = Arc::new(FundedExchange::default());
    let harness = Harness::build(&["BTCUSDC"], exchange.clone(), Arc::new(AlwaysEntry), false);
    let supervisor = harness.supervisor();
    let btc = sym("BTCUSDC");
    supervisor.start().await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(supervisor.remove_symbol(&btc).unwrap());
    assert!(supervisor.add_symbol(btc.clone()).unwrap());
    // Re-added while the removed engine is still inside its cycle
    assert!(!supervisor.registry().is_registered(&btc));

    harness.deps.cache.update(&btc, dec!(100));
    wait_until_stopped(supervisor.registry(), &btc).await;
    let outcome = supervisor.reconcile();
    assert_eq!(outcome.started, vec![btc.clone()]);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(*exchange.orders.lock(), vec![(btc.clone(), Side::Buy)]);

    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_registry_pause_and_resume() {
    let harness = Harness::new(&["BTCUSDC"]);
    let registry = BotRegistry::new();
    let btc = sym("BTCUSDC");
    registry.start(btc.clone(), || harness.engine("BTCUSDC"));

    assert_eq!(registry.state(&btc), Some(EngineControl::Running));
    assert!(registry.pause(&btc));
    assert_eq!(registry.state(&btc), Some(EngineControl::Paused));
    assert!(registry.resume(&btc));
    assert_eq!(registry.state(&btc), Some(EngineControl::Running));

    assert!(!registry.pause(&sym("ETHUSDC")));
    assert_eq!(registry.state(&sym("ETHUSDC")), None);

    for task in registry.stop_all() {
        task.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_starts_configured_symbols() {
    let harness = Harness::new(&["BTCUSDC", "ETHUSDC"]);
    let supervisor = harness.supervisor();

    supervisor.start().await;

    assert_eq!(supervisor.registry().list(), vec![sym("BTCUSDC"), sym("ETHUSDC")]);
    assert!(harness.notifier.contains("TestBot started"));
    assert!(harness.notifier.contains("ETHUSDC"));

    // Nothing changed, nothing to do
    assert_eq!(supervisor.reconcile(), Default::default());

    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_add_and_remove_symbol() {
    let harness = Harness::new(&["BTCUSDC"]);
    let supervisor = harness.supervisor();
    supervisor.start().await;

    assert!(supervisor.add_symbol(sym("SOLUSDC")).unwrap());
    assert!(supervisor.registry().is_registered(&sym("SOLUSDC")));
    assert_eq!(harness.deps.config.symbols().len(), 2);

    // Adding again is a no-op
    assert!(!supervisor.add_symbol(sym("SOLUSDC")).unwrap());
    assert_eq!(supervisor.registry().len(), 2);

    assert!(supervisor.remove_symbol(&sym("BTCUSDC")).unwrap());
    assert!(!supervisor.registry().is_registered(&sym("BTCUSDC")));
    assert_eq!(supervisor.registry().list(), vec![sym("SOLUSDC")]);
    assert_eq!(harness.deps.config.symbols(), vec![sym("SOLUSDC")]);

    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_shutdown_stops_all_engines() {
    let harness = Harness::new(&["BTCUSDC", "ETHUSDC", "SOLUSDC"]);
    let supervisor = harness.supervisor();
    supervisor.start().await;
    assert_eq!(supervisor.registry().len(), 3);

    let shutdown = supervisor.shutdown_signal();
    supervisor.shutdown().await;

    assert!(supervisor.registry().is_empty());
    assert!(*shutdown.borrow());
}
