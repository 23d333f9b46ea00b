//! Per-symbol trading state machine
//!
//! One engine owns one symbol's `PositionState` and exchange filters. Each
//! cycle reads the live config, waits for a feed price, refreshes the
//! indicator snapshot and acts on the resulting signal. Cycles are strictly
//! sequential; stop and pause requests are observed between cycles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rust_decimal::prelude::*;
use tokio::sync::watch;
use tokio::time::{sleep, Duration, Instant};

use super::{quantize_down, ClosedTrade, MoneyManager, PositionState, RetryPolicy};
use crate::api::{new_client_order_id, Exchange};
use crate::config::{ConfigStore, SymbolSettings};
use crate::error::BotError;
use crate::feed::PriceCache;
use crate::indicators::{columns, IndicatorProvider, IndicatorSnapshot};
use crate::models::{ExchangeFilters, OrderFill, Side, Signal, SymbolId};
use crate::notify::{messages, Notifier};
use crate::performance::PerformanceTracker;
use crate::strategy::{apply_refinement, indicator_signal, SignalRefiner};

/// Price polling is more patient while the feed cache warms up
const WARMUP: Duration = Duration::from_secs(20);
const WARMUP_PRICE_ATTEMPTS: u32 = 10;
const PRICE_ATTEMPTS: u32 = 5;
const PRICE_POLL_DELAY: Duration = Duration::from_secs(3);

/// Lifecycle requests sent to a running engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineControl {
    Running,
    Paused,
    Stopped,
}

/// What a single cycle did
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Nothing evaluated: missing price, history or filters
    Skipped { reason: String },
    Held { signal: Signal },
    /// Sizing came out at zero; not an error
    ZeroQuantity,
    Bought { quantity: Decimal, entry_price: Decimal },
    Sold { trade: ClosedTrade },
    OrderFailed { side: Side, error: String },
}

impl CycleOutcome {
    fn skipped(reason: impl Into<String>) -> Self {
        CycleOutcome::Skipped {
            reason: reason.into(),
        }
    }
}

/// Shared collaborators handed to every engine
#[derive(Clone)]
pub struct EngineDeps {
    pub exchange: Arc<dyn Exchange>,
    pub cache: PriceCache,
    pub config: Arc<ConfigStore>,
    pub indicators: Arc<dyn IndicatorProvider>,
    pub refiner: Option<Arc<dyn SignalRefiner>>,
    pub money: Arc<MoneyManager>,
    pub notifier: Arc<dyn Notifier>,
    pub performance: Arc<PerformanceTracker>,
    pub retry: RetryPolicy,
    pub bot_name: String,
}

pub struct TradingEngine {
    symbol: SymbolId,
    deps: EngineDeps,
    position: PositionState,
    filters: Option<ExchangeFilters>,
    started_at: Instant,
    control: Option<watch::Receiver<EngineControl>>,
}

impl TradingEngine {
    pub fn new(symbol: SymbolId, deps: EngineDeps) -> Self {
        Self {
            symbol,
            deps,
            position: PositionState::default(),
            filters: None,
            started_at: Instant::now(),
            control: None,
        }
    }

    pub fn symbol(&self) -> &SymbolId {
        &self.symbol
    }

    pub fn position(&self) -> &PositionState {
        &self.position
    }

    /// Drive cycles until told to stop (or the control channel goes away)
    pub async fn run(mut self, mut control: watch::Receiver<EngineControl>) {
        tracing::info!(symbol = %self.symbol, "🤖 Trading engine started");
        self.control = Some(control.clone());
        self.retrain_refiner().await;

        loop {
            let state = *control.borrow_and_update();
            let settings = self.deps.config.settings_for(&self.symbol);

            match state {
                EngineControl::Stopped => break,
                EngineControl::Paused => {
                    tracing::debug!(symbol = %self.symbol, "Engine paused, skipping cycle");
                }
                EngineControl::Running => {
                    let outcome = self.run_cycle().await;
                    tracing::debug!(symbol = %self.symbol, ?outcome, "Cycle finished");
                }
            }

            tokio::select! {
                _ = sleep(Duration::from_secs(settings.cycle_interval_secs.max(1))) => {}
                changed = control.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(symbol = %self.symbol, "🛑 Trading engine stopped");
    }

    /// One evaluate/size/submit pass
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let config = self.deps.config.snapshot();
        let settings = config.settings_for(&self.symbol);

        let Some(price) = self.wait_for_price().await else {
            tracing::warn!(symbol = %self.symbol, "⚠️  No price from feed, skipping cycle");
            return CycleOutcome::skipped("no price");
        };

        let snapshot = match self.fetch_snapshot(&settings).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(symbol = %self.symbol, "⚠️  Indicator refresh failed: {}", e);
                return CycleOutcome::skipped(format!("no indicators: {}", e));
            }
        };
        let Some(last_close) = snapshot.last_close().and_then(Decimal::from_f64) else {
            return CycleOutcome::skipped("no close");
        };

        let mut signal = indicator_signal(&snapshot, self.position.is_open());
        if let Some(refiner) = &self.deps.refiner {
            let (refined, confidence) =
                refiner.analyze(&snapshot, signal, price.to_f64().unwrap_or_default());
            let chosen = apply_refinement(signal, refined, confidence);
            if chosen != signal {
                tracing::info!(
                    symbol = %self.symbol,
                    refiner = refiner.name(),
                    confidence,
                    "🧠 Signal {} overridden to {}",
                    signal,
                    chosen
                );
            }
            signal = chosen;
        }

        match (signal, self.position.is_open()) {
            (Signal::Buy, false) => self.enter(price, last_close, &snapshot, &settings).await,
            (Signal::Sell, true) => self.exit(last_close).await,
            (signal, _) => CycleOutcome::Held { signal },
        }
    }

    async fn wait_for_price(&self) -> Option<Decimal> {
        let attempts = if self.started_at.elapsed() < WARMUP {
            WARMUP_PRICE_ATTEMPTS
        } else {
            PRICE_ATTEMPTS
        };
        let cache = &self.deps.cache;
        let symbol = &self.symbol;

        RetryPolicy::fixed(attempts, PRICE_POLL_DELAY)
            .poll("feed price", || cache.latest_price(symbol))
            .await
    }

    async fn fetch_snapshot(&self, settings: &SymbolSettings) -> crate::Result<IndicatorSnapshot> {
        let exchange = &self.deps.exchange;
        let symbol = &self.symbol;
        let operation = format!("klines {}", symbol);

        let candles = self
            .deps
            .retry
            .run(&operation, || exchange.klines(symbol, &settings.interval, settings.kline_limit))
            .await;
        let candles = match candles {
            Ok(candles) => candles,
            Err(e) => {
                self.escalate(&e).await;
                return Err(e);
            }
        };

        self.deps.indicators.compute(candles, &settings.indicator)
    }

    async fn ensure_filters(&mut self) -> Option<ExchangeFilters> {
        if self.filters.is_none() {
            let exchange = &self.deps.exchange;
            let symbol = &self.symbol;
            match self
                .deps
                .retry
                .run("exchange filters", || exchange.filters(symbol))
                .await
            {
                Ok(filters) => {
                    tracing::info!(
                        symbol = %self.symbol,
                        step = %filters.step_size,
                        min_qty = %filters.min_qty,
                        "Exchange filters loaded"
                    );
                    self.filters = Some(filters);
                }
                Err(e) => {
                    tracing::warn!(symbol = %self.symbol, "Filters unavailable: {}", e);
                    self.escalate(&e).await;
                }
            }
        }
        self.filters.clone()
    }

    async fn enter(
        &mut self,
        price: Decimal,
        entry_price: Decimal,
        snapshot: &IndicatorSnapshot,
        settings: &SymbolSettings,
    ) -> CycleOutcome {
        if self.stop_requested() {
            tracing::info!(symbol = %self.symbol, "Stop requested, not opening a position");
            return CycleOutcome::skipped("stopping");
        }

        let Some(filters) = self.ensure_filters().await else {
            return CycleOutcome::skipped("no filters");
        };

        let volatility = if settings.risk.atr_sizing {
            atr_distance(snapshot)
        } else {
            None
        };
        let quantity = self
            .deps
            .money
            .size(Side::Buy, &self.symbol, price, volatility, Some(&filters), &settings.risk)
            .await;
        if quantity.is_zero() {
            tracing::info!(symbol = %self.symbol, "Buy signal but quantity sized to zero, holding");
            return CycleOutcome::ZeroQuantity;
        }

        let fill = match self.submit(Side::Buy, quantity).await {
            Ok(fill) => fill,
            Err(e) => {
                return CycleOutcome::OrderFailed {
                    side: Side::Buy,
                    error: e.to_string(),
                }
            }
        };

        let filled = if fill.executed_qty.is_zero() {
            quantity
        } else {
            fill.executed_qty
        };
        if let Err(e) = self.position.open(entry_price, filled) {
            tracing::error!(symbol = %self.symbol, "Position state rejected buy: {}", e);
            return CycleOutcome::OrderFailed {
                side: Side::Buy,
                error: e.to_string(),
            };
        }

        tracing::info!(
            symbol = %self.symbol,
            quantity = %filled,
            price = %entry_price,
            "🟢 BUY executed"
        );
        self.deps
            .performance
            .record_trade(Side::Buy, &self.symbol, filled, None);
        self.deps
            .notifier
            .send(&messages::trade(
                &self.deps.bot_name,
                Side::Buy,
                &self.symbol,
                filled,
                entry_price,
                None,
            ))
            .await;

        CycleOutcome::Bought {
            quantity: filled,
            entry_price,
        }
    }

    async fn exit(&mut self, exit_price: Decimal) -> CycleOutcome {
        let Some(recorded) = self.position.quantity() else {
            return CycleOutcome::Held { signal: Signal::Sell };
        };
        let Some(quantity) = self.sellable_quantity(recorded).await else {
            return CycleOutcome::OrderFailed {
                side: Side::Sell,
                error: "free balance below the minimum order size".to_string(),
            };
        };

        if let Err(e) = self.submit(Side::Sell, quantity).await {
            return CycleOutcome::OrderFailed {
                side: Side::Sell,
                error: e.to_string(),
            };
        }

        let mut trade = match self.position.close(exit_price) {
            Ok(trade) => trade,
            Err(e) => {
                tracing::error!(symbol = %self.symbol, "Position state rejected sell: {}", e);
                return CycleOutcome::OrderFailed {
                    side: Side::Sell,
                    error: e.to_string(),
                };
            }
        };

        trade.quantity = quantity;

        tracing::info!(
            target: "multibot::trades",
            symbol = %self.symbol,
            entry = %trade.entry_price,
            exit = %trade.exit_price,
            quantity = %trade.quantity,
            profit_pct = trade.profit_pct,
            "🔴 SELL executed, trade completed"
        );
        self.deps
            .performance
            .record_trade(Side::Sell, &self.symbol, trade.quantity, Some(trade.profit_pct));
        self.deps
            .notifier
            .send(&messages::trade(
                &self.deps.bot_name,
                Side::Sell,
                &self.symbol,
                trade.quantity,
                exit_price,
                Some(trade.profit_pct),
            ))
            .await;

        CycleOutcome::Sold { trade }
    }

    /// Recorded quantity, reduced to what the account can actually sell
    ///
    /// A commission charged in the base asset leaves the free balance just
    /// under the bought quantity. `None` when nothing sellable is left.
    async fn sellable_quantity(&mut self, recorded: Decimal) -> Option<Decimal> {
        let asset = self.symbol.base_asset();
        let exchange = &self.deps.exchange;
        let free = match self
            .deps
            .retry
            .run("base balance", || exchange.free_balance(&asset))
            .await
        {
            Ok(free) => free.unwrap_or(Decimal::ZERO),
            Err(e) => {
                tracing::warn!(symbol = %self.symbol, "Free {} unknown ({}), selling recorded quantity", asset, e);
                return Some(recorded);
            }
        };
        if free >= recorded {
            return Some(recorded);
        }

        let filters = self.ensure_filters().await;
        let capped = match &filters {
            Some(filters) => quantize_down(free, filters.step_size),
            None => free,
        };
        let below_minimum = capped.is_zero()
            || filters.as_ref().is_some_and(|filters| capped < filters.min_qty);
        if below_minimum {
            tracing::error!(
                symbol = %self.symbol,
                recorded = %recorded,
                free = %free,
                "❌ Free {} cannot cover a sell, position left open",
                asset
            );
            self.deps
                .notifier
                .send(&messages::critical(
                    &self.deps.bot_name,
                    &format!("[{}] free {} {} cannot cover the open position of {}", self.symbol, free, asset, recorded),
                ))
                .await;
            return None;
        }

        tracing::warn!(
            symbol = %self.symbol,
            recorded = %recorded,
            sell = %capped,
            "Free {} below recorded quantity, selling what is available",
            asset
        );
        Some(capped)
    }

    fn stop_requested(&self) -> bool {
        self.control
            .as_ref()
            .is_some_and(|control| *control.borrow() == EngineControl::Stopped)
    }

    /// Submit one order decision
    ///
    /// Every attempt carries the same client order id. After an attempt that
    /// got no answer the exchange is asked whether the order landed before
    /// it is sent again, so a slow reply never turns into a second order.
    async fn submit(&self, side: Side, quantity: Decimal) -> crate::Result<OrderFill> {
        let client_order_id = new_client_order_id();
        let operation = format!("market {} {}", side, self.symbol);
        let attempted = AtomicBool::new(false);

        let exchange = &self.deps.exchange;
        let symbol = &self.symbol;
        let id = client_order_id.as_str();
        let attempted_ref = &attempted;

        let mut result = self
            .deps
            .retry
            .run(&operation, move || async move {
                if attempted_ref.swap(true, Ordering::SeqCst) {
                    if let Some(fill) = exchange.find_order(symbol, id).await? {
                        tracing::warn!(symbol = %symbol, client_order_id = id, "Order found after an unanswered attempt");
                        return Ok(fill);
                    }
                }
                exchange.market_order(symbol, side, quantity, id).await
            })
            .await;

        // The last attempt may still have reached the exchange
        if matches!(result, Err(BotError::RetriesExhausted { .. })) {
            let lookup = self
                .deps
                .retry
                .run("order lookup", move || exchange.find_order(symbol, id))
                .await;
            if let Ok(Some(fill)) = lookup {
                tracing::warn!(symbol = %symbol, client_order_id = id, "Order found after retries ran out");
                result = Ok(fill);
            }
        }

        if let Err(e) = &result {
            tracing::error!(symbol = %self.symbol, side = %side, "❌ Order failed: {}", e);
            self.escalate(e).await;
        }
        result
    }

    /// Exhausted retries are reported to the operator; the engine carries on
    async fn escalate(&self, error: &BotError) {
        if let BotError::RetriesExhausted { .. } = error {
            self.deps
                .notifier
                .send(&messages::critical(
                    &self.deps.bot_name,
                    &format!("[{}] {}", self.symbol, error),
                ))
                .await;
        }
    }

    /// Refresh the refiner from recent history before the first cycle
    async fn retrain_refiner(&self) {
        let Some(refiner) = &self.deps.refiner else {
            return;
        };
        let settings = self.deps.config.settings_for(&self.symbol);
        match self.fetch_snapshot(&settings).await {
            Ok(history) => {
                if let Err(e) = refiner.retrain(&history) {
                    tracing::warn!(symbol = %self.symbol, "Refiner retrain failed: {}", e);
                }
            }
            Err(e) => tracing::warn!(symbol = %self.symbol, "No history for refiner retrain: {}", e),
        }
    }
}

/// Last ATR as a fraction of the last close
fn atr_distance(snapshot: &IndicatorSnapshot) -> Option<Decimal> {
    let last = snapshot.len().checked_sub(1)?;
    let atr = snapshot.value(columns::ATR, last)?;
    let close = snapshot.value(columns::CLOSE, last)?;
    if close <= 0.0 {
        return None;
    }
    Decimal::from_f64(atr / close)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndicatorParams;
    use crate::models::{AssetBalance, Candle};
    use crate::notify::RecordingNotifier;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::collections::{HashMap, VecDeque};
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeExchange {
        orders: Mutex<Vec<(Side, Decimal)>>,
        fills: Mutex<HashMap<String, OrderFill>>,
        reject_orders: bool,
        fail_klines: bool,
        /// Orders are accepted at once but answered only after this delay
        order_delay: Option<Duration>,
        /// Free BTC; 5 when unset
        base_free: Option<Decimal>,
    }

    #[async_trait]
    impl Exchange for FakeExchange {
        async fn klines(&self, _: &SymbolId, _: &str, _: u32) -> crate::Result<Vec<Candle>> {
            if self.fail_klines {
                return Err(BotError::Timeout);
            }
            Ok(Vec::new())
        }
        async fn balances(&self) -> crate::Result<Vec<AssetBalance>> {
            Ok(vec![
                AssetBalance {
                    asset: "USDC".to_string(),
                    free: dec!(10000),
                    locked: Decimal::ZERO,
                },
                AssetBalance {
                    asset: "BTC".to_string(),
                    free: self.base_free.unwrap_or(dec!(5)),
                    locked: Decimal::ZERO,
                },
            ])
        }
        async fn filters(&self, _: &SymbolId) -> crate::Result<ExchangeFilters> {
            Ok(ExchangeFilters {
                step_size: dec!(0.001),
                min_qty: dec!(0.001),
                max_qty: dec!(100),
                min_notional: Some(dec!(10)),
            })
        }
        async fn market_order(
            &self,
            symbol: &SymbolId,
            side: Side,
            quantity: Decimal,
            client_order_id: &str,
        ) -> crate::Result<OrderFill> {
            if self.reject_orders {
                return Err(BotError::Exchange {
                    code: -2010,
                    msg: "insufficient balance".to_string(),
                });
            }
            let fill = {
                let mut orders = self.orders.lock();
                orders.push((side, quantity));
                OrderFill {
                    symbol: symbol.clone(),
                    side,
                    order_id: orders.len() as u64,
                    client_order_id: client_order_id.to_string(),
                    executed_qty: quantity,
                    avg_price: None,
                    status: "FILLED".to_string(),
                }
            };
            self.fills.lock().insert(client_order_id.to_string(), fill.clone());
            if let Some(delay) = self.order_delay {
                sleep(delay).await;
            }
            Ok(fill)
        }
        async fn find_order(&self, _: &SymbolId, client_order_id: &str) -> crate::Result<Option<OrderFill>> {
            Ok(self.fills.lock().get(client_order_id).cloned())
        }
        async fn create_listen_key(&self) -> crate::Result<String> {
            Ok("key".to_string())
        }
        async fn keepalive_listen_key(&self, _: &str) -> crate::Result<()> {
            Ok(())
        }
    }

    /// Hands out prepared snapshots in order, repeating the last one
    struct Scripted(Mutex<VecDeque<IndicatorSnapshot>>);

    impl IndicatorProvider for Scripted {
        fn compute(&self, _: Vec<Candle>, _: &IndicatorParams) -> crate::Result<IndicatorSnapshot> {
            let mut queue = self.0.lock();
            match queue.len() {
                0 => Err(BotError::DataUnavailable("empty script".to_string())),
                1 => Ok(queue[0].clone()),
                _ => Ok(queue.pop_front().unwrap_or_default()),
            }
        }
    }

    fn bars(closes: &[f64], cols: &[(&'static str, [Option<f64>; 2])]) -> IndicatorSnapshot {
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, close)| Candle {
                open_time: Utc.timestamp_opt(i as i64 * 14_400, 0).unwrap(),
                open: *close,
                high: *close,
                low: *close,
                close: *close,
                volume: 1.0,
            })
            .collect();
        let mut snapshot = IndicatorSnapshot::new(candles);
        for (name, values) in cols {
            snapshot.insert(*name, values.to_vec()).unwrap();
        }
        snapshot
    }

    /// RSI and OBV both cross up on the last bar
    fn entry_snapshot() -> IndicatorSnapshot {
        bars(
            &[100.0, 100.0],
            &[
                (columns::RSI, [Some(40.0), Some(55.0)]),
                (columns::RSI_MA, [Some(50.0), Some(50.0)]),
                (columns::OBV, [Some(-5.0), Some(5.0)]),
                (columns::LOWER_BAND, [Some(0.0), Some(0.0)]),
                (columns::UPPER_BAND, [Some(50.0), Some(50.0)]),
                (columns::LC_MA1, [Some(90.0), Some(90.0)]),
            ],
        )
    }

    /// Close drops below the fast MA
    fn exit_snapshot() -> IndicatorSnapshot {
        bars(
            &[100.0, 110.0],
            &[
                (columns::RSI, [Some(60.0), Some(60.0)]),
                (columns::RSI_MA, [Some(50.0), Some(50.0)]),
                (columns::OBV, [Some(5.0), Some(5.0)]),
                (columns::LOWER_BAND, [Some(0.0), Some(0.0)]),
                (columns::UPPER_BAND, [Some(50.0), Some(50.0)]),
                (columns::LC_MA1, [Some(100.0), Some(120.0)]),
            ],
        )
    }

    struct Harness {
        _dir: TempDir,
        exchange: Arc<FakeExchange>,
        notifier: Arc<RecordingNotifier>,
        performance: Arc<PerformanceTracker>,
        engine: TradingEngine,
    }

    fn harness(exchange: FakeExchange, script: Vec<IndicatorSnapshot>, with_price: bool) -> Harness {
        let dir = TempDir::new().unwrap();
        let symbol = SymbolId::parse("BTCUSDC").unwrap();
        let config = Arc::new(
            ConfigStore::open(
                dir.path().join("dynamic.json"),
                SymbolSettings::default(),
                vec![symbol.clone()],
            )
            .unwrap(),
        );
        let cache = PriceCache::new();
        if with_price {
            cache.update(&symbol, dec!(100));
        }

        let exchange = Arc::new(exchange);
        let notifier = Arc::new(RecordingNotifier::default());
        let performance = Arc::new(PerformanceTracker::new(dir.path().join("perf.json")));
        let retry = RetryPolicy {
            max_attempts: 2,
            initial_delay_ms: 10,
            backoff_factor: 2,
            max_delay_ms: 100,
            call_timeout_ms: 1_000,
        };

        let deps = EngineDeps {
            exchange: exchange.clone(),
            cache,
            config,
            indicators: Arc::new(Scripted(Mutex::new(script.into()))),
            refiner: None,
            money: Arc::new(MoneyManager::new(exchange.clone(), retry.clone())),
            notifier: notifier.clone(),
            performance: performance.clone(),
            retry,
            bot_name: "TestBot".to_string(),
        };

        Harness {
            _dir: dir,
            exchange,
            notifier,
            performance,
            engine: TradingEngine::new(symbol, deps),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_engine_buys_once_on_double_crossover() {
        let mut h = harness(FakeExchange::default(), vec![entry_snapshot()], true);

        let outcome = h.engine.run_cycle().await;
        // 2% of 10000 USDC at 100 = 2.000
        assert_eq!(
            outcome,
            CycleOutcome::Bought {
                quantity: dec!(2.000),
                entry_price: dec!(100),
            }
        );
        assert!(h.engine.position().is_open());

        // Same bar again: already open, no second buy
        let outcome = h.engine.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::Held { signal: Signal::Hold });

        let orders = h.exchange.orders.lock().clone();
        assert_eq!(orders, vec![(Side::Buy, dec!(2.000))]);
        assert!(h.notifier.contains("Action: BUY"));
        assert_eq!(h.performance.data().buy_trades, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_records_profit() {
        let mut h = harness(
            FakeExchange::default(),
            vec![entry_snapshot(), exit_snapshot()],
            true,
        );

        assert!(matches!(h.engine.run_cycle().await, CycleOutcome::Bought { .. }));
        let CycleOutcome::Sold { trade } = h.engine.run_cycle().await else {
            panic!("expected a sell");
        };

        assert_eq!(trade.entry_price, dec!(100));
        assert_eq!(trade.exit_price, dec!(110));
        assert!((trade.profit_pct - 10.0).abs() < 1e-9);
        assert!(!h.engine.position().is_open());

        let orders = h.exchange.orders.lock().clone();
        assert_eq!(orders, vec![(Side::Buy, dec!(2.000)), (Side::Sell, dec!(2.000))]);
        assert_eq!(h.performance.symbol_summary(h.engine.symbol()), "Profit: 10.00%");
        assert!(h.notifier.contains("Profit: 10.00%"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_order_reply_is_not_resent() {
        // Accepted at once, answered long after the 1s call timeout
        let exchange = FakeExchange {
            order_delay: Some(Duration::from_secs(15)),
            ..FakeExchange::default()
        };
        let mut h = harness(exchange, vec![entry_snapshot()], true);

        let outcome = h.engine.run_cycle().await;
        assert_eq!(
            outcome,
            CycleOutcome::Bought {
                quantity: dec!(2.000),
                entry_price: dec!(100),
            }
        );
        assert!(h.engine.position().is_open());

        let orders = h.exchange.orders.lock().clone();
        assert_eq!(orders, vec![(Side::Buy, dec!(2.000))]);
        assert_eq!(h.exchange.fills.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sell_capped_to_free_balance() {
        // Commission paid in BTC left slightly less than was bought
        let exchange = FakeExchange {
            base_free: Some(dec!(1.9995)),
            ..FakeExchange::default()
        };
        let mut h = harness(exchange, vec![entry_snapshot(), exit_snapshot()], true);

        assert!(matches!(h.engine.run_cycle().await, CycleOutcome::Bought { .. }));
        let CycleOutcome::Sold { trade } = h.engine.run_cycle().await else {
            panic!("expected a sell");
        };

        assert_eq!(trade.quantity, dec!(1.999));
        assert!(!h.engine.position().is_open());
        let orders = h.exchange.orders.lock().clone();
        assert_eq!(orders, vec![(Side::Buy, dec!(2.000)), (Side::Sell, dec!(1.999))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dust_balance_keeps_position_open() {
        let exchange = FakeExchange {
            base_free: Some(dec!(0.0004)),
            ..FakeExchange::default()
        };
        let mut h = harness(exchange, vec![entry_snapshot(), exit_snapshot()], true);

        assert!(matches!(h.engine.run_cycle().await, CycleOutcome::Bought { .. }));
        let outcome = h.engine.run_cycle().await;

        assert!(matches!(outcome, CycleOutcome::OrderFailed { side: Side::Sell, .. }));
        assert!(h.engine.position().is_open());
        assert_eq!(h.exchange.orders.lock().len(), 1);
        assert!(h.notifier.contains("cannot cover"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_price_skips_cycle() {
        let mut h = harness(FakeExchange::default(), vec![entry_snapshot()], false);

        let outcome = h.engine.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::skipped("no price"));
        assert!(h.exchange.orders.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_order_keeps_engine_idle() {
        let exchange = FakeExchange {
            reject_orders: true,
            ..FakeExchange::default()
        };
        let mut h = harness(exchange, vec![entry_snapshot()], true);

        let outcome = h.engine.run_cycle().await;
        assert!(matches!(outcome, CycleOutcome::OrderFailed { side: Side::Buy, .. }));
        assert!(!h.engine.position().is_open());
        // Permanent rejection is not escalated as critical
        assert!(!h.notifier.contains("CRITICAL"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_klines_notify_critical() {
        let exchange = FakeExchange {
            fail_klines: true,
            ..FakeExchange::default()
        };
        let mut h = harness(exchange, vec![entry_snapshot()], true);

        let outcome = h.engine.run_cycle().await;
        assert!(matches!(outcome, CycleOutcome::Skipped { .. }));
        assert!(h.notifier.contains("CRITICAL ERROR"));
        assert!(h.exchange.orders.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_run_loop() {
        let h = harness(FakeExchange::default(), vec![entry_snapshot()], true);
        let (tx, rx) = watch::channel(EngineControl::Running);

        let task = tokio::spawn(h.engine.run(rx));
        tokio::time::sleep(Duration::from_secs(5)).await;
        tx.send(EngineControl::Stopped).unwrap();

        tokio::time::timeout(Duration::from_secs(120), task)
            .await
            .expect("engine should stop")
            .unwrap();
        assert_eq!(h.exchange.orders.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_request_blocks_new_entry() {
        let mut h = harness(FakeExchange::default(), vec![entry_snapshot()], true);
        let (tx, rx) = watch::channel(EngineControl::Running);
        h.engine.control = Some(rx);
        tx.send(EngineControl::Stopped).unwrap();

        let outcome = h.engine.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::skipped("stopping"));
        assert!(h.exchange.orders.lock().is_empty());
    }
}
