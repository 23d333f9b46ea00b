use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Duration, Instant, MissedTickBehavior};

use super::BotRegistry;
use crate::execution::{EngineDeps, TradingEngine};
use crate::feed::{MarketDataFeed, UserDataStream};
use crate::models::SymbolId;
use crate::notify::messages;
use crate::Result;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Engines started and stopped by one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub started: Vec<SymbolId>,
    pub stopped: Vec<SymbolId>,
}

/// Owns the shared feed, the user stream and the engine registry
///
/// The configured symbol set is the source of truth: each reconciliation
/// starts engines for new symbols, stops engines for removed ones and
/// nudges the feed to adjust its subscriptions on the live connection.
pub struct Supervisor {
    deps: EngineDeps,
    registry: Arc<BotRegistry>,
    feed: Arc<MarketDataFeed>,
    user_stream: Option<Arc<UserDataStream>>,
    reconcile_every: Duration,
    shutdown_tx: watch::Sender<bool>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(
        deps: EngineDeps,
        registry: Arc<BotRegistry>,
        feed: Arc<MarketDataFeed>,
        user_stream: Option<Arc<UserDataStream>>,
        reconcile_every: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            deps,
            registry,
            feed,
            user_stream,
            reconcile_every,
            shutdown_tx,
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<BotRegistry> {
        &self.registry
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Start the feed once, then one engine per configured symbol
    pub async fn start(&self) {
        tracing::info!("🔄 Starting market data feed...");
        let feed_task = tokio::spawn(self.feed.clone().run(self.shutdown_signal()));
        self.background.lock().push(feed_task);

        if let Some(stream) = &self.user_stream {
            tracing::info!("🔄 Starting user data stream...");
            let task = tokio::spawn(stream.clone().run(self.shutdown_signal()));
            self.background.lock().push(task);
        }

        let outcome = self.reconcile();
        tracing::info!("✅ {} engines spawned", outcome.started.len());

        let symbols = self.registry.list();
        self.deps
            .notifier
            .send(&messages::startup(&self.deps.bot_name, &symbols))
            .await;
    }

    /// Bring the registry in line with the configured symbols
    pub fn reconcile(&self) -> Reconciliation {
        let desired = self.deps.config.symbols();
        let mut outcome = Reconciliation::default();

        for symbol in self.registry.reap_finished() {
            tracing::warn!(symbol = %symbol, "Restarting engine");
        }

        for symbol in self.registry.list() {
            if !desired.contains(&symbol) {
                self.registry.stop(&symbol);
                outcome.stopped.push(symbol);
            }
        }

        for symbol in desired {
            let deps = self.deps.clone();
            let engine_symbol = symbol.clone();
            if self
                .registry
                .start(symbol.clone(), move || TradingEngine::new(engine_symbol, deps))
            {
                outcome.started.push(symbol);
            }
        }

        if !outcome.started.is_empty() || !outcome.stopped.is_empty() {
            tracing::info!(
                started = ?outcome.started,
                stopped = ?outcome.stopped,
                "🔁 Engines reconciled"
            );
            self.feed.request_reconcile();
        }
        outcome
    }

    /// Add to the persisted symbol set and start its engine
    pub fn add_symbol(&self, symbol: SymbolId) -> Result<bool> {
        let added = self.deps.config.add_symbol(symbol)?;
        self.reconcile();
        Ok(added)
    }

    /// Remove from the persisted symbol set and stop its engine
    pub fn remove_symbol(&self, symbol: &SymbolId) -> Result<bool> {
        let removed = self.deps.config.remove_symbol(symbol)?;
        self.reconcile();
        Ok(removed)
    }

    /// Periodic reconcile (picks up external edits of the dynamic config file)
    pub async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown_signal();
        let mut ticker = interval_at(Instant::now() + self.reconcile_every, self.reconcile_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.deps.config.reload() {
                        Ok(true) => tracing::info!("📂 Dynamic config changed on disk"),
                        Ok(false) => {}
                        Err(e) => tracing::warn!("Dynamic config reload failed: {}", e),
                    }
                    self.reconcile();
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Stop every engine and background stream, waiting for them to finish
    pub async fn shutdown(&self) {
        tracing::info!("⚠️  Shutting down {} engines...", self.registry.len());
        self.shutdown_tx.send_replace(true);

        let mut tasks = self.registry.stop_all();
        tasks.extend(self.background.lock().drain(..));

        for task in tasks {
            if timeout(SHUTDOWN_GRACE, task).await.is_err() {
                tracing::warn!("Task did not stop within {:?}", SHUTDOWN_GRACE);
            }
        }
        tracing::info!("👋 All engines stopped");
    }
}
