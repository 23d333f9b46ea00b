use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use multibot::api::{BinanceClient, Exchange, PaperExchange};
use multibot::config::{AppConfig, ConfigStore};
use multibot::execution::{EngineDeps, MoneyManager};
use multibot::feed::{MarketDataFeed, PriceCache, UserDataStream};
use multibot::indicators::TechnicalIndicators;
use multibot::notify::{LogNotifier, Notifier, TelegramNotifier};
use multibot::orchestration::{BotRegistry, Supervisor};
use multibot::performance::{PerformanceTracker, ReportScheduler};
use multibot::strategy::build_refiner;
use multibot::SymbolId;
use tokio::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "multibot", about = "Multi-symbol spot trading bot")]
struct Args {
    /// Config file (TOML); defaults to ./multibot.toml when present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma separated startup symbols, overrides the config file
    #[arg(long, value_delimiter = ',')]
    symbols: Vec<String>,

    /// Fill orders locally at the feed price instead of sending them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging();

    tracing::info!("🚀 MultiBot starting");

    let mut config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    if !args.symbols.is_empty() {
        config.symbols = args.symbols.clone();
    }

    let startup_symbols = config.startup_symbols();
    let store = Arc::new(
        ConfigStore::open(
            &config.dynamic_config_path,
            config.defaults.clone(),
            startup_symbols,
        )
        .context("opening dynamic config")?,
    );
    let symbols: Vec<SymbolId> = store.symbols();
    tracing::info!("📋 Trading {} symbols: {:?}", symbols.len(), symbols);

    let cache = PriceCache::new();
    let binance: Arc<dyn Exchange> =
        Arc::new(BinanceClient::new(&config.binance).context("building Binance client")?);
    let exchange: Arc<dyn Exchange> = if args.dry_run {
        tracing::warn!("🧪 Dry run: orders are filled locally at the feed price");
        Arc::new(PaperExchange::new(binance.clone(), cache.clone()))
    } else {
        binance.clone()
    };

    let notifier: Arc<dyn Notifier> = match TelegramNotifier::from_settings(&config.telegram)? {
        Some(telegram) => {
            tracing::info!("📨 Telegram notifications enabled");
            Arc::new(telegram)
        }
        None => {
            tracing::info!("Telegram not configured, notifications go to the log");
            Arc::new(LogNotifier)
        }
    };

    let performance = Arc::new(PerformanceTracker::new(&config.performance_log_path));
    let refiner = build_refiner(config.refiner);
    if let Some(refiner) = &refiner {
        tracing::info!("🧠 Signal refiner: {}", refiner.name());
    }

    let deps = EngineDeps {
        exchange: exchange.clone(),
        cache: cache.clone(),
        config: store.clone(),
        indicators: Arc::new(TechnicalIndicators),
        refiner,
        money: Arc::new(MoneyManager::new(exchange.clone(), config.retry.clone())),
        notifier: notifier.clone(),
        performance: performance.clone(),
        retry: config.retry.clone(),
        bot_name: config.telegram.bot_name.clone(),
    };

    let feed = Arc::new(MarketDataFeed::new(
        config.binance.ws_url(),
        config.feed.clone(),
        store.clone(),
        cache,
        notifier.clone(),
    ));

    let user_stream = if args.dry_run || config.binance.api_key.is_empty() {
        tracing::info!("User data stream disabled");
        None
    } else {
        Some(Arc::new(UserDataStream::new(
            config.binance.ws_url(),
            config.feed.clone(),
            binance,
            notifier.clone(),
            config.retry.clone(),
        )))
    };

    let supervisor = Arc::new(Supervisor::new(
        deps,
        Arc::new(BotRegistry::new()),
        feed,
        user_stream,
        Duration::from_secs(config.supervisor_interval_secs.max(1)),
    ));

    let scheduler = ReportScheduler {
        performance,
        notifier,
        exchange,
        config: store,
        retry: config.retry.clone(),
    };
    let scheduler_task = tokio::spawn(scheduler.run(supervisor.shutdown_signal()));

    supervisor.start().await;
    let supervisor_task = tokio::spawn(supervisor.clone().run());

    tracing::info!("✅ All loops started. Press Ctrl+C to stop.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("⚠️  Received shutdown signal");
        }
    }

    supervisor.shutdown().await;
    let _ = supervisor_task.await;
    let _ = scheduler_task.await;

    tracing::info!("👋 MultiBot stopped");
    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("multibot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
