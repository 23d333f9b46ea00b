use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use multibot::api::BinanceClient;
use multibot::backtest::{BacktestReport, BacktestRunner};
use multibot::config::AppConfig;
use multibot::indicators::TechnicalIndicators;
use multibot::SymbolId;

#[derive(Parser, Debug)]
#[command(name = "backtest", about = "Replay recent klines through the trading signal")]
struct Args {
    /// Config file (TOML); defaults to ./multibot.toml when present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma separated symbols; defaults to the configured startup symbols
    #[arg(long, value_delimiter = ',')]
    symbols: Vec<String>,

    /// Kline interval, overrides the configured one
    #[arg(long)]
    interval: Option<String>,

    /// Number of candles to replay (the exchange caps this at 1000)
    #[arg(long, default_value_t = 1000)]
    limit: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter("multibot=info")
        .init();

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║           MULTIBOT BACKTESTING SUITE                  ║");
    println!("╚═══════════════════════════════════════════════════════╝");

    let config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    let symbols: Vec<SymbolId> = if args.symbols.is_empty() {
        config.startup_symbols()
    } else {
        args.symbols
            .iter()
            .map(|raw| SymbolId::parse(raw))
            .collect::<Result<_, _>>()
            .context("parsing --symbols")?
    };

    let mut settings = config.defaults.clone();
    if let Some(interval) = args.interval {
        settings.interval = interval;
    }

    let client = BinanceClient::new(&config.binance).context("building Binance client")?;
    let runner = BacktestRunner::new(Arc::new(TechnicalIndicators));

    let mut results = Vec::new();
    for symbol in symbols {
        println!("\n🔬 Running backtest: {}", symbol);
        println!("   Interval: {}", settings.interval);
        println!("   Candles: {}", args.limit);

        match runner
            .fetch_and_run(&client, &symbol, &settings, args.limit, &config.retry)
            .await
        {
            Ok(report) => {
                report.print_report();
                results.push((symbol, report));
            }
            Err(e) => eprintln!("❌ Backtest failed for {}: {}", symbol, e),
        }
    }

    print_summary(&results);
    Ok(())
}

fn print_summary(results: &[(SymbolId, BacktestReport)]) {
    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║                  SYMBOL COMPARISON                    ║");
    println!("╚═══════════════════════════════════════════════════════╝\n");

    println!(
        "{:<14} {:>10} {:>8} {:>8} {:>10}",
        "Symbol", "Profit%", "Trades", "Win%", "MaxDD%"
    );
    println!("{}", "─".repeat(54));

    for (symbol, report) in results {
        println!(
            "{:<14} {:>10.2} {:>8} {:>8.1} {:>10.2}",
            symbol.as_str(),
            report.total_profit_pct,
            report.closed_trades,
            report.win_rate,
            report.max_drawdown_pct
        );
    }

    if let Some((best, report)) = results
        .iter()
        .max_by(|a, b| a.1.total_profit_pct.total_cmp(&b.1.total_profit_pct))
    {
        println!("\n🏆 Best Symbol: {} ({:+.2}%)", best, report.total_profit_pct);
    }

    println!("\n═══════════════════════════════════════════════════════\n");
}
