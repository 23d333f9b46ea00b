use std::sync::Arc;

use crate::api::Exchange;
use crate::backtest::metrics::{BacktestReport, TradeRecord};
use crate::config::SymbolSettings;
use crate::error::BotError;
use crate::execution::RetryPolicy;
use crate::indicators::{columns, IndicatorProvider, IndicatorSnapshot};
use crate::models::{Candle, Signal, SymbolId};
use crate::strategy::signal_at;
use crate::Result;

/// Walk the snapshot bar by bar with the live signal function
///
/// Entries and exits both fill at the bar's close. At most one position is
/// open at a time; a position still open at the end stays in the trade list
/// without an exit.
pub fn simulate_strategy(snapshot: &IndicatorSnapshot) -> BacktestReport {
    let mut trades: Vec<TradeRecord> = Vec::new();
    let mut position_open = false;

    for i in 1..snapshot.len() {
        let Some(close) = snapshot.value(columns::CLOSE, i) else {
            continue;
        };
        let open_time = snapshot.candles()[i].open_time;

        match signal_at(snapshot, i, position_open) {
            Signal::Buy => {
                trades.push(TradeRecord::open(open_time, close));
                position_open = true;
            }
            Signal::Sell => {
                if let Some(trade) = trades.last_mut() {
                    trade.close(open_time, close);
                }
                position_open = false;
            }
            Signal::Hold => {}
        }
    }

    let report = BacktestReport::from_trades(trades);
    tracing::info!(
        "Backtest finished: {} closed trades, total profit {:.2}%",
        report.closed_trades,
        report.total_profit_pct
    );
    report
}

/// Replays historical klines through the same indicators the engines use
pub struct BacktestRunner {
    provider: Arc<dyn IndicatorProvider>,
}

impl BacktestRunner {
    pub fn new(provider: Arc<dyn IndicatorProvider>) -> Self {
        Self { provider }
    }

    /// Compute indicators over `candles` and simulate
    pub fn run(&self, candles: Vec<Candle>, settings: &SymbolSettings) -> Result<BacktestReport> {
        if candles.len() < 2 {
            return Err(BotError::DataUnavailable(format!(
                "Not enough candles for backtest: got {}",
                candles.len()
            )));
        }

        tracing::info!("Starting backtest: {} candles", candles.len());
        let snapshot = self.provider.compute(candles, &settings.indicator)?;
        Ok(simulate_strategy(&snapshot))
    }

    /// Download `limit` candles for `symbol` and run
    pub async fn fetch_and_run(
        &self,
        exchange: &dyn Exchange,
        symbol: &SymbolId,
        settings: &SymbolSettings,
        limit: u32,
        retry: &RetryPolicy,
    ) -> Result<BacktestReport> {
        let candles = retry
            .run("backtest klines", || {
                exchange.klines(symbol, &settings.interval, limit)
            })
            .await?;
        self.run(candles, settings)
    }
}
