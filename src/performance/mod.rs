//! Process-wide trade counters and the periodic reports built from them

pub mod schedule;
pub mod wallet;

pub use schedule::{Job, ReportScheduler};
pub use wallet::wallet_summary;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{Side, SymbolId};
use crate::Result;

/// Counters accumulated since the last daily reset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceData {
    pub total_trades: u64,
    /// Sum of realized trade returns, in percent
    pub total_profit: f64,
    pub buy_trades: u64,
    pub sell_trades: u64,
    pub symbol_profit: BTreeMap<String, f64>,
}

/// One entry of the append-only performance log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub timestamp: String,
    pub report_type: String,
    pub report_message: String,
    pub performance_data: PerformanceData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Daily,
    Weekly,
}

impl ReportKind {
    fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Daily => "daily",
            ReportKind::Weekly => "weekly",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            ReportKind::Daily => "📈 *Daily Performance Report* 📈",
            ReportKind::Weekly => "📈 *Weekly Performance Report* 📈",
        }
    }
}

pub struct PerformanceTracker {
    data: Mutex<PerformanceData>,
    log_path: PathBuf,
}

impl PerformanceTracker {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            data: Mutex::new(PerformanceData::default()),
            log_path: log_path.into(),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Count a completed order; buys carry no realized profit
    pub fn record_trade(&self, side: Side, symbol: &SymbolId, quantity: Decimal, profit_pct: Option<f64>) {
        let profit = profit_pct.unwrap_or(0.0);
        {
            let mut data = self.data.lock();
            data.total_trades += 1;
            data.total_profit += profit;
            match side {
                Side::Buy => data.buy_trades += 1,
                Side::Sell => data.sell_trades += 1,
            }
            *data.symbol_profit.entry(symbol.to_string()).or_insert(0.0) += profit;
        }

        tracing::info!(
            target: "multibot::trades",
            side = %side,
            symbol = %symbol,
            quantity = %quantity,
            profit_pct = profit,
            "Trade recorded"
        );
    }

    pub fn data(&self) -> PerformanceData {
        self.data.lock().clone()
    }

    pub fn symbol_summary(&self, symbol: &SymbolId) -> String {
        match self.data.lock().symbol_profit.get(symbol.as_str()) {
            Some(profit) => format!("Profit: {:.2}%", profit),
            None => "No performance recorded.".to_string(),
        }
    }

    /// Render, log and reset
    pub fn daily_report(&self) -> Result<String> {
        let data = {
            let mut guard = self.data.lock();
            std::mem::take(&mut *guard)
        };
        self.report(ReportKind::Daily, data)
    }

    /// Render and log; counters keep accumulating
    pub fn weekly_report(&self) -> Result<String> {
        let data = self.data();
        self.report(ReportKind::Weekly, data)
    }

    fn report(&self, kind: ReportKind, data: PerformanceData) -> Result<String> {
        let message = render(kind, &data);
        self.append_log(ReportEntry {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            report_type: kind.as_str().to_string(),
            report_message: message.clone(),
            performance_data: data,
        })?;
        Ok(message)
    }

    /// Append to the JSON array on disk; an unreadable log starts over
    fn append_log(&self, entry: ReportEntry) -> Result<()> {
        let mut entries: Vec<ReportEntry> = match std::fs::read_to_string(&self.log_path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("Performance log unreadable, starting a new one: {}", e);
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        entries.push(entry);

        if let Some(parent) = self.log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.log_path, serde_json::to_string_pretty(&entries)?)?;
        tracing::debug!("Performance log saved to {}", self.log_path.display());
        Ok(())
    }
}

fn render(kind: ReportKind, data: &PerformanceData) -> String {
    let mut message = format!(
        "{}\n📅 Date: {}\n--------------------------------------\n",
        kind.title(),
        Local::now().format("%Y-%m-%d")
    );
    message.push_str(&format!("Total trades: {}\n", data.total_trades));
    message.push_str(&format!("BUY: {}\n", data.buy_trades));
    message.push_str(&format!("SELL: {}\n", data.sell_trades));
    message.push_str(&format!("Total profit: {:.2}%\n", data.total_profit));
    message.push_str("Profit per symbol:\n");
    for (symbol, profit) in &data.symbol_profit {
        message.push_str(&format!("{}: {:.2}%\n", symbol, profit));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn sym(s: &str) -> SymbolId {
        SymbolId::parse(s).unwrap()
    }

    #[test]
    fn test_record_trade_counters() {
        let dir = TempDir::new().unwrap();
        let tracker = PerformanceTracker::new(dir.path().join("perf.json"));

        tracker.record_trade(Side::Buy, &sym("BTCUSDC"), dec!(0.01), None);
        tracker.record_trade(Side::Sell, &sym("BTCUSDC"), dec!(0.01), Some(2.5));
        tracker.record_trade(Side::Sell, &sym("ETHUSDC"), dec!(1), Some(-1.0));

        let data = tracker.data();
        assert_eq!(data.total_trades, 3);
        assert_eq!(data.buy_trades, 1);
        assert_eq!(data.sell_trades, 2);
        assert!((data.total_profit - 1.5).abs() < 1e-12);
        assert_eq!(tracker.symbol_summary(&sym("BTCUSDC")), "Profit: 2.50%");
        assert_eq!(tracker.symbol_summary(&sym("SOLUSDC")), "No performance recorded.");
    }

    #[test]
    fn test_daily_report_logs_and_resets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("perf.json");
        let tracker = PerformanceTracker::new(&path);
        tracker.record_trade(Side::Sell, &sym("BTCUSDC"), dec!(0.01), Some(3.0));

        let weekly = tracker.weekly_report().unwrap();
        assert!(weekly.contains("Weekly"));
        assert_eq!(tracker.data().total_trades, 1);

        let daily = tracker.daily_report().unwrap();
        assert!(daily.contains("Total trades: 1"));
        assert!(daily.contains("BTCUSDC: 3.00%"));
        assert_eq!(tracker.data(), PerformanceData::default());

        let entries: Vec<ReportEntry> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].report_type, "weekly");
        assert_eq!(entries[1].report_type, "daily");
        assert_eq!(entries[1].performance_data.sell_trades, 1);
    }

    #[test]
    fn test_corrupt_log_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("perf.json");
        std::fs::write(&path, "not json").unwrap();

        let tracker = PerformanceTracker::new(&path);
        tracker.daily_report().unwrap();

        let entries: Vec<ReportEntry> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(entries.len(), 1);
    }
}
