use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One simulated round trip; exit fields stay empty while the position is open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub profit_pct: Option<f64>,
}

impl TradeRecord {
    pub fn open(entry_time: DateTime<Utc>, entry_price: f64) -> Self {
        Self {
            entry_time,
            entry_price,
            exit_time: None,
            exit_price: None,
            profit_pct: None,
        }
    }

    /// Fill in the exit; profit is relative to the entry close, in percent
    pub fn close(&mut self, exit_time: DateTime<Utc>, exit_price: f64) {
        self.exit_time = Some(exit_time);
        self.exit_price = Some(exit_price);
        self.profit_pct = Some((exit_price - self.entry_price) / self.entry_price * 100.0);
    }

    pub fn is_closed(&self) -> bool {
        self.profit_pct.is_some()
    }

    pub fn holding_period_minutes(&self) -> Option<i64> {
        self.exit_time
            .map(|exit| (exit - self.entry_time).num_minutes())
    }
}

/// Results of replaying a candle history through the trading signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub trades: Vec<TradeRecord>,
    pub closed_trades: usize,
    /// Sum of per-trade profit percentages (no compounding)
    pub total_profit_pct: f64,
    pub win_rate: f64,
    pub largest_win_pct: f64,
    pub largest_loss_pct: f64,
    /// Deepest fall of the cumulative profit curve, in percentage points
    pub max_drawdown_pct: f64,
    pub avg_holding_period_minutes: f64,
}

impl BacktestReport {
    pub fn from_trades(trades: Vec<TradeRecord>) -> Self {
        let profits: Vec<f64> = trades.iter().filter_map(|t| t.profit_pct).collect();
        let closed_trades = profits.len();

        let total_profit_pct: f64 = profits.iter().sum();
        let wins = profits.iter().filter(|p| **p > 0.0).count();
        let win_rate = if closed_trades > 0 {
            wins as f64 / closed_trades as f64 * 100.0
        } else {
            0.0
        };

        let largest_win_pct = profits.iter().copied().filter(|p| *p > 0.0).fold(0.0, f64::max);
        let largest_loss_pct = profits.iter().copied().filter(|p| *p <= 0.0).fold(0.0, f64::min);

        let holding: Vec<i64> = trades.iter().filter_map(TradeRecord::holding_period_minutes).collect();
        let avg_holding_period_minutes = if holding.is_empty() {
            0.0
        } else {
            holding.iter().sum::<i64>() as f64 / holding.len() as f64
        };

        Self {
            max_drawdown_pct: Self::calculate_drawdown(&profits),
            trades,
            closed_trades,
            total_profit_pct,
            win_rate,
            largest_win_pct,
            largest_loss_pct,
            avg_holding_period_minutes,
        }
    }

    fn calculate_drawdown(profits: &[f64]) -> f64 {
        let mut cumulative = 0.0;
        let mut peak = 0.0_f64;
        let mut max_dd = 0.0_f64;

        for profit in profits {
            cumulative += profit;
            peak = peak.max(cumulative);
            max_dd = max_dd.max(peak - cumulative);
        }
        max_dd
    }

    pub fn has_open_trade(&self) -> bool {
        self.trades.last().is_some_and(|t| !t.is_closed())
    }

    /// Print a formatted report to stdout
    pub fn print_report(&self) {
        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║              BACKTEST PERFORMANCE REPORT              ║");
        println!("╚═══════════════════════════════════════════════════════╝\n");

        println!("📊 TRADE STATISTICS");
        println!("   Closed Trades:     {}", self.closed_trades);
        println!("   Win Rate:          {:.1}%", self.win_rate);
        println!("   Total Profit:      {:.2}%", self.total_profit_pct);
        println!("   Largest Win:       {:.2}%", self.largest_win_pct);
        println!("   Largest Loss:      {:.2}%", self.largest_loss_pct);
        println!("   Max Drawdown:      {:.2}%", self.max_drawdown_pct);
        println!("   Avg Holding:       {:.0} min", self.avg_holding_period_minutes);
        if self.has_open_trade() {
            println!("   (last position still open)");
        }

        if !self.trades.is_empty() {
            println!("\n📝 TRADES");
            for trade in &self.trades {
                match (trade.exit_time, trade.exit_price, trade.profit_pct) {
                    (Some(exit_time), Some(exit_price), Some(profit)) => println!(
                        "   {} @ {:.4} → {} @ {:.4}  {:+.2}%",
                        trade.entry_time.format("%Y-%m-%d %H:%M"),
                        trade.entry_price,
                        exit_time.format("%Y-%m-%d %H:%M"),
                        exit_price,
                        profit
                    ),
                    _ => println!(
                        "   {} @ {:.4} → open",
                        trade.entry_time.format("%Y-%m-%d %H:%M"),
                        trade.entry_price
                    ),
                }
            }
        }
        println!();
    }
}
