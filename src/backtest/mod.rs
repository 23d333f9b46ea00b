//! Historical replay of the indicator strategy

pub mod metrics;
pub mod runner;

pub use metrics::{BacktestReport, TradeRecord};
pub use runner::{simulate_strategy, BacktestRunner};
