// Per-symbol execution: engine state machine, sizing, position tracking, retries
pub mod engine;
pub mod money;
pub mod position;
pub mod retry;

pub use engine::{CycleOutcome, EngineControl, EngineDeps, TradingEngine};
pub use money::{format_quantity, quantize_down, MoneyManager};
pub use position::{ClosedTrade, OpenPosition, PositionState};
pub use retry::RetryPolicy;
