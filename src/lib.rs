// Core modules
pub mod api;
pub mod backtest;
pub mod config;
pub mod error;
pub mod execution;
pub mod feed;
pub mod indicators;
pub mod models;
pub mod notify;
pub mod orchestration;
pub mod performance;
pub mod strategy;

// Re-export commonly used types
pub use api::Exchange;
pub use error::BotError;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, BotError>;
