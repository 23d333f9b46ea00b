use thiserror::Error;

/// Errors raised by the orchestration core.
///
/// "No price" and "not enough history" are normally reported through
/// `Option`/`CycleOutcome` rather than through this type. `DataUnavailable`
/// only exists for call sites that must surface it as a fault.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Decimal parse error: {0}")]
    Decimal(#[from] rust_decimal::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Exchange rejected request ({code}): {msg}")]
    Exchange { code: i64, msg: String },

    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Invalid position transition: {0}")]
    InvalidTransition(&'static str),

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },
}

impl BotError {
    /// Whether the failure is worth retrying with backoff.
    ///
    /// Only the exchange's server-side codes (unknown, disconnected, rate
    /// limited, timeout, busy) are transient. Filter and parameter
    /// rejections fail the same way on every attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            BotError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().map(|s| s.is_server_error() || s.as_u16() == 429).unwrap_or(true)
            }
            BotError::WebSocket(_) | BotError::Timeout | BotError::Io(_) => true,
            BotError::Exchange { code, .. } => {
                matches!(code, -1000 | -1001 | -1003 | -1006 | -1007 | -1008)
            }
            BotError::DataUnavailable(_) => true,
            BotError::Json(_)
            | BotError::Decimal(_)
            | BotError::Config(_)
            | BotError::InvalidSymbol(_)
            | BotError::Malformed(_)
            | BotError::InvalidTransition(_)
            | BotError::RetriesExhausted { .. } => false,
        }
    }
}

impl From<config::ConfigError> for BotError {
    fn from(e: config::ConfigError) -> Self {
        BotError::Config(e.to_string())
    }
}
