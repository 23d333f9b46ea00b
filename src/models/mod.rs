use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::BotError;

/// Normalized instrument identifier (e.g. `BTCUSDT`)
///
/// Uppercase, restricted to `A-Z 0-9 - _ .`. Anything else is stripped on
/// construction; an identifier that is empty after stripping is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SymbolId(String);

impl SymbolId {
    pub fn parse(raw: &str) -> Result<Self, BotError> {
        let cleaned: String = raw
            .to_uppercase()
            .chars()
            .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
            .collect();

        if cleaned.is_empty() {
            return Err(BotError::InvalidSymbol(raw.to_string()));
        }

        Ok(Self(cleaned))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the public ticker stream for this symbol (`btcusdt@ticker`)
    pub fn ticker_stream(&self) -> String {
        format!("{}@ticker", self.0.to_lowercase())
    }

    /// Asset bought or sold (`BTC` for `BTCUSDT`)
    pub fn base_asset(&self) -> String {
        let s = self.0.as_str();
        if s.contains("USDT") {
            return s.replace("USDT", "");
        }
        if s.contains("USDC") {
            return s.replace("USDC", "");
        }
        if let Some(base) = s.strip_suffix("BTC") {
            return base.to_string();
        }
        s[..s.len() / 2].to_string()
    }

    /// Asset the price is quoted in (`USDT` for `BTCUSDT`)
    pub fn quote_asset(&self) -> &str {
        let s = self.0.as_str();
        if s.contains("USDT") {
            return "USDT";
        }
        if s.contains("USDC") {
            return "USDC";
        }
        if s.ends_with("BTC") {
            return "BTC";
        }
        &s[s.len() / 2..]
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SymbolId {
    type Error = BotError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SymbolId> for String {
    fn from(value: SymbolId) -> Self {
        value.0
    }
}

impl std::str::FromStr for SymbolId {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Latest quoted price for a symbol, as published by the market feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: SymbolId,
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// OHLCV candlestick data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Trading signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Signal::Buy => "buy",
            Signal::Sell => "sell",
            Signal::Hold => "hold",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-symbol lot and notional constraints enforced by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeFilters {
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    pub min_notional: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

/// Result of a market order accepted by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFill {
    pub symbol: SymbolId,
    pub side: Side,
    pub order_id: u64,
    pub client_order_id: String,
    pub executed_qty: Decimal,
    /// Volume-weighted fill price; absent when the exchange reports no fills
    pub avg_price: Option<Decimal>,
    pub status: String,
}
