// Configuration: static application settings plus the live per-symbol store
pub mod store;

pub use store::{ConfigSnapshot, ConfigStore, SettingsPatch};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::execution::RetryPolicy;
use crate::models::SymbolId;
use crate::strategy::RefinerKind;
use crate::Result;

const LIVE_REST_URL: &str = "https://api.binance.com";
const LIVE_WS_URL: &str = "wss://stream.binance.com:9443/ws";
const TESTNET_REST_URL: &str = "https://testnet.binance.vision";
const TESTNET_WS_URL: &str = "wss://testnet.binance.vision/ws";

/// Moving average flavour used for the close-price MAs (`lcMa1..4`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MaType {
    Sma,
    Ema,
    Wma,
}

/// Smoothing applied to OBV before the volatility band is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingType {
    Sma,
    /// SMA plus a standard-deviation envelope (the only mode that yields bands)
    SmaBollinger,
    Ema,
    Rma,
    Wma,
    Vwma,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorParams {
    pub rsi_period: usize,
    pub rsi_ma_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub ma_type: MaType,
    pub ma_periods: [usize; 4],
    pub smoothing: SmoothingType,
    pub smoothing_length: usize,
    pub bb_mult: f64,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            rsi_period: 11,
            rsi_ma_period: 9,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 18,
            ma_type: MaType::Wma,
            ma_periods: [5, 10, 60, 223],
            smoothing: SmoothingType::SmaBollinger,
            smoothing_length: 23,
            bb_mult: 3.4,
        }
    }
}

/// Fraction of the free balance committed per trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskParams {
    pub risk_percent: Decimal,
    /// Override applied when buying with USDC; falls back to `risk_percent`
    pub risk_percent_usdc: Option<Decimal>,
    /// Size by the last ATR distance instead of by price alone
    pub atr_sizing: bool,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            risk_percent: Decimal::new(2, 2),
            risk_percent_usdc: None,
            atr_sizing: false,
        }
    }
}

impl RiskParams {
    /// Risk fraction for an order funded with `asset`
    pub fn fraction_for(&self, asset: &str) -> Decimal {
        match (asset, self.risk_percent_usdc) {
            ("USDC", Some(usdc)) => usdc,
            _ => self.risk_percent,
        }
    }
}

/// Everything a worker needs for one symbol, read at the start of each cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolSettings {
    /// Kline interval (`1h`, `4h`, ...)
    pub interval: String,
    pub cycle_interval_secs: u64,
    /// Number of candles requested per refresh
    pub kline_limit: u32,
    pub indicator: IndicatorParams,
    pub risk: RiskParams,
}

impl Default for SymbolSettings {
    fn default() -> Self {
        Self {
            interval: "4h".to_string(),
            cycle_interval_secs: 60,
            kline_limit: 500,
            indicator: IndicatorParams::default(),
            risk: RiskParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinanceSettings {
    pub testnet: bool,
    pub api_key: String,
    pub api_secret: String,
    /// Explicit endpoint overrides (otherwise picked from `testnet`)
    pub rest_url: Option<String>,
    pub ws_url: Option<String>,
    pub recv_window_ms: u64,
    pub requests_per_minute: u32,
}

impl Default for BinanceSettings {
    fn default() -> Self {
        Self {
            testnet: true,
            api_key: String::new(),
            api_secret: String::new(),
            rest_url: None,
            ws_url: None,
            recv_window_ms: 5_000,
            requests_per_minute: 600,
        }
    }
}

impl BinanceSettings {
    pub fn rest_url(&self) -> &str {
        match &self.rest_url {
            Some(url) => url,
            None if self.testnet => TESTNET_REST_URL,
            None => LIVE_REST_URL,
        }
    }

    pub fn ws_url(&self) -> &str {
        match &self.ws_url {
            Some(url) => url,
            None if self.testnet => TESTNET_WS_URL,
            None => LIVE_WS_URL,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramSettings {
    pub bot_token: Option<String>,
    pub chat_ids: Vec<i64>,
    pub bot_name: String,
    pub api_url: String,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_ids: Vec::new(),
            bot_name: "MultiBot".to_string(),
            api_url: "https://api.telegram.org".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub reconnect_delay_secs: u64,
    pub reconcile_interval_secs: u64,
    pub connect_timeout_secs: u64,
    pub listen_key_keepalive_secs: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: 5,
            reconcile_interval_secs: 5,
            connect_timeout_secs: 10,
            listen_key_keepalive_secs: 30 * 60,
        }
    }
}

/// Static application configuration
///
/// Layered as: built-in defaults, then an optional TOML file, then
/// `MULTIBOT_*` environment variables (`__` separates nested keys, e.g.
/// `MULTIBOT_BINANCE__API_KEY`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub binance: BinanceSettings,
    pub telegram: TelegramSettings,
    /// Symbols traded on first start (before `dynamic_config.json` exists)
    pub symbols: Vec<String>,
    pub defaults: SymbolSettings,
    pub dynamic_config_path: PathBuf,
    pub performance_log_path: PathBuf,
    pub retry: RetryPolicy,
    pub feed: FeedSettings,
    /// Second-opinion refiner applied to every engine's signal
    pub refiner: RefinerKind,
    /// How often the supervisor re-reads the dynamic config file
    pub supervisor_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            binance: BinanceSettings::default(),
            telegram: TelegramSettings::default(),
            symbols: vec!["BTCUSDC".to_string()],
            defaults: SymbolSettings::default(),
            dynamic_config_path: PathBuf::from("dynamic_config.json"),
            performance_log_path: PathBuf::from("performance_log.json"),
            retry: RetryPolicy::default(),
            feed: FeedSettings::default(),
            refiner: RefinerKind::None,
            supervisor_interval_secs: 30,
        }
    }
}

impl AppConfig {
    /// Load `.env`, then the optional config file, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = path.unwrap_or_else(|| Path::new("multibot.toml"));
        let settings = config::Config::builder()
            .add_source(config::File::from(file).required(path.is_some()))
            .add_source(
                config::Environment::with_prefix("MULTIBOT")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("symbols")
                    .with_list_parse_key("telegram.chat_ids")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        Ok(config)
    }

    /// Configured startup symbols, normalized; invalid entries are skipped
    pub fn startup_symbols(&self) -> Vec<SymbolId> {
        let mut symbols: Vec<SymbolId> = Vec::new();
        for raw in &self.symbols {
            match SymbolId::parse(raw) {
                Ok(symbol) if !symbols.contains(&symbol) => symbols.push(symbol),
                Ok(_) => {}
                Err(e) => tracing::warn!("Ignoring configured symbol: {}", e),
            }
        }
        symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_indicator_params() {
        let params = IndicatorParams::default();
        assert_eq!(params.rsi_period, 11);
        assert_eq!(params.rsi_ma_period, 9);
        assert_eq!(params.ma_periods, [5, 10, 60, 223]);
        assert_eq!(params.smoothing, SmoothingType::SmaBollinger);
        assert_eq!(params.smoothing_length, 23);
    }

    #[test]
    fn test_endpoints_follow_testnet_flag() {
        let mut binance = BinanceSettings::default();
        assert_eq!(binance.rest_url(), TESTNET_REST_URL);

        binance.testnet = false;
        assert_eq!(binance.rest_url(), LIVE_REST_URL);
        assert_eq!(binance.ws_url(), LIVE_WS_URL);

        binance.rest_url = Some("http://127.0.0.1:1234".into());
        assert_eq!(binance.rest_url(), "http://127.0.0.1:1234");
    }

    #[test]
    fn test_usdc_risk_override() {
        let risk = RiskParams {
            risk_percent: Decimal::new(2, 2),
            risk_percent_usdc: Some(Decimal::new(5, 2)),
            atr_sizing: false,
        };
        assert_eq!(risk.fraction_for("USDC"), Decimal::new(5, 2));
        assert_eq!(risk.fraction_for("USDT"), Decimal::new(2, 2));
        assert_eq!(risk.fraction_for("BTC"), Decimal::new(2, 2));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
symbols = ["btcusdt", "ethusdt", "BTCUSDT"]

[binance]
testnet = false

[defaults]
interval = "1h"
cycle_interval_secs = 30

[defaults.indicator]
rsi_period = 14
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();

        assert!(!config.binance.testnet);
        assert_eq!(config.defaults.interval, "1h");
        assert_eq!(config.defaults.cycle_interval_secs, 30);
        assert_eq!(config.defaults.indicator.rsi_period, 14);
        // Unspecified nested values keep their defaults
        assert_eq!(config.defaults.indicator.rsi_ma_period, 9);
        assert_eq!(config.feed.reconnect_delay_secs, 5);

        let symbols = config.startup_symbols();
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].as_str(), "BTCUSDT");
        assert_eq!(symbols[1].as_str(), "ETHUSDT");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = AppConfig::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(result.is_err());
    }
}
