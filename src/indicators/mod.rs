// Technical indicators module
// Aligned series for RSI, MACD, MAs, OBV bands and ATR, bundled into snapshots

pub mod atr;
pub mod macd;
pub mod moving_average;
pub mod rsi;
pub mod snapshot;
pub mod volume;

pub use atr::atr_series;
pub use macd::{macd_series, Macd};
pub use moving_average::{ema_series, sma_series, wma_series};
pub use rsi::rsi_series;
pub use snapshot::{columns, IndicatorProvider, IndicatorSnapshot, TechnicalIndicators};
pub use volume::{bollinger, obv_series, rolling_std, Bands};
