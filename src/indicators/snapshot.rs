use std::collections::HashMap;

use crate::config::{IndicatorParams, MaType, SmoothingType};
use crate::error::BotError;
use crate::models::Candle;
use crate::Result;

use super::atr::atr_series;
use super::macd::macd_series;
use super::moving_average::{defined, ema_series, rma_series, sma_series, vwma_series, wma_series};
use super::rsi::rsi_series;
use super::volume::{bollinger, obv_series, rolling_std};

/// Column names carried by every snapshot
pub mod columns {
    pub const CLOSE: &str = "close";
    pub const RSI: &str = "rsi";
    pub const RSI_MA: &str = "rsi_ma";
    pub const OBV: &str = "obv";
    pub const OBV_MA: &str = "obv_ma";
    pub const MACD: &str = "macd";
    pub const MACD_SIGNAL: &str = "macd_signal";
    pub const MACD_HIST: &str = "macd_hist";
    pub const LC_MA1: &str = "lc_ma1";
    pub const LC_MA2: &str = "lc_ma2";
    pub const LC_MA3: &str = "lc_ma3";
    pub const LC_MA4: &str = "lc_ma4";
    pub const SMOOTHING_MA: &str = "smoothing_ma";
    pub const SMOOTHING_STDEV: &str = "smoothing_stdev";
    pub const UPPER_BAND: &str = "upper_band";
    pub const LOWER_BAND: &str = "lower_band";
    pub const MID_UPPER_BAND: &str = "mid_upper_band";
    pub const MID_LOWER_BAND: &str = "mid_lower_band";
    pub const ATR: &str = "atr";
    pub const BB_WIDTH: &str = "bb_width";
}

/// Candles ordered by open time plus named indicator columns of equal length
#[derive(Debug, Clone, Default)]
pub struct IndicatorSnapshot {
    candles: Vec<Candle>,
    columns: HashMap<&'static str, Vec<Option<f64>>>,
}

impl IndicatorSnapshot {
    /// Sorts candles by open time and drops duplicate bars
    pub fn new(mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.open_time);
        candles.dedup_by_key(|c| c.open_time);
        let closes = defined(&candles.iter().map(|c| c.close).collect::<Vec<_>>());

        let mut snapshot = Self {
            candles,
            columns: HashMap::new(),
        };
        snapshot.columns.insert(columns::CLOSE, closes);
        snapshot
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    /// Replace or add a column; it must line up with the candles
    pub fn insert(&mut self, name: &'static str, values: Vec<Option<f64>>) -> Result<()> {
        if values.len() != self.candles.len() {
            return Err(BotError::Malformed(format!(
                "column {} has {} rows, expected {}",
                name,
                values.len(),
                self.candles.len()
            )));
        }
        self.columns.insert(name, values);
        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Value of `name` at row `index`; `None` when missing or undefined
    pub fn value(&self, name: &str, index: usize) -> Option<f64> {
        self.columns.get(name)?.get(index).copied().flatten()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.candles.last().map(|c| c.close)
    }

    /// Last-row values for the requested columns, `None` if any is undefined
    pub fn features(&self, names: &[&str]) -> Option<Vec<f64>> {
        let last = self.len().checked_sub(1)?;
        names.iter().map(|name| self.value(name, last)).collect()
    }
}

/// Turns raw candles into a snapshot
pub trait IndicatorProvider: Send + Sync {
    fn compute(&self, candles: Vec<Candle>, params: &IndicatorParams) -> Result<IndicatorSnapshot>;
}

/// Built-in indicator set used by the engine and the backtester
#[derive(Debug, Clone, Copy, Default)]
pub struct TechnicalIndicators;

const ATR_PERIOD: usize = 14;

fn moving_average(ma_type: MaType, values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    match ma_type {
        MaType::Sma => sma_series(values, period),
        MaType::Ema => ema_series(values, period),
        MaType::Wma => wma_series(values, period),
    }
}

impl IndicatorProvider for TechnicalIndicators {
    fn compute(&self, candles: Vec<Candle>, params: &IndicatorParams) -> Result<IndicatorSnapshot> {
        if candles.is_empty() {
            return Err(BotError::DataUnavailable("no candles".to_string()));
        }

        let mut snapshot = IndicatorSnapshot::new(candles);
        let rows = snapshot.len();
        let closes: Vec<f64> = snapshot.candles().iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = snapshot.candles().iter().map(|c| c.volume).collect();
        let close_series = defined(&closes);

        // Momentum
        let rsi = rsi_series(&closes, params.rsi_period);
        let rsi_ma = ema_series(&rsi, params.rsi_ma_period);
        let macd = macd_series(&closes, params.macd_fast, params.macd_slow, params.macd_signal);

        // Trend
        let [p1, p2, p3, p4] = params.ma_periods;
        let lc_ma = [p1, p2, p3, p4].map(|p| moving_average(params.ma_type, &close_series, p));

        // Volume flow and its envelope
        let obv = obv_series(&closes, &volumes);
        let obv_series_opt = defined(&obv);
        let obv_ma = ema_series(&obv_series_opt, params.rsi_ma_period);
        let length = params.smoothing_length;

        let (smoothing_ma, stdev, upper, lower, mid_upper, mid_lower) = match params.smoothing {
            SmoothingType::SmaBollinger => {
                let bands = bollinger(&obv, length, params.bb_mult);
                (
                    bands.middle,
                    bands.deviation,
                    bands.upper,
                    bands.lower,
                    bands.mid_upper,
                    bands.mid_lower,
                )
            }
            other => {
                let ma = match other {
                    SmoothingType::Ema => ema_series(&obv_series_opt, length),
                    SmoothingType::Rma => rma_series(&obv_series_opt, length),
                    SmoothingType::Wma => wma_series(&obv_series_opt, length),
                    SmoothingType::Vwma => vwma_series(&obv_series_opt, &volumes, length),
                    _ => sma_series(&obv_series_opt, length),
                };
                let stdev = rolling_std(&obv_series_opt, length)
                    .into_iter()
                    .map(|d| d.map(|d| d * params.bb_mult))
                    .collect();
                let none = vec![None; rows];
                (ma, stdev, none.clone(), none.clone(), none.clone(), none)
            }
        };

        let bb_width = upper
            .iter()
            .zip(&lower)
            .zip(&smoothing_ma)
            .map(|((u, l), m)| {
                let m = (*m)?;
                if m == 0.0 {
                    return None;
                }
                Some(((*u)? - (*l)?) / m.abs())
            })
            .collect();

        snapshot.insert(columns::RSI, rsi)?;
        snapshot.insert(columns::RSI_MA, rsi_ma)?;
        snapshot.insert(columns::MACD, macd.line)?;
        snapshot.insert(columns::MACD_SIGNAL, macd.signal)?;
        snapshot.insert(columns::MACD_HIST, macd.histogram)?;
        let [ma1, ma2, ma3, ma4] = lc_ma;
        snapshot.insert(columns::LC_MA1, ma1)?;
        snapshot.insert(columns::LC_MA2, ma2)?;
        snapshot.insert(columns::LC_MA3, ma3)?;
        snapshot.insert(columns::LC_MA4, ma4)?;
        snapshot.insert(columns::OBV, obv_series_opt)?;
        snapshot.insert(columns::OBV_MA, obv_ma)?;
        snapshot.insert(columns::SMOOTHING_MA, smoothing_ma)?;
        snapshot.insert(columns::SMOOTHING_STDEV, stdev)?;
        snapshot.insert(columns::UPPER_BAND, upper)?;
        snapshot.insert(columns::LOWER_BAND, lower)?;
        snapshot.insert(columns::MID_UPPER_BAND, mid_upper)?;
        snapshot.insert(columns::MID_LOWER_BAND, mid_lower)?;
        let atr = atr_series(snapshot.candles(), ATR_PERIOD);
        snapshot.insert(columns::ATR, atr)?;
        snapshot.insert(columns::BB_WIDTH, bb_width)?;

        Ok(snapshot)
    }
}
