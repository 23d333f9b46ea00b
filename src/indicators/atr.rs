/// Average True Range (ATR) indicator
///
/// Measures market volatility by calculating the average of true ranges over a period.
/// True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
///
/// Uses Wilder's smoothing (same as RSI) for the moving average.

use crate::models::Candle;

/// ATR aligned with `candles`; the first defined value is at index `period`
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; candles.len()];
    if period == 0 || candles.len() < period + 1 {
        return out;
    }

    // Calculate true ranges
    let true_ranges: Vec<f64> = candles
        .windows(2)
        .map(|pair| {
            let high = pair[1].high;
            let low = pair[1].low;
            let prev_close = pair[0].close;

            (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs())
        })
        .collect();

    // First ATR is simple average of first 'period' true ranges
    let mut atr: f64 = true_ranges[..period].iter().sum::<f64>() / period as f64;
    out[period] = Some(atr);

    // Apply Wilder's smoothing for subsequent values
    for i in period..true_ranges.len() {
        atr = (atr * (period as f64 - 1.0) + true_ranges[i]) / period as f64;
        out[i + 1] = Some(atr);
    }

    out
}
