//! Moving averages over aligned series
//!
//! Every function returns a vector the same length as its input, `None`
//! where the window is not yet full (or contains an undefined value).

/// Lift a plain price series into the aligned-series form
pub fn defined(values: &[f64]) -> Vec<Option<f64>> {
    values.iter().map(|v| Some(*v)).collect()
}

/// Window ending at `i`, if every value in it is defined
fn window(values: &[Option<f64>], i: usize, period: usize) -> Option<Vec<f64>> {
    if period == 0 || i + 1 < period {
        return None;
    }
    values[i + 1 - period..=i].iter().copied().collect()
}

/// Simple Moving Average (SMA)
pub fn sma_series(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| window(values, i, period).map(|w| w.iter().sum::<f64>() / period as f64))
        .collect()
}

/// Linearly weighted moving average, newest bar weighted `period`
pub fn wma_series(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let denominator = (period * (period + 1)) as f64 / 2.0;
    (0..values.len())
        .map(|i| {
            window(values, i, period).map(|w| {
                w.iter()
                    .enumerate()
                    .map(|(k, v)| v * (k + 1) as f64)
                    .sum::<f64>()
                    / denominator
            })
        })
        .collect()
}

/// Exponential smoothing seeded with the SMA of the first full window
fn smoothed(values: &[Option<f64>], period: usize, alpha: f64) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    let mut state: Option<f64> = None;

    for i in 0..values.len() {
        match (state, values[i]) {
            (None, _) => {
                if let Some(w) = window(values, i, period) {
                    let seed = w.iter().sum::<f64>() / period as f64;
                    state = Some(seed);
                    out[i] = Some(seed);
                }
            }
            (Some(prev), Some(v)) => {
                let next = (v - prev) * alpha + prev;
                state = Some(next);
                out[i] = Some(next);
            }
            (Some(_), None) => {}
        }
    }

    out
}

/// Exponential Moving Average (EMA)
pub fn ema_series(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }
    smoothed(values, period, 2.0 / (period as f64 + 1.0))
}

/// Wilder's smoothed moving average (SMMA / RMA)
pub fn rma_series(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }
    smoothed(values, period, 1.0 / period as f64)
}

/// Volume-weighted moving average of `values`
pub fn vwma_series(values: &[Option<f64>], volumes: &[f64], period: usize) -> Vec<Option<f64>> {
    let weighted: Vec<Option<f64>> = values
        .iter()
        .zip(volumes)
        .map(|(v, vol)| v.map(|v| v * vol))
        .collect();
    let vol = defined(volumes);

    sma_series(&weighted, period)
        .into_iter()
        .zip(sma_series(&vol, period))
        .map(|(num, den)| match (num, den) {
            (Some(n), Some(d)) if d != 0.0 => Some(n / d),
            _ => None,
        })
        .collect()
}

/// Last value of a series, if defined
pub fn last(series: &[Option<f64>]) -> Option<f64> {
    series.last().copied().flatten()
}
