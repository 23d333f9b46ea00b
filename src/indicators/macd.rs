use super::moving_average::{defined, ema_series};

/// MACD line, signal line and histogram, aligned with the input
#[derive(Debug, Clone, Default)]
pub struct Macd {
    pub line: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

pub fn macd_series(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    let series = defined(closes);
    let fast_ema = ema_series(&series, fast);
    let slow_ema = ema_series(&series, slow);

    let line: Vec<Option<f64>> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();
    let signal_line = ema_series(&line, signal);
    let histogram = line
        .iter()
        .zip(&signal_line)
        .map(|(m, s)| Some((*m)? - (*s)?))
        .collect();

    Macd {
        line,
        signal: signal_line,
        histogram,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macd_warmup() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let macd = macd_series(&closes, 12, 26, 18);

        assert!(macd.line[24].is_none());
        assert!(macd.line[25].is_some());
        // Signal needs 18 defined MACD values
        assert!(macd.signal[41].is_none());
        assert!(macd.signal[42].is_some());
        assert!(macd.histogram[42].is_some());
    }

    #[test]
    fn test_macd_positive_in_uptrend() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 2.0).collect();
        let macd = macd_series(&closes, 12, 26, 18);
        assert!(macd.line[59].unwrap() > 0.0);
    }
}
