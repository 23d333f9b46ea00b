use super::moving_average::{defined, sma_series};

/// On-Balance Volume: running sum of volume signed by the close-to-close move
///
/// The first bar contributes its full volume.
pub fn obv_series(closes: &[f64], volumes: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(closes.len());
    let mut total = 0.0;

    for i in 0..closes.len().min(volumes.len()) {
        let signed = if i == 0 || closes[i] > closes[i - 1] {
            volumes[i]
        } else if closes[i] < closes[i - 1] {
            -volumes[i]
        } else {
            0.0
        };
        total += signed;
        out.push(total);
    }

    out
}

/// Rolling sample standard deviation (n - 1 denominator)
pub fn rolling_std(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    if period < 2 {
        return vec![None; values.len()];
    }

    let means = sma_series(values, period);
    (0..values.len())
        .map(|i| {
            let mean = means[i]?;
            let window = &values[i + 1 - period..=i];
            let sum_sq: f64 = window.iter().map(|v| v.map(|v| (v - mean).powi(2))).sum::<Option<f64>>()?;
            Some((sum_sq / (period - 1) as f64).sqrt())
        })
        .collect()
}

/// Bollinger envelope around a series
#[derive(Debug, Clone, Default)]
pub struct Bands {
    pub middle: Vec<Option<f64>>,
    pub deviation: Vec<Option<f64>>,
    pub upper: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
    pub mid_upper: Vec<Option<f64>>,
    pub mid_lower: Vec<Option<f64>>,
}

/// SMA(length) ± mult * stdev(length)
pub fn bollinger(values: &[f64], length: usize, mult: f64) -> Bands {
    let series = defined(values);
    let middle = sma_series(&series, length);
    let deviation: Vec<Option<f64>> = rolling_std(&series, length)
        .into_iter()
        .map(|d| d.map(|d| d * mult))
        .collect();

    let combine = |f: fn(f64, f64) -> f64| -> Vec<Option<f64>> {
        middle
            .iter()
            .zip(&deviation)
            .map(|(m, d)| Some(f((*m)?, (*d)?)))
            .collect()
    };

    Bands {
        upper: combine(|m, d| m + d),
        lower: combine(|m, d| m - d),
        mid_upper: combine(|m, d| m + d / 2.0),
        mid_lower: combine(|m, d| m - d / 2.0),
        middle,
        deviation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obv_direction() {
        let closes = [10.0, 11.0, 10.5, 10.5, 12.0];
        let volumes = [100.0, 50.0, 30.0, 20.0, 40.0];
        let obv = obv_series(&closes, &volumes);
        assert_eq!(obv, vec![100.0, 150.0, 120.0, 120.0, 160.0]);
    }

    #[test]
    fn test_rolling_std_sample() {
        let values = defined(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        let std = rolling_std(&values, 8);
        // Sample stdev of the classic example: sqrt(32 / 7)
        assert!((std[7].unwrap() - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
        assert!(std[6].is_none());
    }

    #[test]
    fn test_bollinger_is_symmetric() {
        let values: Vec<f64> = (0..30).map(|i| (i as f64 * 0.7).sin() * 100.0).collect();
        let bands = bollinger(&values, 23, 3.4);

        assert!(bands.upper[21].is_none());
        let (m, u, l) = (
            bands.middle[29].unwrap(),
            bands.upper[29].unwrap(),
            bands.lower[29].unwrap(),
        );
        assert!(u > m && m > l);
        assert!(((u - m) - (m - l)).abs() < 1e-9);
    }
}
