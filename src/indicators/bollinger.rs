// =============================================================================
// Bollinger Bands
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// `mean ± k * sigma` over the trailing `n` closes, using population
/// standard deviation (divide by `n`, not `n - 1`).
///
/// Returns a zeroed result when there are fewer than `n` closes.
pub fn bollinger(closes: &[f64], n: usize, k: f64) -> BollingerBands {
    if n == 0 || closes.len() < n {
        return BollingerBands::default();
    }

    let window = &closes[closes.len() - n..];
    let mean = window.iter().sum::<f64>() / n as f64;
    let variance = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
    let sigma = variance.sqrt();

    BollingerBands {
        upper: mean + k * sigma,
        middle: mean,
        lower: mean - k * sigma,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bollinger_basic() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let bb = bollinger(&closes, 20, 2.0);
        assert!(bb.upper > bb.middle);
        assert!(bb.lower < bb.middle);
    }

    #[test]
    fn bollinger_insufficient_data() {
        let closes = [1.0, 2.0, 3.0];
        assert_eq!(bollinger(&closes, 20, 2.0), BollingerBands::default());
    }

    #[test]
    fn bollinger_flat_series_has_zero_width() {
        let closes = vec![100.0; 20];
        let bb = bollinger(&closes, 20, 2.0);
        assert!((bb.upper - bb.lower).abs() < 1e-9);
        assert!((bb.middle - 100.0).abs() < 1e-9);
    }
}
