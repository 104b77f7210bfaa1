// =============================================================================
// Volatility — population standard deviation over a trailing window
// =============================================================================

/// Population standard deviation of the trailing `n` closes.
///
/// Returns `0.0` when there are fewer than `n` closes or `n == 0`.
pub fn volatility(closes: &[f64], n: usize) -> f64 {
    if n == 0 || closes.len() < n {
        return 0.0;
    }
    let window = &closes[closes.len() - n..];
    let mean = window.iter().sum::<f64>() / n as f64;
    let variance = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volatility_flat_series_is_zero() {
        assert_eq!(volatility(&[100.0; 20], 20), 0.0);
    }

    #[test]
    fn volatility_insufficient_data_is_zero() {
        assert_eq!(volatility(&[1.0, 2.0], 20), 0.0);
    }

    #[test]
    fn volatility_nonzero_for_varying_series() {
        let closes = [10.0, 12.0, 8.0, 14.0, 9.0];
        assert!(volatility(&closes, 5) > 0.0);
    }
}
