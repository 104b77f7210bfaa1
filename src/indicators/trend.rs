// =============================================================================
// Trend Strength — normalized gain/loss ratio over consecutive diffs
// =============================================================================

/// `(gains - losses) / (gains + losses)` across consecutive closing-price
/// diffs, where `gains` and `losses` are the sums of positive and negative
/// (absolute) diffs respectively.
///
/// Returns `0.0` when both sums are zero (flat or too-short series) — this
/// includes the trivial case of fewer than two closes.
pub fn trend_strength(closes: &[f64]) -> f64 {
    if closes.len() < 2 {
        return 0.0;
    }

    let mut gains = 0.0_f64;
    let mut losses = 0.0_f64;
    for pair in closes.windows(2) {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            gains += delta;
        } else {
            losses += -delta;
        }
    }

    let total = gains + losses;
    if total == 0.0 {
        return 0.0;
    }
    (gains - losses) / total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trend_strength_flat_is_zero() {
        assert_eq!(trend_strength(&[100.0; 10]), 0.0);
    }

    #[test]
    fn trend_strength_pure_uptrend_is_one() {
        let closes: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        assert!((trend_strength(&closes) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn trend_strength_pure_downtrend_is_negative_one() {
        let closes: Vec<f64> = (1..=10).rev().map(|x| x as f64).collect();
        assert!((trend_strength(&closes) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn trend_strength_short_series_is_zero() {
        assert_eq!(trend_strength(&[1.0]), 0.0);
    }
}
