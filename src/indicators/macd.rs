// =============================================================================
// MACD — Moving Average Convergence Divergence
// =============================================================================
//
// diff   = EMA12 - EMA26
// signal = EMA9(diff)
// hist   = 2 * (diff - signal)
//
// NOTE: the EMA here is seeded with the first observation (`ema[0] =
// data[0]`), not the usual SMA-of-the-first-`n` seed. This is a known
// divergence from textbook MACD, carried forward deliberately to match
// previously persisted model outputs — see DESIGN.md open question #2.
// Do not "fix" this without also retraining anything that depends on it.

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MacdResult {
    pub diff: f64,
    pub signal: f64,
    pub hist: f64,
}

/// Simple-seeded EMA: `ema[0] = data[0]`, `ema[i] = data[i]*k + ema[i-1]*(1-k)`
/// with `k = 2 / (period + 1)`.
fn ema_simple_seed(data: &[f64], period: usize) -> Vec<f64> {
    if data.is_empty() {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(data.len());
    out.push(data[0]);
    for &x in &data[1..] {
        let prev = *out.last().unwrap();
        out.push(x * k + prev * (1.0 - k));
    }
    out
}

/// Compute MACD over the full closing-price series.
///
/// Requires at least 26 closes; otherwise returns a zeroed result.
pub fn macd(closes: &[f64]) -> MacdResult {
    if closes.len() < 26 {
        return MacdResult::default();
    }

    let ema12 = ema_simple_seed(closes, 12);
    let ema26 = ema_simple_seed(closes, 26);

    let diff_series: Vec<f64> = ema12.iter().zip(ema26.iter()).map(|(a, b)| a - b).collect();
    let signal_series = ema_simple_seed(&diff_series, 9);

    let diff = *diff_series.last().unwrap();
    let signal = *signal_series.last().unwrap();
    let hist = 2.0 * (diff - signal);

    MacdResult { diff, signal, hist }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_insufficient_history_is_zero() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert_eq!(macd(&closes), MacdResult::default());
    }

    #[test]
    fn macd_deterministic() {
        let closes: Vec<f64> = (1..=60).map(|x| x as f64 + (x as f64 * 0.1).sin()).collect();
        let a = macd(&closes);
        let b = macd(&closes);
        assert_eq!(a, b);
    }

    #[test]
    fn macd_flat_series_is_zero_diff() {
        let closes = vec![100.0; 60];
        let result = macd(&closes);
        assert!(result.diff.abs() < 1e-9);
        assert!(result.hist.abs() < 1e-9);
    }
}
