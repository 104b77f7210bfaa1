// =============================================================================
// Indicator Kernel
// =============================================================================
//
// Pure, stateless functions over a closing-price slice. Every function here
// is a reference implementation: for a fixed input series the output is
// identical across runs, and callers (the feature pipeline, the anomaly
// detector) treat these as golden values rather than recomputing their own
// variants.
//
// Unlike a typical indicator crate, these do not return `Option` — each
// contract specifies an exact fallback value for insufficient data so that
// downstream code (which always has a fixed-width feature vector to fill)
// never has to branch on `None`.

pub mod ma;
pub mod rsi;
pub mod macd;
pub mod bollinger;
pub mod volatility;
pub mod trend;

pub use bollinger::{bollinger, BollingerBands};
pub use ma::ma;
pub use macd::{macd, MacdResult};
pub use rsi::rsi;
pub use trend::trend_strength;
pub use volatility::volatility;

/// All indicators bundled for a single bar, matching the data-model §3
/// "Indicator bundle" contract.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorBundle {
    pub ma5: f64,
    pub ma20: f64,
    pub ma60: f64,
    pub rsi14: f64,
    pub macd_diff: f64,
    pub macd_signal: f64,
    pub macd_hist: f64,
    pub bb_upper: f64,
    pub bb_lower: f64,
}

/// Compute the full indicator bundle from the trailing close series ending
/// at the bar of interest (i.e. `closes.last()` is the bar being evaluated).
pub fn indicator_bundle(closes: &[f64]) -> IndicatorBundle {
    let macd_result = macd(closes);
    let bb = bollinger(closes, 20, 2.0);

    IndicatorBundle {
        ma5: ma(closes, 5),
        ma20: ma(closes, 20),
        ma60: ma(closes, 60),
        rsi14: rsi(closes, 14),
        macd_diff: macd_result.diff,
        macd_signal: macd_result.signal,
        macd_hist: macd_result.hist,
        bb_upper: bb.upper,
        bb_lower: bb.lower,
    }
}

#[cfg(test)]
pub(crate) fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
