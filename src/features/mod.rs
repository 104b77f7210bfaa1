// =============================================================================
// Feature Pipeline — C6 fixed-schema feature vectors + label generation
// =============================================================================
//
// `generate_features` is lazy in spirit (it only ever looks at the prefix
// `bars[0..=i]` when computing bar `i`) but returns a materialized `Vec`
// since the decision tree consumes the whole training set at once anyway.
// Labels are generated independently over the full bar series and joined
// with an index offset, per the component contract — the two passes never
// share state.

use crate::indicators::indicator_bundle;
use crate::types::{Bar, Label};

/// Minimum trailing history (in bars) before the first feature vector can
/// be computed — driven by MA60 needing 60 closes.
pub const MIN_HISTORY: usize = 60;

/// Ordered 14-element feature contract. Field order is load-bearing: the
/// decision tree and any persisted normalization stats index into
/// `to_array()` positionally.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    pub ma5: f64,
    pub ma20: f64,
    pub ma60: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub bb_upper: f64,
    pub bb_lower: f64,
    pub price_change: f64,
    pub volume_change: f64,
    pub ma5_ma20_ratio: f64,
    pub rsi_momentum: f64,
    pub volatility: f64,
    pub trend_strength: f64,
}

impl FeatureVector {
    pub const ARITY: usize = 14;

    pub fn to_array(&self) -> [f64; Self::ARITY] {
        [
            self.ma5,
            self.ma20,
            self.ma60,
            self.rsi,
            self.macd,
            self.macd_signal,
            self.bb_upper,
            self.bb_lower,
            self.price_change,
            self.volume_change,
            self.ma5_ma20_ratio,
            self.rsi_momentum,
            self.volatility,
            self.trend_strength,
        ]
    }
}

/// Compute feature vectors for every bar index `i >= 59`. The returned
/// vector's element `j` corresponds to bar index `59 + j`.
pub fn generate_features(bars: &[Bar]) -> Vec<FeatureVector> {
    if bars.len() < MIN_HISTORY {
        return Vec::new();
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let mut out = Vec::with_capacity(bars.len() - MIN_HISTORY + 1);
    let mut prev_rsi: Option<f64> = None;

    for i in (MIN_HISTORY - 1)..bars.len() {
        let window = &closes[0..=i];
        let bundle = indicator_bundle(window);

        let price_change = if i > 0 && closes[i - 1] != 0.0 { (closes[i] - closes[i - 1]) / closes[i - 1] } else { 0.0 };
        let volume_change = if i > 0 && bars[i - 1].volume != 0.0 { (bars[i].volume - bars[i - 1].volume) / bars[i - 1].volume } else { 0.0 };
        let ma5_ma20_ratio = if bundle.ma20 != 0.0 { bundle.ma5 / bundle.ma20 } else { 0.0 };
        let rsi_momentum = match prev_rsi {
            Some(prev) => bundle.rsi14 - prev,
            None => 0.0,
        };
        prev_rsi = Some(bundle.rsi14);

        out.push(FeatureVector {
            ma5: bundle.ma5,
            ma20: bundle.ma20,
            ma60: bundle.ma60,
            rsi: bundle.rsi14,
            macd: bundle.macd_diff,
            macd_signal: bundle.macd_signal,
            bb_upper: bundle.bb_upper,
            bb_lower: bundle.bb_lower,
            price_change,
            volume_change,
            ma5_ma20_ratio,
            rsi_momentum,
            volatility: crate::indicators::volatility(window, 20),
            trend_strength: crate::indicators::trend_strength(window),
        });
    }

    out
}

/// Labels for the full bar series: compare `close[i]` to `close[i+lookahead]`.
/// `< -2%` -> Down, `> +2%` -> Up, otherwise Flat. The final `lookahead` bars
/// have no future close to compare against and are labeled Flat.
pub fn generate_labels(bars: &[Bar], lookahead: usize) -> Vec<Label> {
    let n = bars.len();
    let mut labels = Vec::with_capacity(n);
    for i in 0..n {
        if i + lookahead >= n {
            labels.push(Label::Flat);
            continue;
        }
        let now = bars[i].close;
        let future = bars[i + lookahead].close;
        let change = if now != 0.0 { (future - now) / now } else { 0.0 };
        labels.push(if change < -0.02 {
            Label::Down
        } else if change > 0.02 {
            Label::Up
        } else {
            Label::Flat
        });
    }
    labels
}

/// Pairs feature vector `i` with `labels[i + offset]` where
/// `offset = len(bars) - len(features)`.
pub fn join_features_and_labels(bars_len: usize, features: &[FeatureVector], labels: &[Label]) -> Vec<(FeatureVector, Label)> {
    let offset = bars_len.saturating_sub(features.len());
    features
        .iter()
        .enumerate()
        .filter_map(|(i, f)| labels.get(i + offset).map(|l| (*f, *l)))
        .collect()
}

#[derive(Debug, Clone)]
pub struct FeatureStats {
    pub min: [f64; FeatureVector::ARITY],
    pub max: [f64; FeatureVector::ARITY],
}

/// Per-feature min/max over a training set, used to normalize both the
/// training set and future inference inputs identically.
pub fn compute_feature_stats(vectors: &[FeatureVector]) -> FeatureStats {
    let mut min = [f64::INFINITY; FeatureVector::ARITY];
    let mut max = [f64::NEG_INFINITY; FeatureVector::ARITY];
    for v in vectors {
        let arr = v.to_array();
        for (i, val) in arr.iter().enumerate() {
            if *val < min[i] {
                min[i] = *val;
            }
            if *val > max[i] {
                max[i] = *val;
            }
        }
    }
    // Empty input leaves min=+inf/max=-inf; normalize() treats max<=min as
    // the degenerate no-op case, so collapse both to 0 for a clean default.
    for i in 0..FeatureVector::ARITY {
        if min[i] > max[i] {
            min[i] = 0.0;
            max[i] = 0.0;
        }
    }
    FeatureStats { min, max }
}

/// `(x - min) / (max - min)`, 0 when `max == min`.
pub fn normalize(vector: &FeatureVector, stats: &FeatureStats) -> [f64; FeatureVector::ARITY] {
    let arr = vector.to_array();
    let mut out = [0.0; FeatureVector::ARITY];
    for i in 0..FeatureVector::ARITY {
        let range = stats.max[i] - stats.min[i];
        out[i] = if range == 0.0 { 0.0 } else { (arr[i] - stats.min[i]) / range };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(date: i64, close: f64) -> Bar {
        Bar { date, open: close, high: close, low: close, close, volume: 1000.0, turnover: close * 1000.0 }
    }

    #[test]
    fn no_features_below_min_history() {
        let bars: Vec<Bar> = (0..59).map(|i| bar(i, 10.0 + i as f64)).collect();
        assert!(generate_features(&bars).is_empty());
    }

    #[test]
    fn features_emitted_starting_at_index_59() {
        let bars: Vec<Bar> = (0..65).map(|i| bar(i, 10.0 + i as f64)).collect();
        let features = generate_features(&bars);
        assert_eq!(features.len(), 6); // indices 59..=64
    }

    #[test]
    fn label_formula_matches_threshold_contract() {
        // closes [100, 97, 96, 95], lookahead = 1.
        let bars = vec![bar(0, 100.0), bar(1, 97.0), bar(2, 96.0), bar(3, 95.0)];
        let labels = generate_labels(&bars, 1);
        // 100 -> 97: -3% -> Down. 97 -> 96: -1.03% -> Flat. 96 -> 95: -1.04% -> Flat.
        // Final bar has no lookahead target -> Flat.
        assert_eq!(labels, vec![Label::Down, Label::Flat, Label::Flat, Label::Flat]);
    }

    #[test]
    fn label_up_and_down_thresholds() {
        let bars = vec![bar(0, 100.0), bar(1, 103.0), bar(2, 95.0), bar(3, 100.0)];
        let labels = generate_labels(&bars, 1);
        assert_eq!(labels[0], Label::Up);
        assert_eq!(labels[1], Label::Down);
    }

    #[test]
    fn join_applies_offset() {
        let bars_len = 65;
        let features = vec![
            FeatureVector { ma5: 0.0, ma20: 0.0, ma60: 0.0, rsi: 0.0, macd: 0.0, macd_signal: 0.0, bb_upper: 0.0, bb_lower: 0.0, price_change: 0.0, volume_change: 0.0, ma5_ma20_ratio: 0.0, rsi_momentum: 0.0, volatility: 0.0, trend_strength: 0.0 };
            6
        ];
        let labels = vec![Label::Flat; bars_len];
        let joined = join_features_and_labels(bars_len, &features, &labels);
        assert_eq!(joined.len(), 6);
    }

    #[test]
    fn normalize_is_zero_when_range_collapses() {
        let stats = FeatureStats { min: [1.0; FeatureVector::ARITY], max: [1.0; FeatureVector::ARITY] };
        let v = FeatureVector { ma5: 1.0, ma20: 1.0, ma60: 1.0, rsi: 1.0, macd: 1.0, macd_signal: 1.0, bb_upper: 1.0, bb_lower: 1.0, price_change: 1.0, volume_change: 1.0, ma5_ma20_ratio: 1.0, rsi_momentum: 1.0, volatility: 1.0, trend_strength: 1.0 };
        let normalized = normalize(&v, &stats);
        assert!(normalized.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn normalize_scales_into_unit_range() {
        let stats = FeatureStats { min: [0.0; FeatureVector::ARITY], max: [10.0; FeatureVector::ARITY] };
        let v = FeatureVector { ma5: 5.0, ma20: 5.0, ma60: 5.0, rsi: 5.0, macd: 5.0, macd_signal: 5.0, bb_upper: 5.0, bb_lower: 5.0, price_change: 5.0, volume_change: 5.0, ma5_ma20_ratio: 5.0, rsi_momentum: 5.0, volatility: 5.0, trend_strength: 5.0 };
        let normalized = normalize(&v, &stats);
        assert!(normalized.iter().all(|&x| (x - 0.5).abs() < 1e-9));
    }
}
