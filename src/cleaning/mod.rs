// =============================================================================
// Cleaning Engine — C5 ordered rule pipeline over raw points
// =============================================================================
//
// Each rule consumes a point and returns pass-through, a corrected point, or
// a rejection carrying a `QualityIssue`. Rules run in a fixed order (price,
// volume, timestamp, outlier, duplicate) mirroring §4.5. Rejection never
// aborts the batch: the offending point is dropped and the rest proceed,
// matching the cleaning-totality invariant in §8 (exactly one of
// passed/corrected/rejected increments per input point).

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use crate::types::{QualityIssue, Severity};

/// A single OHLCV observation awaiting cleaning. Looser than `Bar` — an
/// as-yet-unvalidated point may fail the very invariants `Bar::is_valid`
/// checks, which is exactly what the price-validation rule exists to catch.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPoint {
    pub symbol: String,
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct CleaningConfig {
    pub min_price: f64,
    pub max_price: f64,
    /// Fractional bound on `|close - open| / open`, e.g. 0.20 for ±20%.
    pub max_daily_change_pct: f64,
    pub max_volume: f64,
    /// How far into the future (seconds) a timestamp may be before rejection.
    pub max_future_secs: i64,
    pub enable_outlier_correction: bool,
    /// Trailing window size for the outlier z-score check.
    pub outlier_window: usize,
    pub outlier_z: f64,
    /// Bound on the ring buffer of retained `QualityIssue`s.
    pub issue_buffer_size: usize,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            min_price: 0.0001,
            max_price: 1_000_000.0,
            max_daily_change_pct: 0.20,
            max_volume: 1e15,
            max_future_secs: 300,
            enable_outlier_correction: true,
            outlier_window: 20,
            outlier_z: 3.0,
            issue_buffer_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CleaningStats {
    pub processed: u64,
    pub passed: u64,
    pub rejected: u64,
    pub corrected: u64,
    pub issues_by_type: HashMap<String, u64>,
}

/// Per-symbol mutable state the stateful rules (outlier detection,
/// duplicate detection) need across calls. Kept out of the rules themselves
/// so a `CleaningEngine` can own one lock per symbol rather than per rule.
#[derive(Default)]
struct SymbolState {
    recent_closes: VecDeque<f64>,
    seen_timestamps: HashSet<i64>,
}

enum RuleOutcome {
    Pass,
    Corrected,
    Reject(QualityIssue),
}

pub struct CleaningEngine {
    config: CleaningConfig,
    symbol_state: RwLock<HashMap<String, SymbolState>>,
    stats: RwLock<CleaningStats>,
    issues: RwLock<VecDeque<QualityIssue>>,
}

fn issue(issue_type: &str, severity: Severity, message: impl Into<String>, symbol: &str, time: i64) -> QualityIssue {
    QualityIssue { issue_type: issue_type.to_string(), severity, message: message.into(), time, symbol: symbol.to_string() }
}

impl CleaningEngine {
    pub fn new(config: CleaningConfig) -> Self {
        Self {
            config,
            symbol_state: RwLock::new(HashMap::new()),
            stats: RwLock::new(CleaningStats::default()),
            issues: RwLock::new(VecDeque::new()),
        }
    }

    pub fn stats(&self) -> CleaningStats {
        self.stats.read().clone()
    }

    pub fn recent_issues(&self) -> Vec<QualityIssue> {
        self.issues.read().iter().cloned().collect()
    }

    fn record_issue(&self, issue: QualityIssue) {
        let mut stats = self.stats.write();
        *stats.issues_by_type.entry(issue.issue_type.clone()).or_insert(0) += 1;
        drop(stats);

        let mut issues = self.issues.write();
        issues.push_back(issue);
        while issues.len() > self.config.issue_buffer_size {
            issues.pop_front();
        }
    }

    fn price_validation(&self, p: &RawPoint) -> RuleOutcome {
        if !(self.config.min_price..=self.config.max_price).contains(&p.close) {
            return RuleOutcome::Reject(issue(
                "price_out_of_range",
                Severity::High,
                format!("close {} out of [{}, {}]", p.close, self.config.min_price, self.config.max_price),
                &p.symbol,
                p.timestamp,
            ));
        }
        if p.high < p.low {
            return RuleOutcome::Reject(issue(
                "high_below_low",
                Severity::High,
                format!("high {} < low {}", p.high, p.low),
                &p.symbol,
                p.timestamp,
            ));
        }
        if !(p.low <= p.close && p.close <= p.high) {
            return RuleOutcome::Reject(issue(
                "close_outside_range",
                Severity::Medium,
                format!("close {} outside [low {}, high {}]", p.close, p.low, p.high),
                &p.symbol,
                p.timestamp,
            ));
        }
        if p.open > 0.0 {
            let change = (p.close - p.open) / p.open;
            if change.abs() > self.config.max_daily_change_pct {
                return RuleOutcome::Reject(issue(
                    "change_out_of_bounds",
                    Severity::Medium,
                    format!("change {:.4} exceeds {:.4}", change, self.config.max_daily_change_pct),
                    &p.symbol,
                    p.timestamp,
                ));
            }
        }
        RuleOutcome::Pass
    }

    fn volume_validation(&self, p: &RawPoint) -> RuleOutcome {
        if !(0.0..=self.config.max_volume).contains(&p.volume) {
            return RuleOutcome::Reject(issue(
                "volume_out_of_range",
                Severity::Medium,
                format!("volume {} out of [0, {}]", p.volume, self.config.max_volume),
                &p.symbol,
                p.timestamp,
            ));
        }
        if p.amount < 0.0 {
            return RuleOutcome::Reject(issue(
                "negative_amount",
                Severity::Medium,
                format!("amount {} is negative", p.amount),
                &p.symbol,
                p.timestamp,
            ));
        }
        RuleOutcome::Pass
    }

    fn timestamp_validation(&self, p: &RawPoint, now: i64) -> RuleOutcome {
        if p.timestamp < 0 {
            return RuleOutcome::Reject(issue(
                "negative_timestamp",
                Severity::High,
                format!("timestamp {} is negative", p.timestamp),
                &p.symbol,
                p.timestamp,
            ));
        }
        if p.timestamp - now > self.config.max_future_secs {
            return RuleOutcome::Reject(issue(
                "timestamp_in_future",
                Severity::Medium,
                format!("timestamp {} is more than {}s ahead of now", p.timestamp, self.config.max_future_secs),
                &p.symbol,
                p.timestamp,
            ));
        }
        RuleOutcome::Pass
    }

    /// Statistical outlier correction over a trailing window of closes.
    /// Mutates `p.close` in place when `|z| > outlier_z`, replacing it with
    /// the window median — must run before duplicate detection per §4.5.
    fn outlier_detection(&self, p: &mut RawPoint, state: &mut SymbolState) -> RuleOutcome {
        if !self.config.enable_outlier_correction {
            return RuleOutcome::Pass;
        }
        if state.recent_closes.len() < self.config.outlier_window {
            state.recent_closes.push_back(p.close);
            return RuleOutcome::Pass;
        }

        let n = state.recent_closes.len() as f64;
        let mean = state.recent_closes.iter().sum::<f64>() / n;
        let variance = state.recent_closes.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std = variance.sqrt();

        let outcome = if std > 0.0 {
            let z = (p.close - mean) / std;
            if z.abs() > self.config.outlier_z {
                let mut sorted: Vec<f64> = state.recent_closes.iter().copied().collect();
                sorted.push(p.close);
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let median = sorted[sorted.len() / 2];
                debug!(symbol = %p.symbol, z, median, "outlier corrected");
                p.close = median;
                RuleOutcome::Corrected
            } else {
                RuleOutcome::Pass
            }
        } else {
            RuleOutcome::Pass
        };

        state.recent_closes.push_back(p.close);
        if state.recent_closes.len() > self.config.outlier_window {
            state.recent_closes.pop_front();
        }
        outcome
    }

    fn duplicate_detection(&self, p: &RawPoint, state: &mut SymbolState) -> RuleOutcome {
        if !state.seen_timestamps.insert(p.timestamp) {
            return RuleOutcome::Reject(issue(
                "duplicate_point",
                Severity::Low,
                format!("duplicate timestamp {} for {}", p.timestamp, p.symbol),
                &p.symbol,
                p.timestamp,
            ));
        }
        RuleOutcome::Pass
    }

    /// Run the full ordered rule pipeline over one point. Returns the
    /// (possibly corrected) point on success, or `None` after recording a
    /// rejection issue.
    pub fn process(&self, mut point: RawPoint) -> Option<RawPoint> {
        let now = Utc::now().timestamp();
        self.stats.write().processed += 1;
        let mut corrected_any = false;

        macro_rules! reject_and_return {
            ($issue:expr) => {{
                self.stats.write().rejected += 1;
                self.record_issue($issue);
                return None;
            }};
        }

        match self.price_validation(&point) {
            RuleOutcome::Reject(i) => reject_and_return!(i),
            _ => {}
        }
        match self.volume_validation(&point) {
            RuleOutcome::Reject(i) => reject_and_return!(i),
            _ => {}
        }
        match self.timestamp_validation(&point, now) {
            RuleOutcome::Reject(i) => reject_and_return!(i),
            _ => {}
        }

        {
            let mut states = self.symbol_state.write();
            let state = states.entry(point.symbol.clone()).or_default();

            match self.outlier_detection(&mut point, state) {
                RuleOutcome::Corrected => corrected_any = true,
                RuleOutcome::Reject(i) => {
                    drop(states);
                    reject_and_return!(i);
                }
                RuleOutcome::Pass => {}
            }

            match self.duplicate_detection(&point, state) {
                RuleOutcome::Reject(i) => {
                    drop(states);
                    reject_and_return!(i);
                }
                _ => {}
            }
        }

        let mut stats = self.stats.write();
        if corrected_any {
            stats.corrected += 1;
        } else {
            stats.passed += 1;
        }
        Some(point)
    }
}

/// Forward-fill open/high/low/volume from the previous point when the
/// current point carries a zero in those fields. A separate pass applied
/// before cleaning, per §4.5.
pub fn fill_missing(points: &mut [RawPoint]) {
    for i in 1..points.len() {
        let prev = points[i - 1].clone();
        let cur = &mut points[i];
        if cur.open == 0.0 {
            cur.open = prev.open;
        }
        if cur.high == 0.0 {
            cur.high = prev.high;
        }
        if cur.low == 0.0 {
            cur.low = prev.low;
        }
        if cur.volume == 0.0 {
            cur.volume = prev.volume;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(symbol: &str, ts: i64, close: f64) -> RawPoint {
        RawPoint { symbol: symbol.to_string(), timestamp: ts, open: close, high: close, low: close, close, volume: 1000.0, amount: 10000.0 }
    }

    #[test]
    fn totality_every_point_increments_exactly_one_bucket() {
        let engine = CleaningEngine::new(CleaningConfig::default());
        let good = point("A", Utc::now().timestamp(), 10.0);
        let bad = point("A", Utc::now().timestamp() + 1, -5.0);

        assert!(engine.process(good).is_some());
        assert!(engine.process(bad).is_none());

        let stats = engine.stats();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.passed + stats.corrected + stats.rejected, 2);
        assert_eq!(stats.rejected, 1);
    }

    #[test]
    fn rejects_high_below_low() {
        let engine = CleaningEngine::new(CleaningConfig::default());
        let mut p = point("A", 0, 10.0);
        p.high = 5.0;
        p.low = 9.0;
        assert!(engine.process(p).is_none());
        assert_eq!(engine.stats().issues_by_type.get("high_below_low"), Some(&1));
    }

    #[test]
    fn rejects_change_outside_bounds() {
        let engine = CleaningEngine::new(CleaningConfig::default());
        let mut p = point("A", 0, 15.0);
        p.open = 10.0;
        p.high = 15.0;
        p.low = 10.0;
        assert!(engine.process(p).is_none());
    }

    #[test]
    fn rejects_future_timestamp() {
        let engine = CleaningEngine::new(CleaningConfig::default());
        let p = point("A", Utc::now().timestamp() + 10_000, 10.0);
        assert!(engine.process(p).is_none());
    }

    #[test]
    fn rejects_duplicate_timestamp() {
        let engine = CleaningEngine::new(CleaningConfig::default());
        let ts = Utc::now().timestamp();
        assert!(engine.process(point("A", ts, 10.0)).is_some());
        assert!(engine.process(point("A", ts, 10.0)).is_none());
        assert_eq!(engine.stats().issues_by_type.get("duplicate_point"), Some(&1));
    }

    #[test]
    fn outlier_correction_replaces_close_with_median() {
        let mut cfg = CleaningConfig::default();
        cfg.outlier_window = 5;
        cfg.max_daily_change_pct = 10.0; // don't let price-validation reject the spike first
        let engine = CleaningEngine::new(cfg);
        let base = Utc::now().timestamp();
        for i in 0..5 {
            assert!(engine.process(point("A", base + i, 10.0)).is_some());
        }
        let spike = engine.process(point("A", base + 10, 1000.0)).unwrap();
        assert!((spike.close - 10.0).abs() < 1e-9);
        assert_eq!(engine.stats().corrected, 1);
    }

    #[test]
    fn fill_missing_forward_fills_zero_fields() {
        let mut points = vec![
            RawPoint { symbol: "A".into(), timestamp: 0, open: 10.0, high: 11.0, low: 9.0, close: 10.5, volume: 100.0, amount: 1000.0 },
            RawPoint { symbol: "A".into(), timestamp: 1, open: 0.0, high: 0.0, low: 9.2, close: 10.2, volume: 0.0, amount: 0.0 },
        ];
        fill_missing(&mut points);
        assert_eq!(points[1].open, 10.0);
        assert_eq!(points[1].high, 11.0);
        assert_eq!(points[1].low, 9.2);
        assert_eq!(points[1].volume, 100.0);
    }
}
