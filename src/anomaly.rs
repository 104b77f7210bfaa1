// =============================================================================
// Anomaly Detection — C4 per-symbol streaming checks over bounded windows
// =============================================================================
//
// Stateful, per-symbol detector retaining a bounded rolling window of recent
// prices/volumes (FIFO, capped at MAX_WINDOW). Four checks run independently
// per incoming tick: price jump, volume spike, unusual movement (z-score),
// and data delay (driven by a separate timer, not the tick path). Detected
// events fan out to subscribers without blocking the ingestion path.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{AnomalyEvent, AnomalyKind};

/// Bound on the rolling window kept per symbol.
pub const MAX_WINDOW: usize = 100;

/// Minimum samples required before the volume-spike check activates.
const VOLUME_SPIKE_MIN_SAMPLES: usize = 10;
/// Minimum samples required before the unusual-movement check activates.
const UNUSUAL_MOVEMENT_MIN_SAMPLES: usize = 20;

#[derive(Debug, Clone, Copy)]
pub struct AnomalyThresholds {
    /// Fractional price jump threshold (0.05 = 5%).
    pub price_jump_pct: f64,
    /// Volume-spike threshold: ratio of current volume to the mean of the
    /// last 10 samples.
    pub volume_spike_ratio: f64,
    /// Unusual-movement threshold, in standard deviations.
    pub unusual_movement_z: f64,
    /// Max tolerated gap between ticks before a data-delay event fires.
    pub data_delay_secs: i64,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            price_jump_pct: 0.05,
            volume_spike_ratio: 3.0,
            unusual_movement_z: 3.0,
            data_delay_secs: 10,
        }
    }
}

#[derive(Default)]
struct SymbolWindow {
    prices: VecDeque<f64>,
    volumes: VecDeque<f64>,
    last_price: Option<f64>,
    last_tick_time: Option<i64>,
}

impl SymbolWindow {
    fn push(&mut self, price: f64, volume: f64) {
        self.prices.push_back(price);
        self.volumes.push_back(volume);
        if self.prices.len() > MAX_WINDOW {
            self.prices.pop_front();
        }
        if self.volumes.len() > MAX_WINDOW {
            self.volumes.pop_front();
        }
    }
}

fn mean_std(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let vals: Vec<f64> = values.collect();
    let n = vals.len() as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let mean = vals.iter().sum::<f64>() / n;
    let variance = vals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

pub struct AnomalyDetector {
    windows: RwLock<HashMap<String, SymbolWindow>>,
    thresholds: AnomalyThresholds,
    tx: broadcast::Sender<AnomalyEvent>,
}

impl AnomalyDetector {
    pub fn new(thresholds: AnomalyThresholds) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self { windows: RwLock::new(HashMap::new()), thresholds, tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AnomalyEvent> {
        self.tx.subscribe()
    }

    fn dispatch(&self, event: AnomalyEvent) {
        // Non-blocking: a full channel or zero subscribers just drops the send.
        let _ = self.tx.send(event);
    }

    /// Feed a new tick through all window-based checks and dispatch any
    /// detected anomalies.
    pub fn observe(&self, symbol: &str, price: f64, volume: f64, time: i64) -> Vec<AnomalyEvent> {
        let mut events = Vec::new();
        let mut windows = self.windows.write();
        let window = windows.entry(symbol.to_string()).or_default();

        if let Some(prior) = window.last_price {
            if prior > 0.0 {
                let change_pct = (price - prior) / prior;
                if change_pct.abs() > self.thresholds.price_jump_pct {
                    events.push(AnomalyEvent {
                        kind: AnomalyKind::PriceJump,
                        symbol: symbol.to_string(),
                        time,
                        description: format!(
                            "price moved {:.2}% from {:.4} to {:.4}",
                            change_pct * 100.0,
                            prior,
                            price
                        ),
                        details: json!({
                            "change_percent": change_pct * 100.0,
                            "threshold": self.thresholds.price_jump_pct * 100.0,
                            "prior_price": prior,
                            "price": price,
                        }),
                    });
                }
            }
        }

        if window.volumes.len() >= VOLUME_SPIKE_MIN_SAMPLES {
            let last10: Vec<f64> = window.volumes.iter().rev().take(10).copied().collect();
            let mean = last10.iter().sum::<f64>() / last10.len() as f64;
            if mean > 0.0 {
                let ratio = volume / mean;
                if ratio > self.thresholds.volume_spike_ratio {
                    events.push(AnomalyEvent {
                        kind: AnomalyKind::VolumeSpike,
                        symbol: symbol.to_string(),
                        time,
                        description: format!("volume {volume:.2} is {ratio:.2}x the last-10 mean"),
                        details: json!({ "ratio": ratio, "threshold": self.thresholds.volume_spike_ratio, "volume": volume, "mean": mean }),
                    });
                }
            }
        }

        if window.prices.len() >= UNUSUAL_MOVEMENT_MIN_SAMPLES {
            let (mean, std) = mean_std(window.prices.iter().copied());
            if std > 0.0 {
                let z = (price - mean) / std;
                if z.abs() > self.thresholds.unusual_movement_z {
                    events.push(AnomalyEvent {
                        kind: AnomalyKind::UnusualMovement,
                        symbol: symbol.to_string(),
                        time,
                        description: format!("price z-score {z:.2} exceeds threshold"),
                        details: json!({ "z_score": z, "threshold": self.thresholds.unusual_movement_z }),
                    });
                }
            }
        }

        window.push(price, volume);
        window.last_price = Some(price);
        window.last_tick_time = Some(time);

        for event in &events {
            debug!(symbol, kind = ?event.kind, "anomaly detected");
            self.dispatch(event.clone());
        }
        events
    }

    /// Checks the elapsed time since the last observed tick for `symbol`
    /// against the configured delay threshold. Driven by a timer, not the
    /// tick path, since absence of data cannot be observed from a tick.
    pub fn check_data_delay(&self, symbol: &str, now: i64) -> Option<AnomalyEvent> {
        let windows = self.windows.read();
        let last = windows.get(symbol)?.last_tick_time?;
        let gap = now - last;
        if gap > self.thresholds.data_delay_secs {
            let event = AnomalyEvent {
                kind: AnomalyKind::DataDelay,
                symbol: symbol.to_string(),
                time: now,
                description: format!("no tick for {gap}s, exceeds {}s", self.thresholds.data_delay_secs),
                details: json!({ "gap_secs": gap, "threshold_secs": self.thresholds.data_delay_secs }),
            };
            drop(windows);
            self.dispatch(event.clone());
            return Some(event);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_jump_detected_with_default_threshold() {
        // S5: prior price 100, then 106 -> one price_jump event, change=6, threshold=5.
        let detector = AnomalyDetector::new(AnomalyThresholds::default());
        detector.observe("X", 100.0, 1000.0, 0);
        let events = detector.observe("X", 106.0, 1000.0, 1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AnomalyKind::PriceJump);
        let change = events[0].details["change_percent"].as_f64().unwrap();
        assert!((change - 6.0).abs() < 1e-9);
        let threshold = events[0].details["threshold"].as_f64().unwrap();
        assert!((threshold - 5.0).abs() < 1e-9);
    }

    #[test]
    fn no_jump_within_threshold() {
        let detector = AnomalyDetector::new(AnomalyThresholds::default());
        detector.observe("X", 100.0, 1000.0, 0);
        let events = detector.observe("X", 102.0, 1000.0, 1);
        assert!(events.is_empty());
    }

    #[test]
    fn volume_spike_requires_minimum_samples() {
        let detector = AnomalyDetector::new(AnomalyThresholds::default());
        for i in 0..5 {
            detector.observe("X", 100.0, 1000.0, i);
        }
        // Fewer than VOLUME_SPIKE_MIN_SAMPLES so far; a huge volume spike is
        // still not flagged.
        let events = detector.observe("X", 100.0, 1_000_000.0, 5);
        assert!(events.iter().all(|e| e.kind != AnomalyKind::VolumeSpike));
    }

    #[test]
    fn volume_spike_detected_once_warmed_up() {
        // last-10 mean is 1000, so a tick at 3001 clears the default 3.0x ratio.
        let detector = AnomalyDetector::new(AnomalyThresholds::default());
        for i in 0..15 {
            detector.observe("X", 100.0, 1000.0, i);
        }
        let events = detector.observe("X", 100.0, 3001.0, 16);
        assert!(events.iter().any(|e| e.kind == AnomalyKind::VolumeSpike));
    }

    #[test]
    fn volume_spike_not_flagged_within_ratio() {
        let detector = AnomalyDetector::new(AnomalyThresholds::default());
        for i in 0..15 {
            detector.observe("X", 100.0, 1000.0, i);
        }
        let events = detector.observe("X", 100.0, 2000.0, 16);
        assert!(events.iter().all(|e| e.kind != AnomalyKind::VolumeSpike));
    }

    #[test]
    fn data_delay_detected_after_gap() {
        let detector = AnomalyDetector::new(AnomalyThresholds::default());
        detector.observe("X", 100.0, 1000.0, 0);
        assert!(detector.check_data_delay("X", 5).is_none());
        assert!(detector.check_data_delay("X", 20).is_some());
    }

    #[test]
    fn data_delay_unknown_symbol_is_none() {
        let detector = AnomalyDetector::new(AnomalyThresholds::default());
        assert!(detector.check_data_delay("UNKNOWN", 100).is_none());
    }

    #[test]
    fn window_is_bounded_to_max_window() {
        let detector = AnomalyDetector::new(AnomalyThresholds::default());
        for i in 0..(MAX_WINDOW as i64 + 50) {
            detector.observe("X", 100.0 + (i % 3) as f64, 1000.0, i);
        }
        let windows = detector.windows.read();
        let w = windows.get("X").unwrap();
        assert_eq!(w.prices.len(), MAX_WINDOW);
        assert_eq!(w.volumes.len(), MAX_WINDOW);
    }
}
