// =============================================================================
// Shared Data Model — §3 of the spec
// =============================================================================

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Tick / Bar
// ---------------------------------------------------------------------------

/// Instantaneous quote for a symbol. Time is monotonic non-decreasing per
/// symbol — the provider pool and ingestion pipeline drop any tick whose
/// `time` is earlier than the last observed tick for the same symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub bid: f64,
    pub ask: f64,
    pub volume: f64,
    pub turnover: f64,
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub pre_close: f64,
    pub time: i64,
    pub change: f64,
    pub change_pct: f64,
}

/// Daily OHLCV aggregate ("K-line").
///
/// Invariant: `low <= min(open, close) <= max(open, close) <= high`,
/// `volume >= 0`, `close > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub turnover: f64,
}

impl Bar {
    /// Whether this bar satisfies the OHLCV invariant from §3.
    pub fn is_valid(&self) -> bool {
        let lo = self.open.min(self.close);
        let hi = self.open.max(self.close);
        self.low <= lo && hi <= self.high && self.volume >= 0.0 && self.close > 0.0
    }
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// Classification label: down, flat, up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Label {
    Down = 0,
    Flat = 1,
    Up = 2,
}

impl Label {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Down),
            1 => Some(Self::Flat),
            2 => Some(Self::Up),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Quality issue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityIssue {
    pub issue_type: String,
    pub severity: Severity,
    pub message: String,
    pub time: i64,
    pub symbol: String,
}

// ---------------------------------------------------------------------------
// Provider health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub name: String,
    pub priority: u32,
    pub healthy: bool,
    pub last_check: i64,
    pub latency_ms: u64,
}

// ---------------------------------------------------------------------------
// Anomaly event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyKind {
    PriceJump,
    VolumeSpike,
    DataDelay,
    UnusualMovement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub kind: AnomalyKind,
    pub symbol: String,
    pub time: i64,
    pub description: String,
    pub details: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Trading signal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
            Action::Hold => write!(f, "HOLD"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalSource {
    Ai,
    Ml,
    Fused,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    pub symbol: String,
    pub action: Action,
    pub confidence: f64,
    pub source: SignalSource,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Always >= 0 — no shorts.
    pub amount: f64,
    pub cost_price: f64,
    pub total_cost: f64,
    pub current_price: f64,
    pub market_value: f64,
    pub unrealized_pnl: f64,
    pub updated_at: i64,
}

impl Position {
    pub fn recompute(&mut self) {
        self.market_value = self.amount * self.current_price;
        self.unrealized_pnl = self.market_value - self.total_cost;
    }
}

// ---------------------------------------------------------------------------
// Risk snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskTrip {
    None,
    DailyStop,
    PerSymbolStop,
    Frozen,
}

impl Default for RiskTrip {
    fn default() -> Self {
        Self::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub initial_capital: f64,
    pub equity: f64,
    pub drawdown: f64,
    pub peak_equity: f64,
    pub position_count: usize,
    pub daily_pnl: f64,
    pub tripped: RiskTrip,
}

// ---------------------------------------------------------------------------
// Replay session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayState {
    Running,
    Paused,
    Stopped,
    Completed,
}

impl ReplayState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReplayState::Stopped | ReplayState::Completed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaySession {
    pub id: String,
    pub symbol: String,
    pub start_date: i64,
    pub end_date: i64,
    pub speed: f64,
    pub state: ReplayState,
    pub cursor: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_invariant_holds_for_valid_bar() {
        let bar = Bar {
            date: 0,
            open: 10.0,
            high: 12.0,
            low: 9.0,
            close: 11.0,
            volume: 100.0,
            turnover: 1000.0,
        };
        assert!(bar.is_valid());
    }

    #[test]
    fn bar_invariant_rejects_high_below_close() {
        let bar = Bar {
            date: 0,
            open: 10.0,
            high: 10.5,
            low: 9.0,
            close: 11.0,
            volume: 100.0,
            turnover: 1000.0,
        };
        assert!(!bar.is_valid());
    }

    #[test]
    fn replay_terminal_states() {
        assert!(ReplayState::Stopped.is_terminal());
        assert!(ReplayState::Completed.is_terminal());
        assert!(!ReplayState::Running.is_terminal());
        assert!(!ReplayState::Paused.is_terminal());
    }

    #[test]
    fn position_amount_never_negative_by_construction() {
        let pos = Position {
            symbol: "600000".into(),
            amount: 100.0,
            cost_price: 10.0,
            total_cost: 1000.0,
            current_price: 11.0,
            market_value: 0.0,
            unrealized_pnl: 0.0,
            updated_at: 0,
        };
        assert!(pos.amount >= 0.0);
    }
}
