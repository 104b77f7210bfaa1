// =============================================================================
// Decision Envelope — auditable record of a fused trading decision
// =============================================================================
//
// Every signal-fusion pass produces one envelope capturing both source
// signals, the fused verdict, and the risk-manager outcome, so the full
// reasoning chain behind a trade (or skipped trade) survives after the fact.

use serde::Serialize;

use crate::types::{Action, TradingSignal};

#[derive(Debug, Clone, Serialize)]
pub struct DecisionEnvelope {
    pub id: String,
    pub symbol: String,
    pub ai_signal: Option<TradingSignal>,
    pub ml_signal: Option<TradingSignal>,
    pub fused_action: Action,
    pub fused_confidence: f64,
    pub risk_verdict: String,
    pub final_decision: String,
    pub reason: Option<String>,
    pub created_at: String,
}

impl DecisionEnvelope {
    pub fn new(
        symbol: impl Into<String>,
        ai_signal: Option<TradingSignal>,
        ml_signal: Option<TradingSignal>,
        fused_action: Action,
        fused_confidence: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            ai_signal,
            ml_signal,
            fused_action,
            fused_confidence,
            risk_verdict: "PENDING".to_string(),
            final_decision: "PENDING".to_string(),
            reason: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn allow(mut self) -> Self {
        self.risk_verdict = "PASS".to_string();
        self.final_decision = "EXECUTED".to_string();
        self
    }

    pub fn block(mut self, reason: impl Into<String>) -> Self {
        self.risk_verdict = "REJECTED".to_string();
        self.final_decision = "BLOCKED".to_string();
        self.reason = Some(reason.into());
        self
    }

    pub fn hold(mut self) -> Self {
        self.risk_verdict = "SKIPPED".to_string();
        self.final_decision = "HOLD".to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_sets_executed() {
        let env = DecisionEnvelope::new("600000", None, None, Action::Buy, 0.8).allow();
        assert_eq!(env.final_decision, "EXECUTED");
        assert_eq!(env.risk_verdict, "PASS");
    }

    #[test]
    fn block_carries_reason() {
        let env = DecisionEnvelope::new("600000", None, None, Action::Buy, 0.8).block("weight cap");
        assert_eq!(env.final_decision, "BLOCKED");
        assert_eq!(env.reason.as_deref(), Some("weight cap"));
    }
}
