// =============================================================================
// Execution — C9 signal fusion, order routing, and the auto-trade scheduler
// =============================================================================

pub mod broker;
pub mod position;
pub mod reconcile;
pub mod scheduler;

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::decision_envelope::DecisionEnvelope;
use crate::errors::MarketResult;
use crate::risk::{RiskManager, Side};
use crate::types::{Action, SignalSource, TradingSignal};

use broker::Broker;
use position::PositionBook;

/// Bound on the retained decision-envelope audit trail.
const DECISION_LOG_CAPACITY: usize = 1000;

/// Fuse an AI signal and an ML signal into one trading decision.
///
/// Agreement on action averages confidence; disagreement (including either
/// side missing) yields `Hold` with the average confidence of whatever is
/// present, per §4.9's fusion rule: agree -> action with avg confidence >=
/// 0.5, disagree -> hold.
pub fn fuse_signals(ai: Option<&TradingSignal>, ml: Option<&TradingSignal>) -> (Action, f64) {
    match (ai, ml) {
        (Some(a), Some(m)) if a.action == m.action => {
            let conf = (a.confidence + m.confidence) / 2.0;
            if conf >= 0.5 {
                (a.action, conf)
            } else {
                (Action::Hold, conf)
            }
        }
        (Some(a), Some(m)) => (Action::Hold, (a.confidence + m.confidence) / 2.0),
        (Some(a), None) => (Action::Hold, a.confidence),
        (None, Some(m)) => (Action::Hold, m.confidence),
        (None, None) => (Action::Hold, 0.0),
    }
}

pub struct ExecutionEngine {
    broker: Arc<dyn Broker>,
    positions: Arc<PositionBook>,
    risk: Arc<RiskManager>,
    cash: parking_lot::RwLock<f64>,
    decision_log: RwLock<VecDeque<DecisionEnvelope>>,
}

impl ExecutionEngine {
    pub fn new(broker: Arc<dyn Broker>, positions: Arc<PositionBook>, risk: Arc<RiskManager>, initial_cash: f64) -> Self {
        Self {
            broker,
            positions,
            risk,
            cash: parking_lot::RwLock::new(initial_cash),
            decision_log: RwLock::new(VecDeque::new()),
        }
    }

    pub fn positions(&self) -> &PositionBook {
        &self.positions
    }

    pub fn cash(&self) -> f64 {
        *self.cash.read()
    }

    /// Most recent decision envelopes, oldest first, capped at
    /// `DECISION_LOG_CAPACITY`.
    pub fn decision_log(&self) -> Vec<DecisionEnvelope> {
        self.decision_log.read().iter().cloned().collect()
    }

    fn record_decision(&self, envelope: DecisionEnvelope) -> DecisionEnvelope {
        let mut log = self.decision_log.write();
        log.push_back(envelope.clone());
        while log.len() > DECISION_LOG_CAPACITY {
            log.pop_front();
        }
        envelope
    }

    /// Fuse AI/ML signals, run the risk pre-check, and route the order
    /// through the broker on approval. Always returns a fully-populated
    /// audit envelope, even when no trade was attempted.
    pub async fn decide_and_execute(
        &self,
        symbol: &str,
        price: f64,
        ai: Option<TradingSignal>,
        ml: Option<TradingSignal>,
        order_money: f64,
    ) -> DecisionEnvelope {
        let (action, confidence) = fuse_signals(ai.as_ref(), ml.as_ref());
        let envelope = DecisionEnvelope::new(symbol, ai, ml, action, confidence);

        let envelope = match action {
            Action::Hold => envelope.hold(),
            Action::Buy => match self.try_buy(symbol, price, order_money).await {
                Ok(()) => envelope.allow(),
                Err(e) => envelope.block(e.to_string()),
            },
            Action::Sell => {
                let shares = self.positions.get(symbol).map(|p| p.amount).unwrap_or(0.0);
                match self.try_sell(symbol, price, shares).await {
                    Ok(()) => envelope.allow(),
                    Err(e) => envelope.block(e.to_string()),
                }
            }
        };
        self.record_decision(envelope)
    }

    async fn try_buy(&self, symbol: &str, price: f64, money: f64) -> MarketResult<()> {
        let snapshot = self.positions.snapshot();
        let equity = self.positions.equity(*self.cash.read());
        self.risk.pre_check(symbol, Side::Buy, price, money, &snapshot, equity)?;

        let ack = self
            .broker
            .buy(symbol, price, money)
            .await
            .map_err(|e| {
                warn!(symbol, error = %e, "broker buy failed");
                e
            })?;

        let shares = if price > 0.0 { money / price } else { 0.0 };
        self.positions.buy(symbol, price, shares);
        *self.cash.write() -= money;
        info!(symbol, order_id = %ack.order_id, shares, "buy executed");
        Ok(())
    }

    async fn try_sell(&self, symbol: &str, price: f64, shares: f64) -> MarketResult<()> {
        if shares <= 0.0 {
            return Err(crate::errors::MarketError::Validation(format!("no position to sell for {symbol}")));
        }
        let snapshot = self.positions.snapshot();
        let equity = self.positions.equity(*self.cash.read());
        self.risk.pre_check(symbol, Side::Sell, price, shares, &snapshot, equity)?;

        let ack = self.broker.sell(symbol, price, shares).await?;
        let realized = self.positions.sell(symbol, price, shares).unwrap_or(0.0);
        *self.cash.write() += price * shares;
        self.risk.update_daily_pnl(realized, self.positions.equity(*self.cash.read()));
        info!(symbol, order_id = %ack.order_id, shares, realized, "sell executed");
        Ok(())
    }

    /// Force-close a position at market due to a stop-loss trip, bypassing
    /// the pre-check notional floor (the position may be smaller than the
    /// minimum order amount after partial fills).
    pub async fn force_close(&self, symbol: &str, price: f64) -> MarketResult<()> {
        let shares = self.positions.get(symbol).map(|p| p.amount).unwrap_or(0.0);
        if shares <= 0.0 {
            return Ok(());
        }
        let ack = self.broker.sell(symbol, price, shares).await?;
        let realized = self.positions.sell(symbol, price, shares).unwrap_or(0.0);
        *self.cash.write() += price * shares;
        self.risk.update_daily_pnl(realized, self.positions.equity(*self.cash.read()));
        warn!(symbol, order_id = %ack.order_id, realized, "position force-closed on stop-loss");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskConfig;
    use crate::execution::broker::{BrokerBalance, BrokerPosition, OrderAck};

    fn sig(action: Action, confidence: f64, source: SignalSource) -> TradingSignal {
        TradingSignal { symbol: "600000".to_string(), action, confidence, source, reason: String::new() }
    }

    struct FakeBroker;

    #[async_trait::async_trait]
    impl Broker for FakeBroker {
        async fn login(&self) -> MarketResult<()> {
            Ok(())
        }
        async fn logout(&self) -> MarketResult<()> {
            Ok(())
        }
        async fn buy(&self, _symbol: &str, _price: f64, _amount: f64) -> MarketResult<OrderAck> {
            Ok(OrderAck { order_id: "1".to_string() })
        }
        async fn sell(&self, _symbol: &str, _price: f64, _quantity: f64) -> MarketResult<OrderAck> {
            Ok(OrderAck { order_id: "2".to_string() })
        }
        async fn cancel(&self, _order_id: &str) -> MarketResult<()> {
            Ok(())
        }
        async fn positions(&self) -> MarketResult<Vec<BrokerPosition>> {
            Ok(vec![])
        }
        async fn balance(&self) -> MarketResult<Vec<BrokerBalance>> {
            Ok(vec![])
        }
    }

    fn engine() -> ExecutionEngine {
        let risk = Arc::new(RiskManager::new(RiskConfig::default(), 100_000.0));
        ExecutionEngine::new(Arc::new(FakeBroker), Arc::new(PositionBook::new()), risk, 100_000.0)
    }

    #[tokio::test]
    async fn decision_log_retains_executed_and_held_envelopes() {
        let engine = engine();
        engine.decide_and_execute("600000", 10.0, None, None, 1000.0).await;
        let ai = sig(Action::Buy, 0.9, SignalSource::Ai);
        let ml = sig(Action::Buy, 0.9, SignalSource::Ml);
        engine.decide_and_execute("600000", 10.0, Some(ai), Some(ml), 1000.0).await;

        let log = engine.decision_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].final_decision, "HOLD");
        assert_eq!(log[1].final_decision, "EXECUTED");
    }

    #[tokio::test]
    async fn decision_log_is_bounded() {
        let engine = engine();
        for _ in 0..(DECISION_LOG_CAPACITY + 50) {
            engine.decide_and_execute("600000", 10.0, None, None, 1000.0).await;
        }
        assert_eq!(engine.decision_log().len(), DECISION_LOG_CAPACITY);
    }

    #[test]
    fn agreement_above_threshold_yields_action() {
        let ai = sig(Action::Buy, 0.7, SignalSource::Ai);
        let ml = sig(Action::Buy, 0.6, SignalSource::Ml);
        let (action, conf) = fuse_signals(Some(&ai), Some(&ml));
        assert_eq!(action, Action::Buy);
        assert!((conf - 0.65).abs() < 1e-9);
    }

    #[test]
    fn agreement_below_threshold_yields_hold() {
        let ai = sig(Action::Buy, 0.3, SignalSource::Ai);
        let ml = sig(Action::Buy, 0.4, SignalSource::Ml);
        let (action, _) = fuse_signals(Some(&ai), Some(&ml));
        assert_eq!(action, Action::Hold);
    }

    #[test]
    fn disagreement_yields_hold() {
        let ai = sig(Action::Buy, 0.9, SignalSource::Ai);
        let ml = sig(Action::Sell, 0.9, SignalSource::Ml);
        let (action, _) = fuse_signals(Some(&ai), Some(&ml));
        assert_eq!(action, Action::Hold);
    }

    #[test]
    fn missing_signal_yields_hold() {
        let ai = sig(Action::Buy, 0.9, SignalSource::Ai);
        let (action, conf) = fuse_signals(Some(&ai), None);
        assert_eq!(action, Action::Hold);
        assert!((conf - 0.9).abs() < 1e-9);
    }
}
