// =============================================================================
// Broker Reconciliation — periodic balance/position drift check
// =============================================================================
//
// SAFETY POLICY: mirrors the teacher's `reconcile.rs` — this module only
// observes and logs drift. It never cancels orders or closes positions;
// that stays the risk manager's and operator's job. Scoped down from the
// teacher's exchange-order comparison since the broker here is an HTTP
// contract (§6), not an exchange with its own order book to poll.

use chrono::Utc;
use tracing::{info, warn};

use super::broker::Broker;
use super::position::PositionBook;

#[derive(Debug, Clone)]
pub struct ReconcileResult {
    pub positions_checked: usize,
    pub balance_drift: bool,
    pub timestamp: String,
}

/// Run one reconciliation pass: refresh the broker's reported positions and
/// balances, and flag (without correcting) any symbol whose broker-reported
/// quantity differs from the local position book.
pub async fn reconcile_once(
    broker: &dyn Broker,
    positions: &PositionBook,
) -> crate::errors::MarketResult<ReconcileResult> {
    let now = Utc::now().to_rfc3339();
    info!(timestamp = %now, "reconciliation cycle started");

    let broker_positions = broker.positions().await?;
    let _balances = broker.balance().await?;

    let local = positions.snapshot();
    let mut drift = false;

    for bp in &broker_positions {
        let local_amount = local.iter().find(|p| p.symbol == bp.symbol).map(|p| p.amount).unwrap_or(0.0);
        if (local_amount - bp.amount).abs() > 1e-6 {
            warn!(symbol = %bp.symbol, local = local_amount, broker = bp.amount, "position drift detected");
            drift = true;
        }
    }

    Ok(ReconcileResult { positions_checked: local.len(), balance_drift: drift, timestamp: now })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::broker::{BrokerBalance, BrokerPosition, OrderAck};
    use async_trait::async_trait;

    struct FakeBroker {
        positions: Vec<BrokerPosition>,
    }

    #[async_trait]
    impl Broker for FakeBroker {
        async fn login(&self) -> crate::errors::MarketResult<()> {
            Ok(())
        }
        async fn logout(&self) -> crate::errors::MarketResult<()> {
            Ok(())
        }
        async fn buy(&self, _symbol: &str, _price: f64, _amount: f64) -> crate::errors::MarketResult<OrderAck> {
            unimplemented!()
        }
        async fn sell(&self, _symbol: &str, _price: f64, _quantity: f64) -> crate::errors::MarketResult<OrderAck> {
            unimplemented!()
        }
        async fn cancel(&self, _order_id: &str) -> crate::errors::MarketResult<()> {
            Ok(())
        }
        async fn positions(&self) -> crate::errors::MarketResult<Vec<BrokerPosition>> {
            Ok(self.positions.clone())
        }
        async fn balance(&self) -> crate::errors::MarketResult<Vec<BrokerBalance>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn detects_drift_between_local_and_broker() {
        let broker = FakeBroker {
            positions: vec![BrokerPosition { symbol: "600000".to_string(), amount: 200.0, cost_price: 10.0 }],
        };
        let book = PositionBook::new();
        book.buy("600000", 10.0, 100.0);

        let result = reconcile_once(&broker, &book).await.unwrap();
        assert!(result.balance_drift);
    }

    #[tokio::test]
    async fn no_drift_when_matching() {
        let broker = FakeBroker {
            positions: vec![BrokerPosition { symbol: "600000".to_string(), amount: 100.0, cost_price: 10.0 }],
        };
        let book = PositionBook::new();
        book.buy("600000", 10.0, 100.0);

        let result = reconcile_once(&broker, &book).await.unwrap();
        assert!(!result.balance_drift);
    }
}
