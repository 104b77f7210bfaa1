// =============================================================================
// Position Book — §3 Position tracking (no shorts)
// =============================================================================
//
// One position per symbol, amount always >= 0. Grounded in the teacher's
// `PositionManager` (RwLock-guarded vector, price-update recomputation) but
// simplified to the spec's long-only, single-lot-per-symbol model: no TP/SL
// ladders or trailing stops live here, since those belong to the risk
// manager and the signal layer, not the position book.

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::types::Position;

pub struct PositionBook {
    positions: RwLock<Vec<Position>>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self { positions: RwLock::new(Vec::new()) }
    }

    /// Add to (or open) a position at `price` for `shares`, weighting the
    /// cost basis by the new lot.
    pub fn buy(&self, symbol: &str, price: f64, shares: f64) {
        let mut positions = self.positions.write();
        let now = Utc::now().timestamp();
        match positions.iter_mut().find(|p| p.symbol == symbol) {
            Some(pos) => {
                let new_total_cost = pos.total_cost + price * shares;
                let new_amount = pos.amount + shares;
                pos.amount = new_amount;
                pos.total_cost = new_total_cost;
                pos.cost_price = if new_amount > 0.0 { new_total_cost / new_amount } else { 0.0 };
                pos.current_price = price;
                pos.updated_at = now;
                pos.recompute();
            }
            None => {
                let mut pos = Position {
                    symbol: symbol.to_string(),
                    amount: shares,
                    cost_price: price,
                    total_cost: price * shares,
                    current_price: price,
                    market_value: 0.0,
                    unrealized_pnl: 0.0,
                    updated_at: now,
                };
                pos.recompute();
                positions.push(pos);
            }
        }
        info!(symbol, price, shares, "position increased");
    }

    /// Reduce (or close) a position, returning realized PnL if a matching
    /// position with sufficient shares existed.
    pub fn sell(&self, symbol: &str, price: f64, shares: f64) -> Option<f64> {
        let mut positions = self.positions.write();
        let idx = positions.iter().position(|p| p.symbol == symbol)?;
        let pos = &mut positions[idx];
        let closed_shares = shares.min(pos.amount);
        let realized = (price - pos.cost_price) * closed_shares;

        pos.amount -= closed_shares;
        pos.total_cost -= pos.cost_price * closed_shares;
        pos.current_price = price;
        pos.updated_at = Utc::now().timestamp();
        pos.recompute();

        info!(symbol, price, shares = closed_shares, realized, "position reduced");

        if pos.amount <= 0.0 {
            positions.remove(idx);
        }
        Some(realized)
    }

    pub fn update_price(&self, symbol: &str, price: f64) {
        let mut positions = self.positions.write();
        if let Some(pos) = positions.iter_mut().find(|p| p.symbol == symbol) {
            pos.current_price = price;
            pos.updated_at = Utc::now().timestamp();
            pos.recompute();
            debug!(symbol, price, unrealized_pnl = pos.unrealized_pnl, "position price updated");
        }
    }

    pub fn snapshot(&self) -> Vec<Position> {
        self.positions.read().clone()
    }

    pub fn get(&self, symbol: &str) -> Option<Position> {
        self.positions.read().iter().find(|p| p.symbol == symbol).cloned()
    }

    pub fn equity(&self, cash: f64) -> f64 {
        cash + self.positions.read().iter().map(|p| p.market_value).sum::<f64>()
    }
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_opens_new_position() {
        let book = PositionBook::new();
        book.buy("600000", 10.0, 100.0);
        let pos = book.get("600000").unwrap();
        assert!((pos.amount - 100.0).abs() < 1e-9);
        assert!((pos.cost_price - 10.0).abs() < 1e-9);
    }

    #[test]
    fn buy_averages_cost_basis() {
        let book = PositionBook::new();
        book.buy("600000", 10.0, 100.0);
        book.buy("600000", 20.0, 100.0);
        let pos = book.get("600000").unwrap();
        assert!((pos.amount - 200.0).abs() < 1e-9);
        assert!((pos.cost_price - 15.0).abs() < 1e-9);
    }

    #[test]
    fn sell_reduces_and_realizes_pnl() {
        let book = PositionBook::new();
        book.buy("600000", 10.0, 100.0);
        let realized = book.sell("600000", 12.0, 50.0).unwrap();
        assert!((realized - 100.0).abs() < 1e-9);
        let pos = book.get("600000").unwrap();
        assert!((pos.amount - 50.0).abs() < 1e-9);
    }

    #[test]
    fn sell_entire_position_removes_it() {
        let book = PositionBook::new();
        book.buy("600000", 10.0, 100.0);
        book.sell("600000", 12.0, 100.0);
        assert!(book.get("600000").is_none());
    }

    #[test]
    fn amount_never_negative() {
        let book = PositionBook::new();
        book.buy("600000", 10.0, 50.0);
        book.sell("600000", 11.0, 1000.0);
        assert!(book.get("600000").is_none());
    }
}
