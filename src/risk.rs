// =============================================================================
// Risk Manager — §4.9 pre-trade checks and daily circuit breaker
// =============================================================================
//
// Limits are static per session (unlike the teacher's hot-reloadable
// breakers): `maxPerSymbolWeight`, `maxOpenPositions`, `dailyStopLossPct`,
// `perSymbolStopLossPct`, `minOrderAmount`. `tripped` is one-way per
// calendar day — once set it stays set until the date rolls over, mirroring
// the teacher's `maybe_reset_daily` idiom. The manager never reaches into
// the position book directly; callers pass in the positions/equity snapshot
// needed for each check, which breaks the risk-manager/position-manager
// cycle per the mediator pattern.

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::RiskConfig;
use crate::errors::{MarketError, MarketResult};
use crate::types::{Position, RiskSnapshot, RiskTrip};

struct Inner {
    daily_pnl: f64,
    peak_equity: f64,
    /// Equity snapshot taken at the start of `current_date`. The daily
    /// stop-loss percentage is measured against this, not the account's
    /// lifetime starting capital.
    open_equity: f64,
    tripped: RiskTrip,
    current_date: String,
}

pub struct RiskManager {
    state: RwLock<Inner>,
    limits: RiskConfig,
    initial_capital: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl RiskManager {
    pub fn new(limits: RiskConfig, initial_capital: f64) -> Self {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        Self {
            state: RwLock::new(Inner {
                daily_pnl: 0.0,
                peak_equity: initial_capital,
                open_equity: initial_capital,
                tripped: RiskTrip::None,
                current_date: today,
            }),
            limits,
            initial_capital,
        }
    }

    /// Rolls daily state over at a date change, snapshotting `equity` as the
    /// new day's opening equity for the stop-loss percentage calculation.
    fn maybe_reset_daily(&self, equity: f64) {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        {
            let s = self.state.read();
            if s.current_date == today {
                return;
            }
        }
        let mut s = self.state.write();
        if s.current_date != today {
            debug!(old_date = %s.current_date, new_date = %today, open_equity = equity, "date rolled, resetting risk state");
            s.daily_pnl = 0.0;
            s.peak_equity = self.initial_capital;
            s.open_equity = equity;
            s.tripped = RiskTrip::None;
            s.current_date = today;
        }
    }

    /// Pre-trade gate. `positions` and `equity` are the caller's current
    /// snapshot — the risk manager holds no position state of its own.
    ///
    /// `amount` follows the broker contract from §6: for `Buy` it is a money
    /// value (the order's notional), for `Sell` it is a share quantity and
    /// `price` converts it to notional.
    pub fn pre_check(
        &self,
        symbol: &str,
        side: Side,
        price: f64,
        amount: f64,
        positions: &[Position],
        equity: f64,
    ) -> MarketResult<()> {
        self.maybe_reset_daily(equity);
        let s = self.state.read();

        if s.tripped != RiskTrip::None {
            return Err(MarketError::RiskRejected(format!("risk circuit tripped: {:?}", s.tripped)));
        }
        drop(s);

        let notional = match side {
            Side::Buy => amount,
            Side::Sell => price * amount,
        };

        if notional < self.limits.min_order_amount {
            return Err(MarketError::RiskRejected(format!(
                "order amount {notional:.2} below minimum {:.2}",
                self.limits.min_order_amount
            )));
        }

        if side == Side::Buy {
            let projected_weight = if equity > 0.0 { notional / equity } else { f64::INFINITY };
            if projected_weight > self.limits.max_per_symbol_weight {
                return Err(MarketError::RiskRejected(format!(
                    "per-symbol weight {:.2} exceeds cap {:.2}",
                    projected_weight, self.limits.max_per_symbol_weight
                )));
            }

            let already_holds = positions.iter().any(|p| p.symbol == symbol && p.amount > 0.0);
            let distinct_positions = positions.iter().filter(|p| p.amount > 0.0).count();
            if !already_holds && distinct_positions >= self.limits.max_open_positions as usize {
                return Err(MarketError::RiskRejected(format!(
                    "open position count {distinct_positions} at cap {}",
                    self.limits.max_open_positions
                )));
            }
        }

        Ok(())
    }

    /// Record PnL realized since the last call and update drawdown/trip
    /// state. `equity` is the caller's current total equity (cash + market
    /// value of positions).
    pub fn update_daily_pnl(&self, pnl_delta: f64, equity: f64) {
        self.maybe_reset_daily(equity);
        let mut s = self.state.write();
        s.daily_pnl += pnl_delta;

        if equity > s.peak_equity {
            s.peak_equity = equity;
        }

        let daily_loss_pct = if s.open_equity > 0.0 {
            (s.open_equity - equity) / s.open_equity
        } else {
            0.0
        };

        if s.tripped == RiskTrip::None && daily_loss_pct >= self.limits.daily_stop_loss_pct {
            warn!(daily_loss_pct, limit = self.limits.daily_stop_loss_pct, "daily stop-loss tripped");
            s.tripped = RiskTrip::DailyStop;
        }
    }

    /// Returns the symbols whose unrealized loss from cost exceeds the
    /// per-symbol stop-loss percentage.
    pub fn check_position_loss(&self, positions: &[Position]) -> Vec<String> {
        positions
            .iter()
            .filter(|p| p.amount > 0.0 && p.cost_price > 0.0)
            .filter_map(|p| {
                let loss_pct = (p.cost_price - p.current_price) / p.cost_price;
                if loss_pct >= self.limits.per_symbol_stop_loss_pct {
                    Some(p.symbol.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn snapshot(&self, positions: &[Position], equity: f64) -> RiskSnapshot {
        self.maybe_reset_daily(equity);
        let s = self.state.read();
        let drawdown = if s.peak_equity > 0.0 { (s.peak_equity - equity) / s.peak_equity } else { 0.0 };
        RiskSnapshot {
            initial_capital: self.initial_capital,
            equity,
            drawdown,
            peak_equity: s.peak_equity,
            position_count: positions.iter().filter(|p| p.amount > 0.0).count(),
            daily_pnl: s.daily_pnl,
            tripped: s.tripped,
        }
    }

    pub fn freeze(&self) {
        let mut s = self.state.write();
        s.tripped = RiskTrip::Frozen;
        warn!("risk manager manually frozen");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(symbol: &str, amount: f64, cost_price: f64, current_price: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            amount,
            cost_price,
            total_cost: amount * cost_price,
            current_price,
            market_value: amount * current_price,
            unrealized_pnl: amount * (current_price - cost_price),
            updated_at: 0,
        }
    }

    fn limits() -> RiskConfig {
        RiskConfig {
            max_per_symbol_weight: 0.30,
            max_open_positions: 3,
            daily_stop_loss_pct: 0.10,
            per_symbol_stop_loss_pct: 0.05,
            min_order_amount: 1.0,
        }
    }

    #[test]
    fn rejects_buy_exceeding_per_symbol_weight() {
        // S6: initialCapital=100, buy at weight 0.35 -> rejected.
        let rm = RiskManager::new(limits(), 100.0);
        let err = rm.pre_check("600000", Side::Buy, 10.0, 35.0, &[], 100.0).unwrap_err();
        assert!(matches!(err, MarketError::RiskRejected(_)));
    }

    #[test]
    fn rejects_buy_exceeding_max_open_positions() {
        // S6: buy at weight 0.25 with 3 prior distinct positions -> rejected.
        let rm = RiskManager::new(limits(), 100.0);
        let positions = vec![
            position("A", 1.0, 10.0, 10.0),
            position("B", 1.0, 10.0, 10.0),
            position("C", 1.0, 10.0, 10.0),
        ];
        let err = rm.pre_check("D", Side::Buy, 10.0, 25.0, &positions, 100.0).unwrap_err();
        assert!(matches!(err, MarketError::RiskRejected(_)));
    }

    #[test]
    fn approves_buy_within_limits() {
        let rm = RiskManager::new(limits(), 100.0);
        assert!(rm.pre_check("600000", Side::Buy, 10.0, 20.0, &[], 100.0).is_ok());
    }

    #[test]
    fn adding_to_existing_position_does_not_count_against_open_cap() {
        let rm = RiskManager::new(limits(), 1000.0);
        let positions = vec![
            position("A", 1.0, 10.0, 10.0),
            position("B", 1.0, 10.0, 10.0),
            position("C", 1.0, 10.0, 10.0),
        ];
        assert!(rm.pre_check("A", Side::Buy, 10.0, 10.0, &positions, 1000.0).is_ok());
    }

    #[test]
    fn daily_stop_trips_and_blocks_further_trades() {
        let rm = RiskManager::new(limits(), 100.0);
        rm.update_daily_pnl(-15.0, 85.0);
        let err = rm.pre_check("600000", Side::Buy, 1.0, 2.0, &[], 85.0).unwrap_err();
        assert!(matches!(err, MarketError::RiskRejected(_)));
    }

    #[test]
    fn daily_stop_trips_on_unrealized_drawdown_even_without_realized_pnl() {
        // Equity can slide purely from unrealized marks with no realized
        // pnl recorded; the trip must react to the equity snapshot itself,
        // not a running sum of `pnl_delta`.
        let rm = RiskManager::new(limits(), 100.0);
        rm.update_daily_pnl(0.0, 92.0);
        assert!(rm.pre_check("600000", Side::Buy, 1.0, 2.0, &[], 92.0).is_ok());

        rm.update_daily_pnl(0.0, 89.0);
        let err = rm.pre_check("600000", Side::Buy, 1.0, 2.0, &[], 89.0).unwrap_err();
        assert!(matches!(err, MarketError::RiskRejected(_)));
    }

    #[test]
    fn position_loss_detection() {
        let rm = RiskManager::new(limits(), 100.0);
        let positions = vec![position("A", 10.0, 10.0, 9.0), position("B", 10.0, 10.0, 10.0)];
        let losers = rm.check_position_loss(&positions);
        assert_eq!(losers, vec!["A".to_string()]);
    }

    #[test]
    fn rejects_order_below_minimum_amount() {
        let rm = RiskManager::new(limits(), 1000.0);
        let err = rm.pre_check("600000", Side::Buy, 1.0, 0.5, &[], 1000.0).unwrap_err();
        assert!(matches!(err, MarketError::RiskRejected(_)));
    }
}
