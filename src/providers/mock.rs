// =============================================================================
// Mock Provider — deterministic, network-free quote source
// =============================================================================
//
// Used for local development and tests. Priority 0 so it wins selection
// ahead of any real vendor when present in the pool.

use async_trait::async_trait;
use chrono::Utc;

use crate::errors::MarketResult;
use crate::types::{Bar, Tick};

pub struct MockProvider;

impl MockProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl super::QuoteProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn priority(&self) -> u32 {
        0
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn fetch_tick(&self, symbol: &str) -> MarketResult<Tick> {
        Ok(Tick {
            symbol: symbol.to_string(),
            name: "mock".to_string(),
            price: 10.0,
            bid: 9.99,
            ask: 10.01,
            volume: 100_000.0,
            turnover: 1_000_000.0,
            high: 10.2,
            low: 9.8,
            open: 9.9,
            pre_close: 9.9,
            time: Utc::now().timestamp(),
            change: 0.1,
            change_pct: 1.0,
        })
    }

    async fn fetch_bars(&self, _symbol: &str, days: u32) -> MarketResult<Vec<Bar>> {
        let today = Utc::now().timestamp();
        let mut bars = Vec::with_capacity(days as usize);
        let mut close = 10.0_f64;
        for i in 0..days {
            let open = close;
            close = open + ((i % 5) as f64 - 2.0) * 0.1;
            let high = open.max(close) + 0.1;
            let low = open.min(close) - 0.1;
            bars.push(Bar {
                date: today - ((days - i) as i64) * 86_400,
                open,
                high,
                low,
                close,
                volume: 50_000.0 + i as f64 * 10.0,
                turnover: (50_000.0 + i as f64 * 10.0) * close,
            });
        }
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::QuoteProvider;

    #[tokio::test]
    async fn mock_always_healthy_and_priority_zero() {
        let p = MockProvider::new();
        assert_eq!(p.priority(), 0);
        assert!(p.health_check().await);
    }

    #[tokio::test]
    async fn mock_fetch_bars_produces_valid_bars() {
        let p = MockProvider::new();
        let bars = p.fetch_bars("600000", 30).await.unwrap();
        assert_eq!(bars.len(), 30);
        for bar in &bars {
            assert!(bar.is_valid());
        }
    }
}
