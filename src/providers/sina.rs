// =============================================================================
// Sina Quote Provider
// =============================================================================

use async_trait::async_trait;
use chrono::Utc;
use tracing::instrument;

use crate::errors::{MarketError, MarketResult};
use crate::types::{Bar, Tick};

pub struct SinaProvider {
    base_url: String,
    client: reqwest::Client,
}

impl SinaProvider {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("failed to build reqwest client");
        Self { base_url: "https://hq.sinajs.cn".to_string(), client }
    }

    fn prefixed_symbol(symbol: &str) -> String {
        if symbol.starts_with('6') {
            format!("sh{symbol}")
        } else {
            format!("sz{symbol}")
        }
    }
}

impl Default for SinaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl super::QuoteProvider for SinaProvider {
    fn name(&self) -> &str {
        "sina"
    }

    fn priority(&self) -> u32 {
        3
    }

    async fn health_check(&self) -> bool {
        self.client.get(&self.base_url).send().await.is_ok()
    }

    #[instrument(skip(self), fields(symbol))]
    async fn fetch_tick(&self, symbol: &str) -> MarketResult<Tick> {
        let code = Self::prefixed_symbol(symbol);
        let url = format!("{}/list={}", self.base_url, code);

        let resp = self
            .client
            .get(&url)
            .header("Referer", "https://finance.sina.com.cn")
            .send()
            .await
            .map_err(|e| MarketError::Upstream(format!("sina request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(MarketError::Upstream(format!("sina returned {}", resp.status())));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| MarketError::Upstream(format!("sina body read failed: {e}")))?;

        let inner = body
            .split('"')
            .nth(1)
            .ok_or_else(|| MarketError::Upstream("sina response malformed".to_string()))?;
        let fields: Vec<&str> = inner.split(',').collect();
        if fields.len() < 32 {
            return Err(MarketError::Upstream("sina response malformed".to_string()));
        }

        let open: f64 = fields[1].parse().unwrap_or(0.0);
        let pre_close: f64 = fields[2].parse().unwrap_or(0.0);
        let price: f64 = fields[3].parse().unwrap_or(0.0);
        let high: f64 = fields[4].parse().unwrap_or(0.0);
        let low: f64 = fields[5].parse().unwrap_or(0.0);
        let bid: f64 = fields[6].parse().unwrap_or(price);
        let ask: f64 = fields[7].parse().unwrap_or(price);
        let volume: f64 = fields[8].parse().unwrap_or(0.0);
        let turnover: f64 = fields[9].parse().unwrap_or(0.0);

        Ok(Tick {
            symbol: symbol.to_string(),
            name: fields[0].to_string(),
            price,
            bid,
            ask,
            volume,
            turnover,
            high,
            low,
            open,
            pre_close,
            time: Utc::now().timestamp(),
            change: price - pre_close,
            change_pct: if pre_close != 0.0 { (price - pre_close) / pre_close * 100.0 } else { 0.0 },
        })
    }

    async fn fetch_bars(&self, _symbol: &str, _days: u32) -> MarketResult<Vec<Bar>> {
        // Sina's public endpoint only exposes the live quote feed; daily bars
        // are served by the other providers in the pool.
        Err(MarketError::Upstream("sina does not support historical bars".to_string()))
    }
}
