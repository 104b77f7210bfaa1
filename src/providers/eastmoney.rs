// =============================================================================
// Eastmoney Quote Provider
// =============================================================================

use async_trait::async_trait;
use chrono::Utc;
use tracing::instrument;

use crate::errors::{MarketError, MarketResult};
use crate::types::{Bar, Tick};

pub struct EastmoneyProvider {
    base_url: String,
    client: reqwest::Client,
}

impl EastmoneyProvider {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("failed to build reqwest client");
        Self { base_url: "https://push2.eastmoney.com".to_string(), client }
    }

    fn market_code(symbol: &str) -> String {
        if symbol.starts_with('6') {
            format!("1.{symbol}")
        } else {
            format!("0.{symbol}")
        }
    }
}

impl Default for EastmoneyProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl super::QuoteProvider for EastmoneyProvider {
    fn name(&self) -> &str {
        "eastmoney"
    }

    fn priority(&self) -> u32 {
        2
    }

    async fn health_check(&self) -> bool {
        self.client.get(&self.base_url).send().await.is_ok()
    }

    #[instrument(skip(self), fields(symbol))]
    async fn fetch_tick(&self, symbol: &str) -> MarketResult<Tick> {
        let secid = Self::market_code(symbol);
        let url = format!(
            "{}/api/qt/stock/get?secid={}&fields=f43,f44,f45,f46,f47,f60,f169,f170,f57",
            self.base_url, secid
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MarketError::Upstream(format!("eastmoney request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(MarketError::Upstream(format!("eastmoney returned {}", resp.status())));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MarketError::Upstream(format!("eastmoney parse failed: {e}")))?;

        let data = body
            .get("data")
            .filter(|v| !v.is_null())
            .ok_or_else(|| MarketError::Upstream("eastmoney response missing data".to_string()))?;

        let scaled = |key: &str| data.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0) / 100.0;

        let price = scaled("f43");
        let pre_close = scaled("f60");
        let high = scaled("f44");
        let low = scaled("f45");
        let open = scaled("f46");
        let volume = data.get("f47").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let name = data.get("f57").and_then(|v| v.as_str()).unwrap_or("").to_string();

        Ok(Tick {
            symbol: symbol.to_string(),
            name,
            price,
            bid: price,
            ask: price,
            volume,
            turnover: data.get("f48").and_then(|v| v.as_f64()).unwrap_or(0.0),
            high,
            low,
            open,
            pre_close,
            time: Utc::now().timestamp(),
            change: price - pre_close,
            change_pct: if pre_close != 0.0 { (price - pre_close) / pre_close * 100.0 } else { 0.0 },
        })
    }

    async fn fetch_bars(&self, symbol: &str, days: u32) -> MarketResult<Vec<Bar>> {
        let secid = Self::market_code(symbol);
        let url = format!(
            "{}/api/qt/stock/kline/get?secid={}&klt=101&fqt=1&lmt={}&fields1=f1,f2&fields2=f51,f52,f53,f54,f55,f56,f57",
            self.base_url, secid, days
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MarketError::Upstream(format!("eastmoney kline request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(MarketError::Upstream(format!("eastmoney returned {}", resp.status())));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MarketError::Upstream(format!("eastmoney kline parse failed: {e}")))?;

        let klines = body
            .pointer("/data/klines")
            .and_then(|v| v.as_array())
            .ok_or_else(|| MarketError::Upstream("eastmoney kline response missing data".to_string()))?;

        let mut bars = Vec::with_capacity(klines.len());
        for row in klines {
            let line = match row.as_str() {
                Some(s) => s,
                None => continue,
            };
            let parts: Vec<&str> = line.split(',').collect();
            if parts.len() < 6 {
                continue;
            }
            let date = chrono::NaiveDate::parse_from_str(parts[0], "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp())
                .unwrap_or(0);
            let parse = |i: usize| parts[i].parse::<f64>().unwrap_or(0.0);
            bars.push(Bar {
                date,
                open: parse(1),
                close: parse(2),
                high: parse(3),
                low: parse(4),
                volume: parse(5),
                turnover: parts.get(6).and_then(|s| s.parse().ok()).unwrap_or(0.0),
            });
        }
        Ok(bars)
    }
}
