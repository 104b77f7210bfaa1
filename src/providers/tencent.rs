// =============================================================================
// Tencent Quote Provider
// =============================================================================
//
// Public HTTP quote endpoint, no signing required. Field offsets below are
// Tencent's own wire format, not part of the contract this module exposes.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument};

use crate::errors::{MarketError, MarketResult};
use crate::types::{Bar, Tick};

pub struct TencentProvider {
    base_url: String,
    client: reqwest::Client,
}

impl TencentProvider {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("failed to build reqwest client");
        Self { base_url: "https://qt.gtimg.cn".to_string(), client }
    }

    fn prefixed_symbol(symbol: &str) -> String {
        if symbol.starts_with('6') {
            format!("sh{symbol}")
        } else {
            format!("sz{symbol}")
        }
    }
}

impl Default for TencentProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl super::QuoteProvider for TencentProvider {
    fn name(&self) -> &str {
        "tencent"
    }

    fn priority(&self) -> u32 {
        1
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(&self.base_url)
            .send()
            .await
            .map(|r| r.status().is_success() || r.status().as_u16() == 404)
            .unwrap_or(false)
    }

    #[instrument(skip(self), fields(symbol))]
    async fn fetch_tick(&self, symbol: &str) -> MarketResult<Tick> {
        let q = Self::prefixed_symbol(symbol);
        let url = format!("{}/q={}", self.base_url, q);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MarketError::Upstream(format!("tencent request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(MarketError::Upstream(format!("tencent returned {}", resp.status())));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| MarketError::Upstream(format!("tencent body read failed: {e}")))?;

        let fields: Vec<&str> = body.split('~').collect();
        if fields.len() < 33 {
            return Err(MarketError::Upstream("tencent response malformed".to_string()));
        }

        let price: f64 = fields[3].parse().unwrap_or(0.0);
        let pre_close: f64 = fields[4].parse().unwrap_or(0.0);
        let open: f64 = fields[5].parse().unwrap_or(0.0);
        let volume: f64 = fields[6].parse().unwrap_or(0.0);
        let high: f64 = fields[33.min(fields.len() - 1)].parse().unwrap_or(price);
        let low: f64 = fields[34.min(fields.len() - 1)].parse().unwrap_or(price);
        let bid: f64 = fields[9].parse().unwrap_or(price);
        let ask: f64 = fields[19].parse().unwrap_or(price);

        debug!(symbol, price, "tencent tick fetched");

        Ok(Tick {
            symbol: symbol.to_string(),
            name: fields.get(1).unwrap_or(&"").to_string(),
            price,
            bid,
            ask,
            volume,
            turnover: fields.get(37).and_then(|s| s.parse().ok()).unwrap_or(0.0),
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
        let q = Self::prefixed_symbol(symbol);
        let url = format!(
            "{}/q=s_kline,{},day,,,{}",
            self.base_url, q, days
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MarketError::Upstream(format!("tencent kline request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(MarketError::Upstream(format!("tencent returned {}", resp.status())));
        }

        // Vendor array-of-arrays format: [date, open, close, high, low, volume].
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MarketError::Upstream(format!("tencent kline parse failed: {e}")))?;

        let rows = body
            .pointer(&format!("/data/{}/day", q))
            .and_then(|v| v.as_array())
            .ok_or_else(|| MarketError::Upstream("tencent kline response missing data".to_string()))?;

        let mut bars = Vec::with_capacity(rows.len());
        for row in rows {
            let arr = match row.as_array() {
                Some(a) if a.len() >= 6 => a,
                _ => continue,
            };
            let parse = |i: usize| arr[i].as_str().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0);
            let date_str = arr[0].as_str().unwrap_or("");
            let date = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp())
                .unwrap_or(0);
            bars.push(Bar {
                date,
                open: parse(1),
                close: parse(2),
                high: parse(3),
                low: parse(4),
                volume: parse(5),
                turnover: parse(5) * parse(2),
            });
        }
        Ok(bars)
    }
}
