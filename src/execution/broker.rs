// =============================================================================
// Broker — §6 outbound REST contract (login, buy, sell, positions, balance...)
// =============================================================================
//
// HMAC-SHA256 request signing follows the teacher's `BinanceClient`, adapted
// to the broker's own endpoint set. The broker is an HTTP contract only —
// order book semantics, margin, and settlement live on the other side of it.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::errors::{MarketError, MarketResult};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerBalance {
    pub asset: String,
    pub free: f64,
    pub locked: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub amount: f64,
    pub cost_price: f64,
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn login(&self) -> MarketResult<()>;
    async fn logout(&self) -> MarketResult<()>;
    /// `amount` is the order's money value, per §6.
    async fn buy(&self, symbol: &str, price: f64, amount: f64) -> MarketResult<OrderAck>;
    /// `quantity` is a share count, per §6.
    async fn sell(&self, symbol: &str, price: f64, quantity: f64) -> MarketResult<OrderAck>;
    async fn cancel(&self, order_id: &str) -> MarketResult<()>;
    async fn positions(&self) -> MarketResult<Vec<BrokerPosition>>;
    async fn balance(&self) -> MarketResult<Vec<BrokerBalance>>;
}

/// REST broker client signing requests the way `BinanceClient` does —
/// timestamp + recvWindow appended to the query, HMAC-SHA256 over the result.
pub struct RestBroker {
    base_url: String,
    api_key: String,
    secret: String,
    client: reqwest::Client,
}

const RECV_WINDOW_MS: u64 = 5000;

impl RestBroker {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self { base_url: base_url.into(), api_key: api_key.into(), secret: secret.into(), client }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW_MS}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW_MS}")
        };
        format!("{base}&signature={}", self.sign(&base))
    }

    async fn post(&self, path: &str, params: &str) -> MarketResult<serde_json::Value> {
        let qs = self.signed_query(params);
        let url = format!("{}{}?{}", self.base_url, path, qs);
        let resp = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .map_err(|e| MarketError::Upstream(format!("broker POST {path} failed: {e}")))?;
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MarketError::Upstream(format!("broker {path} response parse failed: {e}")))?;
        if !status.is_success() {
            warn!(path, %status, "broker request returned non-success");
            return Err(MarketError::Upstream(format!("broker {path} returned {status}: {body}")));
        }
        Ok(body)
    }

    async fn get(&self, path: &str, params: &str) -> MarketResult<serde_json::Value> {
        let qs = self.signed_query(params);
        let url = format!("{}{}?{}", self.base_url, path, qs);
        let resp = self
            .client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .map_err(|e| MarketError::Upstream(format!("broker GET {path} failed: {e}")))?;
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MarketError::Upstream(format!("broker {path} response parse failed: {e}")))?;
        if !status.is_success() {
            return Err(MarketError::Upstream(format!("broker {path} returned {status}: {body}")));
        }
        Ok(body)
    }
}

#[async_trait]
impl Broker for RestBroker {
    #[instrument(skip(self))]
    async fn login(&self) -> MarketResult<()> {
        self.post("/login", "").await?;
        debug!("broker login succeeded");
        Ok(())
    }

    async fn logout(&self) -> MarketResult<()> {
        self.post("/logout", "").await?;
        Ok(())
    }

    #[instrument(skip(self), fields(symbol, price, amount))]
    async fn buy(&self, symbol: &str, price: f64, amount: f64) -> MarketResult<OrderAck> {
        let params = format!("symbol={symbol}&price={price}&amount={amount}");
        let body = self.post("/buy", &params).await?;
        let order_id = body
            .get("order_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| MarketError::Upstream("broker buy response missing order_id".to_string()))?
            .to_string();
        Ok(OrderAck { order_id })
    }

    #[instrument(skip(self), fields(symbol, price, quantity))]
    async fn sell(&self, symbol: &str, price: f64, quantity: f64) -> MarketResult<OrderAck> {
        let params = format!("symbol={symbol}&price={price}&quantity={quantity}");
        let body = self.post("/sell", &params).await?;
        let order_id = body
            .get("order_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| MarketError::Upstream("broker sell response missing order_id".to_string()))?
            .to_string();
        Ok(OrderAck { order_id })
    }

    async fn cancel(&self, order_id: &str) -> MarketResult<()> {
        self.post("/cancel", &format!("order_id={order_id}")).await?;
        Ok(())
    }

    async fn positions(&self) -> MarketResult<Vec<BrokerPosition>> {
        let body = self.get("/positions", "").await?;
        let arr = body.as_array().cloned().unwrap_or_default();
        Ok(arr
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect())
    }

    async fn balance(&self) -> MarketResult<Vec<BrokerBalance>> {
        let body = self.get("/balance", "").await?;
        let arr = body.as_array().cloned().unwrap_or_default();
        Ok(arr
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect())
    }
}

impl std::fmt::Debug for RestBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBroker")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .finish()
    }
}
