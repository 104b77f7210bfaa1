// =============================================================================
// LLM Advisor — C8 chat-completion verdict contract
// =============================================================================
//
// Request/response shape and the bearer-auth + timeout plumbing follow the
// chat-completion client used elsewhere in the pack for prompt-driven
// decisions: a `reqwest::Client` posts a system+user message pair, and a
// timed-out or unparsable response surfaces as `MarketError::Upstream`
// rather than panicking, since the advisor sits on the hot path of the
// decision loop and must fail soft into "skip the AI signal this cycle".

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{MarketError, MarketResult};
use crate::types::{Action, SignalSource, TradingSignal};

/// Structured verdict the advisor extracts from the model's reply.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LlmVerdict {
    pub trend: String,
    pub risk: String,
    pub action: String,
    pub reason: String,
}

#[async_trait]
pub trait LlmAdvisor: Send + Sync {
    async fn advise(&self, symbol: &str, prompt: &str) -> MarketResult<LlmVerdict>;
}

/// Embeds the latest bar and indicator bundle into a single user prompt.
/// Kept free of any particular provider's prompt-template conventions —
/// just the values a human analyst would want on one screen.
pub fn build_prompt(symbol: &str, close: f64, rsi: f64, macd: f64, macd_signal: f64, ma5: f64, ma20: f64) -> String {
    format!(
        "Symbol: {symbol}\nLatest close: {close:.4}\nRSI14: {rsi:.2}\nMACD: {macd:.4} (signal {macd_signal:.4})\nMA5: {ma5:.4}  MA20: {ma20:.4}\n\n\
         Respond with JSON only: {{\"trend\": \"up|down|flat\", \"risk\": \"low|medium|high\", \"action\": \"buy|sell|hold\", \"reason\": \"<one sentence>\"}}"
    )
}

/// Maps a verdict's `action` field onto a `TradingSignal`. Confidence is
/// derived from `risk`: low risk reads as a more confident call than high
/// risk, since the advisor has no native probability to report.
pub fn verdict_to_signal(symbol: &str, verdict: &LlmVerdict) -> TradingSignal {
    let action = match verdict.action.to_ascii_lowercase().as_str() {
        "buy" => Action::Buy,
        "sell" => Action::Sell,
        _ => Action::Hold,
    };
    let confidence = match verdict.risk.to_ascii_lowercase().as_str() {
        "low" => 0.8,
        "medium" => 0.6,
        "high" => 0.4,
        _ => 0.5,
    };
    TradingSignal { symbol: symbol.to_string(), action, confidence, source: SignalSource::Ai, reason: verdict.reason.clone() }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageOut>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageOut {
    content: String,
}

pub struct ChatCompletionAdvisor {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl ChatCompletionAdvisor {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>, max_tokens: u32, timeout_secs: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl LlmAdvisor for ChatCompletionAdvisor {
    async fn advise(&self, symbol: &str, prompt: &str) -> MarketResult<LlmVerdict> {
        let req = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: "You are a disciplined equity trading assistant. Reply with JSON only.".to_string() },
                ChatMessage { role: "user".to_string(), content: prompt.to_string() },
            ],
            temperature: Some(0.2),
            max_tokens: Some(self.max_tokens),
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .timeout(self.timeout)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                warn!(symbol, error = %e, "llm request failed or timed out");
                MarketError::Upstream(format!("llm request failed: {e}"))
            })?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(MarketError::Upstream(format!("llm returned status {}", status.as_u16())));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| MarketError::Upstream(format!("malformed llm response: {e}")))?;
        let content = parsed.choices.first().and_then(|c| c.message.as_ref()).map(|m| m.content.clone()).unwrap_or_default();

        serde_json::from_str::<LlmVerdict>(content.trim()).map_err(|e| MarketError::Upstream(format!("malformed llm verdict json: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_maps_buy_action_and_risk_confidence() {
        let verdict = LlmVerdict { trend: "up".into(), risk: "low".into(), action: "buy".into(), reason: "momentum".into() };
        let signal = verdict_to_signal("600000", &verdict);
        assert_eq!(signal.action, Action::Buy);
        assert!((signal.confidence - 0.8).abs() < 1e-9);
        assert_eq!(signal.source, SignalSource::Ai);
    }

    #[test]
    fn verdict_maps_unknown_action_to_hold() {
        let verdict = LlmVerdict { trend: "flat".into(), risk: "medium".into(), action: "wait".into(), reason: "unclear".into() };
        let signal = verdict_to_signal("600000", &verdict);
        assert_eq!(signal.action, Action::Hold);
    }

    #[test]
    fn prompt_embeds_symbol_and_values() {
        let prompt = build_prompt("600000", 12.34, 55.0, 0.1, 0.05, 12.0, 11.5);
        assert!(prompt.contains("600000"));
        assert!(prompt.contains("RSI14"));
    }

    #[tokio::test]
    async fn malformed_response_json_surfaces_as_upstream_error() {
        let advisor = ChatCompletionAdvisor::new("http://127.0.0.1:0/v1/chat/completions", "key", "gpt", 256, 1);
        let err = advisor.advise("600000", "test prompt").await.unwrap_err();
        assert!(matches!(err, MarketError::Upstream(_)));
    }
}
