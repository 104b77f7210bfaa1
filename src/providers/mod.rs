// =============================================================================
// Quote Providers — C2 multi-provider pool with priority failover
// =============================================================================
//
// Vendor endpoint URLs and field offsets are vendor data, not semantics; the
// contract each provider exposes is `fetch_tick`/`fetch_bars` returning
// normalized records. The pool selects the lowest-priority-number healthy
// provider, falls back on failure, and marks a provider unhealthy for a
// cooldown window rather than retrying it on every call.

mod eastmoney;
mod mock;
mod sina;
mod tencent;

pub use eastmoney::EastmoneyProvider;
pub use mock::MockProvider;
pub use sina::SinaProvider;
pub use tencent::TencentProvider;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, instrument, warn};

use crate::errors::{MarketError, MarketResult};
use crate::types::{Bar, ProviderHealth, Tick};

/// Health-check interval for the pool's background loop.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// How long an unhealthy provider is excluded from selection before retry.
pub const UNHEALTHY_COOLDOWN: Duration = Duration::from_secs(30);

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Lower values are tried first.
    fn priority(&self) -> u32;

    async fn health_check(&self) -> bool;

    async fn fetch_tick(&self, symbol: &str) -> MarketResult<Tick>;

    async fn fetch_bars(&self, symbol: &str, days: u32) -> MarketResult<Vec<Bar>>;
}

struct Entry {
    provider: Arc<dyn QuoteProvider>,
    healthy: bool,
    last_check: Instant,
    marked_unhealthy_at: Option<Instant>,
}

/// Priority-ordered pool of quote providers with failover and a background
/// health-check loop.
pub struct ProviderPool {
    entries: RwLock<Vec<Entry>>,
}

impl ProviderPool {
    pub fn new(providers: Vec<Arc<dyn QuoteProvider>>) -> Self {
        let mut entries: Vec<Entry> = providers
            .into_iter()
            .map(|provider| Entry {
                provider,
                healthy: true,
                last_check: Instant::now(),
                marked_unhealthy_at: None,
            })
            .collect();
        entries.sort_by_key(|e| e.provider.priority());
        Self { entries: RwLock::new(entries) }
    }

    /// Candidate providers in priority order, skipping any still within their
    /// unhealthy cooldown window.
    fn candidates(&self) -> Vec<Arc<dyn QuoteProvider>> {
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|e| {
                e.healthy
                    || e.marked_unhealthy_at
                        .map(|t| t.elapsed() >= UNHEALTHY_COOLDOWN)
                        .unwrap_or(true)
            })
            .map(|e| e.provider.clone())
            .collect()
    }

    fn mark_unhealthy(&self, name: &str) {
        let mut entries = self.entries.write();
        if let Some(e) = entries.iter_mut().find(|e| e.provider.name() == name) {
            e.healthy = false;
            e.marked_unhealthy_at = Some(Instant::now());
        }
    }

    fn mark_healthy(&self, name: &str) {
        let mut entries = self.entries.write();
        if let Some(e) = entries.iter_mut().find(|e| e.provider.name() == name) {
            e.healthy = true;
            e.marked_unhealthy_at = None;
            e.last_check = Instant::now();
        }
    }

    #[instrument(skip(self), fields(symbol))]
    pub async fn fetch_tick(&self, symbol: &str) -> MarketResult<Tick> {
        for provider in self.candidates() {
            match provider.fetch_tick(symbol).await {
                Ok(tick) => {
                    self.mark_healthy(provider.name());
                    return Ok(tick);
                }
                Err(e) => {
                    warn!(provider = provider.name(), symbol, error = %e, "fetch_tick failed, trying next provider");
                    self.mark_unhealthy(provider.name());
                }
            }
        }
        Err(MarketError::Upstream("all providers failed".to_string()))
    }

    #[instrument(skip(self), fields(symbol, days))]
    pub async fn fetch_bars(&self, symbol: &str, days: u32) -> MarketResult<Vec<Bar>> {
        for provider in self.candidates() {
            match provider.fetch_bars(symbol, days).await {
                Ok(bars) => {
                    self.mark_healthy(provider.name());
                    return Ok(bars);
                }
                Err(e) => {
                    warn!(provider = provider.name(), symbol, error = %e, "fetch_bars failed, trying next provider");
                    self.mark_unhealthy(provider.name());
                }
            }
        }
        Err(MarketError::Upstream("all providers failed".to_string()))
    }

    /// Snapshot used by the (out-of-scope) HTTP layer and by operators.
    pub fn health_snapshot(&self) -> Vec<ProviderHealth> {
        let entries = self.entries.read();
        entries
            .iter()
            .map(|e| ProviderHealth {
                name: e.provider.name().to_string(),
                priority: e.provider.priority(),
                healthy: e.healthy,
                last_check: e.last_check.elapsed().as_secs() as i64,
                latency_ms: 0,
            })
            .collect()
    }

    /// Runs health checks against every provider and updates their state.
    /// Intended to be driven by a ticker in the application's background loop
    /// set, at [`HEALTH_CHECK_INTERVAL`].
    pub async fn run_health_checks(&self) {
        let providers: Vec<Arc<dyn QuoteProvider>> =
            self.entries.read().iter().map(|e| e.provider.clone()).collect();

        for provider in providers {
            let healthy = provider.health_check().await;
            debug!(provider = provider.name(), healthy, "health check");
            if healthy {
                self.mark_healthy(provider.name());
            } else {
                self.mark_unhealthy(provider.name());
            }
        }
    }
}
