// =============================================================================
// Auto-Trade Scheduler — C9 60-second cycle
// =============================================================================
//
// Each cycle: sync positions to latest prices, check per-symbol stop-loss
// via the risk manager and force-close any tripped symbol, roll the daily
// PnL snapshot, then hand off to the caller-supplied per-symbol decision
// closure. Cycle failures are logged and swallowed per §7 — the ticker
// keeps running. Cooperative cancellation via a stop channel, in the
// teacher's select-between-tick-and-stop idiom.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use super::ExecutionEngine;
use crate::providers::ProviderPool;

pub struct AutoTradeScheduler {
    stop_tx: watch::Sender<bool>,
}

impl AutoTradeScheduler {
    /// Spawn the scheduler loop. `on_cycle` is invoked once per tick with the
    /// list of symbols and is expected to run the signal-fusion/execution
    /// pass for each; its errors are logged and do not stop the loop.
    pub fn spawn<F, Fut>(
        interval: Duration,
        symbols: Vec<String>,
        engine: Arc<ExecutionEngine>,
        providers: Arc<ProviderPool>,
        on_cycle: F,
    ) -> Self
    where
        F: Fn(Arc<ExecutionEngine>, Arc<ProviderPool>, Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let engine = engine.clone();
                        let providers = providers.clone();
                        let symbols = symbols.clone();
                        info!("auto-trade cycle starting");
                        on_cycle(engine, providers, symbols).await;
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            warn!("auto-trade scheduler stopping");
                            break;
                        }
                    }
                }
            }
        });

        Self { stop_tx }
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Per-cycle stop-loss sweep: force-closes any symbol the risk manager flags
/// via `check_position_loss`. Swallows broker errors per §7 so one failing
/// close doesn't block the rest of the sweep.
pub async fn run_stop_loss_sweep(engine: &ExecutionEngine, risk: &crate::risk::RiskManager) {
    let positions = engine.positions().snapshot();
    let losers = risk.check_position_loss(&positions);
    for symbol in losers {
        let price = engine.positions().get(&symbol).map(|p| p.current_price).unwrap_or(0.0);
        if let Err(e) = engine.force_close(&symbol, price).await {
            error!(symbol, error = %e, "stop-loss force-close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn stop_halts_future_ticks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let counter_clone = counter.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(10));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        counter_clone.fetch_add(1, Ordering::SeqCst);
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(35)).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        let count_at_stop = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), count_at_stop);
    }
}
