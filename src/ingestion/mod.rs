// =============================================================================
// Ingestion Pipeline — C4 per-symbol fetch/buffer/flush loop
// =============================================================================
//
// One `SymbolIngester` per symbol, each owning its own buffer, progress
// cursor, and stats behind separate locks so a flush on one symbol never
// blocks a fetch on another. Retries use linear backoff (`retry * 1s`);
// after `max_retries` the symbol's cycle is abandoned until the next tick.
// Checkpointing only happens after a successful flush, so a crash mid-batch
// replays the batch rather than silently dropping it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::errors::{MarketError, MarketResult};
use crate::providers::ProviderPool;
use crate::types::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Fetching,
    Buffering,
    Flushing,
}

#[derive(Debug, Clone, Copy)]
pub struct IngestionConfig {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub check_interval: Duration,
    pub enable_incremental: bool,
    pub max_retries: u32,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            batch_timeout: Duration::from_secs(5),
            check_interval: Duration::from_secs(60),
            enable_incremental: true,
            max_retries: 3,
        }
    }
}

/// Source of historical bars for a symbol. Implemented directly over
/// `ProviderPool` in the application wiring; kept as a trait so tests can
/// supply a fixed bar sequence without a real pool.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch_bars(&self, symbol: &str, since: i64) -> MarketResult<Vec<Bar>>;
}

pub struct PoolDataSource {
    pool: Arc<ProviderPool>,
    /// Bars requested per fetch when running in incremental mode. The pool
    /// has no "since" filter of its own, so the ingester over-fetches and
    /// trims client-side.
    lookback_days: u32,
}

impl PoolDataSource {
    pub fn new(pool: Arc<ProviderPool>, lookback_days: u32) -> Self {
        Self { pool, lookback_days }
    }
}

#[async_trait]
impl DataSource for PoolDataSource {
    async fn fetch_bars(&self, symbol: &str, since: i64) -> MarketResult<Vec<Bar>> {
        let bars = self.pool.fetch_bars(symbol, self.lookback_days).await?;
        Ok(bars.into_iter().filter(|b| b.date > since).collect())
    }
}

/// Durable sink for accepted bars and the per-symbol watermark used to
/// resume incremental fetches after a restart.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn write_bars(&self, symbol: &str, bars: &[Bar]) -> MarketResult<()>;
    async fn latest_timestamp(&self, symbol: &str) -> MarketResult<i64>;
}

/// Append-only in-process storage adapter. Sufficient for the binary's
/// default wiring; a durable adapter is a drop-in trait implementor.
pub struct InMemoryStorage {
    bars: RwLock<std::collections::HashMap<String, Vec<Bar>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self { bars: RwLock::new(std::collections::HashMap::new()) }
    }

    pub fn snapshot(&self, symbol: &str) -> Vec<Bar> {
        self.bars.read().get(symbol).cloned().unwrap_or_default()
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageAdapter for InMemoryStorage {
    async fn write_bars(&self, symbol: &str, bars: &[Bar]) -> MarketResult<()> {
        let mut store = self.bars.write();
        store.entry(symbol.to_string()).or_default().extend_from_slice(bars);
        Ok(())
    }

    async fn latest_timestamp(&self, symbol: &str) -> MarketResult<i64> {
        Ok(self.bars.read().get(symbol).and_then(|b| b.last()).map(|b| b.date).unwrap_or(0))
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    pub cycles: u64,
    pub bars_ingested: u64,
    pub errors: u64,
    pub last_error: Option<String>,
}

/// Drives ingestion for a single symbol: fetch -> buffer -> flush once the
/// buffer reaches `batch_size` or `batch_timeout` elapses.
pub struct SymbolIngester {
    symbol: String,
    source: Arc<dyn DataSource>,
    storage: Arc<dyn StorageAdapter>,
    config: IngestionConfig,
    buffer: RwLock<Vec<Bar>>,
    /// Set when the buffer transitions from empty to non-empty, cleared on
    /// flush. Drives the `batch_timeout` half of the flush condition.
    buffered_since: RwLock<Option<Instant>>,
    progress: RwLock<i64>,
    stats: RwLock<IngestStats>,
    state: RwLock<PipelineState>,
    stop_requested: AtomicBool,
}

impl SymbolIngester {
    pub fn new(symbol: impl Into<String>, source: Arc<dyn DataSource>, storage: Arc<dyn StorageAdapter>, config: IngestionConfig) -> Self {
        Self {
            symbol: symbol.into(),
            source,
            storage,
            config,
            buffer: RwLock::new(Vec::new()),
            buffered_since: RwLock::new(None),
            progress: RwLock::new(0),
            stats: RwLock::new(IngestStats::default()),
            state: RwLock::new(PipelineState::Idle),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.read()
    }

    pub fn stats(&self) -> IngestStats {
        self.stats.read().clone()
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    fn stopping(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Restore the resume watermark from storage. Call once before the
    /// first `run_cycle` when `enable_incremental` is set.
    pub async fn init_progress(&self) -> MarketResult<()> {
        if self.config.enable_incremental {
            let ts = self.storage.latest_timestamp(&self.symbol).await?;
            *self.progress.write() = ts;
        }
        Ok(())
    }

    async fn fetch_with_retry(&self) -> MarketResult<Vec<Bar>> {
        let since = *self.progress.read();
        let mut attempt = 0u32;
        loop {
            *self.state.write() = PipelineState::Fetching;
            match self.source.fetch_bars(&self.symbol, since).await {
                Ok(bars) => return Ok(bars),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(symbol = %self.symbol, attempt, error = %e, "ingestion fetch failed, retrying");
                    tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One fetch/buffer/flush iteration. Enforces §8's strictly-increasing
    /// timestamp property: any bar not newer than the last seen date for
    /// this symbol is dropped rather than buffered.
    pub async fn run_cycle(&self) -> MarketResult<usize> {
        if self.stopping() {
            return Ok(0);
        }

        let fetched = match self.fetch_with_retry().await {
            Ok(bars) => bars,
            Err(e) => {
                let mut stats = self.stats.write();
                stats.errors += 1;
                stats.last_error = Some(e.to_string());
                error!(symbol = %self.symbol, error = %e, "ingestion cycle abandoned after retries");
                return Err(e);
            }
        };

        *self.state.write() = PipelineState::Buffering;
        let mut accepted = 0usize;
        {
            let mut progress = self.progress.write();
            let mut buffer = self.buffer.write();
            let mut sorted = fetched;
            sorted.sort_by_key(|b| b.date);
            for bar in sorted {
                if bar.date <= *progress {
                    continue;
                }
                *progress = bar.date;
                if buffer.is_empty() {
                    *self.buffered_since.write() = Some(Instant::now());
                }
                buffer.push(bar);
                accepted += 1;
            }
        }

        // Each cycle stands in for one check-interval tick: flush once the
        // buffer is full, or once the oldest buffered bar has aged past
        // batch_timeout.
        let buffer_len = self.buffer.read().len();
        let aged_out = self.buffered_since.read().map_or(false, |t| t.elapsed() >= self.config.batch_timeout);
        let should_flush = buffer_len >= self.config.batch_size || (buffer_len > 0 && aged_out);
        if should_flush {
            self.flush().await?;
        }

        self.stats.write().cycles += 1;
        Ok(accepted)
    }

    async fn flush(&self) -> MarketResult<()> {
        *self.state.write() = PipelineState::Flushing;
        let batch = {
            let mut buffer = self.buffer.write();
            std::mem::take(&mut *buffer)
        };
        if batch.is_empty() {
            *self.state.write() = PipelineState::Idle;
            return Ok(());
        }
        self.storage.write_bars(&self.symbol, &batch).await?;
        self.stats.write().bars_ingested += batch.len() as u64;
        *self.buffered_since.write() = None;
        info!(symbol = %self.symbol, count = batch.len(), "flushed bars");
        *self.state.write() = PipelineState::Idle;
        Ok(())
    }

    /// Drain any buffered bars and stop accepting new cycles. The only
    /// blocking path in shutdown — everything else is fire-and-forget.
    pub async fn stop(&self) -> MarketResult<()> {
        self.request_stop();
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn bar(date: i64, close: f64) -> Bar {
        Bar { date, open: close, high: close, low: close, close, volume: 10.0, turnover: 100.0 }
    }

    struct FixedSource {
        bars: Vec<Bar>,
        fail_until: AtomicUsize,
    }

    #[async_trait]
    impl DataSource for FixedSource {
        async fn fetch_bars(&self, _symbol: &str, since: i64) -> MarketResult<Vec<Bar>> {
            if self.fail_until.load(Ordering::SeqCst) > 0 {
                self.fail_until.fetch_sub(1, Ordering::SeqCst);
                return Err(MarketError::Transient("not ready".into()));
            }
            Ok(self.bars.iter().copied().filter(|b| b.date > since).collect())
        }
    }

    #[tokio::test]
    async fn ingests_and_flushes_in_increasing_order() {
        let source = Arc::new(FixedSource { bars: vec![bar(1, 10.0), bar(2, 11.0), bar(3, 12.0)], fail_until: AtomicUsize::new(0) });
        let storage = Arc::new(InMemoryStorage::new());
        let config = IngestionConfig { batch_size: 3, ..IngestionConfig::default() };
        let ingester = SymbolIngester::new("A", source, storage.clone(), config);

        let n = ingester.run_cycle().await.unwrap();
        assert_eq!(n, 3);

        let stored = storage.snapshot("A");
        assert_eq!(stored.len(), 3);
        for pair in stored.windows(2) {
            assert!(pair[0].date < pair[1].date);
        }
    }

    #[tokio::test]
    async fn second_cycle_only_ingests_new_bars() {
        let source = Arc::new(FixedSource { bars: vec![bar(1, 10.0), bar(2, 11.0)], fail_until: AtomicUsize::new(0) });
        let storage = Arc::new(InMemoryStorage::new());
        let config = IngestionConfig { batch_size: 2, ..IngestionConfig::default() };
        let ingester = SymbolIngester::new("A", source, storage.clone(), config);

        ingester.run_cycle().await.unwrap();
        let n = ingester.run_cycle().await.unwrap();
        assert_eq!(n, 0);
        assert_eq!(storage.snapshot("A").len(), 2);
    }

    #[tokio::test]
    async fn does_not_flush_before_batch_size_or_timeout() {
        let source = Arc::new(FixedSource { bars: vec![bar(1, 10.0)], fail_until: AtomicUsize::new(0) });
        let storage = Arc::new(InMemoryStorage::new());
        let config = IngestionConfig { batch_size: 1000, batch_timeout: Duration::from_secs(60), ..IngestionConfig::default() };
        let ingester = SymbolIngester::new("A", source, storage.clone(), config);

        ingester.run_cycle().await.unwrap();
        assert!(storage.snapshot("A").is_empty());
        assert_eq!(ingester.buffer.read().len(), 1);
    }

    #[tokio::test]
    async fn flushes_once_buffer_ages_past_batch_timeout() {
        let source = Arc::new(FixedSource { bars: vec![bar(1, 10.0)], fail_until: AtomicUsize::new(0) });
        let storage = Arc::new(InMemoryStorage::new());
        let config = IngestionConfig { batch_size: 1000, batch_timeout: Duration::from_millis(20), ..IngestionConfig::default() };
        let ingester = SymbolIngester::new("A", source, storage.clone(), config);

        ingester.run_cycle().await.unwrap();
        assert!(storage.snapshot("A").is_empty());

        tokio::time::sleep(Duration::from_millis(40)).await;
        ingester.run_cycle().await.unwrap();
        assert_eq!(storage.snapshot("A").len(), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let source = Arc::new(FixedSource { bars: vec![bar(1, 10.0)], fail_until: AtomicUsize::new(2) });
        let storage = Arc::new(InMemoryStorage::new());
        let ingester = SymbolIngester::new("A", source, storage.clone(), IngestionConfig::default());

        let n = ingester.run_cycle().await.unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn stop_flushes_remaining_buffer() {
        let source = Arc::new(FixedSource { bars: vec![bar(1, 10.0)], fail_until: AtomicUsize::new(0) });
        let storage = Arc::new(InMemoryStorage::new());
        let ingester = SymbolIngester::new("A", source, storage.clone(), IngestionConfig::default());

        ingester.run_cycle().await.unwrap();
        ingester.stop().await.unwrap();
        assert_eq!(ingester.state(), PipelineState::Idle);
        assert!(ingester.stopping());
    }
}
