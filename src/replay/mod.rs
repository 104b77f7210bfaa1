// =============================================================================
// Replay Engine — C11 finite-state historical playback
// =============================================================================
//
// One `watch::Sender<ReplayState>` per running session, in the scheduler's
// stop-channel idiom, drives pause/resume/stop without polling. Terminal
// states (`stopped`, `completed`) are enforced at the session-map level:
// once reached, `pause`/`resume` return a `Validation` rejection rather
// than silently no-opping, per the replay-terminal-states property. The
// session map lives behind its own `Arc` so the spawned playback task can
// update cursor/state without borrowing the engine itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{MarketError, MarketResult};
use crate::types::{Bar, ReplaySession, ReplayState};

/// Source of historical bars a replay session steps through. Isomorphic to
/// the provider pool's `fetch_bars`, kept as its own trait so a replay can
/// run against a fixture series without touching a live pool.
#[async_trait]
pub trait HistoricalDataSource: Send + Sync {
    async fn bars_between(&self, symbol: &str, start_date: i64, end_date: i64) -> MarketResult<Vec<Bar>>;
}

struct SessionHandle {
    session: ReplaySession,
    control_tx: Option<watch::Sender<ReplayState>>,
}

type SessionMap = Arc<RwLock<HashMap<String, SessionHandle>>>;

/// Manages a set of replay sessions keyed by id. Each session advances its
/// cursor on its own spawned loop; `speed` scales the per-bar delay, with
/// `speed <= 0` normalized to `1.0`.
pub struct ReplayEngine {
    source: Arc<dyn HistoricalDataSource>,
    sessions: SessionMap,
    on_bar: Arc<dyn Fn(String, Bar) + Send + Sync>,
}

fn normalize_speed(speed: f64) -> f64 {
    if speed <= 0.0 {
        1.0
    } else {
        speed
    }
}

impl ReplayEngine {
    pub fn new(source: Arc<dyn HistoricalDataSource>, on_bar: Arc<dyn Fn(String, Bar) + Send + Sync>) -> Self {
        Self { source, sessions: Arc::new(RwLock::new(HashMap::new())), on_bar }
    }

    /// Start a new session and spawn its playback loop. Returns the session
    /// id.
    pub async fn start(&self, symbol: &str, start_date: i64, end_date: i64, speed: f64) -> MarketResult<String> {
        let bars = self.source.bars_between(symbol, start_date, end_date).await?;
        let id = Uuid::new_v4().to_string();
        let speed = normalize_speed(speed);

        let session = ReplaySession {
            id: id.clone(),
            symbol: symbol.to_string(),
            start_date,
            end_date,
            speed,
            state: ReplayState::Running,
            cursor: start_date,
        };

        let (control_tx, mut control_rx) = watch::channel(ReplayState::Running);
        self.sessions.write().insert(id.clone(), SessionHandle { session, control_tx: Some(control_tx) });

        let sessions = self.sessions.clone();
        let on_bar = self.on_bar.clone();
        let id_task = id.clone();
        let symbol = symbol.to_string();
        let per_bar_delay = Duration::from_millis((1000.0 / speed) as u64);

        tokio::spawn(async move {
            let mut idx = 0usize;
            loop {
                let state = *control_rx.borrow();
                if state == ReplayState::Stopped {
                    break;
                }
                if state == ReplayState::Paused {
                    if control_rx.changed().await.is_err() {
                        break;
                    }
                    continue;
                }

                if idx >= bars.len() {
                    if let Some(handle) = sessions.write().get_mut(&id_task) {
                        handle.session.state = ReplayState::Completed;
                        handle.control_tx = None;
                    }
                    info!(session = %id_task, "replay completed");
                    break;
                }

                let bar = bars[idx];
                on_bar(symbol.clone(), bar);
                if let Some(handle) = sessions.write().get_mut(&id_task) {
                    handle.session.cursor = bar.date;
                }
                idx += 1;

                tokio::time::sleep(per_bar_delay).await;
            }
        });

        Ok(id)
    }

    pub fn pause(&self, id: &str) -> MarketResult<()> {
        let mut sessions = self.sessions.write();
        let handle = sessions.get_mut(id).ok_or_else(|| MarketError::NotFound(format!("replay session {id}")))?;
        if handle.session.state.is_terminal() {
            return Err(MarketError::Validation(format!("session {id} is in a terminal state")));
        }
        handle.session.state = ReplayState::Paused;
        if let Some(tx) = &handle.control_tx {
            let _ = tx.send(ReplayState::Paused);
        }
        Ok(())
    }

    pub fn resume(&self, id: &str) -> MarketResult<()> {
        let mut sessions = self.sessions.write();
        let handle = sessions.get_mut(id).ok_or_else(|| MarketError::NotFound(format!("replay session {id}")))?;
        if handle.session.state.is_terminal() {
            return Err(MarketError::Validation(format!("session {id} is in a terminal state")));
        }
        handle.session.state = ReplayState::Running;
        if let Some(tx) = &handle.control_tx {
            let _ = tx.send(ReplayState::Running);
        }
        Ok(())
    }

    pub fn stop(&self, id: &str) -> MarketResult<()> {
        let mut sessions = self.sessions.write();
        let handle = sessions.get_mut(id).ok_or_else(|| MarketError::NotFound(format!("replay session {id}")))?;
        if handle.session.state.is_terminal() {
            warn!(session = id, "stop requested on already-terminal session");
            return Ok(());
        }
        handle.session.state = ReplayState::Stopped;
        if let Some(tx) = handle.control_tx.take() {
            let _ = tx.send(ReplayState::Stopped);
        }
        Ok(())
    }

    pub fn status(&self, id: &str) -> MarketResult<ReplaySession> {
        self.sessions.read().get(id).map(|h| h.session.clone()).ok_or_else(|| MarketError::NotFound(format!("replay session {id}")))
    }

    pub fn list(&self) -> Vec<ReplaySession> {
        self.sessions.read().values().map(|h| h.session.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedSource {
        bars: Vec<Bar>,
    }

    #[async_trait]
    impl HistoricalDataSource for FixedSource {
        async fn bars_between(&self, _symbol: &str, _start: i64, _end: i64) -> MarketResult<Vec<Bar>> {
            Ok(self.bars.clone())
        }
    }

    fn bar(date: i64) -> Bar {
        Bar { date, open: 10.0, high: 10.0, low: 10.0, close: 10.0, volume: 1.0, turnover: 10.0 }
    }

    #[test]
    fn normalizes_non_positive_speed_to_one() {
        assert_eq!(normalize_speed(0.0), 1.0);
        assert_eq!(normalize_speed(-5.0), 1.0);
        assert_eq!(normalize_speed(2.0), 2.0);
    }

    #[tokio::test]
    async fn start_creates_running_session() {
        let source = Arc::new(FixedSource { bars: vec![bar(1), bar(2)] });
        let emitted = Arc::new(Mutex::new(Vec::new()));
        let emitted_clone = emitted.clone();
        let engine = ReplayEngine::new(source, Arc::new(move |symbol, bar| emitted_clone.lock().unwrap().push((symbol, bar.date))));

        let id = engine.start("600000", 0, 10, 100.0).await.unwrap();
        let status = engine.status(&id).unwrap();
        assert_eq!(status.state, ReplayState::Running);
    }

    #[tokio::test]
    async fn stop_is_terminal_and_rejects_resume() {
        let source = Arc::new(FixedSource { bars: vec![bar(1)] });
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let engine = ReplayEngine::new(
            source,
            Arc::new(move |_s, _b| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let id = engine.start("600000", 0, 10, 1000.0).await.unwrap();
        engine.stop(&id).unwrap();

        let err = engine.resume(&id).unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
        let err = engine.pause(&id).unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
    }

    #[tokio::test]
    async fn pause_then_resume_round_trips() {
        let source = Arc::new(FixedSource { bars: vec![bar(1), bar(2), bar(3)] });
        let engine = ReplayEngine::new(source, Arc::new(|_s, _b| {}));
        let id = engine.start("600000", 0, 10, 1000.0).await.unwrap();

        engine.pause(&id).unwrap();
        assert_eq!(engine.status(&id).unwrap().state, ReplayState::Paused);

        engine.resume(&id).unwrap();
        assert_eq!(engine.status(&id).unwrap().state, ReplayState::Running);
    }

    #[test]
    fn status_on_unknown_session_is_not_found() {
        let source = Arc::new(FixedSource { bars: vec![] });
        let engine = ReplayEngine::new(source, Arc::new(|_s, _b| {}));
        let err = engine.status("missing").unwrap_err();
        assert!(matches!(err, MarketError::NotFound(_)));
    }
}
