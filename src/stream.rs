// =============================================================================
// Stream Engine — polling cadence, buffers and snapshot reads
// =============================================================================
//
// Life-cycle:
//   Idle  --start()-->  Running  --stop()-->  Idle
//
// One background task per run executes  poll -> callback -> sleep  until its
// run token is cancelled.  Each poll runs on the blocking pool because every
// terminal call blocks.  Failures inside the loop are never propagated: they
// trigger one reconnect attempt and the loop carries on at its normal
// cadence.  Manual `poll()` calls surface their errors directly.
//
// Thread safety:
//   - One parking_lot::Mutex guards both buffers, the tick frontier and the
//     last closed period.  Mutation and snapshot copies take the same lock.
//   - Terminal I/O happens outside that lock; ingestion re-checks the
//     frontier under it, so overlapping polls cannot double-ingest.
//   - Each start() mints a fresh RunToken (AtomicBool + Notify).  Polls
//     check their own run's token, so a poll left over from a stopped run
//     can never write into the buffers of a later one.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{FeedErrorCode, Result, StreamError};
use crate::feed::{ConnectionManager, Feed, Session};
use crate::market_data::aggregator::{configured_timeframe, fetch_rates};
use crate::market_data::{Candle, CandleAggregator, Tick, TickBuffer, Timeframe};
use crate::runtime_config::StreamConfig;
use crate::types::EngineState;

/// Ticks requested per terminal round-trip.  More ticks than this between
/// two polls are not all seen by a single poll.
pub const TICK_FETCH_WINDOW: usize = 1000;

/// Upper bound on how long `stop()` waits for the background task.
pub const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Invoked with every non-empty batch of new ticks.  Runs on the blocking
/// pool and may block, but the next poll waits for it to return.  A callback
/// that panics is dropped and the stream carries on without it.
pub type TickCallback = Box<dyn FnMut(&[Tick]) + Send + 'static>;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Mutable runtime state, guarded as a unit.
struct StreamState {
    ticks: TickBuffer,
    candles: CandleAggregator,
}

/// Counters for the swallowed-failure path of the background loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub polls: u64,
    pub failed_polls: u64,
    pub reconnects: u64,
    pub failed_reconnects: u64,
}

/// Liveness of one `start()`..`stop()` run.
struct RunToken {
    alive: AtomicBool,
    wake: Notify,
}

impl RunToken {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            alive: AtomicBool::new(true),
            wake: Notify::new(),
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.alive.store(false, Ordering::Release);
        self.wake.notify_one();
    }
}

/// True when a background poll belongs to a run that has been stopped.
fn is_stale(run: Option<&RunToken>) -> bool {
    run.map_or(false, |run| !run.is_alive())
}

struct Shared<F: Feed> {
    config: StreamConfig,
    connection: ConnectionManager<F>,
    session: Mutex<Option<Session<F>>>,
    state: Mutex<StreamState>,
    polls: AtomicU64,
    failed_polls: AtomicU64,
    reconnects: AtomicU64,
    failed_reconnects: AtomicU64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Live, bounded view of one instrument's ticks and closed candles.
pub struct StreamEngine<F: Feed> {
    shared: Arc<Shared<F>>,
    run: Option<Arc<RunToken>>,
    worker: Option<JoinHandle<()>>,
}

impl<F: Feed> StreamEngine<F> {
    /// Build an idle engine over `feed`.  Nothing is validated until use.
    pub fn new(feed: Arc<F>, config: StreamConfig) -> Self {
        Self::with_connection(ConnectionManager::new(feed), config)
    }

    pub fn with_connection(connection: ConnectionManager<F>, config: StreamConfig) -> Self {
        let state = StreamState {
            ticks: TickBuffer::new(config.rolling_ticks),
            candles: CandleAggregator::new(config.rolling_bars),
        };
        Self {
            shared: Arc::new(Shared {
                config,
                connection,
                session: Mutex::new(None),
                state: Mutex::new(state),
                polls: AtomicU64::new(0),
                failed_polls: AtomicU64::new(0),
                reconnects: AtomicU64::new(0),
                failed_reconnects: AtomicU64::new(0),
            }),
            run: None,
            worker: None,
        }
    }

    /// Connect, select the instrument and spawn the background poll loop.
    ///
    /// A no-op when already running.  Connection and instrument failures are
    /// returned and leave the engine idle.  Must be called from within a
    /// tokio runtime.
    pub async fn start(&mut self, on_new_ticks: Option<TickCallback>) -> Result<()> {
        if self.is_running() {
            debug!(symbol = %self.shared.config.symbol, "start ignored, already running");
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || shared.establish())
            .await
            .map_err(|e| StreamError::feed(format!("connect task failed: {e}")))??;

        let run = RunToken::new();
        let shared = Arc::clone(&self.shared);
        self.worker = Some(tokio::spawn(run_poll_loop(shared, Arc::clone(&run), on_new_ticks)));
        self.run = Some(run);

        info!(
            symbol = %self.shared.config.symbol,
            poll_interval_ms = self.shared.config.poll_interval_ms,
            timeframe = ?self.shared.config.bars_timeframe,
            "stream started"
        );
        Ok(())
    }

    /// Ask the background task to exit and wait up to [`STOP_JOIN_TIMEOUT`].
    /// A task still stuck in a terminal call after that is aborted; whatever
    /// that call returns is discarded.
    pub async fn stop(&mut self) {
        if let Some(run) = self.run.take() {
            run.cancel();
        }

        let Some(mut handle) = self.worker.take() else {
            return;
        };
        match tokio::time::timeout(STOP_JOIN_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => info!(symbol = %self.shared.config.symbol, "stream stopped"),
            Ok(Err(e)) => error!(error = %e, "stream task ended abnormally"),
            Err(_) => {
                handle.abort();
                warn!(
                    symbol = %self.shared.config.symbol,
                    timeout_ms = STOP_JOIN_TIMEOUT.as_millis() as u64,
                    "stream task did not exit in time, aborted"
                );
            }
        }
    }

    /// Pull-only mode: fetch ticks newer than the frontier, ingest them and
    /// run candle aggregation.  Blocks on the terminal; connects first if no
    /// session exists yet.
    pub fn poll(&self) -> Result<Vec<Tick>> {
        self.shared.poll(None)
    }

    /// Copy of the tick buffer, oldest first.
    pub fn ticks(&self) -> Vec<Tick> {
        self.shared.state.lock().ticks.snapshot()
    }

    /// Copy of the closed-candle buffer, ordered by `period_start`.
    pub fn candles(&self) -> Vec<Candle> {
        self.shared.state.lock().candles.candles().snapshot()
    }

    pub fn last_closed_period(&self) -> Option<DateTime<Utc>> {
        self.shared.state.lock().candles.last_closed_period()
    }

    pub fn state(&self) -> EngineState {
        if self.is_running() {
            EngineState::Running
        } else {
            EngineState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.run.as_ref().map_or(false, |run| run.is_alive())
    }

    pub fn config(&self) -> &StreamConfig {
        &self.shared.config
    }

    /// The current terminal session, for components that share it (e.g.
    /// the order adapter).
    pub fn session(&self) -> Option<Session<F>> {
        self.shared.session.lock().clone()
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            polls: self.shared.polls.load(Ordering::Relaxed),
            failed_polls: self.shared.failed_polls.load(Ordering::Relaxed),
            reconnects: self.shared.reconnects.load(Ordering::Relaxed),
            failed_reconnects: self.shared.failed_reconnects.load(Ordering::Relaxed),
        }
    }
}

impl<F: Feed> Drop for StreamEngine<F> {
    fn drop(&mut self) {
        if let Some(run) = self.run.take() {
            run.cancel();
        }
    }
}

impl<F: Feed> std::fmt::Debug for StreamEngine<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEngine")
            .field("symbol", &self.shared.config.symbol)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Poll cycle
// ---------------------------------------------------------------------------

impl<F: Feed> Shared<F> {
    fn establish(&self) -> Result<Session<F>> {
        let session = self.connection.open(&self.config)?;
        *self.session.lock() = Some(session.clone());
        Ok(session)
    }

    fn current_session(&self) -> Result<Session<F>> {
        let existing = self.session.lock().clone();
        match existing {
            Some(session) => Ok(session),
            None => self.establish(),
        }
    }

    /// One poll.  A background poll passes its run token and drops its
    /// results if that run was stopped while the terminal call was in flight.
    fn poll(&self, run: Option<&RunToken>) -> Result<Vec<Tick>> {
        self.polls.fetch_add(1, Ordering::Relaxed);
        let session = self.current_session()?;
        let feed = session.feed();
        let symbol = self.config.symbol.as_str();

        let clock = feed.current_tick(symbol).map(|t| t.time);
        let anchor = self.state.lock().ticks.frontier_time();
        let from = anchor.or(clock).unwrap_or_else(Utc::now);

        let raw = feed
            .fetch_ticks_since(symbol, from, TICK_FETCH_WINDOW)
            .ok_or_else(|| {
                StreamError::feed(format!(
                    "tick request for {symbol} failed: {}",
                    FeedErrorCode::from_native(feed.last_error())
                ))
            })?;

        let fresh = {
            let mut state = self.state.lock();
            if is_stale(run) {
                return Ok(Vec::new());
            }
            state.ticks.ingest(raw)
        };
        debug!(symbol = %symbol, new_ticks = fresh.len(), "ticks polled");

        if let Some(timeframe) = configured_timeframe(&self.config)? {
            match clock {
                Some(now) => self.aggregate(&session, timeframe, now, run),
                None => debug!(symbol = %symbol, "no current tick, candle check skipped"),
            }
        }

        Ok(fresh)
    }

    fn aggregate(
        &self,
        session: &Session<F>,
        timeframe: Timeframe,
        now: DateTime<Utc>,
        run: Option<&RunToken>,
    ) {
        let Some(request) = self.state.lock().candles.plan(timeframe, now) else {
            return;
        };
        let records = fetch_rates(session, &self.config.symbol, &request);

        let mut state = self.state.lock();
        if is_stale(run) {
            return;
        }
        let appended = state.candles.absorb(&request, records);
        if !appended.is_empty() {
            info!(
                symbol = %self.config.symbol,
                timeframe = %timeframe,
                closed = appended.len(),
                last_closed = ?state.candles.last_closed_period(),
                "candles closed"
            );
        }
    }

    /// Recovery after a failed background poll.  The outcome is logged and
    /// counted, never returned: the loop keeps its cadence either way.
    fn recover(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        match self.connection.reconnect(&self.config) {
            Ok(session) => {
                *self.session.lock() = Some(session);
                info!(symbol = %self.config.symbol, "reconnected");
            }
            Err(e) => {
                *self.session.lock() = None;
                self.failed_reconnects.fetch_add(1, Ordering::Relaxed);
                error!(symbol = %self.config.symbol, error = %e, "reconnect failed, retrying next cycle");
            }
        }
    }
}

/// Background loop: poll, hand new ticks to the callback, sleep, repeat.
async fn run_poll_loop<F: Feed>(
    shared: Arc<Shared<F>>,
    run: Arc<RunToken>,
    mut on_new_ticks: Option<TickCallback>,
) {
    let interval = shared.config.poll_interval();
    debug!(symbol = %shared.config.symbol, "poll loop entered");

    while run.is_alive() {
        let cycle = Arc::clone(&shared);
        let token = Arc::clone(&run);
        match tokio::task::spawn_blocking(move || cycle.poll(Some(token.as_ref()))).await {
            Ok(Ok(fresh)) if !fresh.is_empty() => {
                if let Some(callback) = on_new_ticks.take() {
                    on_new_ticks = deliver(callback, fresh).await;
                }
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                shared.failed_polls.fetch_add(1, Ordering::Relaxed);
                if run.is_alive() {
                    warn!(symbol = %shared.config.symbol, error = %e, "poll failed, reconnecting");
                    let recovery = Arc::clone(&shared);
                    if let Err(e) = tokio::task::spawn_blocking(move || recovery.recover()).await {
                        error!(error = %e, "reconnect task ended abnormally");
                    }
                }
            }
            Err(e) => {
                shared.failed_polls.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "poll task ended abnormally");
            }
        }

        if !run.is_alive() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = run.wake.notified() => {}
        }
    }

    debug!(symbol = %shared.config.symbol, "poll loop exited");
}

/// Run the callback on the blocking pool and hand it back, or `None` if it
/// panicked.
async fn deliver(mut callback: TickCallback, fresh: Vec<Tick>) -> Option<TickCallback> {
    let handed = tokio::task::spawn_blocking(move || {
        callback(&fresh);
        callback
    })
    .await;
    match handed {
        Ok(callback) => Some(callback),
        Err(e) => {
            error!(error = %e, "tick callback failed, no further batches will be delivered");
            None
        }
    }
}
