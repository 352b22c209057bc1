// =============================================================================
// Connection Manager — terminal session lifecycle
// =============================================================================
//
// The terminal supports a single logical session per process.  `Session` is
// the explicit handle to it: the stream engine and the order adapter both hold
// a clone instead of reaching for ambient global state.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::{Feed, InitRequest};
use crate::error::{Result, StreamError};
use crate::runtime_config::StreamConfig;

/// Pause between tearing a session down and bringing it back up.
const RECONNECT_SETTLE: Duration = Duration::from_millis(500);

/// Handle to an established terminal session.
pub struct Session<F: Feed> {
    feed: Arc<F>,
}

impl<F: Feed> Session<F> {
    pub fn feed(&self) -> &F {
        &self.feed
    }
}

impl<F: Feed> Clone for Session<F> {
    fn clone(&self) -> Self {
        Self {
            feed: Arc::clone(&self.feed),
        }
    }
}

impl<F: Feed> std::fmt::Debug for Session<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("feed", &"<terminal>").finish()
    }
}

/// Opens, validates and re-opens terminal sessions.  Stateless apart from the
/// feed handle, which is owned by the terminal client.
pub struct ConnectionManager<F: Feed> {
    feed: Arc<F>,
    settle_delay: Duration,
}

impl<F: Feed> Clone for ConnectionManager<F> {
    fn clone(&self) -> Self {
        Self {
            feed: Arc::clone(&self.feed),
            settle_delay: self.settle_delay,
        }
    }
}

impl<F: Feed> ConnectionManager<F> {
    pub fn new(feed: Arc<F>) -> Self {
        Self {
            feed,
            settle_delay: RECONNECT_SETTLE,
        }
    }

    /// Override the pause inserted by [`reconnect`](Self::reconnect).
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Establish the session.
    ///
    /// Launches/attaches `terminal_path` when configured and logs in when the
    /// credentials are complete; otherwise the already-active terminal
    /// session is reused.
    #[instrument(skip_all, name = "connection::connect")]
    pub fn connect(&self, config: &StreamConfig) -> Result<Session<F>> {
        let credentials = config.credentials.as_ref().filter(|c| c.is_complete());
        if config.credentials.is_some() && credentials.is_none() {
            warn!("incomplete credentials ignored, attaching to the active terminal session");
        }

        let request = InitRequest {
            terminal_path: config.terminal_path.as_deref(),
            credentials,
        };

        if !self.feed.initialize(request) {
            let err = StreamError::connection(self.feed.last_error());
            warn!(error = %err, "terminal initialization failed");
            return Err(err);
        }

        info!(
            terminal_path = ?config.terminal_path,
            login = ?credentials.map(|c| c.login),
            "terminal session established"
        );
        Ok(Session {
            feed: Arc::clone(&self.feed),
        })
    }

    /// Make `symbol` visible and tradable in the session's watch list.
    pub fn select_instrument(&self, session: &Session<F>, symbol: &str) -> Result<()> {
        if !session.feed().select_symbol(symbol) {
            warn!(symbol = %symbol, "terminal rejected symbol");
            return Err(StreamError::instrument(symbol));
        }
        debug!(symbol = %symbol, "symbol selected");
        Ok(())
    }

    /// `connect` followed by `select_instrument` for the configured symbol.
    pub fn open(&self, config: &StreamConfig) -> Result<Session<F>> {
        let session = self.connect(config)?;
        self.select_instrument(&session, &config.symbol)?;
        Ok(session)
    }

    /// One recovery attempt: tear the old session down (it may already be
    /// dead), wait the settle delay, then connect and reselect.  Retrying is
    /// the caller's business.
    #[instrument(skip_all, name = "connection::reconnect")]
    pub fn reconnect(&self, config: &StreamConfig) -> Result<Session<F>> {
        info!(symbol = %config.symbol, "reconnecting to terminal");
        self.feed.shutdown();
        std::thread::sleep(self.settle_delay);
        self.open(config)
    }

    pub fn shutdown(&self) {
        self.feed.shutdown();
        info!("terminal session shut down");
    }
}
