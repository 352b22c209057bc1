// =============================================================================
// Stream Configuration — immutable engine settings captured at construction
// =============================================================================
//
// All fields carry `#[serde(default)]` so a partial JSON file still loads.
// Nothing here is validated eagerly: an unsupported timeframe string is only
// rejected the first time the aggregator needs it.
// =============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbol() -> String {
    "EURUSD".to_string()
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_rolling_ticks() -> usize {
    10_000
}

fn default_rolling_bars() -> usize {
    2_000
}

// =============================================================================
// Credentials
// =============================================================================

/// Account login used when the terminal must authenticate on connect.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub login: u64,
    pub password: String,
    pub server: String,
}

impl Credentials {
    pub fn new(login: u64, password: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            login,
            password: password.into(),
            server: server.into(),
        }
    }

    /// All three parts must be present for the terminal to attempt a login.
    pub fn is_complete(&self) -> bool {
        self.login != 0 && !self.password.is_empty() && !self.server.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("server", &self.server)
            .finish()
    }
}

// =============================================================================
// StreamConfig
// =============================================================================

/// Everything a stream engine needs to know about its instrument, cadence and
/// buffers.  Set once, read-only thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Instrument as named in the terminal's watch list.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Sleep between background poll cycles, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum ticks retained in the rolling tick buffer.
    #[serde(default = "default_rolling_ticks")]
    pub rolling_ticks: usize,

    /// Maximum closed candles retained in the rolling candle buffer.
    #[serde(default = "default_rolling_bars")]
    pub rolling_bars: usize,

    /// Candle timeframe code (`M1`, `M5`, `M15`, `H1`, `D1`).  `None` disables
    /// candle aggregation.
    #[serde(default)]
    pub bars_timeframe: Option<String>,

    /// Terminal executable to launch or attach to.
    #[serde(default)]
    pub terminal_path: Option<PathBuf>,

    /// Login details; without them the already-active terminal session is reused.
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            poll_interval_ms: default_poll_interval_ms(),
            rolling_ticks: default_rolling_ticks(),
            rolling_bars: default_rolling_bars(),
            bars_timeframe: None,
            terminal_path: None,
            credentials: None,
        }
    }
}

impl StreamConfig {
    /// Default configuration for `symbol`.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Self::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_rolling_ticks(mut self, capacity: usize) -> Self {
        self.rolling_ticks = capacity;
        self
    }

    pub fn with_rolling_bars(mut self, capacity: usize) -> Self {
        self.rolling_bars = capacity;
        self
    }

    pub fn with_timeframe(mut self, timeframe: impl Into<String>) -> Self {
        self.bars_timeframe = Some(timeframe.into());
        self
    }

    pub fn with_terminal_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.terminal_path = Some(path.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Load configuration from a JSON file at `path`.
    ///
    /// Missing files are an error so the caller can fall back to defaults with
    /// a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read stream config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse stream config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            timeframe = ?config.bars_timeframe,
            "stream config loaded"
        );

        Ok(config)
    }
}
