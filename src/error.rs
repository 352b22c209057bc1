// =============================================================================
// Error taxonomy — connection, instrument, configuration, feed and order errors
// =============================================================================
//
// Terminal failures arrive as a bare integer from the terminal's `last_error`
// query.  `FeedErrorCode` maps that integer onto a small closed set so callers
// can branch on the category and still read the raw code.
// =============================================================================

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors surfaced by the connection manager, the stream engine and the order
/// adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    /// The terminal could not be reached, refused the login, or its IPC
    /// channel broke.
    #[error("terminal connection failed: {code}")]
    Connection { code: FeedErrorCode },

    /// The instrument is unknown to the session or could not be made visible.
    #[error("could not select symbol {symbol} in the watch list")]
    Instrument { symbol: String },

    /// Unsupported timeframe or an invalid parameter combination.
    #[error("invalid configuration: {message}")]
    Configuration { message: String },

    /// A data request failed after the session was established.
    #[error("feed request failed: {message}")]
    Feed { message: String },

    /// The order adapter could not obtain a price or the terminal returned no
    /// result for a request.
    #[error("order request failed: {message}")]
    Order { message: String },
}

impl StreamError {
    pub fn connection(code: i32) -> Self {
        Self::Connection {
            code: FeedErrorCode::from_native(code),
        }
    }

    pub fn instrument(symbol: impl Into<String>) -> Self {
        Self::Instrument {
            symbol: symbol.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn feed(message: impl Into<String>) -> Self {
        Self::Feed {
            message: message.into(),
        }
    }

    pub fn order(message: impl Into<String>) -> Self {
        Self::Order {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Native diagnostic codes
// ---------------------------------------------------------------------------

/// Which leg of the terminal's IPC channel failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpcFailure {
    General,
    Send,
    Receive,
    Init,
    NoChannel,
}

/// Category of a terminal diagnostic code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedErrorCode {
    GenericFailure,
    InvalidParams,
    OutOfResources,
    NoData,
    InvalidVersion,
    AuthFailed,
    Unsupported,
    AutoTradingDisabled,
    Ipc(IpcFailure),
    Timeout,
    Unknown(i32),
}

impl FeedErrorCode {
    /// Map the terminal's raw `last_error` value onto a category.
    pub fn from_native(code: i32) -> Self {
        match code {
            -1 => Self::GenericFailure,
            -2 => Self::InvalidParams,
            -3 => Self::OutOfResources,
            -4 => Self::NoData,
            -5 => Self::InvalidVersion,
            -6 => Self::AuthFailed,
            -7 => Self::Unsupported,
            -8 => Self::AutoTradingDisabled,
            -10000 => Self::Ipc(IpcFailure::General),
            -10001 => Self::Ipc(IpcFailure::Send),
            -10002 => Self::Ipc(IpcFailure::Receive),
            -10003 => Self::Ipc(IpcFailure::Init),
            -10004 => Self::Ipc(IpcFailure::NoChannel),
            -10005 => Self::Timeout,
            other => Self::Unknown(other),
        }
    }

    /// The raw value as the terminal reports it.
    pub fn native(&self) -> i32 {
        match self {
            Self::GenericFailure => -1,
            Self::InvalidParams => -2,
            Self::OutOfResources => -3,
            Self::NoData => -4,
            Self::InvalidVersion => -5,
            Self::AuthFailed => -6,
            Self::Unsupported => -7,
            Self::AutoTradingDisabled => -8,
            Self::Ipc(IpcFailure::General) => -10000,
            Self::Ipc(IpcFailure::Send) => -10001,
            Self::Ipc(IpcFailure::Receive) => -10002,
            Self::Ipc(IpcFailure::Init) => -10003,
            Self::Ipc(IpcFailure::NoChannel) => -10004,
            Self::Timeout => -10005,
            Self::Unknown(code) => *code,
        }
    }
}

impl std::fmt::Display for FeedErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = self.native();
        match self {
            Self::GenericFailure => write!(f, "generic failure ({code})"),
            Self::InvalidParams => write!(f, "invalid arguments/parameters ({code})"),
            Self::OutOfResources => write!(f, "out of memory ({code})"),
            Self::NoData => write!(f, "no history ({code})"),
            Self::InvalidVersion => write!(f, "invalid version ({code})"),
            Self::AuthFailed => write!(f, "authorization failed ({code})"),
            Self::Unsupported => write!(f, "unsupported method ({code})"),
            Self::AutoTradingDisabled => write!(f, "auto-trading disabled ({code})"),
            Self::Ipc(IpcFailure::General) => write!(f, "internal IPC general error ({code})"),
            Self::Ipc(IpcFailure::Send) => write!(f, "internal IPC send failed ({code})"),
            Self::Ipc(IpcFailure::Receive) => write!(f, "internal IPC recv failed ({code})"),
            Self::Ipc(IpcFailure::Init) => write!(f, "internal IPC initialization failed ({code})"),
            Self::Ipc(IpcFailure::NoChannel) => write!(f, "internal IPC no channel ({code})"),
            Self::Timeout => write!(f, "internal timeout ({code})"),
            Self::Unknown(_) => write!(f, "unknown error code {code}"),
        }
    }
}
