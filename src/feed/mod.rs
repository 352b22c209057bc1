// =============================================================================
// Terminal feed contract
// =============================================================================
//
// The broker terminal is an external process reached through a blocking
// client.  `Feed` is the narrow surface the stream core depends on;
// `TradingFeed` adds the order calls the execution adapter needs.  Calls that
// the terminal reports as failed return `None`, after which `last_error`
// holds the native diagnostic code.
// =============================================================================

pub mod connection;
pub mod paper;

#[cfg(test)]
pub(crate) mod scripted;

pub use connection::{ConnectionManager, Session};
pub use paper::{PaperConfig, PaperFeed};

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::market_data::{Candle, Tick, Timeframe};
use crate::runtime_config::Credentials;
use crate::types::{OrderKind, OrderSide};

/// Order request accepted and executed in full.
pub const TRADE_RETCODE_DONE: u32 = 10009;
/// Pending order accepted and placed on the book.
pub const TRADE_RETCODE_PLACED: u32 = 10008;
/// Request rejected by the terminal.
pub const TRADE_RETCODE_REJECT: u32 = 10006;

// ---------------------------------------------------------------------------
// Wire records
// ---------------------------------------------------------------------------

/// One interval as the terminal aggregates it.  The most recent record of a
/// response may still be forming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRecord {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub tick_volume: u64,
    pub spread: u32,
    pub real_volume: u64,
}

impl From<RateRecord> for Candle {
    fn from(r: RateRecord) -> Self {
        Candle {
            period_start: r.time,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            tick_volume: r.tick_volume,
            spread: r.spread,
            real_volume: r.real_volume,
        }
    }
}

/// What `initialize` should do: launch/attach a terminal binary and/or log in.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitRequest<'a> {
    pub terminal_path: Option<&'a Path>,
    pub credentials: Option<&'a Credentials>,
}

/// Whether an order executes immediately or rests on the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    Deal,
    Pending,
}

/// Fill policy for market deals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillPolicy {
    ImmediateOrCancel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub action: TradeAction,
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub volume: f64,
    pub price: f64,
    pub deviation: u32,
    /// Absolute stop-loss price, `0.0` when unset.
    pub sl: f64,
    /// Absolute take-profit price, `0.0` when unset.
    pub tp: f64,
    pub magic: u64,
    pub comment: String,
    pub fill_policy: Option<FillPolicy>,
    /// Ticket of the position this deal closes.
    pub position: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub retcode: u32,
    pub deal: u64,
    pub order: u64,
    pub volume: f64,
    pub price: f64,
    pub bid: f64,
    pub ask: f64,
    pub comment: String,
    pub request_id: u64,
    pub retcode_external: i32,
}

impl OrderResult {
    pub fn is_done(&self) -> bool {
        self.retcode == TRADE_RETCODE_DONE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionInfo {
    pub ticket: u64,
    pub symbol: String,
    pub side: OrderSide,
    pub volume: f64,
    pub price_open: f64,
    pub sl: f64,
    pub tp: f64,
    pub magic: u64,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Market-data calls of the terminal client.  Every call blocks the calling
/// thread.
pub trait Feed: Send + Sync + 'static {
    /// Start or attach to the terminal.  `false` means `last_error` is set.
    fn initialize(&self, request: InitRequest<'_>) -> bool;

    /// Native code of the most recent failure.
    fn last_error(&self) -> i32;

    fn shutdown(&self);

    /// Make `symbol` visible in the watch list.
    fn select_symbol(&self, symbol: &str) -> bool;

    /// Latest quote, used as the feed clock.
    fn current_tick(&self, symbol: &str) -> Option<Tick>;

    /// The most recent `max_count` ticks stamped at or after `from`, oldest
    /// first.  The window always ends at the terminal's latest tick; older
    /// ticks beyond `max_count` are not returned.
    fn fetch_ticks_since(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        max_count: usize,
    ) -> Option<Vec<Tick>>;

    /// Up to `max_count` intervals ending with the one containing `from`,
    /// oldest first.  The last element may be the forming interval.
    fn fetch_completed_rates(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        max_count: usize,
    ) -> Option<Vec<RateRecord>>;
}

/// Order calls of the terminal client, sharing the market-data session.
pub trait TradingFeed: Feed {
    fn order_send(&self, request: &OrderRequest) -> Option<OrderResult>;

    fn positions_get(&self, symbol: Option<&str>) -> Option<Vec<PositionInfo>>;
}
