// =============================================================================
// Paper Terminal — self-contained simulated feed
// =============================================================================
//
// Stands in for a broker terminal when none is available: a deterministic
// random walk produces one quote every `tick_interval_ms`, a bounded history
// backs the tick and rate queries, and market orders fill instantly at the
// current bid/ask.  Quotes are generated lazily, up to the clock, whenever a
// call needs them.
//
// The clock is either wall time or a manual clock advanced by the caller.
// =============================================================================

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    Feed, InitRequest, OrderRequest, OrderResult, PositionInfo, RateRecord, TradeAction,
    TradingFeed, TRADE_RETCODE_DONE, TRADE_RETCODE_PLACED, TRADE_RETCODE_REJECT,
};
use crate::error::{FeedErrorCode, IpcFailure};
use crate::market_data::{period_start, Tick, Timeframe};
use crate::types::{OrderKind, OrderSide};

/// Smallest price increment quoted.
const POINT: f64 = 0.000_01;

/// Longest back-fill or retention span the paper terminal will generate.
const MAX_SPAN_MS: u64 = 366 * 24 * 60 * 60 * 1000;

fn default_symbol() -> String {
    "EURUSD".to_string()
}

fn default_start_price() -> f64 {
    1.1000
}

fn default_spread_points() -> u32 {
    12
}

fn default_volatility_points() -> f64 {
    4.0
}

fn default_tick_interval_ms() -> u64 {
    250
}

fn default_warmup_ticks() -> usize {
    14_400
}

fn default_history_ticks() -> usize {
    100_000
}

fn default_seed() -> u64 {
    0x5EED
}

/// Shape of the simulated market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// The only symbol the paper terminal quotes.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    #[serde(default = "default_start_price")]
    pub start_price: f64,

    /// Fixed ask-bid distance, in points.
    #[serde(default = "default_spread_points")]
    pub spread_points: u32,

    /// Largest bid move between two quotes, in points.
    #[serde(default = "default_volatility_points")]
    pub volatility_points: f64,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Quotes back-filled on first connect so rate queries have history.
    #[serde(default = "default_warmup_ticks")]
    pub warmup_ticks: usize,

    /// Quotes retained for tick and rate queries.
    #[serde(default = "default_history_ticks")]
    pub history_ticks: usize,

    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            start_price: default_start_price(),
            spread_points: default_spread_points(),
            volatility_points: default_volatility_points(),
            tick_interval_ms: default_tick_interval_ms(),
            warmup_ticks: default_warmup_ticks(),
            history_ticks: default_history_ticks(),
            seed: default_seed(),
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

enum Clock {
    Wall,
    Manual(DateTime<Utc>),
}

struct PaperState {
    clock: Clock,
    connected: bool,
    last_error: i32,
    history: VecDeque<Tick>,
    next_quote_at: Option<DateTime<Utc>>,
    bid: f64,
    rng: u64,
    positions: Vec<PositionInfo>,
    next_ticket: u64,
    request_id: u64,
}

impl PaperState {
    fn now(&self) -> DateTime<Utc> {
        match self.clock {
            Clock::Wall => Utc::now(),
            Clock::Manual(at) => at,
        }
    }

    /// 64-bit LCG step mapped onto [-1, 1).
    fn next_unit(&mut self) -> f64 {
        self.rng = self
            .rng
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        let bits = self.rng >> 11;
        (bits as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    }

    fn fail(&mut self, code: FeedErrorCode) {
        self.last_error = code.native();
    }
}

/// Simulated terminal quoting a single symbol.
pub struct PaperFeed {
    config: PaperConfig,
    state: Mutex<PaperState>,
}

impl PaperFeed {
    /// Paper terminal driven by wall time.
    pub fn new(config: PaperConfig) -> Self {
        Self::with_clock(config, Clock::Wall)
    }

    /// Paper terminal whose clock only moves through [`advance`](Self::advance).
    pub fn manual(config: PaperConfig, start: DateTime<Utc>) -> Self {
        Self::with_clock(config, Clock::Manual(start))
    }

    fn with_clock(config: PaperConfig, clock: Clock) -> Self {
        let state = PaperState {
            clock,
            connected: false,
            last_error: 0,
            history: VecDeque::new(),
            next_quote_at: None,
            bid: config.start_price,
            rng: config.seed,
            positions: Vec::new(),
            next_ticket: 1,
            request_id: 0,
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// Move a manual clock forward.  No effect on a wall clock.
    pub fn advance(&self, by: std::time::Duration) {
        let mut state = self.state.lock();
        if let Clock::Manual(at) = state.clock {
            let step = Duration::from_std(by).unwrap_or_else(|_| Duration::zero());
            state.clock = Clock::Manual(at + step);
        }
    }

    pub fn config(&self) -> &PaperConfig {
        &self.config
    }

    fn tick_interval(&self) -> Duration {
        Duration::milliseconds(self.config.tick_interval_ms.clamp(1, MAX_SPAN_MS) as i64)
    }

    /// Time covered by `count` quotes, saturating at [`MAX_SPAN_MS`].
    fn span(&self, count: usize) -> Duration {
        let ms = u64::try_from(count)
            .ok()
            .and_then(|n| n.checked_mul(self.config.tick_interval_ms.max(1)))
            .map_or(MAX_SPAN_MS, |ms| ms.min(MAX_SPAN_MS));
        Duration::milliseconds(ms as i64)
    }

    /// Generate quotes up to the clock.
    fn catch_up(&self, state: &mut PaperState) {
        let now = state.now();
        let interval = self.tick_interval();
        let mut at = match state.next_quote_at {
            Some(at) => at,
            None => now - self.span(self.config.warmup_ticks),
        };

        // A wall clock that jumped far ahead only needs the retained tail.
        let retained = self.span(self.config.history_ticks.saturating_sub(1));
        if now - at > retained {
            at = now - retained;
        }

        let spread = self.config.spread_points as f64 * POINT;
        while at <= now {
            let step = state.next_unit() * self.config.volatility_points * POINT;
            let bid = ((state.bid + step).max(POINT) / POINT).round() * POINT;
            state.bid = bid;

            let last_sequence = state.history.back().map_or(0, |t| t.sequence);
            let sequence = (at.timestamp_millis().max(0) as u64).max(last_sequence + 1);
            let volume = 1 + (state.rng >> 61);

            state.history.push_back(Tick {
                time: at,
                bid,
                ask: bid + spread,
                last: 0.0,
                volume,
                sequence,
            });
            at += interval;
        }
        state.next_quote_at = Some(at);

        while state.history.len() > self.config.history_ticks {
            state.history.pop_front();
        }
    }

    /// Lock the state for a call on `symbol`, or record why it cannot be
    /// served.
    fn serve<'a>(&'a self, symbol: &str) -> Option<MutexGuard<'a, PaperState>> {
        let mut state = self.state.lock();
        if !state.connected {
            state.fail(FeedErrorCode::Ipc(IpcFailure::NoChannel));
            return None;
        }
        if symbol != self.config.symbol {
            state.fail(FeedErrorCode::InvalidParams);
            return None;
        }
        self.catch_up(&mut state);
        Some(state)
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

impl Feed for PaperFeed {
    fn initialize(&self, request: InitRequest<'_>) -> bool {
        let mut state = self.state.lock();
        state.connected = true;
        state.last_error = 0;
        self.catch_up(&mut state);
        info!(
            symbol = %self.config.symbol,
            login = ?request.credentials.map(|c| c.login),
            history = state.history.len(),
            "paper terminal ready"
        );
        true
    }

    fn last_error(&self) -> i32 {
        self.state.lock().last_error
    }

    fn shutdown(&self) {
        self.state.lock().connected = false;
        debug!("paper terminal shut down");
    }

    fn select_symbol(&self, symbol: &str) -> bool {
        self.serve(symbol).is_some()
    }

    fn current_tick(&self, symbol: &str) -> Option<Tick> {
        let state = self.serve(symbol)?;
        state.history.back().cloned()
    }

    fn fetch_ticks_since(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        max_count: usize,
    ) -> Option<Vec<Tick>> {
        let state = self.serve(symbol)?;
        let newer = state.history.iter().rev().take_while(|t| t.time >= from);
        let mut window: Vec<Tick> = newer.take(max_count).cloned().collect();
        window.reverse();
        Some(window)
    }

    fn fetch_completed_rates(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        max_count: usize,
    ) -> Option<Vec<RateRecord>> {
        let mut state = self.serve(symbol)?;
        let until = period_start(from, timeframe);

        let mut records: Vec<RateRecord> = Vec::new();
        for tick in state.history.iter().filter(|t| t.time < until + timeframe.duration()) {
            let period = period_start(tick.time, timeframe);
            let spread = ((tick.ask - tick.bid) / POINT).round() as u32;
            match records.last_mut() {
                Some(bar) if bar.time == period => {
                    bar.high = bar.high.max(tick.bid);
                    bar.low = bar.low.min(tick.bid);
                    bar.close = tick.bid;
                    bar.tick_volume += 1;
                    bar.spread = bar.spread.min(spread);
                }
                _ => records.push(RateRecord {
                    time: period,
                    open: tick.bid,
                    high: tick.bid,
                    low: tick.bid,
                    close: tick.bid,
                    tick_volume: 1,
                    spread,
                    real_volume: 0,
                }),
            }
        }

        if records.is_empty() {
            state.fail(FeedErrorCode::NoData);
            return None;
        }
        let start = records.len().saturating_sub(max_count);
        Some(records.split_off(start))
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

impl TradingFeed for PaperFeed {
    fn order_send(&self, request: &OrderRequest) -> Option<OrderResult> {
        let mut state = self.serve(&request.symbol)?;
        let quote = state.history.back().cloned()?;
        state.request_id += 1;

        let mut result = OrderResult {
            retcode: TRADE_RETCODE_REJECT,
            deal: 0,
            order: 0,
            volume: 0.0,
            price: 0.0,
            bid: quote.bid,
            ask: quote.ask,
            comment: String::new(),
            request_id: state.request_id,
            retcode_external: 0,
        };

        if request.volume <= 0.0 {
            result.comment = "invalid volume".to_string();
            return Some(result);
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;

        match (request.action, request.kind) {
            (TradeAction::Deal, OrderKind::Market) => {
                let fill = match request.side {
                    OrderSide::Buy => quote.ask,
                    OrderSide::Sell => quote.bid,
                };
                match request.position {
                    Some(closing) => {
                        let before = state.positions.len();
                        state.positions.retain(|p| p.ticket != closing);
                        if state.positions.len() == before {
                            result.comment = format!("position {closing} not found");
                            return Some(result);
                        }
                    }
                    None => state.positions.push(PositionInfo {
                        ticket,
                        symbol: request.symbol.clone(),
                        side: request.side,
                        volume: request.volume,
                        price_open: fill,
                        sl: request.sl,
                        tp: request.tp,
                        magic: request.magic,
                    }),
                }
                result.retcode = TRADE_RETCODE_DONE;
                result.deal = ticket;
                result.order = ticket;
                result.volume = request.volume;
                result.price = fill;
                result.comment = "Request executed".to_string();
            }
            (TradeAction::Pending, OrderKind::Limit | OrderKind::Stop) => {
                result.retcode = TRADE_RETCODE_PLACED;
                result.order = ticket;
                result.volume = request.volume;
                result.price = request.price;
                result.comment = "Order placed".to_string();
            }
            _ => {
                result.comment = "unsupported action".to_string();
            }
        }

        debug!(
            symbol = %request.symbol,
            side = %request.side,
            kind = %request.kind,
            retcode = result.retcode,
            price = result.price,
            "paper order handled"
        );
        Some(result)
    }

    fn positions_get(&self, symbol: Option<&str>) -> Option<Vec<PositionInfo>> {
        let mut state = self.state.lock();
        if !state.connected {
            state.fail(FeedErrorCode::Ipc(IpcFailure::NoChannel));
            return None;
        }
        Some(
            state
                .positions
                .iter()
                .filter(|p| symbol.map_or(true, |s| p.symbol == s))
                .cloned()
                .collect(),
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FillPolicy;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn config() -> PaperConfig {
        PaperConfig {
            warmup_ticks: 2_400,
            ..PaperConfig::default()
        }
    }

    fn connected() -> PaperFeed {
        let feed = PaperFeed::manual(config(), start());
        assert!(feed.initialize(InitRequest::default()));
        feed
    }

    fn market(side: OrderSide, position: Option<u64>) -> OrderRequest {
        OrderRequest {
            action: TradeAction::Deal,
            symbol: "EURUSD".to_string(),
            side,
            kind: OrderKind::Market,
            volume: 0.1,
            price: 0.0,
            deviation: 20,
            sl: 0.0,
            tp: 0.0,
            magic: 42,
            comment: "test".to_string(),
            fill_policy: Some(FillPolicy::ImmediateOrCancel),
            position,
        }
    }

    #[test]
    fn calls_before_initialize_fail_with_no_channel() {
        let feed = PaperFeed::manual(config(), start());
        assert!(feed.current_tick("EURUSD").is_none());
        assert_eq!(feed.last_error(), -10004);
        assert!(!feed.select_symbol("EURUSD"));
    }

    #[test]
    fn unknown_symbol_is_rejected() {
        let feed = connected();
        assert!(!feed.select_symbol("XAUUSD"));
        assert_eq!(feed.last_error(), -2);
        assert!(feed.select_symbol("EURUSD"));
    }

    #[test]
    fn warmup_back_fills_history_up_to_clock() {
        let feed = connected();
        let latest = feed.current_tick("EURUSD").unwrap();
        assert_eq!(latest.time, start());

        let all = feed
            .fetch_ticks_since("EURUSD", start() - Duration::hours(1), usize::MAX)
            .unwrap();
        assert_eq!(all.len(), 2_401);
        assert!(all.windows(2).all(|w| w[0].sequence < w[1].sequence));
        assert!(all.iter().all(|t| t.ask > t.bid));
    }

    #[test]
    fn ticks_since_respects_anchor_and_limit() {
        let feed = connected();
        feed.advance(std::time::Duration::from_secs(2));
        let since = feed.fetch_ticks_since("EURUSD", start(), 1_000).unwrap();
        assert_eq!(since.len(), 9);
        assert_eq!(since[0].time, start());

        let capped = feed.fetch_ticks_since("EURUSD", start(), 3).unwrap();
        let times: Vec<_> = capped.iter().map(|t| t.time).collect();
        assert_eq!(
            times,
            vec![
                start() + Duration::milliseconds(1_500),
                start() + Duration::milliseconds(1_750),
                start() + Duration::seconds(2),
            ]
        );
    }

    #[test]
    fn oversized_warmup_is_clamped_to_retained_history() {
        let feed = PaperFeed::manual(
            PaperConfig {
                warmup_ticks: u32::MAX as usize + 2,
                history_ticks: 100,
                ..PaperConfig::default()
            },
            start(),
        );
        assert!(feed.initialize(InitRequest::default()));

        let all = feed
            .fetch_ticks_since("EURUSD", start() - Duration::days(1), usize::MAX)
            .unwrap();
        assert_eq!(all.len(), 100);
        assert_eq!(all[0].time, start() - Duration::milliseconds(99 * 250));
        assert_eq!(all[99].time, start());
    }

    #[test]
    fn extreme_warmup_does_not_overflow() {
        let feed = PaperFeed::manual(
            PaperConfig {
                warmup_ticks: usize::MAX,
                history_ticks: 10,
                tick_interval_ms: u64::MAX,
                ..PaperConfig::default()
            },
            start(),
        );
        assert!(feed.initialize(InitRequest::default()));
        assert_eq!(feed.current_tick("EURUSD").map(|t| t.time), Some(start()));
    }

    #[test]
    fn same_seed_gives_same_walk() {
        let a = connected();
        let b = connected();
        assert_eq!(a.current_tick("EURUSD"), b.current_tick("EURUSD"));
    }

    #[test]
    fn rates_end_with_the_forming_period() {
        let feed = connected();
        feed.advance(std::time::Duration::from_secs(30));
        let now = start() + Duration::seconds(30);
        let rates = feed
            .fetch_completed_rates("EURUSD", Timeframe::M1, now, 3)
            .unwrap();

        let times: Vec<_> = rates.iter().map(|r| r.time).collect();
        assert_eq!(
            times,
            vec![
                start() - Duration::minutes(2),
                start() - Duration::minutes(1),
                start()
            ]
        );
        assert_eq!(rates[0].tick_volume, 240);
        assert_eq!(rates[2].tick_volume, 121);
        assert!(rates.iter().all(|r| r.low <= r.open && r.open <= r.high));
        assert_eq!(rates[0].spread, 12);
    }

    #[test]
    fn market_orders_open_and_close_positions() {
        let feed = connected();
        let quote = feed.current_tick("EURUSD").unwrap();

        let opened = feed.order_send(&market(OrderSide::Buy, None)).unwrap();
        assert!(opened.is_done());
        assert_eq!(opened.price, quote.ask);

        let positions = feed.positions_get(Some("EURUSD")).unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].magic, 42);

        let closed = feed
            .order_send(&market(OrderSide::Sell, Some(positions[0].ticket)))
            .unwrap();
        assert!(closed.is_done());
        assert_eq!(closed.price, quote.bid);
        assert!(feed.positions_get(None).unwrap().is_empty());
    }

    #[test]
    fn closing_unknown_ticket_is_rejected() {
        let feed = connected();
        let result = feed.order_send(&market(OrderSide::Sell, Some(999))).unwrap();
        assert_eq!(result.retcode, TRADE_RETCODE_REJECT);
    }

    #[test]
    fn pending_orders_are_placed() {
        let feed = connected();
        let mut request = market(OrderSide::Buy, None);
        request.action = TradeAction::Pending;
        request.kind = OrderKind::Limit;
        request.price = 1.05;
        let result = feed.order_send(&request).unwrap();
        assert_eq!(result.retcode, TRADE_RETCODE_PLACED);
        assert!(feed.positions_get(None).unwrap().is_empty());
    }

    #[test]
    fn shutdown_disconnects() {
        let feed = connected();
        feed.shutdown();
        assert!(feed.fetch_ticks_since("EURUSD", start(), 10).is_none());
        assert!(feed.positions_get(None).is_none());
        assert_eq!(feed.last_error(), -10004);
    }
}
