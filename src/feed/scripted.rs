//! Scripted terminal used by unit tests: queued tick batches, a fixed rate
//! history, a settable clock and switchable failures.  A tick fetch can also
//! be held open until the test releases it.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};

use super::{
    Feed, InitRequest, OrderRequest, OrderResult, PositionInfo, RateRecord, TradingFeed,
    TRADE_RETCODE_DONE,
};
use crate::market_data::{Tick, Timeframe};

#[derive(Default)]
struct Script {
    init_fails_with: Option<i32>,
    last_error: i32,
    rejected_symbols: HashSet<String>,
    tick_batches: VecDeque<Vec<Tick>>,
    fail_tick_fetches: bool,
    rates: Vec<RateRecord>,
    clock: Option<DateTime<Utc>>,
    positions: Vec<PositionInfo>,
    order_retcode: Option<u32>,
    sent_orders: Vec<OrderRequest>,
    init_calls: usize,
    shutdown_calls: usize,
    select_calls: usize,
    tick_calls: usize,
    rate_calls: Vec<usize>,
    last_init_had_credentials: bool,
}

/// Blocks one call until the test opens it.
#[derive(Default)]
struct Gate {
    armed: bool,
    blocked: bool,
    open: bool,
}

#[derive(Default)]
pub(crate) struct ScriptedFeed {
    script: Mutex<Script>,
    held_ticks: Mutex<Option<Vec<Tick>>>,
    tick_gate: Mutex<Gate>,
    rate_gate: Mutex<Gate>,
    gate_moved: Condvar,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_init(&self, code: Option<i32>) {
        self.script.lock().init_fails_with = code;
    }

    pub fn reject_symbol(&self, symbol: &str) {
        self.script.lock().rejected_symbols.insert(symbol.to_string());
    }

    pub fn push_ticks(&self, batch: Vec<Tick>) {
        self.script.lock().tick_batches.push_back(batch);
    }

    pub fn fail_tick_fetches(&self, fail: bool) {
        self.script.lock().fail_tick_fetches = fail;
    }

    pub fn set_rates(&self, rates: Vec<RateRecord>) {
        self.script.lock().rates = rates;
    }

    pub fn set_clock(&self, now: DateTime<Utc>) {
        self.script.lock().clock = Some(now);
    }

    pub fn set_positions(&self, positions: Vec<PositionInfo>) {
        self.script.lock().positions = positions;
    }

    pub fn set_order_retcode(&self, retcode: u32) {
        self.script.lock().order_retcode = Some(retcode);
    }

    /// Block the next tick fetch until [`release_held`](Self::release_held),
    /// then answer it with `batch`.
    pub fn hold_next_tick_fetch(&self, batch: Vec<Tick>) {
        *self.held_ticks.lock() = Some(batch);
        Self::arm(&self.tick_gate);
    }

    /// Block the next rate fetch until [`release_held`](Self::release_held).
    pub fn hold_next_rate_fetch(&self) {
        Self::arm(&self.rate_gate);
    }

    pub fn release_held(&self) {
        for gate in [&self.tick_gate, &self.rate_gate] {
            gate.lock().open = true;
        }
        self.gate_moved.notify_all();
    }

    pub fn tick_fetch_is_held(&self) -> bool {
        self.tick_gate.lock().blocked
    }

    pub fn rate_fetch_is_held(&self) -> bool {
        self.rate_gate.lock().blocked
    }

    fn arm(gate: &Mutex<Gate>) {
        let mut gate = gate.lock();
        gate.armed = true;
        gate.open = false;
    }

    /// Wait at `gate` if it is armed.  Returns whether this call was held.
    fn pass(&self, gate: &Mutex<Gate>) -> bool {
        let mut gate = gate.lock();
        if !gate.armed {
            return false;
        }
        gate.armed = false;
        gate.blocked = true;
        while !gate.open {
            self.gate_moved.wait(&mut gate);
        }
        gate.blocked = false;
        true
    }

    pub fn sent_orders(&self) -> Vec<OrderRequest> {
        self.script.lock().sent_orders.clone()
    }

    pub fn init_calls(&self) -> usize {
        self.script.lock().init_calls
    }

    pub fn shutdown_calls(&self) -> usize {
        self.script.lock().shutdown_calls
    }

    pub fn select_calls(&self) -> usize {
        self.script.lock().select_calls
    }

    pub fn tick_calls(&self) -> usize {
        self.script.lock().tick_calls
    }

    /// `max_count` of every rate request, in order.
    pub fn rate_calls(&self) -> Vec<usize> {
        self.script.lock().rate_calls.clone()
    }

    pub fn last_init_had_credentials(&self) -> bool {
        self.script.lock().last_init_had_credentials
    }
}

impl Feed for ScriptedFeed {
    fn initialize(&self, request: InitRequest<'_>) -> bool {
        let mut s = self.script.lock();
        s.init_calls += 1;
        s.last_init_had_credentials = request.credentials.is_some();
        match s.init_fails_with {
            Some(code) => {
                s.last_error = code;
                false
            }
            None => true,
        }
    }

    fn last_error(&self) -> i32 {
        self.script.lock().last_error
    }

    fn shutdown(&self) {
        self.script.lock().shutdown_calls += 1;
    }

    fn select_symbol(&self, symbol: &str) -> bool {
        let mut s = self.script.lock();
        s.select_calls += 1;
        !s.rejected_symbols.contains(symbol)
    }

    fn current_tick(&self, _symbol: &str) -> Option<Tick> {
        let s = self.script.lock();
        s.clock.map(|now| Tick {
            time: now,
            bid: 1.0,
            ask: 1.0002,
            last: 0.0,
            volume: 0,
            sequence: now.timestamp_millis() as u64,
        })
    }

    fn fetch_ticks_since(
        &self,
        _symbol: &str,
        _from: DateTime<Utc>,
        max_count: usize,
    ) -> Option<Vec<Tick>> {
        self.script.lock().tick_calls += 1;
        let held = if self.pass(&self.tick_gate) {
            self.held_ticks.lock().take()
        } else {
            None
        };

        let mut s = self.script.lock();
        if s.fail_tick_fetches {
            s.last_error = -10002;
            return None;
        }
        let mut batch = match held {
            Some(batch) => batch,
            None => s.tick_batches.pop_front().unwrap_or_default(),
        };
        let overflow = batch.len().saturating_sub(max_count);
        batch.drain(..overflow);
        Some(batch)
    }

    fn fetch_completed_rates(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        from: DateTime<Utc>,
        max_count: usize,
    ) -> Option<Vec<RateRecord>> {
        self.pass(&self.rate_gate);
        let mut s = self.script.lock();
        s.rate_calls.push(max_count);
        let eligible: Vec<RateRecord> = s.rates.iter().filter(|r| r.time <= from).cloned().collect();
        let start = eligible.len().saturating_sub(max_count);
        Some(eligible[start..].to_vec())
    }
}

impl TradingFeed for ScriptedFeed {
    fn order_send(&self, request: &OrderRequest) -> Option<OrderResult> {
        let mut s = self.script.lock();
        s.sent_orders.push(request.clone());
        let retcode = s.order_retcode.unwrap_or(TRADE_RETCODE_DONE);
        Some(OrderResult {
            retcode,
            deal: s.sent_orders.len() as u64,
            order: s.sent_orders.len() as u64,
            volume: request.volume,
            price: request.price,
            bid: request.price,
            ask: request.price,
            comment: String::new(),
            request_id: s.sent_orders.len() as u64,
            retcode_external: 0,
        })
    }

    fn positions_get(&self, symbol: Option<&str>) -> Option<Vec<PositionInfo>> {
        let s = self.script.lock();
        Some(
            s.positions
                .iter()
                .filter(|p| symbol.map_or(true, |sym| p.symbol == sym))
                .cloned()
                .collect(),
        )
    }
}
