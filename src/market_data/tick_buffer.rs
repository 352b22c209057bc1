use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single price update from the terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub time: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub volume: u64,
    /// Monotonic per-tick id assigned by the feed; the deduplication key.
    pub sequence: u64,
}

impl Tick {
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

// ---------------------------------------------------------------------------
// TickBuffer -- bounded FIFO deduplicated by sequence
// ---------------------------------------------------------------------------

/// Rolling store of the most recent ticks.
///
/// The buffer remembers the highest `sequence` it has ever accepted (the
/// frontier), so a tick is ingested at most once even after it has been
/// evicted.  Sequences inside the buffer are strictly increasing.
#[derive(Debug, Clone)]
pub struct TickBuffer {
    ticks: VecDeque<Tick>,
    capacity: usize,
    frontier: Option<u64>,
    frontier_time: Option<DateTime<Utc>>,
}

impl TickBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ticks: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            frontier: None,
            frontier_time: None,
        }
    }

    /// Append every tick newer than the frontier, advance the frontier, and
    /// trim the oldest entries past capacity.
    ///
    /// Returns exactly the ticks that were appended.  A batch wholly at or
    /// below the frontier is a no-op.
    pub fn ingest<I>(&mut self, raw_ticks: I) -> Vec<Tick>
    where
        I: IntoIterator<Item = Tick>,
    {
        let mut fresh = Vec::new();
        for tick in raw_ticks {
            if self.frontier.is_some_and(|f| tick.sequence <= f) {
                continue;
            }
            self.frontier = Some(tick.sequence);
            self.frontier_time = Some(tick.time);
            fresh.push(tick);
        }

        self.ticks.extend(fresh.iter().cloned());
        while self.ticks.len() > self.capacity {
            self.ticks.pop_front();
        }
        fresh
    }

    /// Independent copy of the buffer, oldest first.
    pub fn snapshot(&self) -> Vec<Tick> {
        self.ticks.iter().cloned().collect()
    }

    /// Highest sequence ever ingested.
    pub fn frontier(&self) -> Option<u64> {
        self.frontier
    }

    /// Timestamp of the tick that set the frontier.
    pub fn frontier_time(&self) -> Option<DateTime<Utc>> {
        self.frontier_time
    }

    pub fn latest(&self) -> Option<&Tick> {
        self.ticks.back()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
