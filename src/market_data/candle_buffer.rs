use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// One fully-elapsed aggregation interval as reported by the terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Aligned boundary the interval starts on.
    pub period_start: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub tick_volume: u64,
    pub spread: u32,
    pub real_volume: u64,
}

// ---------------------------------------------------------------------------
// CandleBuffer -- bounded ring of closed candles
// ---------------------------------------------------------------------------

/// Ring buffer of the most recent closed candles, ordered by strictly
/// increasing `period_start`.  Only closed candles are ever stored; the
/// aggregator is responsible for never handing over the forming one.
#[derive(Debug, Clone)]
pub struct CandleBuffer {
    candles: VecDeque<Candle>,
    max_candles: usize,
}

impl CandleBuffer {
    /// Create a buffer that retains at most `max_candles` candles.
    pub fn new(max_candles: usize) -> Self {
        Self {
            candles: VecDeque::with_capacity(max_candles.min(4096)),
            max_candles,
        }
    }

    /// Append candles newer than the last stored one and trim the oldest to
    /// stay within budget.  Returns the candles actually appended.
    pub fn append<I>(&mut self, candles: I) -> Vec<Candle>
    where
        I: IntoIterator<Item = Candle>,
    {
        let mut appended = Vec::new();
        for candle in candles {
            let newest = appended
                .last()
                .or_else(|| self.candles.back())
                .map(|c: &Candle| c.period_start);
            if newest.is_some_and(|t| candle.period_start <= t) {
                continue;
            }
            appended.push(candle);
        }

        self.candles.extend(appended.iter().cloned());
        while self.candles.len() > self.max_candles {
            self.candles.pop_front();
        }
        appended
    }

    /// Independent copy of every stored candle, oldest first.
    pub fn snapshot(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }

    /// The most recent `count` candles (oldest-first order).
    pub fn get_closed(&self, count: usize) -> Vec<Candle> {
        let start = self.candles.len().saturating_sub(count);
        self.candles.iter().skip(start).cloned().collect()
    }

    /// The most recent `count` close prices (oldest-first order).
    pub fn get_closes(&self, count: usize) -> Vec<f64> {
        self.get_closed(count).iter().map(|c| c.close).collect()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.candles.back().map(|c| c.close)
    }

    pub fn last_period_start(&self) -> Option<DateTime<Utc>> {
        self.candles.back().map(|c| c.period_start)
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
