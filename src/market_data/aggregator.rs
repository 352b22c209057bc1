// =============================================================================
// Candle Aggregator — closed candles straight from the terminal's own rates
// =============================================================================
//
// Candles are not resampled from the local tick buffer: the terminal's rate
// records are taken as-is so OHLC, volume and spread match what the broker
// reports.  The aggregator only decides *when* to ask and *which* records
// are closed:
//
//   1. current period = period_start(now)
//   2. the newest closed candle is the one right before the current period
//      (no boundary crossed since)  ->  nothing to do, no terminal call
//   3. first fetch asks for `rolling_bars` records, later fetches a short
//      lookback (covers several periods elapsing between polls)
//   4. drop records at or before the last closed period
//   5. drop the record of the current period: it is still forming
//   6. append the survivors and remember the newest one
//
// Steps 1-3 (`plan`) and 4-6 (`absorb`) are split so the engine can release
// its buffer lock while the terminal call is in flight.
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::debug;

use super::calendar::{next_boundary, period_start, Timeframe};
use super::candle_buffer::{Candle, CandleBuffer};
use crate::error::Result;
use crate::feed::{Feed, RateRecord, Session};
use crate::runtime_config::StreamConfig;

/// Records requested on every fetch after the first.
pub const CANDLE_LOOKBACK: usize = 5;

/// A rate request the aggregator wants issued against the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRequest {
    pub timeframe: Timeframe,
    /// Period containing `now`; anything at or after it is forming.
    pub current_period: DateTime<Utc>,
    /// Anchor handed to the terminal.
    pub until: DateTime<Utc>,
    pub count: usize,
}

/// Rolling store of closed candles plus the closed/forming bookkeeping.
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    candles: CandleBuffer,
    rolling_bars: usize,
    last_closed_period: Option<DateTime<Utc>>,
}

impl CandleAggregator {
    pub fn new(rolling_bars: usize) -> Self {
        Self {
            candles: CandleBuffer::new(rolling_bars),
            rolling_bars,
            last_closed_period: None,
        }
    }

    pub fn last_closed_period(&self) -> Option<DateTime<Utc>> {
        self.last_closed_period
    }

    pub fn candles(&self) -> &CandleBuffer {
        &self.candles
    }

    /// Decide whether a rate request is due at `now`.
    pub fn plan(&self, timeframe: Timeframe, now: DateTime<Utc>) -> Option<RateRequest> {
        let current_period = period_start(now, timeframe);

        if let Some(last) = self.last_closed_period {
            if next_boundary(last, timeframe) >= current_period {
                return None;
            }
        }

        let count = if self.last_closed_period.is_none() {
            self.rolling_bars
        } else {
            CANDLE_LOOKBACK
        };

        Some(RateRequest {
            timeframe,
            current_period,
            until: now,
            count,
        })
    }

    /// Keep the closed records of a response to `request` and append them.
    /// Returns the candles appended.
    pub fn absorb(&mut self, request: &RateRequest, records: Vec<RateRecord>) -> Vec<Candle> {
        let last_closed = self.last_closed_period;
        let closed = records.into_iter().filter(|r| {
            let period = period_start(r.time, request.timeframe);
            last_closed.map_or(true, |last| r.time > last) && period < request.current_period
        });

        let appended = self.candles.append(closed.map(Candle::from));
        if let Some(newest) = appended.last() {
            self.last_closed_period = Some(newest.period_start);
        }

        debug!(
            timeframe = %request.timeframe,
            appended = appended.len(),
            last_closed = ?self.last_closed_period,
            "closed candles absorbed"
        );
        appended
    }

    /// Fetch and append any candles that closed since the last call.
    ///
    /// Fails with a configuration error if the configured timeframe is not
    /// supported.  A terminal that has no rates yet yields an empty result.
    pub fn maybe_fetch<F: Feed>(
        &mut self,
        session: &Session<F>,
        config: &StreamConfig,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let Some(timeframe) = configured_timeframe(config)? else {
            return Ok(Vec::new());
        };
        let Some(request) = self.plan(timeframe, now) else {
            return Ok(Vec::new());
        };
        let records = fetch_rates(session, &config.symbol, &request);
        Ok(self.absorb(&request, records))
    }
}

/// The aggregation timeframe, parsed on use.
pub fn configured_timeframe(config: &StreamConfig) -> Result<Option<Timeframe>> {
    config
        .bars_timeframe
        .as_deref()
        .map(str::parse::<Timeframe>)
        .transpose()
}

/// Issue `request` against the terminal.  A missing response means the
/// terminal has no history for the symbol yet and is treated as empty.
pub fn fetch_rates<F: Feed>(
    session: &Session<F>,
    symbol: &str,
    request: &RateRequest,
) -> Vec<RateRecord> {
    match session
        .feed()
        .fetch_completed_rates(symbol, request.timeframe, request.until, request.count)
    {
        Some(records) => records,
        None => {
            debug!(
                symbol = %symbol,
                timeframe = %request.timeframe,
                code = session.feed().last_error(),
                "no rates returned"
            );
            Vec::new()
        }
    }
}
