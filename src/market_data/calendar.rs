// =============================================================================
// Period Calendar — fixed-interval boundaries anchored at UTC midnight
// =============================================================================
//
// Every supported timeframe divides a UTC day evenly, so truncating the epoch
// offset by the timeframe length lands exactly on minute / 5-minute /
// 15-minute / top-of-hour / midnight boundaries.
// =============================================================================

use std::str::FromStr;

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Candle timeframes understood by the aggregator and the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 5] = [Self::M1, Self::M5, Self::M15, Self::H1, Self::D1];

    /// Length of one period in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Self::M1 => 60,
            Self::M5 => 5 * 60,
            Self::M15 => 15 * 60,
            Self::H1 => 60 * 60,
            Self::D1 => 24 * 60 * 60,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.seconds())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "M1",
            Self::M5 => "M5",
            Self::M15 => "M15",
            Self::H1 => "H1",
            Self::D1 => "D1",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "M1" => Ok(Self::M1),
            "M5" => Ok(Self::M5),
            "M15" => Ok(Self::M15),
            "H1" => Ok(Self::H1),
            "D1" => Ok(Self::D1),
            _ => Err(StreamError::configuration(format!(
                "unsupported timeframe: {s}"
            ))),
        }
    }
}

/// Start of the period of `timeframe` that contains `instant`.
pub fn period_start(instant: DateTime<Utc>, timeframe: Timeframe) -> DateTime<Utc> {
    let into_period = instant.timestamp().rem_euclid(timeframe.seconds());
    instant
        - Duration::seconds(into_period)
        - Duration::nanoseconds(i64::from(instant.nanosecond()))
}

/// First boundary strictly after `instant`.
pub fn next_boundary(instant: DateTime<Utc>, timeframe: Timeframe) -> DateTime<Utc> {
    period_start(instant, timeframe) + timeframe.duration()
}

/// When the candle forming at `instant` closes.  Strategies use this to sleep
/// until the next closed candle is available.
pub fn next_candle_time(instant: DateTime<Utc>, timeframe: Timeframe) -> DateTime<Utc> {
    next_boundary(instant, timeframe)
}
