pub mod aggregator;
pub mod calendar;
pub mod candle_buffer;
pub mod tick_buffer;

// Re-export the buffer types for convenient access (e.g. `use crate::market_data::Tick`).
pub use aggregator::{CandleAggregator, RateRequest};
pub use calendar::{next_boundary, next_candle_time, period_start, Timeframe};
pub use candle_buffer::{Candle, CandleBuffer};
pub use tick_buffer::{Tick, TickBuffer};
