// =============================================================================
// tickstream — live tick and closed-candle streaming from a broker terminal
// =============================================================================

pub mod error;
pub mod execution;
pub mod feed;
pub mod market_data;
pub mod runtime_config;
pub mod stream;
pub mod types;

pub use error::{FeedErrorCode, Result, StreamError};
pub use execution::{OrderExecutor, Protection};
pub use feed::{ConnectionManager, Feed, PaperConfig, PaperFeed, Session, TradingFeed};
pub use market_data::{next_candle_time, Candle, Tick, Timeframe};
pub use runtime_config::{Credentials, StreamConfig};
pub use stream::{StreamEngine, StreamStats, TickCallback};
pub use types::EngineState;
