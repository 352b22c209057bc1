// =============================================================================
// tickstream — Driver
// =============================================================================
//
// Runs a stream engine against the in-process paper terminal and logs a
// snapshot summary every few seconds until Ctrl+C.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use tickstream::{
    next_candle_time, PaperConfig, PaperFeed, StreamConfig, StreamEngine, Tick, Timeframe,
};

const CONFIG_PATH: &str = "tickstream.json";
const SUMMARY_EVERY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = StreamConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        StreamConfig::default()
    });

    if let Ok(symbol) = std::env::var("TICKSTREAM_SYMBOL") {
        let symbol = symbol.trim().to_uppercase();
        if !symbol.is_empty() {
            config.symbol = symbol;
        }
    }
    if let Ok(timeframe) = std::env::var("TICKSTREAM_TIMEFRAME") {
        let timeframe = timeframe.trim().to_string();
        config.bars_timeframe = (!timeframe.is_empty()).then_some(timeframe);
    }
    if let Ok(ms) = std::env::var("TICKSTREAM_POLL_MS") {
        match ms.trim().parse::<u64>() {
            Ok(ms) if ms > 0 => config.poll_interval_ms = ms,
            _ => warn!(value = %ms, "ignoring invalid TICKSTREAM_POLL_MS"),
        }
    }

    info!(
        symbol = %config.symbol,
        timeframe = ?config.bars_timeframe,
        poll_interval_ms = config.poll_interval_ms,
        rolling_ticks = config.rolling_ticks,
        rolling_bars = config.rolling_bars,
        "tickstream starting"
    );

    // ── 2. Paper terminal + engine ───────────────────────────────────────
    let feed = Arc::new(PaperFeed::new(PaperConfig {
        symbol: config.symbol.clone(),
        ..PaperConfig::default()
    }));
    let timeframe = config
        .bars_timeframe
        .as_deref()
        .and_then(|tf| tf.parse::<Timeframe>().ok());

    let mut engine = StreamEngine::new(feed, config);
    engine
        .start(Some(Box::new(|ticks: &[Tick]| {
            if let Some(last) = ticks.last() {
                debug!(count = ticks.len(), bid = last.bid, ask = last.ask, "new ticks");
            }
        })))
        .await?;

    // ── 3. Summary loop until Ctrl+C ─────────────────────────────────────
    let mut interval = tokio::time::interval(SUMMARY_EVERY);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let ticks = engine.ticks();
                let candles = engine.candles();
                let latest = ticks.last();
                info!(
                    state = %engine.state(),
                    ticks = ticks.len(),
                    candles = candles.len(),
                    bid = latest.map(|t| t.bid),
                    ask = latest.map(|t| t.ask),
                    last_close = candles.last().map(|c| c.close),
                    next_candle = ?timeframe.map(|tf| next_candle_time(Utc::now(), tf)),
                    stats = ?engine.stats(),
                    "stream summary"
                );
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    // ── 4. Graceful shutdown ─────────────────────────────────────────────
    warn!("Shutdown signal received — stopping gracefully");
    engine.stop().await;
    info!("tickstream shut down complete.");
    Ok(())
}
