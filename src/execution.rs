// =============================================================================
// Order Executor — market and pending orders over the shared terminal session
// =============================================================================
//
// Thin adapter: builds terminal order requests stamped with the executor's
// magic number, slippage allowance and comment, and hands them to the
// session.  No risk
// checks, no retries.  A request the terminal answers with a non-DONE retcode
// is returned as-is; only a missing answer or a missing quote is an error.
// =============================================================================

use tracing::{debug, info, warn};

use crate::error::{Result, StreamError};
use crate::feed::{
    FillPolicy, OrderRequest, OrderResult, PositionInfo, Session, TradeAction, TradingFeed,
};
use crate::types::{OrderKind, OrderSide};

/// Magic number stamped on every order so the terminal can attribute them.
pub const DEFAULT_MAGIC: u64 = 42;

/// Maximum slippage accepted on market orders, in points.
pub const DEFAULT_DEVIATION: u32 = 20;

/// Comment attached to orders unless overridden with `with_comment`.
pub const DEFAULT_COMMENT: &str = "tickstream";

/// Protective levels attached to an order.  `None` leaves a level unset.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Protection {
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

/// Places orders and inspects positions for one terminal session.
pub struct OrderExecutor<F: TradingFeed> {
    session: Session<F>,
    magic: u64,
    deviation: u32,
    comment: String,
}

impl<F: TradingFeed> OrderExecutor<F> {
    pub fn new(session: Session<F>) -> Self {
        Self {
            session,
            magic: DEFAULT_MAGIC,
            deviation: DEFAULT_DEVIATION,
            comment: DEFAULT_COMMENT.to_string(),
        }
    }

    pub fn with_magic(mut self, magic: u64) -> Self {
        self.magic = magic;
        self
    }

    pub fn with_deviation(mut self, deviation: u32) -> Self {
        self.deviation = deviation;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    // -------------------------------------------------------------------------
    // Market orders
    // -------------------------------------------------------------------------

    /// Buy `volume` lots at the current ask.
    pub fn market_buy(
        &self,
        symbol: &str,
        volume: f64,
        protection: Protection,
    ) -> Result<OrderResult> {
        self.market(symbol, OrderSide::Buy, volume, protection, None)
    }

    /// Sell `volume` lots at the current bid.
    pub fn market_sell(
        &self,
        symbol: &str,
        volume: f64,
        protection: Protection,
    ) -> Result<OrderResult> {
        self.market(symbol, OrderSide::Sell, volume, protection, None)
    }

    fn market(
        &self,
        symbol: &str,
        side: OrderSide,
        volume: f64,
        protection: Protection,
        closing: Option<u64>,
    ) -> Result<OrderResult> {
        let quote = self
            .session
            .feed()
            .current_tick(symbol)
            .ok_or_else(|| StreamError::order(format!("no quote available for {symbol}")))?;
        let price = match side {
            OrderSide::Buy => quote.ask,
            OrderSide::Sell => quote.bid,
        };

        let request = OrderRequest {
            action: TradeAction::Deal,
            symbol: symbol.to_string(),
            side,
            kind: OrderKind::Market,
            volume,
            price,
            deviation: self.deviation,
            sl: protection.stop_loss.unwrap_or(0.0),
            tp: protection.take_profit.unwrap_or(0.0),
            magic: self.magic,
            comment: self.comment.clone(),
            fill_policy: Some(FillPolicy::ImmediateOrCancel),
            position: closing,
        };
        self.send(request)
    }

    // -------------------------------------------------------------------------
    // Pending orders
    // -------------------------------------------------------------------------

    pub fn buy_limit(
        &self,
        symbol: &str,
        volume: f64,
        price: f64,
        protection: Protection,
    ) -> Result<OrderResult> {
        self.pending(symbol, OrderSide::Buy, OrderKind::Limit, volume, price, protection)
    }

    pub fn sell_limit(
        &self,
        symbol: &str,
        volume: f64,
        price: f64,
        protection: Protection,
    ) -> Result<OrderResult> {
        self.pending(symbol, OrderSide::Sell, OrderKind::Limit, volume, price, protection)
    }

    pub fn buy_stop(
        &self,
        symbol: &str,
        volume: f64,
        price: f64,
        protection: Protection,
    ) -> Result<OrderResult> {
        self.pending(symbol, OrderSide::Buy, OrderKind::Stop, volume, price, protection)
    }

    pub fn sell_stop(
        &self,
        symbol: &str,
        volume: f64,
        price: f64,
        protection: Protection,
    ) -> Result<OrderResult> {
        self.pending(symbol, OrderSide::Sell, OrderKind::Stop, volume, price, protection)
    }

    fn pending(
        &self,
        symbol: &str,
        side: OrderSide,
        kind: OrderKind,
        volume: f64,
        price: f64,
        protection: Protection,
    ) -> Result<OrderResult> {
        let request = OrderRequest {
            action: TradeAction::Pending,
            symbol: symbol.to_string(),
            side,
            kind,
            volume,
            price,
            deviation: 0,
            sl: protection.stop_loss.unwrap_or(0.0),
            tp: protection.take_profit.unwrap_or(0.0),
            magic: self.magic,
            comment: self.comment.clone(),
            fill_policy: None,
            position: None,
        };
        self.send(request)
    }

    // -------------------------------------------------------------------------
    // Positions
    // -------------------------------------------------------------------------

    /// Open positions, optionally narrowed to one symbol.
    pub fn positions(&self, symbol: Option<&str>) -> Result<Vec<PositionInfo>> {
        let feed = self.session.feed();
        feed.positions_get(symbol).ok_or_else(|| {
            StreamError::order(format!(
                "position query failed (code {})",
                feed.last_error()
            ))
        })
    }

    /// Flatten every open position with an opposite market deal that keeps
    /// the position's own SL/TP.  Returns how many closed with a DONE
    /// retcode; individual failures are logged and skipped.
    pub fn close_all(&self, symbol: Option<&str>) -> Result<usize> {
        let positions = self.positions(symbol)?;
        let mut closed = 0;

        for position in &positions {
            let protection = Protection {
                stop_loss: Some(position.sl),
                take_profit: Some(position.tp),
            };
            match self.market(
                &position.symbol,
                position.side.opposite(),
                position.volume,
                protection,
                Some(position.ticket),
            ) {
                Ok(result) if result.is_done() => closed += 1,
                Ok(result) => warn!(
                    ticket = position.ticket,
                    retcode = result.retcode,
                    comment = %result.comment,
                    "close rejected"
                ),
                Err(e) => warn!(ticket = position.ticket, error = %e, "close failed"),
            }
        }

        info!(requested = positions.len(), closed, "close_all finished");
        Ok(closed)
    }

    fn send(&self, request: OrderRequest) -> Result<OrderResult> {
        debug!(
            symbol = %request.symbol,
            side = %request.side,
            kind = %request.kind,
            volume = request.volume,
            price = request.price,
            "sending order"
        );

        let feed = self.session.feed();
        let result = feed.order_send(&request).ok_or_else(|| {
            StreamError::order(format!(
                "terminal returned no result for {} {} {} (code {})",
                request.side,
                request.kind,
                request.symbol,
                feed.last_error()
            ))
        })?;

        if result.is_done() {
            info!(
                symbol = %request.symbol,
                side = %request.side,
                volume = result.volume,
                price = result.price,
                deal = result.deal,
                "order filled"
            );
        } else {
            debug!(retcode = result.retcode, comment = %result.comment, "order not filled");
        }
        Ok(result)
    }
}

impl<F: TradingFeed> std::fmt::Debug for OrderExecutor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderExecutor")
            .field("magic", &self.magic)
            .field("deviation", &self.deviation)
            .field("comment", &self.comment)
            .finish()
    }
}
