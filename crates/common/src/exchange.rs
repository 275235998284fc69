use async_trait::async_trait;

use crate::{Candle, Fill, Order, Result, TradeRecord};

/// Source of closed candles.
///
/// Implementations must return fully closed bars only, oldest first.
#[async_trait]
pub trait MarketDataClient: Send + Sync {
    async fn fetch_closed_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>>;
}

/// Abstraction over order execution.
///
/// `BinanceClient` implements this for live trading.
/// `PaperClient` implements this for dry runs.
///
/// Only `OrderExecutor` in `crates/engine` should call `submit_order`.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Submit a market order and return the fill confirmation.
    /// A rejected or unfilled order is an error, never an empty fill.
    async fn submit_order(&self, order: &Order) -> Result<Fill>;
}

/// Append-only store of completed trades.
#[async_trait]
pub trait TradeJournal: Send + Sync {
    /// Persist one completed trade. Errors are reported to the caller, which
    /// must treat them as non-fatal.
    async fn append_trade(&self, record: &TradeRecord) -> Result<()>;
}
