use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use common::{Candle, Error, ExchangeClient, Fill, MarketDataClient, Order, OrderSide, Result};

/// Simulated exchange client for dry runs.
///
/// Market data is passed through from a real feed; the close of the newest
/// candle seen becomes the simulated fill price, adjusted by slippage.
/// No order ever leaves the process.
pub struct PaperClient {
    feed: Arc<dyn MarketDataClient>,
    /// Latest observed close, updated on every fetch.
    last_price: RwLock<Option<f64>>,
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
}

impl PaperClient {
    pub fn new(feed: Arc<dyn MarketDataClient>, slippage_bps: f64) -> Self {
        info!(slippage_bps, "PaperClient initialized");
        warn!("[DRY_RUN] Orders will NOT be sent to Binance");
        Self {
            feed,
            last_price: RwLock::new(None),
            slippage_bps,
        }
    }

    /// Latest price the simulator would fill at before slippage.
    pub async fn last_price(&self) -> Option<f64> {
        *self.last_price.read().await
    }
}

#[async_trait]
impl MarketDataClient for PaperClient {
    async fn fetch_closed_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let candles = self.feed.fetch_closed_candles(symbol, interval, limit).await?;
        if let Some(last) = candles.last() {
            *self.last_price.write().await = Some(last.close);
        }
        Ok(candles)
    }
}

#[async_trait]
impl ExchangeClient for PaperClient {
    async fn submit_order(&self, order: &Order) -> Result<Fill> {
        let mid_price = self.last_price().await.ok_or_else(|| {
            Error::OrderFailed(format!(
                "PaperClient has no price for '{}'; no candles fetched yet",
                order.pair
            ))
        })?;

        // Buys pay more, sells receive less
        let fill_price = match order.side {
            OrderSide::Buy => mid_price * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => mid_price * (1.0 - self.slippage_bps / 10_000.0),
        };

        debug!(
            pair = %order.pair,
            side = %order.side,
            mid = mid_price,
            fill = fill_price,
            qty = order.quantity,
            "Paper fill simulated"
        );

        Ok(Fill {
            order_id: order.id.clone(),
            pair: order.pair.clone(),
            side: order.side,
            fill_price,
            quantity: order.quantity,
            timestamp: Utc::now(),
        })
    }
}
