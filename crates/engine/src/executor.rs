use std::sync::Arc;

use tracing::{error, info};

use common::{Error, ExchangeClient, ExecutionMode, Fill, Order, OrderSide, Result};

/// Turns a side and the fixed position size into a market order and
/// validates the fill that comes back.
///
/// This is the ONLY component that calls `ExchangeClient::submit_order`.
pub struct OrderExecutor {
    client: Arc<dyn ExchangeClient>,
    symbol: String,
    quantity: f64,
    mode: ExecutionMode,
}

impl OrderExecutor {
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        symbol: impl Into<String>,
        quantity: f64,
        mode: ExecutionMode,
    ) -> Self {
        Self {
            client,
            symbol: symbol.into(),
            quantity,
            mode,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Submit one market order. Any failure, including a fill without
    /// executed quantity, is returned as an error and must stop the loop.
    pub async fn execute(&self, side: OrderSide) -> Result<Fill> {
        let order = Order::market(self.symbol.clone(), side, self.quantity);
        info!(pair = %order.pair, side = %order.side, qty = order.quantity, mode = %self.mode, "Executing order");

        let fill = match self.client.submit_order(&order).await {
            Ok(fill) => fill,
            Err(e) => {
                error!(pair = %order.pair, side = %order.side, error = %e, "Order submission failed");
                return Err(e);
            }
        };

        if !(fill.quantity.is_finite() && fill.quantity > 0.0) {
            error!(pair = %order.pair, side = %order.side, qty = fill.quantity, "Fill has no executed quantity");
            return Err(Error::OrderFailed(format!(
                "{side} {} filled with no executed quantity",
                order.pair
            )));
        }
        if !(fill.fill_price.is_finite() && fill.fill_price > 0.0) {
            error!(pair = %order.pair, side = %order.side, price = fill.fill_price, "Fill has no usable price");
            return Err(Error::OrderFailed(format!(
                "{side} {} filled without a usable price",
                order.pair
            )));
        }

        info!(
            pair = %fill.pair,
            side = %fill.side,
            price = fill.fill_price,
            qty = fill.quantity,
            "Order filled"
        );
        Ok(fill)
    }
}
