use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A fully closed OHLCV bar. Values are final once the bar is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    /// Unique per feed and strictly increasing across accepted candles.
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// A market order to be submitted to the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Client order id, forwarded to the exchange.
    pub id: String,
    pub pair: String,
    pub side: OrderSide,
    pub quantity: f64,
}

impl Order {
    pub fn market(pair: impl Into<String>, side: OrderSide, quantity: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            pair: pair.into(),
            side,
            quantity,
        }
    }
}

/// Confirmation of a filled order returned by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub pair: String,
    pub side: OrderSide,
    /// Quantity-weighted average execution price.
    pub fill_price: f64,
    /// Executed quantity. Always > 0 for a fill accepted by the executor.
    pub quantity: f64,
    pub timestamp: DateTime<Utc>,
}

/// Whether the loop currently holds the single allowed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionState {
    #[default]
    Flat,
    Open,
}

impl PositionState {
    pub fn is_open(self) -> bool {
        self == PositionState::Open
    }
}

impl std::fmt::Display for PositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionState::Flat => write!(f, "FLAT"),
            PositionState::Open => write!(f, "OPEN"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
        }
    }
}

/// Binance Spot environment that receives orders when not in dry-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BinanceEnv {
    SpotTestnet,
    SpotMainnet,
}

impl BinanceEnv {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "SPOT_TESTNET" => Some(BinanceEnv::SpotTestnet),
            "SPOT_MAINNET" => Some(BinanceEnv::SpotMainnet),
            _ => None,
        }
    }
}

impl std::fmt::Display for BinanceEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinanceEnv::SpotTestnet => write!(f, "SPOT_TESTNET"),
            BinanceEnv::SpotMainnet => write!(f, "SPOT_MAINNET"),
        }
    }
}

/// How orders are executed for this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Real market data, simulated fills. Nothing is sent to the exchange.
    DryRun,
    Live(BinanceEnv),
}

impl ExecutionMode {
    /// Label written into every journaled trade.
    pub fn label(&self) -> String {
        match self {
            ExecutionMode::DryRun => "DRY_RUN".to_string(),
            ExecutionMode::Live(env) => env.to_string(),
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A completed round trip. Only ever built once both legs have filled, so a
/// journal never sees a half-populated trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub quantity: f64,
    pub bars_held: u32,
    pub environment: String,
}

/// The entry leg of a trade that is still open.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenTrade {
    pub trade_id: String,
    pub symbol: String,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub quantity: f64,
}

impl OpenTrade {
    /// Close the trade with its exit leg, producing the journal record.
    pub fn complete(
        self,
        exit_time: DateTime<Utc>,
        exit_price: f64,
        bars_held: u32,
        environment: impl Into<String>,
    ) -> TradeRecord {
        TradeRecord {
            trade_id: self.trade_id,
            symbol: self.symbol,
            direction: Direction::Long,
            entry_time: self.entry_time,
            entry_price: self.entry_price,
            exit_time,
            exit_price,
            quantity: self.quantity,
            bars_held,
            environment: environment.into(),
        }
    }
}

/// Deterministic trade id: `T001`, `T002`, ...
pub fn format_trade_id(seq: u64) -> String {
    format!("T{seq:03}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn trade_ids_are_zero_padded() {
        assert_eq!(format_trade_id(1), "T001");
        assert_eq!(format_trade_id(42), "T042");
        assert_eq!(format_trade_id(1234), "T1234");
    }

    #[test]
    fn execution_mode_labels() {
        assert_eq!(ExecutionMode::DryRun.label(), "DRY_RUN");
        assert_eq!(
            ExecutionMode::Live(BinanceEnv::SpotTestnet).label(),
            "SPOT_TESTNET"
        );
        assert_eq!(
            ExecutionMode::Live(BinanceEnv::SpotMainnet).label(),
            "SPOT_MAINNET"
        );
    }

    #[test]
    fn completing_open_trade_fills_exit_fields() {
        let entry = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let exit = Utc.timestamp_millis_opt(1_700_002_400_000).unwrap();
        let open = OpenTrade {
            trade_id: format_trade_id(3),
            symbol: "ETHUSDT".into(),
            entry_time: entry,
            entry_price: 2000.0,
            quantity: 0.5,
        };

        let record = open.complete(exit, 2010.0, 8, "DRY_RUN");
        assert_eq!(record.trade_id, "T003");
        assert_eq!(record.direction, Direction::Long);
        assert_eq!(record.exit_time, exit);
        assert_eq!(record.exit_price, 2010.0);
        assert_eq!(record.bars_held, 8);
        assert_eq!(record.environment, "DRY_RUN");
    }

    #[test]
    fn binance_env_parses_case_insensitively() {
        assert_eq!(BinanceEnv::parse("spot_mainnet"), Some(BinanceEnv::SpotMainnet));
        assert_eq!(BinanceEnv::parse(" SPOT_TESTNET "), Some(BinanceEnv::SpotTestnet));
        assert_eq!(BinanceEnv::parse("FUTURES"), None);
    }
}
