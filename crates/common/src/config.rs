use std::time::Duration;

use tracing::level_filters::LevelFilter;

use crate::{BinanceEnv, Error, ExecutionMode, Result};

/// Binance Spot kline intervals accepted as the base timeframe.
pub const VALID_SPOT_TIMEFRAMES: &[&str] = &[
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "12h", "1d",
];

/// Binance serves at most 1000 klines per request and one extra row is
/// fetched to drop the forming bar.
pub const MAX_CANDLE_LOOKBACK: usize = 999;

/// All runtime configuration, loaded from environment variables at startup.
///
/// Built once and passed by reference; nothing reads the environment after
/// `from_env` returns.
#[derive(Debug, Clone)]
pub struct Config {
    // Safety switches
    pub enable_live_trading: bool,
    pub dry_run: bool,

    // Instrument
    pub symbol: String,
    pub entry_timeframe: String,
    /// Fixed base-asset quantity bought and sold on every trade.
    pub position_size: f64,

    // Exchange
    pub binance_env: BinanceEnv,
    pub binance_api_key: Option<String>,
    pub binance_secret: Option<String>,

    // Loop
    pub poll_interval: Duration,
    pub candle_lookback: usize,
    pub paper_slippage_bps: f64,

    // Journal
    pub trades_csv_path: String,
    pub journal_database_url: Option<String>,

    // Strategy parameter file (TOML). Defaults apply when unset.
    pub strategy_config_path: Option<String>,

    /// Raw `LOG_LEVEL`; see [`Config::log_level`].
    pub log_level: String,
}

impl Config {
    /// Load configuration from the process environment.
    /// Loads `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Parse failures are reported as
    /// `Error::Config`; semantic checks live in [`Config::validate`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let symbol = get("SYMBOL")
            .unwrap_or_else(|| "BTCUSDT".to_string())
            .to_uppercase();

        let binance_env = match get("BINANCE_ENV") {
            Some(raw) => BinanceEnv::parse(&raw).ok_or_else(|| {
                Error::Config(format!(
                    "invalid BINANCE_ENV '{raw}', valid values: SPOT_TESTNET, SPOT_MAINNET"
                ))
            })?,
            None => BinanceEnv::SpotTestnet,
        };

        let trades_csv_path = get("TRADES_CSV_PATH")
            .unwrap_or_else(|| format!("data/live_trades_{symbol}.csv"));

        Ok(Config {
            enable_live_trading: parse_bool(&get, "ENABLE_LIVE_TRADING", false)?,
            dry_run: parse_bool(&get, "DRY_RUN", true)?,
            entry_timeframe: get("ENTRY_TIMEFRAME").unwrap_or_else(|| "5m".to_string()),
            position_size: parse_num(&get, "POSITION_SIZE", 0.02)?,
            binance_env,
            binance_api_key: get("BINANCE_API_KEY"),
            binance_secret: get("BINANCE_SECRET"),
            poll_interval: Duration::from_secs(parse_num(&get, "POLL_INTERVAL_SECS", 30)?),
            candle_lookback: parse_num(&get, "CANDLE_LOOKBACK", 200)?,
            paper_slippage_bps: parse_num(&get, "PAPER_SLIPPAGE_BPS", 0.0)?,
            trades_csv_path,
            journal_database_url: get("JOURNAL_DATABASE_URL"),
            strategy_config_path: get("STRATEGY_CONFIG_PATH"),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "INFO".to_string()),
            symbol,
        })
    }

    /// Fail-fast checks. Must pass before any client is built or any
    /// network call is made.
    pub fn validate(&self) -> Result<()> {
        if !self.enable_live_trading && !self.dry_run {
            return Err(Error::Config(
                "ENABLE_LIVE_TRADING and DRY_RUN are both false; enable DRY_RUN for safe \
                 testing or set ENABLE_LIVE_TRADING=true for real execution"
                    .into(),
            ));
        }

        if self.symbol.is_empty() || !self.symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Config(format!(
                "SYMBOL must be a non-empty alphanumeric pair such as ETHUSDT, got '{}'",
                self.symbol
            )));
        }

        if !VALID_SPOT_TIMEFRAMES.contains(&self.entry_timeframe.as_str()) {
            return Err(Error::Config(format!(
                "invalid ENTRY_TIMEFRAME '{}', valid values: {}",
                self.entry_timeframe,
                VALID_SPOT_TIMEFRAMES.join(", ")
            )));
        }

        if !(self.position_size.is_finite() && self.position_size > 0.0) {
            return Err(Error::Config(
                "POSITION_SIZE must be greater than 0; use a very small value when testing".into(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(Error::Config("POLL_INTERVAL_SECS must be greater than 0".into()));
        }

        if !(2..=MAX_CANDLE_LOOKBACK).contains(&self.candle_lookback) {
            return Err(Error::Config(format!(
                "CANDLE_LOOKBACK must be between 2 and {MAX_CANDLE_LOOKBACK}, got {}",
                self.candle_lookback
            )));
        }

        // 10000 bps would fill paper sells at zero.
        if !(self.paper_slippage_bps.is_finite()
            && (0.0..10_000.0).contains(&self.paper_slippage_bps))
        {
            return Err(Error::Config(format!(
                "PAPER_SLIPPAGE_BPS must be >= 0 and < 10000, got {}",
                self.paper_slippage_bps
            )));
        }

        self.log_level()?;

        if !self.dry_run && (self.binance_api_key.is_none() || self.binance_secret.is_none()) {
            return Err(Error::Config(format!(
                "BINANCE_API_KEY and BINANCE_SECRET are required for {} execution",
                self.binance_env
            )));
        }

        Ok(())
    }

    /// Level for the log filter when `RUST_LOG` is not set.
    ///
    /// Accepts DEBUG, INFO, WARN, WARNING and ERROR in any case.
    pub fn log_level(&self) -> Result<LevelFilter> {
        match self.log_level.to_uppercase().as_str() {
            "DEBUG" => Ok(LevelFilter::DEBUG),
            "INFO" => Ok(LevelFilter::INFO),
            "WARN" | "WARNING" => Ok(LevelFilter::WARN),
            "ERROR" => Ok(LevelFilter::ERROR),
            _ => Err(Error::Config(format!(
                "invalid LOG_LEVEL '{}', valid values: DEBUG, INFO, WARNING, ERROR",
                self.log_level
            ))),
        }
    }

    /// DRY_RUN overrides live execution.
    pub fn execution_mode(&self) -> ExecutionMode {
        if self.dry_run {
            ExecutionMode::DryRun
        } else {
            ExecutionMode::Live(self.binance_env)
        }
    }
}

fn parse_bool<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(Error::Config(format!("{key} must be a boolean, got '{raw}'"))),
        },
    }
}

fn parse_num<G, T>(get: &G, key: &str, default: T) -> Result<T>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("{key} is not a valid number: '{raw}'"))),
    }
}
