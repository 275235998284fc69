use serde::{Deserialize, Serialize};

use common::{Error, Result};

/// Parameters of the trend/pullback rule.
///
/// Example `config/strategy.toml`:
/// ```toml
/// entry_ema = 8
/// rsi_period = 14
/// rsi_entry = 50.0
/// confirm_ema_fast = 50
/// confirm_ema_slow = 200
/// exit_bars = 8
/// confirm_multiple = 3
/// ```
/// Any key left out takes its default.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StrategyParams {
    /// EMA period for pullback detection on the base timeframe.
    pub entry_ema: usize,
    /// RSI lookback in base-timeframe bars.
    pub rsi_period: usize,
    /// Minimum RSI for a long entry.
    pub rsi_entry: f64,
    /// Fast EMA period on the higher-timeframe closes.
    pub confirm_ema_fast: usize,
    /// Slow EMA period on the higher-timeframe closes.
    pub confirm_ema_slow: usize,
    /// Time-based exit, in base-timeframe bars.
    pub exit_bars: u32,
    /// Base-timeframe bars per higher-timeframe bar (5m -> 15m is 3).
    pub confirm_multiple: u64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            entry_ema: 8,
            rsi_period: 14,
            rsi_entry: 50.0,
            confirm_ema_fast: 50,
            confirm_ema_slow: 200,
            exit_bars: 8,
            confirm_multiple: 3,
        }
    }
}

impl StrategyParams {
    /// Load from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read strategy config at '{path}': {e}"))
        })?;
        Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("strategy config at '{path}': {e}")))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("invalid strategy TOML: {e}")))
    }

    /// Reject parameter sets the decision engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.entry_ema == 0 || self.rsi_period == 0 {
            return Err(Error::Config(
                "entry_ema and rsi_period must be greater than 0".into(),
            ));
        }
        if self.confirm_ema_fast == 0 || self.confirm_ema_fast >= self.confirm_ema_slow {
            return Err(Error::Config(
                "confirm_ema_fast must be greater than 0 and less than confirm_ema_slow".into(),
            ));
        }
        if self.exit_bars == 0 {
            return Err(Error::Config("exit_bars must be greater than 0".into()));
        }
        if self.confirm_multiple == 0 {
            return Err(Error::Config("confirm_multiple must be greater than 0".into()));
        }
        if !(0.0..=100.0).contains(&self.rsi_entry) {
            return Err(Error::Config(format!(
                "rsi_entry must lie in [0, 100], got {}",
                self.rsi_entry
            )));
        }
        Ok(())
    }

    /// Closes needed before entry conditions can be evaluated.
    pub fn min_entry_history(&self) -> usize {
        self.entry_ema.max(self.rsi_period) + 1
    }

    /// A candle window shorter than the entry history can never produce an
    /// entry, so it is rejected up front.
    pub fn check_lookback(&self, lookback: usize) -> Result<()> {
        if lookback < self.min_entry_history() {
            return Err(Error::Config(format!(
                "CANDLE_LOOKBACK {lookback} is shorter than the {} closes the entry rule needs",
                self.min_entry_history()
            )));
        }
        Ok(())
    }
}
