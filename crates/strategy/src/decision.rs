use serde::{Deserialize, Serialize};

use crate::config::StrategyParams;
use crate::indicators::{ema, rsi};
use crate::trend::{Trend, TrendTracker};

/// What the engine wants done on the bar it just saw.
///
/// Advisory only: the position loop owns the real position state and drops
/// intents that do not fit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    EnterLong,
    ExitLong,
    NoAction,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Intent::EnterLong => write!(f, "enter_long"),
            Intent::ExitLong => write!(f, "exit_long"),
            Intent::NoAction => write!(f, "no_action"),
        }
    }
}

/// Counters and trend state carried from one bar to the next.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionState {
    bar_index: u64,
    bars_in_trade: u32,
    trend: TrendTracker,
}

impl DecisionState {
    pub fn new(params: &StrategyParams) -> Self {
        Self {
            bar_index: 0,
            bars_in_trade: 0,
            trend: TrendTracker::new(params.confirm_ema_fast, params.confirm_ema_slow),
        }
    }

    /// Bars processed so far.
    pub fn bar_index(&self) -> u64 {
        self.bar_index
    }

    /// Bars counted since entry. Meaningful only while a position is open.
    pub fn bars_in_trade(&self) -> u32 {
        self.bars_in_trade
    }

    pub fn trend(&self) -> Trend {
        self.trend.trend()
    }

    /// Higher-timeframe closes retained by the trend tracker.
    pub fn trend_history_len(&self) -> usize {
        self.trend.len()
    }
}

/// Multi-timeframe trend/pullback rule with a fixed time exit.
///
/// Holds only the immutable parameters; all mutable state travels through
/// [`DecisionEngine::on_bar`] so the engine can be exercised in isolation.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    params: StrategyParams,
}

impl DecisionEngine {
    pub fn new(params: &StrategyParams) -> Self {
        Self {
            params: params.clone(),
        }
    }

    pub fn params(&self) -> &StrategyParams {
        &self.params
    }

    pub fn initial_state(&self) -> DecisionState {
        DecisionState::new(&self.params)
    }

    /// Process one closed base-timeframe bar.
    ///
    /// `opens` and `closes` are the retained history ending at the bar that
    /// just closed. Must be called exactly once per closed bar.
    pub fn on_bar(
        &self,
        mut state: DecisionState,
        opens: &[f64],
        closes: &[f64],
        position_open: bool,
    ) -> (DecisionState, Intent) {
        let intent = self.step(&mut state, opens, closes, position_open);
        (state, intent)
    }

    /// Same as [`DecisionEngine::on_bar`], updating a caller-held state in place.
    pub fn step(
        &self,
        state: &mut DecisionState,
        opens: &[f64],
        closes: &[f64],
        position_open: bool,
    ) -> Intent {
        state.bar_index += 1;

        if state.bar_index % self.params.confirm_multiple == 0 {
            if let Some(&last) = closes.last() {
                state.trend.update(last);
            }
        }

        // Time exit has absolute priority while positioned.
        if position_open {
            state.bars_in_trade += 1;
            if state.bars_in_trade >= self.params.exit_bars {
                state.bars_in_trade = 0;
                return Intent::ExitLong;
            }
            return Intent::NoAction;
        }

        if state.trend.trend() == Trend::Bearish {
            return Intent::NoAction;
        }

        if self.entry_conditions_met(opens, closes) {
            state.bars_in_trade = 0;
            return Intent::EnterLong;
        }

        Intent::NoAction
    }

    /// Pullback to the entry EMA, RSI at or above the floor, and a bullish
    /// body on the latest bar.
    fn entry_conditions_met(&self, opens: &[f64], closes: &[f64]) -> bool {
        let p = &self.params;
        if closes.len() < p.min_entry_history() {
            return false;
        }
        let (Some(&close), Some(&open)) = (closes.last(), opens.last()) else {
            return false;
        };

        let entry_ema = ema(&closes[closes.len() - p.entry_ema..], p.entry_ema);
        let rsi_val = rsi(&closes[closes.len() - (p.rsi_period + 1)..], p.rsi_period);

        match (entry_ema, rsi_val) {
            (Some(entry_ema), Some(rsi_val)) => {
                let pullback = close <= entry_ema;
                let momentum = rsi_val >= p.rsi_entry;
                let bullish_candle = close > open;
                pullback && momentum && bullish_candle
            }
            _ => false,
        }
    }
}
