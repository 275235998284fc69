use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::indicators::ema;

/// Higher-timeframe directional bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// Not enough higher-timeframe closes yet. Never blocks entries.
    #[default]
    Unknown,
    Bullish,
    Bearish,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Unknown => write!(f, "unknown"),
            Trend::Bullish => write!(f, "bullish"),
            Trend::Bearish => write!(f, "bearish"),
        }
    }
}

/// Fast/slow EMA comparison over synthetic higher-timeframe closes.
///
/// The owner feeds one close every N base bars; the tracker never looks at
/// wall-clock boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendTracker {
    fast_period: usize,
    slow_period: usize,
    /// Only the trailing `slow_period` closes are ever read, so older ones
    /// are dropped.
    closes: VecDeque<f64>,
    trend: Trend,
}

impl TrendTracker {
    pub fn new(fast_period: usize, slow_period: usize) -> Self {
        Self {
            fast_period,
            slow_period,
            closes: VecDeque::with_capacity(slow_period + 1),
            trend: Trend::Unknown,
        }
    }

    /// Append one higher-timeframe close and recompute the trend.
    pub fn update(&mut self, latest_close: f64) -> Trend {
        self.closes.push_back(latest_close);
        while self.closes.len() > self.slow_period.max(self.fast_period) {
            self.closes.pop_front();
        }

        if self.closes.len() < self.slow_period {
            self.trend = Trend::Unknown;
            return self.trend;
        }

        let history = self.closes.make_contiguous();
        let n = history.len();
        let fast = ema(&history[n.saturating_sub(self.fast_period)..], self.fast_period);
        let slow = ema(&history[n.saturating_sub(self.slow_period)..], self.slow_period);

        self.trend = match (fast, slow) {
            (Some(f), Some(s)) if f > s => Trend::Bullish,
            (Some(_), Some(_)) => Trend::Bearish,
            _ => Trend::Unknown,
        };
        self.trend
    }

    pub fn trend(&self) -> Trend {
        self.trend
    }

    /// Number of retained higher-timeframe closes.
    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }
}
