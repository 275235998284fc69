pub mod config;
pub mod decision;
pub mod indicators;
pub mod trend;

pub use config::StrategyParams;
pub use decision::{DecisionEngine, DecisionState, Intent};
pub use trend::{Trend, TrendTracker};
