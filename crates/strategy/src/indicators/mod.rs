//! Stateless indicator functions. Callers own the windowing.

pub mod ema;
pub mod rsi;

pub use ema::ema;
pub use rsi::rsi;
