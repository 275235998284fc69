pub mod binance;
pub mod executor;
pub mod journal;
pub mod lifecycle;

pub use binance::BinanceClient;
pub use executor::OrderExecutor;
pub use journal::{CsvJournal, MultiJournal, SqliteJournal};
pub use lifecycle::{Action, LoopSettings, PositionLoop, TickOutcome};
