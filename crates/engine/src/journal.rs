use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use common::{Error, Result, TradeJournal, TradeRecord};

/// Appends completed trades to a CSV file, one row per trade.
///
/// The header is written when the file is first created.
pub struct CsvJournal {
    path: PathBuf,
}

impl CsvJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_row(&self, record: &TradeRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let exists = self.path.exists();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut wtr = csv::WriterBuilder::new()
            .has_headers(!exists)
            .from_writer(file);
        wtr.serialize(record)
            .map_err(|e| Error::Journal(format!("CSV write failed: {e}")))?;
        wtr.flush()?;
        Ok(())
    }
}

#[async_trait]
impl TradeJournal for CsvJournal {
    async fn append_trade(&self, record: &TradeRecord) -> Result<()> {
        self.write_row(record)?;
        debug!(trade_id = %record.trade_id, path = %self.path.display(), "Trade appended to CSV");
        Ok(())
    }
}

/// Stores completed trades in the `trades` table of a SQLite database.
pub struct SqliteJournal {
    db: SqlitePool,
}

impl SqliteJournal {
    /// Open (creating if needed) the database at `url` and apply migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::migrate!("../../migrations")
            .run(&db)
            .await
            .map_err(|e| Error::Journal(format!("journal migration failed: {e}")))?;
        info!(url, "SQLite trade journal ready");
        Ok(Self { db })
    }
}

#[async_trait]
impl TradeJournal for SqliteJournal {
    async fn append_trade(&self, record: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                trade_id, symbol, direction, entry_time, entry_price,
                exit_time, exit_price, quantity, bars_held, environment
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&record.trade_id)
        .bind(&record.symbol)
        .bind(record.direction.to_string())
        .bind(record.entry_time.to_rfc3339())
        .bind(record.entry_price)
        .bind(record.exit_time.to_rfc3339())
        .bind(record.exit_price)
        .bind(record.quantity)
        .bind(i64::from(record.bars_held))
        .bind(&record.environment)
        .execute(&self.db)
        .await?;

        debug!(trade_id = %record.trade_id, "Trade appended to SQLite");
        Ok(())
    }
}

/// Fans each record out to every configured journal.
///
/// All journals are attempted even if an earlier one fails; the failures are
/// reported together.
pub struct MultiJournal {
    journals: Vec<Box<dyn TradeJournal>>,
}

impl MultiJournal {
    pub fn new(journals: Vec<Box<dyn TradeJournal>>) -> Self {
        Self { journals }
    }
}

#[async_trait]
impl TradeJournal for MultiJournal {
    async fn append_trade(&self, record: &TradeRecord) -> Result<()> {
        let mut failures = Vec::new();
        for journal in &self.journals {
            if let Err(e) = journal.append_trade(record).await {
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Journal(failures.join("; ")))
        }
    }
}
