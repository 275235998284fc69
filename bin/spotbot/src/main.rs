use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, ExchangeClient, ExecutionMode, MarketDataClient, TradeJournal};
use engine::{
    BinanceClient, CsvJournal, LoopSettings, MultiJournal, OrderExecutor, PositionLoop,
    SqliteJournal,
};
use paper::PaperClient;
use strategy::StrategyParams;

/// Quote assets recognised when deriving the base asset from a symbol.
const QUOTE_ASSETS: &[&str] = &[
    "FDUSD", "USDT", "USDC", "BUSD", "TUSD", "BTC", "ETH", "BNB", "EUR", "TRY",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Config (no network before this passes) ───────────────────────────────
    let cfg = Config::from_env().context("failed to load configuration")?;
    let level = cfg.log_level().context("invalid configuration")?;

    // ── Logging ──────────────────────────────────────────────────────────────
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    cfg.validate().context("invalid configuration")?;

    let params = match &cfg.strategy_config_path {
        Some(path) => StrategyParams::load(path)
            .with_context(|| format!("failed to load strategy config {path}"))?,
        None => StrategyParams::default(),
    };
    params.validate().context("invalid strategy parameters")?;
    params
        .check_lookback(cfg.candle_lookback)
        .context("invalid configuration")?;

    let mode = cfg.execution_mode();
    info!(
        symbol = %cfg.symbol,
        timeframe = %cfg.entry_timeframe,
        size = cfg.position_size,
        mode = %mode,
        "Spot bot starting"
    );

    // ── Journal ──────────────────────────────────────────────────────────────
    let mut journals: Vec<Box<dyn TradeJournal>> =
        vec![Box::new(CsvJournal::new(&cfg.trades_csv_path))];
    if let Some(url) = &cfg.journal_database_url {
        let sqlite = SqliteJournal::connect(url)
            .await
            .with_context(|| format!("failed to open journal database {url}"))?;
        journals.push(Box::new(sqlite));
    }
    info!(
        csv = %cfg.trades_csv_path,
        sqlite = cfg.journal_database_url.is_some(),
        "Trade journal ready"
    );

    // ── Clients ──────────────────────────────────────────────────────────────
    let (market, exchange): (Arc<dyn MarketDataClient>, Arc<dyn ExchangeClient>) = match mode {
        ExecutionMode::DryRun => {
            let feed: Arc<dyn MarketDataClient> = Arc::new(BinanceClient::market_data_only()?);
            let paper = Arc::new(PaperClient::new(feed, cfg.paper_slippage_bps));
            let market: Arc<dyn MarketDataClient> = paper.clone();
            let exchange: Arc<dyn ExchangeClient> = paper;
            (market, exchange)
        }
        ExecutionMode::Live(env) => {
            warn!(env = %env, "[LIVE] Real orders will be sent to Binance");
            let (key, secret) = cfg
                .binance_api_key
                .clone()
                .zip(cfg.binance_secret.clone())
                .context("Binance credentials missing")?;
            let client = Arc::new(BinanceClient::new(env, key, secret)?);
            check_existing_holdings(&client, &cfg).await;
            let market: Arc<dyn MarketDataClient> = client.clone();
            let exchange: Arc<dyn ExchangeClient> = client;
            (market, exchange)
        }
    };

    // ── Loop ─────────────────────────────────────────────────────────────────
    let executor = OrderExecutor::new(exchange, cfg.symbol.clone(), cfg.position_size, mode);
    let position_loop = PositionLoop::new(
        LoopSettings::from_config(&cfg),
        &params,
        market,
        executor,
        Box::new(MultiJournal::new(journals)),
    );

    position_loop
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("Shutdown complete");
    Ok(())
}

/// Warn if the account already holds the base asset. The loop never adopts
/// such a balance as an open position.
async fn check_existing_holdings(client: &BinanceClient, cfg: &Config) {
    let Some(asset) = base_asset(&cfg.symbol) else {
        warn!(symbol = %cfg.symbol, "Could not derive base asset; skipping holdings check");
        return;
    };
    match client.free_balance(asset).await {
        Ok(free) if free >= cfg.position_size => warn!(
            asset,
            free,
            size = cfg.position_size,
            "[ASSUMPTION] Existing balance found but the bot starts FLAT; it will not be sold"
        ),
        Ok(free) => info!(asset, free, "No pre-existing position detected"),
        Err(e) => warn!(asset, error = %e, "Could not query account balance"),
    }
}

fn base_asset(symbol: &str) -> Option<&str> {
    QUOTE_ASSETS
        .iter()
        .find_map(|quote| symbol.strip_suffix(quote))
        .filter(|base| !base.is_empty())
}
