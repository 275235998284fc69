use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use common::{
    format_trade_id, Candle, Config, MarketDataClient, OpenTrade, OrderSide, PositionState,
    Result, TradeJournal, TradeRecord,
};
use strategy::{DecisionEngine, DecisionState, Intent, StrategyParams};

use crate::executor::OrderExecutor;

/// Loop settings taken from [`Config`].
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub symbol: String,
    pub interval: String,
    pub lookback: usize,
    pub poll_interval: Duration,
}

impl LoopSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            symbol: cfg.symbol.clone(),
            interval: cfg.entry_timeframe.clone(),
            lookback: cfg.candle_lookback,
            poll_interval: cfg.poll_interval,
        }
    }
}

/// What one poll produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Empty batch, or the newest candle was already processed.
    NoNewBar,
    Bar {
        close_time: DateTime<Utc>,
        intent: Intent,
        action: Action,
    },
}

/// What the loop did with the engine's intent.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Opened { trade_id: String, price: f64 },
    Closed(TradeRecord),
    /// Intent did not fit the current position and was dropped.
    Ignored,
    None,
}

/// Drives one symbol: fetch closed candles, deduplicate by close time, ask
/// the decision engine, and turn its intent into FLAT/OPEN transitions.
///
/// All state is owned here and mutated only from `tick`, which is never
/// called concurrently.
pub struct PositionLoop {
    settings: LoopSettings,
    market: Arc<dyn MarketDataClient>,
    executor: OrderExecutor,
    journal: Box<dyn TradeJournal>,
    engine: DecisionEngine,
    decision: DecisionState,
    position: PositionState,
    /// Close time of the newest processed candle.
    watermark: Option<DateTime<Utc>>,
    bars_in_trade: u32,
    trade_seq: u64,
    open_trade: Option<OpenTrade>,
}

impl PositionLoop {
    pub fn new(
        settings: LoopSettings,
        params: &StrategyParams,
        market: Arc<dyn MarketDataClient>,
        executor: OrderExecutor,
        journal: Box<dyn TradeJournal>,
    ) -> Self {
        let engine = DecisionEngine::new(params);
        let decision = engine.initial_state();
        Self {
            settings,
            market,
            executor,
            journal,
            engine,
            decision,
            position: PositionState::Flat,
            watermark: None,
            bars_in_trade: 0,
            trade_seq: 0,
            open_trade: None,
        }
    }

    pub fn position(&self) -> PositionState {
        self.position
    }

    pub fn decision_state(&self) -> &DecisionState {
        &self.decision
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }

    pub fn bars_in_trade(&self) -> u32 {
        self.bars_in_trade
    }

    pub fn open_trade(&self) -> Option<&OpenTrade> {
        self.open_trade.as_ref()
    }

    /// Run one polling cycle. Fetch and order errors are returned and must
    /// end the run; the position is left exactly as it was before the error.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        let candles = self
            .market
            .fetch_closed_candles(
                &self.settings.symbol,
                &self.settings.interval,
                self.settings.lookback,
            )
            .await?;

        let Some(latest) = candles.last().cloned() else {
            debug!(symbol = %self.settings.symbol, "Empty candle batch");
            return Ok(TickOutcome::NoNewBar);
        };

        if let Some(seen) = self.watermark {
            if latest.close_time == seen {
                return Ok(TickOutcome::NoNewBar);
            }
            if latest.close_time < seen {
                warn!(
                    close_time = %latest.close_time,
                    watermark = %seen,
                    "Feed returned an older candle than already processed, skipping"
                );
                return Ok(TickOutcome::NoNewBar);
            }
        }
        self.watermark = Some(latest.close_time);

        info!(close_time = %latest.close_time, close = latest.close, "[CANDLE]");

        let (opens, closes): (Vec<f64>, Vec<f64>) =
            candles.iter().map(|c| (c.open, c.close)).unzip();

        let intent = self
            .engine
            .step(&mut self.decision, &opens, &closes, self.position.is_open());

        info!(
            intent = %intent,
            position = %self.position,
            trend = %self.decision.trend(),
            bar = self.decision.bar_index(),
            "[DECISION]"
        );

        let action = self.apply(intent, &latest).await?;

        if self.position.is_open() {
            self.bars_in_trade += 1;
        }

        Ok(TickOutcome::Bar {
            close_time: latest.close_time,
            intent,
            action,
        })
    }

    async fn apply(&mut self, intent: Intent, candle: &Candle) -> Result<Action> {
        match (intent, self.position) {
            (Intent::EnterLong, PositionState::Flat) => self.open(candle).await,
            (Intent::ExitLong, PositionState::Open) => self.close(candle).await,
            (Intent::NoAction, _) => Ok(Action::None),
            // The engine itself never produces these pairs; kept as a guard.
            (intent, position) => {
                debug!(%intent, %position, "Intent inconsistent with position, ignored");
                Ok(Action::Ignored)
            }
        }
    }

    async fn open(&mut self, candle: &Candle) -> Result<Action> {
        info!("[SIGNAL] BUY");
        let fill = self.executor.execute(OrderSide::Buy).await?;

        self.position = PositionState::Open;
        self.bars_in_trade = 0;
        self.trade_seq += 1;

        let trade_id = format_trade_id(self.trade_seq);
        self.open_trade = Some(OpenTrade {
            trade_id: trade_id.clone(),
            symbol: self.settings.symbol.clone(),
            entry_time: candle.close_time,
            entry_price: fill.fill_price,
            quantity: fill.quantity,
        });

        info!(
            trade_id = %trade_id,
            price = fill.fill_price,
            qty = fill.quantity,
            "Position opened"
        );
        Ok(Action::Opened {
            trade_id,
            price: fill.fill_price,
        })
    }

    async fn close(&mut self, candle: &Candle) -> Result<Action> {
        info!("[SIGNAL] SELL");
        let fill = self.executor.execute(OrderSide::Sell).await?;

        self.position = PositionState::Flat;
        let bars_held = std::mem::take(&mut self.bars_in_trade);

        let Some(open) = self.open_trade.take() else {
            // Unreachable while OPEN is only entered through `open`.
            warn!("Position closed without an entry record; nothing journaled");
            return Ok(Action::None);
        };

        let record = open.complete(
            candle.close_time,
            fill.fill_price,
            bars_held,
            self.executor.mode().label(),
        );

        info!(
            trade_id = %record.trade_id,
            entry = record.entry_price,
            exit = record.exit_price,
            bars_held = record.bars_held,
            "Position closed"
        );

        if let Err(e) = self.journal.append_trade(&record).await {
            error!(trade_id = %record.trade_id, error = %e, "Failed to persist trade");
        }

        Ok(Action::Closed(record))
    }

    /// Poll until `shutdown` resolves or a fatal error occurs.
    ///
    /// Shutdown is only observed between ticks, so an in-flight order always
    /// completes before the loop exits.
    pub async fn run<S>(mut self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        info!(
            symbol = %self.settings.symbol,
            timeframe = %self.settings.interval,
            poll_secs = self.settings.poll_interval.as_secs(),
            "Execution loop started"
        );
        warn!("[ASSUMPTION] Loop starts FLAT; exchange-side holdings are not adopted");

        tokio::pin!(shutdown);

        loop {
            if let Err(e) = self.tick().await {
                error!(error = %e, position = %self.position, "Fatal error in execution loop");
                if self.position.is_open() {
                    warn!("A position is open and remains open on the exchange");
                }
                return Err(e);
            }

            tokio::select! {
                _ = &mut shutdown => {
                    warn!("Execution interrupted by shutdown signal");
                    if self.position.is_open() {
                        warn!("A position is open and remains open on the exchange");
                    }
                    return Ok(());
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use common::{Error, ExchangeClient, ExecutionMode, Fill, Order};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    // ─── Mock collaborators ──────────────────────────────────────────────────

    /// Serves a growing window over a scripted series. `advance` exposes one
    /// more bar; fetching without advancing returns the same batch again.
    struct ScriptedFeed {
        candles: Vec<Candle>,
        visible: AtomicUsize,
        fetches: AtomicUsize,
        fail: bool,
    }

    impl ScriptedFeed {
        fn new(opens: &[f64], closes: &[f64]) -> Self {
            let t0 = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
            let candles = opens
                .iter()
                .zip(closes)
                .enumerate()
                .map(|(i, (&open, &close))| Candle {
                    open_time: t0 + ChronoDuration::minutes(5 * i as i64),
                    close_time: t0 + ChronoDuration::minutes(5 * (i as i64 + 1))
                        - ChronoDuration::milliseconds(1),
                    open,
                    high: open.max(close),
                    low: open.min(close),
                    close,
                    volume: 1.0,
                })
                .collect();
            Self {
                candles,
                visible: AtomicUsize::new(0),
                fetches: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                candles: Vec::new(),
                visible: AtomicUsize::new(0),
                fetches: AtomicUsize::new(0),
                fail: true,
            }
        }

        fn advance(&self) {
            self.visible.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl MarketDataClient for ScriptedFeed {
        async fn fetch_closed_candles(
            &self,
            _: &str,
            _: &str,
            limit: usize,
        ) -> Result<Vec<Candle>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::MarketData("connection reset".into()));
            }
            let end = self.visible.load(Ordering::SeqCst).min(self.candles.len());
            let start = end.saturating_sub(limit);
            Ok(self.candles[start..end].to_vec())
        }
    }

    /// Fills orders at a fixed price. Orders on `reject` sides fail.
    struct MockExchange {
        price: f64,
        reject: Vec<OrderSide>,
        orders: Mutex<Vec<Order>>,
    }

    impl MockExchange {
        fn new(price: f64) -> Self {
            Self::rejecting(price, &[])
        }

        fn rejecting(price: f64, sides: &[OrderSide]) -> Self {
            Self {
                price,
                reject: sides.to_vec(),
                orders: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ExchangeClient for MockExchange {
        async fn submit_order(&self, order: &Order) -> Result<Fill> {
            self.orders.lock().await.push(order.clone());
            if self.reject.contains(&order.side) {
                return Err(Error::Exchange("HTTP 503".into()));
            }
            Ok(Fill {
                order_id: order.id.clone(),
                pair: order.pair.clone(),
                side: order.side,
                fill_price: self.price,
                quantity: order.quantity,
                timestamp: Utc::now(),
            })
        }
    }

    #[derive(Clone, Default)]
    struct MemoryJournal {
        records: Arc<Mutex<Vec<TradeRecord>>>,
        fail: bool,
    }

    #[async_trait]
    impl TradeJournal for MemoryJournal {
        async fn append_trade(&self, record: &TradeRecord) -> Result<()> {
            if self.fail {
                return Err(Error::Journal("disk full".into()));
            }
            self.records.lock().await.push(record.clone());
            Ok(())
        }
    }

    // ─── Fixtures ────────────────────────────────────────────────────────────

    /// Rising ramp with a dip every 8th bar. First entry lands on index 15.
    fn sawtooth(n: usize) -> (Vec<f64>, Vec<f64>) {
        let closes: Vec<f64> = (0..n)
            .map(|i| 100.0 + 0.5 * i as f64 - if i % 8 == 7 { 3.0 } else { 0.0 })
            .collect();
        let opens = closes.iter().map(|c| c - 0.25).collect();
        (opens, closes)
    }

    fn settings() -> LoopSettings {
        LoopSettings {
            symbol: "BTCUSDT".into(),
            interval: "5m".into(),
            lookback: 200,
            poll_interval: Duration::from_millis(1),
        }
    }

    fn build(
        feed: Arc<ScriptedFeed>,
        exchange: Arc<MockExchange>,
        journal: MemoryJournal,
    ) -> PositionLoop {
        let executor = OrderExecutor::new(exchange, "BTCUSDT", 0.02, ExecutionMode::DryRun);
        PositionLoop::new(
            settings(),
            &StrategyParams::default(),
            feed,
            executor,
            Box::new(journal),
        )
    }

    // ─── Tests ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn same_close_time_is_not_decided_twice() {
        let (opens, closes) = sawtooth(20);
        let feed = Arc::new(ScriptedFeed::new(&opens, &closes));
        let mut lp = build(feed.clone(), Arc::new(MockExchange::new(100.0)), MemoryJournal::default());

        feed.advance();
        assert!(matches!(lp.tick().await.unwrap(), TickOutcome::Bar { .. }));
        assert_eq!(lp.decision_state().bar_index(), 1);

        for _ in 0..3 {
            assert_eq!(lp.tick().await.unwrap(), TickOutcome::NoNewBar);
        }
        assert_eq!(lp.decision_state().bar_index(), 1);
        assert_eq!(feed.fetches.load(Ordering::SeqCst), 4);

        feed.advance();
        assert!(matches!(lp.tick().await.unwrap(), TickOutcome::Bar { .. }));
        assert_eq!(lp.decision_state().bar_index(), 2);
    }

    #[tokio::test]
    async fn empty_batch_is_no_new_bar() {
        let feed = Arc::new(ScriptedFeed::new(&[], &[]));
        let mut lp = build(feed, Arc::new(MockExchange::new(100.0)), MemoryJournal::default());
        assert_eq!(lp.tick().await.unwrap(), TickOutcome::NoNewBar);
        assert_eq!(lp.decision_state().bar_index(), 0);
        assert!(lp.watermark().is_none());
    }

    #[tokio::test]
    async fn round_trip_is_journaled_only_at_exit() {
        let (opens, closes) = sawtooth(40);
        let feed = Arc::new(ScriptedFeed::new(&opens, &closes));
        let exchange = Arc::new(MockExchange::new(105.0));
        let journal = MemoryJournal::default();
        let mut lp = build(feed.clone(), exchange.clone(), journal.clone());

        let mut outcomes = Vec::new();
        for _ in 0..closes.len() {
            feed.advance();
            outcomes.push(lp.tick().await.unwrap());
        }

        let entry_idx = outcomes
            .iter()
            .position(|o| matches!(o, TickOutcome::Bar { action: Action::Opened { .. }, .. }))
            .expect("an entry");
        assert_eq!(entry_idx, 15);

        let exit_idx = outcomes
            .iter()
            .position(|o| matches!(o, TickOutcome::Bar { action: Action::Closed(_), .. }))
            .expect("an exit");
        assert_eq!(exit_idx, entry_idx + 8);

        let records = journal.records.lock().await.clone();
        assert!(!records.is_empty());
        let first = &records[0];
        assert_eq!(first.trade_id, "T001");
        assert_eq!(first.symbol, "BTCUSDT");
        assert_eq!(first.bars_held, 8);
        assert_eq!(first.entry_price, 105.0);
        assert_eq!(first.exit_price, 105.0);
        assert_eq!(first.quantity, 0.02);
        assert_eq!(first.environment, "DRY_RUN");
        assert_eq!(first.entry_time, feed.candles[entry_idx].close_time);
        assert_eq!(first.exit_time, feed.candles[exit_idx].close_time);

        let orders = exchange.orders.lock().await;
        assert_eq!(orders[0].side, OrderSide::Buy);
        assert_eq!(orders[1].side, OrderSide::Sell);
        assert!(orders.iter().all(|o| o.quantity == 0.02));
    }

    #[tokio::test]
    async fn record_is_absent_until_exit_tick() {
        let (opens, closes) = sawtooth(24);
        let feed = Arc::new(ScriptedFeed::new(&opens, &closes));
        let journal = MemoryJournal::default();
        let mut lp = build(feed.clone(), Arc::new(MockExchange::new(100.0)), journal.clone());

        // Up to and including the entry bar (index 15) and the 7 held bars.
        for _ in 0..23 {
            feed.advance();
            lp.tick().await.unwrap();
        }
        assert_eq!(lp.position(), PositionState::Open);
        assert_eq!(lp.bars_in_trade(), 8);
        assert!(journal.records.lock().await.is_empty());

        feed.advance();
        let outcome = lp.tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Bar { intent: Intent::ExitLong, .. }));
        assert_eq!(lp.position(), PositionState::Flat);
        assert_eq!(lp.bars_in_trade(), 0);
        assert_eq!(journal.records.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn trade_ids_increase_across_round_trips() {
        let (opens, closes) = sawtooth(60);
        let feed = Arc::new(ScriptedFeed::new(&opens, &closes));
        let journal = MemoryJournal::default();
        let mut lp = build(feed.clone(), Arc::new(MockExchange::new(100.0)), journal.clone());

        for _ in 0..closes.len() {
            feed.advance();
            lp.tick().await.unwrap();
        }
        let ids: Vec<String> = journal
            .records
            .lock()
            .await
            .iter()
            .map(|r| r.trade_id.clone())
            .collect();
        assert!(ids.len() >= 2);
        assert_eq!(ids[0], "T001");
        assert_eq!(ids[1], "T002");
        assert!(journal.records.lock().await.iter().all(|r| r.bars_held == 8));
    }

    #[tokio::test]
    async fn fetch_failure_is_fatal() {
        let feed = Arc::new(ScriptedFeed::failing());
        let mut lp = build(feed, Arc::new(MockExchange::new(100.0)), MemoryJournal::default());
        assert!(matches!(lp.tick().await, Err(Error::MarketData(_))));
        assert_eq!(lp.decision_state().bar_index(), 0);
    }

    #[tokio::test]
    async fn order_failure_is_fatal_and_keeps_position_flat() {
        let (opens, closes) = sawtooth(16);
        let feed = Arc::new(ScriptedFeed::new(&opens, &closes));
        let exchange = Arc::new(MockExchange::rejecting(100.0, &[OrderSide::Buy]));
        let mut lp = build(feed.clone(), exchange.clone(), MemoryJournal::default());

        for _ in 0..15 {
            feed.advance();
            lp.tick().await.unwrap();
        }
        feed.advance();
        assert!(matches!(lp.tick().await, Err(Error::Exchange(_))));
        assert_eq!(lp.position(), PositionState::Flat);
        assert!(lp.open_trade().is_none());
        assert_eq!(exchange.orders.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn sell_failure_is_fatal_and_keeps_position_open() {
        let (opens, closes) = sawtooth(24);
        let feed = Arc::new(ScriptedFeed::new(&opens, &closes));
        let exchange = Arc::new(MockExchange::rejecting(100.0, &[OrderSide::Sell]));
        let journal = MemoryJournal::default();
        let mut lp = build(feed.clone(), exchange.clone(), journal.clone());

        // Entry on index 15, then held through index 22.
        for _ in 0..23 {
            feed.advance();
            lp.tick().await.unwrap();
        }
        assert_eq!(lp.position(), PositionState::Open);
        let entry = lp.open_trade().cloned();
        let held = lp.bars_in_trade();
        assert_eq!(held, 8);

        feed.advance();
        assert!(matches!(lp.tick().await, Err(Error::Exchange(_))));
        assert_eq!(lp.position(), PositionState::Open);
        assert!(lp.open_trade().is_some());
        assert_eq!(lp.open_trade().cloned(), entry);
        assert_eq!(lp.bars_in_trade(), held);
        assert!(journal.records.lock().await.is_empty());

        let orders = exchange.orders.lock().await;
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[1].side, OrderSide::Sell);
    }

    #[tokio::test]
    async fn intents_that_do_not_fit_the_position_are_ignored() {
        let (opens, closes) = sawtooth(16);
        let feed = Arc::new(ScriptedFeed::new(&opens, &closes));
        let exchange = Arc::new(MockExchange::new(100.0));
        let journal = MemoryJournal::default();
        let mut lp = build(feed.clone(), exchange.clone(), journal.clone());
        let candle = feed.candles[0].clone();

        // Exit while flat.
        let action = lp.apply(Intent::ExitLong, &candle).await.unwrap();
        assert_eq!(action, Action::Ignored);
        assert_eq!(lp.position(), PositionState::Flat);
        assert!(exchange.orders.lock().await.is_empty());

        for _ in 0..16 {
            feed.advance();
            lp.tick().await.unwrap();
        }
        assert_eq!(lp.position(), PositionState::Open);

        // Enter while open.
        let action = lp.apply(Intent::EnterLong, &candle).await.unwrap();
        assert_eq!(action, Action::Ignored);
        assert_eq!(lp.position(), PositionState::Open);
        assert_eq!(lp.open_trade().map(|t| t.trade_id.as_str()), Some("T001"));
        assert_eq!(exchange.orders.lock().await.len(), 1);
        assert!(journal.records.lock().await.is_empty());
    }

    #[tokio::test]
    async fn journal_failure_is_not_fatal() {
        let (opens, closes) = sawtooth(30);
        let feed = Arc::new(ScriptedFeed::new(&opens, &closes));
        let journal = MemoryJournal {
            fail: true,
            ..Default::default()
        };
        let mut lp = build(feed.clone(), Arc::new(MockExchange::new(100.0)), journal);

        let mut closed = false;
        for _ in 0..closes.len() {
            feed.advance();
            let outcome = lp.tick().await.unwrap();
            if matches!(outcome, TickOutcome::Bar { action: Action::Closed(_), .. }) {
                closed = true;
            }
        }
        assert!(closed);
        assert_eq!(lp.position(), PositionState::Flat);
    }

    #[tokio::test]
    async fn run_stops_on_fatal_error() {
        let feed = Arc::new(ScriptedFeed::failing());
        let lp = build(feed, Arc::new(MockExchange::new(100.0)), MemoryJournal::default());
        let result = lp.run(std::future::pending::<()>()).await;
        assert!(matches!(result, Err(Error::MarketData(_))));
    }

    #[tokio::test]
    async fn run_returns_on_shutdown() {
        let (opens, closes) = sawtooth(5);
        let feed = Arc::new(ScriptedFeed::new(&opens, &closes));
        let lp = build(feed.clone(), Arc::new(MockExchange::new(100.0)), MemoryJournal::default());
        lp.run(async {}).await.unwrap();
        assert_eq!(feed.fetches.load(Ordering::SeqCst), 1);
    }
}
