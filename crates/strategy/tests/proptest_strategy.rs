use proptest::prelude::*;
use strategy::indicators::{ema, rsi};
use strategy::{DecisionEngine, Intent, StrategyParams, Trend};

fn price_series(min_len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.01f64..100_000.0f64, min_len..300)
}

proptest! {
    /// RSI stays inside [0, 100] for any positive price series.
    #[test]
    fn rsi_is_bounded(prices in price_series(2), period in 1usize..30) {
        if let Some(v) = rsi(&prices, period) {
            prop_assert!((0.0..=100.0).contains(&v), "rsi out of range: {v}");
        } else {
            prop_assert!(prices.len() < period + 1);
        }
    }

    /// EMA never leaves the range of the values it was fed.
    #[test]
    fn ema_is_within_input_range(prices in price_series(1), period in 1usize..30) {
        if let Some(v) = ema(&prices, period) {
            let lo = prices.iter().cloned().fold(f64::INFINITY, f64::min);
            let hi = prices.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            prop_assert!(v >= lo - 1e-9 && v <= hi + 1e-9);
        }
    }

    /// When the caller mirrors intents into its position flag, entries and
    /// exits alternate and every exit lands exactly `exit_bars` after entry.
    #[test]
    fn entries_and_exits_alternate(
        closes in price_series(1),
        body in prop::collection::vec(-1.0f64..1.0f64, 300),
        exit_bars in 1u32..12,
        confirm_multiple in 1u64..5,
    ) {
        let params = StrategyParams {
            exit_bars,
            confirm_multiple,
            confirm_ema_fast: 3,
            confirm_ema_slow: 6,
            ..Default::default()
        };
        let engine = DecisionEngine::new(&params);
        let opens: Vec<f64> = closes
            .iter()
            .zip(body.iter())
            .map(|(c, b)| (c + b).max(0.0))
            .collect();

        let mut state = engine.initial_state();
        let mut position_open = false;
        let mut entered_at: Option<usize> = None;

        for i in 0..closes.len() {
            let start = (i + 1).saturating_sub(200);
            let (next, intent) =
                engine.on_bar(state, &opens[start..=i], &closes[start..=i], position_open);
            state = next;
            prop_assert_eq!(state.bar_index(), (i + 1) as u64);

            match intent {
                Intent::EnterLong => {
                    prop_assert!(!position_open);
                    position_open = true;
                    entered_at = Some(i);
                }
                Intent::ExitLong => {
                    prop_assert!(position_open);
                    let k = entered_at.take().unwrap();
                    prop_assert_eq!(i - k, exit_bars as usize);
                    position_open = false;
                }
                Intent::NoAction => {}
            }
        }
    }

    /// The trend flag stays unknown until the slow window of
    /// higher-timeframe closes has been collected.
    #[test]
    fn trend_unknown_before_slow_window(
        closes in price_series(1),
        confirm_multiple in 1u64..5,
    ) {
        let params = StrategyParams {
            confirm_multiple,
            confirm_ema_fast: 2,
            confirm_ema_slow: 5,
            ..Default::default()
        };
        let engine = DecisionEngine::new(&params);
        let mut state = engine.initial_state();
        for i in 0..closes.len() {
            let (next, _) = engine.on_bar(state, &closes[..=i], &closes[..=i], false);
            state = next;
            let updates = (i as u64 + 1) / confirm_multiple;
            if updates < 5 {
                prop_assert_eq!(state.trend(), Trend::Unknown);
            } else {
                prop_assert_ne!(state.trend(), Trend::Unknown);
            }
        }
    }
}
