//! Property tests for the invariants the scanner and simulator must hold
//! for any input, not just the hand-picked scenarios.

use std::collections::{BTreeMap, HashSet};

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;

use momentum_scanner::backtest::cooldown_clear;
use momentum_scanner::confluence;
use momentum_scanner::momentum::zscore;
use momentum_scanner::multi_timeframe::TimeframeBars;
use momentum_scanner::optimizer;
use momentum_scanner::position::{OpenPosition, FULL_BPS};
use momentum_scanner::regime::MarketRegimeGate;
use momentum_scanner::risk::CostModel;
use momentum_scanner::{
    indicators, CoreError, CoreResult, ExitReason, MomentumAnalyzer, PriceBar, ScannerConfig,
    SignalEvaluation, SignalSource, SimulationConfig, Symbol, TradeSimulator,
};

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn bar(n: i64, high: f64, low: f64, close: f64) -> PriceBar {
    let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n);
    PriceBar::new_unchecked(ts, close, high, low, close, 1_000_000.0)
}

/// Closes from a random walk of bounded daily moves
fn walk(moves: &[f64]) -> Vec<f64> {
    let mut closes = Vec::with_capacity(moves.len() + 1);
    let mut price = 100.0;
    closes.push(price);
    for m in moves {
        price *= 1.0 + m;
        closes.push(price);
    }
    closes
}

/// Enriched bars from a random walk with a fixed 1% range
fn walk_bars(moves: &[f64]) -> Vec<PriceBar> {
    let mut bars: Vec<PriceBar> = walk(moves)
        .into_iter()
        .enumerate()
        .map(|(i, c)| bar(i as i64, c * 1.01, c * 0.99, c))
        .collect();
    indicators::enrich(&mut bars);
    bars
}

struct ScriptedSource {
    dates: HashSet<NaiveDate>,
}

impl SignalSource for ScriptedSource {
    fn signal(&self, symbol: &Symbol, history: &[PriceBar]) -> CoreResult<SignalEvaluation> {
        let bar = history
            .last()
            .ok_or_else(|| CoreError::DataInsufficient("no history".into()))?;
        Ok(SignalEvaluation {
            symbol: symbol.clone(),
            date: bar.date(),
            price: bar.close,
            atr: 5.0,
            entry_ok: self.dates.contains(&bar.date()),
            stop_loss: bar.close - 10.0,
            tp1: bar.close + 20.0,
            tp2: bar.close + 30.0,
            ..Default::default()
        })
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_zscore_always_finite(
        value in -1e6f64..1e6,
        mean in -1e6f64..1e6,
        std in 0.0f64..1e3,
    ) {
        prop_assert!(zscore(value, mean, std).is_finite());
        prop_assert_eq!(zscore(value, mean, 0.0), 0.0);
    }

    #[test]
    fn prop_flat_series_scores_zero(price in 1.0f64..1000.0, len in 2usize..80) {
        let closes = vec![price; len];
        let profile = MomentumAnalyzer::from_config(&ScannerConfig::default()).analyze(&closes, None);
        for metric in &profile.metrics {
            prop_assert_eq!(metric.zscore, 0.0);
        }
        prop_assert!(!profile.positive && !profile.negative);
    }

    #[test]
    fn prop_threshold_stays_clipped(
        moves in prop::collection::vec(-0.08f64..0.08, 2..150),
        volume in prop::option::of(1_000.0f64..5_000_000.0),
    ) {
        let config = ScannerConfig::default();
        let profile = MomentumAnalyzer::from_config(&config).analyze(&walk(&moves), volume);
        prop_assert!(profile.effective_threshold >= config.momentum_dynamic_min);
        prop_assert!(profile.effective_threshold <= config.momentum_dynamic_max);
        prop_assert!(profile.dominant_zscore.is_finite());
    }

    #[test]
    fn prop_analyzer_is_idempotent(moves in prop::collection::vec(-0.05f64..0.05, 1..120)) {
        let closes = walk(&moves);
        let analyzer = MomentumAnalyzer::from_config(&ScannerConfig::default());
        prop_assert_eq!(analyzer.analyze(&closes, Some(500_000.0)), analyzer.analyze(&closes, Some(500_000.0)));
    }

    #[test]
    fn prop_confluence_is_idempotent(moves in prop::collection::vec(-0.03f64..0.03, 40..120)) {
        let bars = walk_bars(&moves);
        let view = TimeframeBars::from_daily(&bars, None);
        prop_assert_eq!(confluence::score(&view), confluence::score(&view));
    }

    #[test]
    fn prop_fills_sum_to_whole_and_stop_never_falls(
        lows in prop::collection::vec(85.0f64..140.0, 1..40),
        spans in prop::collection::vec(0.0f64..15.0, 40),
    ) {
        let costs = CostModel { commission_rate: 0.0005, slippage_rate: 0.001 };
        let mut pos = OpenPosition::open(
            Symbol::new("X"), start(), 100.0, 90.0, 120.0, 130.0, 10.0, 2.5,
        ).unwrap();

        let mut last_stop = pos.stop_loss;
        let mut last_day = 0;
        for (i, low) in lows.iter().enumerate() {
            let n = i as i64 + 1;
            let high = low + spans[i];
            pos.on_bar(start() + Duration::days(n), &bar(n, high, *low, (high + low) / 2.0), &costs);
            prop_assert!(pos.stop_loss >= last_stop);
            last_stop = pos.stop_loss;
            last_day = n;
            if pos.is_closed() {
                break;
            }
        }
        pos.force_close(start() + Duration::days(last_day), 100.0, ExitReason::Timeout, &costs);

        let total: u32 = pos.legs().iter().map(|l| l.fraction_bps).sum();
        prop_assert_eq!(total, FULL_BPS);
        prop_assert!(pos.into_closed_trade().is_ok());
    }

    #[test]
    fn prop_trades_never_overlap_and_respect_cooldown(
        signal_days in prop::collection::hash_set(0i64..60, 1..30),
        stop_days in prop::collection::hash_set(1i64..60, 0..10),
        cooldown in 0i64..6,
    ) {
        let bars: Vec<PriceBar> = (0..60)
            .map(|n| if stop_days.contains(&n) { bar(n, 100.0, 85.0, 100.0) } else { bar(n, 101.0, 99.0, 100.0) })
            .collect();
        let mut universe = BTreeMap::new();
        universe.insert(Symbol::new("X"), bars);

        let source = ScriptedSource {
            dates: signal_days.iter().map(|n| start() + Duration::days(*n)).collect(),
        };
        let sim = TradeSimulator::new(SimulationConfig {
            cooldown_days: cooldown,
            exit_multiples: None,
            ..SimulationConfig::default()
        }).unwrap();
        let result = sim.run(&universe, &MarketRegimeGate::open(), &source, start(), start() + Duration::days(59));

        for trade in result.trades() {
            prop_assert!(trade.entry_date <= trade.exit_date);
        }
        for pair in result.trades().windows(2) {
            prop_assert!(pair[1].entry_date > pair[0].exit_date);
            prop_assert!(cooldown_clear(Some(pair[0].exit_date), pair[1].entry_date, cooldown));
        }
    }

    #[test]
    fn prop_walk_forward_windows_are_disjoint_and_ordered(
        span in 0i64..900,
        train in 1i64..200,
        test in 1i64..90,
    ) {
        let first = start();
        let last = first + Duration::days(span);
        let windows = optimizer::windows(first, last, train, test);

        prop_assert_eq!(windows.len() as i64, ((span + 1 - train).max(0)) / test);
        for w in &windows {
            prop_assert!(w.train_start <= w.train_end);
            prop_assert!(w.train_end < w.test_start);
            prop_assert!(w.test_start <= w.test_end);
            prop_assert!(w.test_end <= last);
        }
        for pair in windows.windows(2) {
            prop_assert!(pair[0].test_end < pair[1].test_start);
            prop_assert!(pair[0].train_start < pair[1].train_start);
        }
    }
}
