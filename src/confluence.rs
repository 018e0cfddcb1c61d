//! Multi-timeframe confluence scoring
//!
//! Two independent readings:
//! - trend alignment: is price above its reference EMA on each trend timeframe
//! - momentum confluence: six oscillator checks across a fast and a slow timeframe
//!
//! Both degrade to `false` / `0.0` when a timeframe is missing or too short.

use serde::{Deserialize, Serialize};

use crate::indicators::{
    self, EMA_FAST_PERIOD, EMA_SHORT_PERIOD, EMA_SLOW_PERIOD, MACD_FAST, MACD_SIGNAL, MACD_SLOW,
    RSI_PERIOD,
};
use crate::multi_timeframe::{closes, TimeframeBars};
use crate::types::PriceBar;

/// Alignment counts as bullish at two of three timeframes
pub const ALIGNMENT_MIN_RATIO: f64 = 2.0 / 3.0;
pub const CONFLUENCE_MIN_RATIO: f64 = 0.5;
pub const CONFLUENCE_CRITERIA: usize = 6;

/// Healthy RSI band, inclusive
pub const RSI_BAND: (f64, f64) = (45.0, 65.0);
/// MACD histogram must clear this to count as positive
pub const MACD_POSITIVE_FLOOR: f64 = 0.01;

/// Reference EMA period per trend timeframe (short, medium, long)
const ALIGNMENT_PERIODS: [usize; 3] = [EMA_SHORT_PERIOD, EMA_FAST_PERIOD, EMA_SLOW_PERIOD];
/// A single timeframe never counts as aligned
const ALIGNMENT_MIN_AVAILABLE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Alignment {
    pub aligned: bool,
    pub ratio: f64,
    pub bullish: usize,
    pub available: usize,
}

/// The six momentum checks, individually
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MomentumCriteria {
    pub fast_rsi_healthy: bool,
    pub slow_rsi_healthy: bool,
    pub fast_macd_positive: bool,
    pub slow_macd_positive: bool,
    pub fast_rsi_rising: bool,
    pub slow_macd_strengthening: bool,
}

impl MomentumCriteria {
    pub fn satisfied(&self) -> usize {
        [
            self.fast_rsi_healthy,
            self.slow_rsi_healthy,
            self.fast_macd_positive,
            self.slow_macd_positive,
            self.fast_rsi_rising,
            self.slow_macd_strengthening,
        ]
        .iter()
        .filter(|c| **c)
        .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Confluence {
    pub confluent: bool,
    pub ratio: f64,
    pub criteria: MomentumCriteria,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfluenceScore {
    pub alignment: Alignment,
    pub confluence: Confluence,
}

/// Score both readings for one symbol
pub fn score(view: &TimeframeBars<'_>) -> ConfluenceScore {
    let fast = view.fast.map(closes).unwrap_or_default();
    let slow = view.slow.map(closes).unwrap_or_default();
    ConfluenceScore {
        alignment: alignment(view),
        confluence: momentum_confluence(&fast, &slow),
    }
}

/// Price versus reference EMA on the short/medium/long timeframes
pub fn alignment(view: &TimeframeBars<'_>) -> Alignment {
    let frames = [view.short, view.medium, view.long];
    let mut bullish = 0;
    let mut available = 0;

    for (bars, period) in frames.iter().zip(ALIGNMENT_PERIODS) {
        if let Some(above) = bars.and_then(|b| price_above_ema(b, period)) {
            available += 1;
            if above {
                bullish += 1;
            }
        }
    }

    if available < ALIGNMENT_MIN_AVAILABLE {
        return Alignment {
            aligned: false,
            ratio: 0.0,
            bullish,
            available,
        };
    }

    let ratio = bullish as f64 / available as f64;
    Alignment {
        aligned: ratio >= ALIGNMENT_MIN_RATIO - 1e-12,
        ratio,
        bullish,
        available,
    }
}

/// None when there are fewer than `period` bars
fn price_above_ema(bars: &[PriceBar], period: usize) -> Option<bool> {
    if bars.len() < period {
        return None;
    }
    let last = bars.last()?.close;
    let ema = indicators::ema_last(&closes(bars), period)?;
    Some(last > ema)
}

/// Six oscillator checks over fast and slow close series
pub fn momentum_confluence(fast: &[f64], slow: &[f64]) -> Confluence {
    let fast_rsi = indicators::rsi(fast, RSI_PERIOD);
    let slow_rsi = indicators::rsi(slow, RSI_PERIOD);
    let fast_macd = indicators::macd_histogram(fast, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
    let slow_macd = indicators::macd_histogram(slow, MACD_FAST, MACD_SLOW, MACD_SIGNAL);

    let in_band = |v: f64| v >= RSI_BAND.0 && v <= RSI_BAND.1;

    let criteria = MomentumCriteria {
        fast_rsi_healthy: last(&fast_rsi).is_some_and(in_band),
        slow_rsi_healthy: last(&slow_rsi).is_some_and(in_band),
        fast_macd_positive: last(&fast_macd).is_some_and(|h| h > MACD_POSITIVE_FLOOR),
        slow_macd_positive: last(&slow_macd).is_some_and(|h| h > MACD_POSITIVE_FLOOR),
        fast_rsi_rising: rising(&fast_rsi),
        slow_macd_strengthening: rising(&slow_macd),
    };

    let ratio = criteria.satisfied() as f64 / CONFLUENCE_CRITERIA as f64;
    Confluence {
        confluent: ratio >= CONFLUENCE_MIN_RATIO,
        ratio,
        criteria,
    }
}

fn last(series: &[Option<f64>]) -> Option<f64> {
    series.last().copied().flatten()
}

/// Last value strictly above the one before it
fn rising(series: &[Option<f64>]) -> bool {
    match series {
        [.., Some(prev), Some(cur)] => cur > prev,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars_from(closes: &[f64]) -> Vec<PriceBar> {
        let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                PriceBar::new_unchecked(start + Duration::days(i as i64), c, c + 0.5, c - 0.5, c, 1e6)
            })
            .collect()
    }

    #[test]
    fn test_alignment_uptrend() {
        let closes: Vec<f64> = (0..250).map(|i| 100.0 + i as f64 * 0.2).collect();
        let bars = bars_from(&closes);
        let result = alignment(&TimeframeBars::from_daily(&bars, None));
        assert_eq!(result.available, 3);
        assert_eq!(result.bullish, 3);
        assert!(result.aligned);
        assert_eq!(result.ratio, 1.0);
    }

    #[test]
    fn test_alignment_counts_only_available() {
        // 60 bars: short and medium available, long (200) missing
        let mut closes: Vec<f64> = (0..59).map(|i| 100.0 + i as f64 * 0.1).collect();
        closes.push(95.0);
        let bars = bars_from(&closes);
        let result = alignment(&TimeframeBars::from_daily(&bars, None));
        assert_eq!(result.available, 2);
        assert_eq!(result.bullish, 0);
        assert!(!result.aligned);
    }

    #[test]
    fn test_two_of_three_is_aligned() {
        let up: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let down: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        let up_bars = bars_from(&up);
        let down_bars = bars_from(&down);
        let view = TimeframeBars::default()
            .with_short(&up_bars)
            .with_medium(&up_bars)
            .with_long(&down_bars);
        // long needs 200 bars, so only short and medium count
        let result = alignment(&view);
        assert_eq!(result.available, 2);
        assert!(result.aligned);

        let view = TimeframeBars::default()
            .with_short(&up_bars)
            .with_medium(&down_bars);
        let result = alignment(&view);
        assert_eq!(result.ratio, 0.5);
        assert!(!result.aligned);
    }

    #[test]
    fn test_single_timeframe_is_not_aligned() {
        // 30 rising bars: only the short (EMA20) timeframe has enough history
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let bars = bars_from(&closes);
        for view in [
            TimeframeBars::default().with_short(&bars),
            TimeframeBars::from_daily(&bars, None),
        ] {
            let result = alignment(&view);
            assert_eq!(result.available, 1);
            assert_eq!(result.bullish, 1);
            assert_eq!(result.ratio, 0.0);
            assert!(!result.aligned);
        }
    }

    #[test]
    fn test_alignment_without_data() {
        let result = alignment(&TimeframeBars::default());
        assert!(!result.aligned);
        assert_eq!(result.ratio, 0.0);
    }

    #[test]
    fn test_confluence_without_data() {
        let result = momentum_confluence(&[], &[]);
        assert!(!result.confluent);
        assert_eq!(result.ratio, 0.0);
        assert_eq!(result.criteria, MomentumCriteria::default());
    }

    #[test]
    fn test_confluence_ratio_counts_criteria() {
        // Steady climb: MACD positive on both, RSI pinned high (outside band)
        let series: Vec<f64> = (0..80).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let result = momentum_confluence(&series, &series);
        assert!(result.criteria.fast_macd_positive);
        assert!(result.criteria.slow_macd_positive);
        assert!(!result.criteria.fast_rsi_healthy);
        assert_eq!(
            result.ratio,
            result.criteria.satisfied() as f64 / CONFLUENCE_CRITERIA as f64
        );
    }

    #[test]
    fn test_rising_helper() {
        assert!(rising(&[None, Some(1.0), Some(2.0)]));
        assert!(!rising(&[Some(2.0), Some(2.0)]));
        assert!(!rising(&[None, Some(2.0)]));
        assert!(!rising(&[]));
    }

    #[test]
    fn test_score_is_idempotent() {
        let closes: Vec<f64> = (0..120).map(|i| 100.0 + (i as f64 * 0.2).sin() * 5.0).collect();
        let bars = bars_from(&closes);
        let view = TimeframeBars::from_daily(&bars, Some(&bars));
        assert_eq!(score(&view), score(&view));
    }
}
