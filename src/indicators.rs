//! Technical indicators powered by the `ta` crate
//!
//! Thin wrappers that turn a price slice into a `Vec<Option<f64>>` aligned with
//! the input, `None` during warm-up. `enrich` writes the full indicator set the
//! scanner needs onto a bar series.
//!
//! Available indicators:
//! - Moving Averages: SMA, EMA
//! - Momentum: RSI, MACD histogram
//! - Volatility: ATR (Wilder), Bollinger lower band
//! - Volume: rolling mean, rolling median

use ta::indicators::{
    BollingerBands, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    RelativeStrengthIndex, SimpleMovingAverage,
};
use ta::Next;

use crate::types::{Indicators, PriceBar};

pub const EMA_SHORT_PERIOD: usize = 20;
pub const EMA_FAST_PERIOD: usize = 50;
pub const EMA_SLOW_PERIOD: usize = 200;
pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const ATR_PERIOD: usize = 14;
pub const BB_PERIOD: usize = 20;
pub const BB_STD: f64 = 2.0;
pub const VOL_AVG_PERIOD: usize = 10;
pub const VOL_MEDIAN_PERIOD: usize = 20;

// =============================================================================
// Moving Averages
// =============================================================================

/// Calculate Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match SimpleMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let sma_val = indicator.next(value);
            (i + 1 >= period).then_some(sma_val)
        })
        .collect()
}

/// Calculate Exponential Moving Average (seeded with the first value)
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match ExponentialMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let ema_val = indicator.next(value);
            (i + 1 >= period).then_some(ema_val)
        })
        .collect()
}

/// EMA of the whole slice, or None when the slice is shorter than `period`
pub fn ema_last(values: &[f64], period: usize) -> Option<f64> {
    ema(values, period).last().copied().flatten()
}

// =============================================================================
// Momentum Indicators
// =============================================================================

/// Calculate RSI. The first value appears once `period` price changes exist.
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match RelativeStrengthIndex::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let rsi_val = indicator.next(value);
            (i >= period).then_some(rsi_val)
        })
        .collect()
}

/// MACD histogram (MACD line minus signal line)
pub fn macd_histogram(
    values: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> Vec<Option<f64>> {
    if values.is_empty() {
        return vec![];
    }

    let mut indicator =
        match MovingAverageConvergenceDivergence::new(fast_period, slow_period, signal_period) {
            Ok(i) => i,
            Err(_) => return vec![None; values.len()],
        };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let out = indicator.next(value);
            (i + 1 >= slow_period).then_some(out.histogram)
        })
        .collect()
}

// =============================================================================
// Volatility Indicators
// =============================================================================

/// Lower Bollinger band
pub fn bollinger_lower(values: &[f64], period: usize, num_std: f64) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match BollingerBands::new(period, num_std) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let bb = indicator.next(value);
            (i + 1 >= period).then_some(bb.lower)
        })
        .collect()
}

/// Calculate True Range
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    (0..high.len())
        .map(|i| {
            let hl = high[i] - low[i];
            if i == 0 {
                hl
            } else {
                let hc = (high[i] - close[i - 1]).abs();
                let lc = (low[i] - close[i - 1]).abs();
                hl.max(hc).max(lc)
            }
        })
        .collect()
}

/// Average True Range using Wilder's smoothing:
/// ATR = (prev_ATR * (period - 1) + TR) / period, seeded with the SMA of the
/// first `period` true ranges.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    if high.is_empty() || period == 0 || high.len() != low.len() || high.len() != close.len() {
        return vec![];
    }

    let tr = true_range(high, low, close);
    let mut result = Vec::with_capacity(tr.len());
    let mut atr_value: Option<f64> = None;

    for i in 0..tr.len() {
        if i + 1 < period {
            result.push(None);
        } else if i + 1 == period {
            let sum: f64 = tr[0..period].iter().sum();
            atr_value = Some(sum / period as f64);
            result.push(atr_value);
        } else if let Some(prev) = atr_value {
            let next = (prev * (period - 1) as f64 + tr[i]) / period as f64;
            atr_value = Some(next);
            result.push(atr_value);
        }
    }

    result
}

// =============================================================================
// Volume Statistics
// =============================================================================

/// Rolling median (manual - not in ta crate)
pub fn rolling_median(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    (0..values.len())
        .map(|i| {
            if i + 1 < period {
                return None;
            }
            let mut window = values[i + 1 - period..=i].to_vec();
            window.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let mid = period / 2;
            Some(if period % 2 == 0 {
                (window[mid - 1] + window[mid]) / 2.0
            } else {
                window[mid]
            })
        })
        .collect()
}

// =============================================================================
// Bar enrichment
// =============================================================================

/// Compute every indicator column on `bars` in place.
///
/// All indicators are causal: the value on bar `i` only depends on bars `..=i`,
/// so truncating the series later never changes earlier values.
pub fn enrich(bars: &mut [PriceBar]) {
    if bars.is_empty() {
        return;
    }

    let close: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let high: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let low: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let volume: Vec<f64> = bars.iter().map(|b| b.volume).collect();

    let ema_fast = ema(&close, EMA_FAST_PERIOD);
    let ema_slow = ema(&close, EMA_SLOW_PERIOD);
    let rsi_values = rsi(&close, RSI_PERIOD);
    let macd_hist = macd_histogram(&close, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
    let atr_values = atr(&high, &low, &close, ATR_PERIOD);
    let vol_avg = sma(&volume, VOL_AVG_PERIOD);
    let vol_median = rolling_median(&volume, VOL_MEDIAN_PERIOD);
    let bb_lower = bollinger_lower(&close, BB_PERIOD, BB_STD);

    let at = |series: &[Option<f64>], i: usize| series.get(i).copied().flatten();

    for (i, bar) in bars.iter_mut().enumerate() {
        bar.indicators = Indicators {
            ema_fast: at(&ema_fast, i),
            ema_slow: at(&ema_slow, i),
            rsi: at(&rsi_values, i),
            macd_hist: at(&macd_hist, i),
            atr: at(&atr_values, i),
            vol_avg: at(&vol_avg, i),
            vol_median: at(&vol_median, i),
            bb_lower: at(&bb_lower, i),
        };
    }
}
