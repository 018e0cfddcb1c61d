//! Multi-timeframe views over bar history
//!
//! The scanner looks at one symbol through several timeframes at once: three
//! trend timeframes (short/medium/long) for alignment and a fast/slow pair for
//! momentum confluence. `TimeframeBars` is a borrowed bundle of those slices;
//! any of them may be missing.

use chrono::Datelike;

use crate::types::PriceBar;

/// Borrowed per-timeframe bar slices for one symbol, all ending at the same point in time
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeframeBars<'a> {
    pub short: Option<&'a [PriceBar]>,
    pub medium: Option<&'a [PriceBar]>,
    pub long: Option<&'a [PriceBar]>,
    pub fast: Option<&'a [PriceBar]>,
    pub slow: Option<&'a [PriceBar]>,
}

impl<'a> TimeframeBars<'a> {
    /// Every trend timeframe reads the same daily slice (price vs EMA20/50/200 on
    /// daily bars); `slow` is supplied separately, typically weekly bars.
    pub fn from_daily(daily: &'a [PriceBar], slow: Option<&'a [PriceBar]>) -> Self {
        TimeframeBars {
            short: Some(daily),
            medium: Some(daily),
            long: Some(daily),
            fast: Some(daily),
            slow,
        }
    }

    pub fn with_short(mut self, bars: &'a [PriceBar]) -> Self {
        self.short = Some(bars);
        self
    }

    pub fn with_medium(mut self, bars: &'a [PriceBar]) -> Self {
        self.medium = Some(bars);
        self
    }

    pub fn with_long(mut self, bars: &'a [PriceBar]) -> Self {
        self.long = Some(bars);
        self
    }

    pub fn with_fast(mut self, bars: &'a [PriceBar]) -> Self {
        self.fast = Some(bars);
        self
    }

    pub fn with_slow(mut self, bars: &'a [PriceBar]) -> Self {
        self.slow = Some(bars);
        self
    }
}

/// Close prices of a slice
pub fn closes(bars: &[PriceBar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

/// Aggregate daily bars into ISO-week bars.
///
/// Each output bar opens at the first bar of the week and carries the last
/// bar's timestamp, so a partially complete current week is included as-is.
pub fn resample_weekly(bars: &[PriceBar]) -> Vec<PriceBar> {
    let mut out: Vec<PriceBar> = Vec::new();
    let mut current_week = None;

    for bar in bars {
        let week = bar.timestamp.iso_week();
        let key = (week.year(), week.week());
        match out.last_mut() {
            Some(agg) if current_week == Some(key) => {
                agg.timestamp = bar.timestamp;
                agg.high = agg.high.max(bar.high);
                agg.low = agg.low.min(bar.low);
                agg.close = bar.close;
                agg.volume += bar.volume;
            }
            _ => {
                out.push(PriceBar::new_unchecked(
                    bar.timestamp,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                ));
                current_week = Some(key);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_resample_weekly() {
        // 2024-01-01 is a Monday
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars: Vec<PriceBar> = (0..10)
            .map(|i| {
                let c = 100.0 + i as f64;
                PriceBar::new_unchecked(start + Duration::days(i), c, c + 2.0, c - 1.0, c + 1.0, 10.0)
            })
            .collect();

        let weekly = resample_weekly(&bars);
        assert_eq!(weekly.len(), 2);
        assert_eq!(weekly[0].open, 100.0);
        assert_eq!(weekly[0].high, 108.0);
        assert_eq!(weekly[0].low, 99.0);
        assert_eq!(weekly[0].close, 107.0);
        assert_eq!(weekly[0].volume, 70.0);
        assert_eq!(weekly[1].open, 107.0);
        assert_eq!(weekly[1].close, 110.0);
        assert_eq!(weekly[1].timestamp, bars[9].timestamp);
    }

    #[test]
    fn test_from_daily_view() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars = vec![PriceBar::new_unchecked(start, 1.0, 1.0, 1.0, 1.0, 1.0)];
        let view = TimeframeBars::from_daily(&bars, None);
        assert_eq!(view.short.map(|s| s.len()), Some(1));
        assert!(view.slow.is_none());
        assert_eq!(closes(&bars), vec![1.0]);
    }
}
