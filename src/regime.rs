//! Market-wide entry gate
//!
//! New entries are allowed on a day only when the index is above its medium
//! (50) EMA and the index candle closed at or above its open. The gate never
//! touches positions that are already open.

use chrono::NaiveDate;

use crate::types::PriceBar;

/// Index bars older than this (in calendar days) are treated as missing
const MAX_STALENESS_DAYS: i64 = 3;

#[derive(Debug, Clone, Default)]
pub struct MarketRegimeGate {
    /// Index bars with indicators enriched, oldest first. Empty disables the gate.
    index: Vec<PriceBar>,
}

impl MarketRegimeGate {
    pub fn new(index: Vec<PriceBar>) -> Self {
        MarketRegimeGate { index }
    }

    /// Gate that always allows entries
    pub fn open() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        !self.index.is_empty()
    }

    /// Latest index bar on or before `date`, if it is recent enough
    fn bar_for(&self, date: NaiveDate) -> Option<&PriceBar> {
        let idx = self.index.partition_point(|b| b.date() <= date);
        let bar = self.index.get(idx.checked_sub(1)?)?;
        ((date - bar.date()).num_days() <= MAX_STALENESS_DAYS).then_some(bar)
    }

    /// Whether new entries are allowed on `date`. Missing index data allows them.
    pub fn allows_entries(&self, date: NaiveDate) -> bool {
        let Some(bar) = self.bar_for(date) else {
            return true;
        };
        let Some(ema) = bar.indicators.ema_fast else {
            return true;
        };
        bar.close >= ema && bar.close >= bar.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn index_bar(day: i64, open: f64, close: f64, ema: Option<f64>) -> PriceBar {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day);
        let mut bar = PriceBar::new_unchecked(ts, open, open.max(close), open.min(close), close, 1e6);
        bar.indicators.ema_fast = ema;
        bar
    }

    fn date(day: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(day)
    }

    #[test]
    fn test_gate() {
        let gate = MarketRegimeGate::new(vec![
            index_bar(0, 100.0, 101.0, Some(99.0)), // up day above ema
            index_bar(1, 101.0, 100.5, Some(99.0)), // red candle
            index_bar(2, 100.0, 100.5, Some(102.0)), // below ema
        ]);
        assert!(gate.allows_entries(date(0)));
        assert!(!gate.allows_entries(date(1)));
        assert!(!gate.allows_entries(date(2)));
        // weekend: falls back to the last bar
        assert!(!gate.allows_entries(date(4)));
        // stale data counts as missing
        assert!(gate.allows_entries(date(10)));
        // before the index history starts
        assert!(gate.allows_entries(date(-1)));
    }

    #[test]
    fn test_missing_index_allows_entries() {
        let gate = MarketRegimeGate::open();
        assert!(!gate.is_enabled());
        assert!(gate.allows_entries(date(0)));

        let warming_up = MarketRegimeGate::new(vec![index_bar(0, 100.0, 90.0, None)]);
        assert!(warming_up.allows_entries(date(0)));
    }
}
