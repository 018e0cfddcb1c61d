//! Data loading
//!
//! Reads daily OHLCV bars from CSV files (`{SYMBOL}_{timeframe}.csv`) and
//! attaches indicators so the bars are ready for the scanner and simulator.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use itertools::Itertools;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::indicators;
use crate::types::{PriceBar, Symbol};

// =============================================================================
// Parsing helpers
// =============================================================================

/// Parse `YYYY-MM-DD`
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", s))
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD`, or unix seconds / milliseconds
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = s.parse::<DateTime<Utc>>() {
        return Some(dt);
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(ndt.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|ndt| ndt.and_utc());
    }
    if let Ok(n) = s.parse::<i64>() {
        // 10^11 seconds is the year 5138, so anything bigger is milliseconds
        return if n.abs() >= 100_000_000_000 {
            DateTime::from_timestamp_millis(n)
        } else {
            DateTime::from_timestamp(n, 0)
        };
    }
    None
}

/// Column positions resolved from the header row
struct Columns {
    timestamp: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: usize,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
        };
        let require = |names: &[&str]| {
            find(names).with_context(|| format!("Missing column {}", names.join("|")))
        };
        Ok(Columns {
            timestamp: require(&["timestamp", "datetime", "date", "time"])?,
            open: require(&["open"])?,
            high: require(&["high"])?,
            low: require(&["low"])?,
            close: require(&["close", "adj_close"])?,
            volume: require(&["volume", "vol"])?,
        })
    }
}

// =============================================================================
// CSV Data Loading
// =============================================================================

/// Load bars from a CSV file with a header row.
///
/// Rows that fail to parse or validate are skipped with a warning. The result is
/// sorted by time with one bar per timestamp.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<PriceBar>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let columns = Columns::from_headers(reader.headers().context("Failed to read CSV header")?)?;

    let mut bars = Vec::new();
    let mut skipped = 0usize;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;
        match parse_row(&record, &columns) {
            Ok(bar) => bars.push(bar),
            Err(e) => {
                skipped += 1;
                warn!("{} row {}: {}", path.display(), row_idx + 1, e);
            }
        }
    }

    let bars: Vec<PriceBar> = bars
        .into_iter()
        .sorted_by_key(|b| b.timestamp)
        .dedup_by(|a, b| a.timestamp == b.timestamp)
        .collect();

    debug!(
        "{}: {} bars, {} rows skipped",
        path.display(),
        bars.len(),
        skipped
    );
    Ok(bars)
}

fn parse_row(record: &csv::StringRecord, columns: &Columns) -> Result<PriceBar> {
    let field = |idx: usize, name: &str| -> Result<f64> {
        record
            .get(idx)
            .with_context(|| format!("missing {}", name))?
            .parse::<f64>()
            .with_context(|| format!("invalid {}", name))
    };

    let raw_ts = record.get(columns.timestamp).context("missing timestamp")?;
    let timestamp =
        parse_timestamp(raw_ts).with_context(|| format!("invalid timestamp '{}'", raw_ts))?;

    let bar = PriceBar::new(
        timestamp,
        field(columns.open, "open")?,
        field(columns.high, "high")?,
        field(columns.low, "low")?,
        field(columns.close, "close")?,
        field(columns.volume, "volume")?,
    )?;
    Ok(bar)
}

pub fn data_path(data_dir: impl AsRef<Path>, symbol: &Symbol, timeframe: &str) -> PathBuf {
    data_dir
        .as_ref()
        .join(format!("{}_{}.csv", symbol.as_str(), timeframe))
}

/// Load and enrich bars for every symbol that has a data file.
///
/// Missing or empty files are skipped with a warning; it is an error if nothing loads.
pub fn load_universe(
    data_dir: impl AsRef<Path>,
    symbols: &[Symbol],
    timeframe: &str,
) -> Result<BTreeMap<Symbol, Vec<PriceBar>>> {
    let mut universe = BTreeMap::new();

    for symbol in symbols {
        let path = data_path(&data_dir, symbol, timeframe);
        if !path.exists() {
            warn!("Data file not found: {}", path.display());
            continue;
        }

        let mut bars = load_csv(&path).with_context(|| format!("Failed to load data for {}", symbol))?;
        if bars.is_empty() {
            warn!("No usable bars for {}", symbol);
            continue;
        }
        indicators::enrich(&mut bars);

        info!("Loaded {} bars for {}", bars.len(), symbol);
        universe.insert(symbol.clone(), bars);
    }

    if universe.is_empty() {
        bail!("No data loaded for any symbol");
    }

    Ok(universe)
}

/// Enriched index bars for the regime gate; `None` when there is no data file
pub fn load_index(
    data_dir: impl AsRef<Path>,
    symbol: &Symbol,
    timeframe: &str,
) -> Result<Option<Vec<PriceBar>>> {
    let path = data_path(&data_dir, symbol, timeframe);
    if !path.exists() {
        warn!(
            "Index file {} not found, market-regime gate disabled",
            path.display()
        );
        return Ok(None);
    }
    let mut bars = load_csv(&path).with_context(|| format!("Failed to load index {}", symbol))?;
    indicators::enrich(&mut bars);
    Ok(Some(bars))
}

/// Bars dated on or before `end`
pub fn history_until(bars: &[PriceBar], end: NaiveDate) -> &[PriceBar] {
    &bars[..bars.partition_point(|b| b.date() <= end)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_csv(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("momentum_scanner_{}_{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.csv", name));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        for raw in [
            "2024-03-01T00:00:00Z",
            "2024-03-01 00:00:00",
            "2024-03-01",
            "1709251200",
            "1709251200000",
        ] {
            assert_eq!(parse_timestamp(raw).unwrap().date_naive(), expected, "{}", raw);
        }
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2024-01-14").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 14).unwrap()
        );
        assert!(parse_date("14/01/2024").is_err());
    }

    #[test]
    fn test_load_csv_skips_bad_rows_and_sorts() {
        let path = temp_csv(
            "bars",
            "Date,Open,High,Low,Close,Volume\n\
             2024-01-03,10,11,9,10.5,1000\n\
             2024-01-02,10,11,9,10.2,900\n\
             2024-01-04,10,9,11,10,100\n\
             2024-01-05,abc,11,9,10,100\n\
             2024-01-02,10,11,9,10.2,900\n",
        );
        let bars = load_csv(&path).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date(), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(bars[1].close, 10.5);
    }

    #[test]
    fn test_missing_column_is_error() {
        let path = temp_csv("nocol", "date,open,high,low,close\n2024-01-02,1,1,1,1\n");
        assert!(load_csv(&path).is_err());
    }

    #[test]
    fn test_history_until() {
        let path = temp_csv(
            "hist",
            "timestamp,open,high,low,close,volume\n\
             2024-01-02,10,11,9,10,1\n\
             2024-01-03,10,11,9,10,1\n\
             2024-01-04,10,11,9,10,1\n",
        );
        let bars = load_csv(&path).unwrap();
        let cut = history_until(&bars, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
        assert_eq!(cut.len(), 2);
    }
}
