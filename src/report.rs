//! CSV export of scan results, trades, equity curves and walk-forward windows

use anyhow::{Context, Result};
use chrono::NaiveDate;
use itertools::Itertools;
use serde::Serialize;
use std::fs::{self, File};
use std::path::Path;
use tracing::info;

use crate::grid::format_params;
use crate::metrics::PerformanceMetrics;
use crate::optimizer::WindowResult;
use crate::signal::SignalEvaluation;
use crate::types::{ClosedTrade, EquityPoint};

fn writer(path: &Path) -> Result<csv::Writer<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    csv::Writer::from_path(path).with_context(|| format!("Failed to create {}", path.display()))
}

fn write_rows<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<usize> {
    let mut wtr = writer(path)?;
    let mut count = 0;
    for row in rows {
        wtr.serialize(row)
            .with_context(|| format!("Failed to write row to {}", path.display()))?;
        count += 1;
    }
    wtr.flush()?;
    info!("Wrote {} rows to {}", count, path.display());
    Ok(count)
}

// =============================================================================
// Trades and equity
// =============================================================================

#[derive(Serialize)]
struct TradeRow<'a> {
    symbol: &'a str,
    entry_date: NaiveDate,
    entry_price: f64,
    exit_date: NaiveDate,
    weighted_avg_exit_price: f64,
    shares: f64,
    initial_stop: f64,
    pnl_net: f64,
    commission_total: f64,
    r_multiple: f64,
    return_pct: f64,
    holding_days: i64,
    exit_reasons: String,
}

pub fn write_trades_csv(path: impl AsRef<Path>, trades: &[ClosedTrade]) -> Result<usize> {
    let rows = trades.iter().map(|t| TradeRow {
        symbol: t.symbol.as_str(),
        entry_date: t.entry_date,
        entry_price: t.entry_price,
        exit_date: t.exit_date,
        weighted_avg_exit_price: t.weighted_avg_exit_price,
        shares: t.shares,
        initial_stop: t.initial_stop,
        pnl_net: t.pnl_net,
        commission_total: t.commission_total,
        r_multiple: t.r_multiple,
        return_pct: t.return_pct(),
        holding_days: t.holding_days(),
        exit_reasons: t.exit_reasons.iter().join("|"),
    });
    write_rows(path.as_ref(), rows)
}

pub fn write_equity_csv(path: impl AsRef<Path>, curve: &[EquityPoint]) -> Result<usize> {
    write_rows(path.as_ref(), curve.iter())
}

// =============================================================================
// Walk-forward windows
// =============================================================================

#[derive(Serialize)]
struct WindowRow {
    train_start: NaiveDate,
    train_end: NaiveDate,
    test_start: NaiveDate,
    test_end: NaiveDate,
    params: String,
    #[serde(rename = "CAGR")]
    cagr: Option<f64>,
    #[serde(rename = "Sharpe")]
    sharpe: Option<f64>,
    #[serde(rename = "MaxDD")]
    max_drawdown: Option<f64>,
    #[serde(rename = "WinRate")]
    win_rate: Option<f64>,
    #[serde(rename = "AvgR")]
    avg_r: Option<f64>,
    #[serde(rename = "Expectancy")]
    expectancy: Option<f64>,
    #[serde(rename = "Trades")]
    trades: Option<usize>,
    #[serde(rename = "InSampleCAGR")]
    in_sample_cagr: Option<f64>,
    #[serde(rename = "InSampleObjective")]
    in_sample_objective: Option<f64>,
}

impl From<&WindowResult> for WindowRow {
    fn from(w: &WindowResult) -> Self {
        let oos = w.out_of_sample.as_ref();
        let pick = |f: fn(&PerformanceMetrics) -> f64| oos.map(f);
        WindowRow {
            train_start: w.train_start,
            train_end: w.train_end,
            test_start: w.test_start,
            test_end: w.test_end,
            params: w
                .chosen_parameters
                .as_ref()
                .map(format_params)
                .unwrap_or_default(),
            cagr: pick(|m| m.cagr),
            sharpe: pick(|m| m.sharpe),
            max_drawdown: pick(|m| m.max_drawdown),
            win_rate: pick(|m| m.win_rate),
            avg_r: pick(|m| m.avg_r),
            expectancy: pick(|m| m.expectancy),
            trades: oos.map(|m| m.total_trades),
            in_sample_cagr: w.in_sample.as_ref().map(|m| m.cagr),
            in_sample_objective: w.in_sample_metric,
        }
    }
}

/// One row per window; windows without a choice have empty metric cells
pub fn write_windows_csv(path: impl AsRef<Path>, windows: &[WindowResult]) -> Result<usize> {
    write_rows(path.as_ref(), windows.iter().map(WindowRow::from))
}

// =============================================================================
// Scan results
// =============================================================================

#[derive(Serialize)]
struct SignalRow<'a> {
    symbol: &'a str,
    date: NaiveDate,
    price: f64,
    entry_ok: bool,
    strength: u8,
    recommendation_score: f64,
    base_score: u8,
    filter_score: u8,
    alignment_ratio: f64,
    momentum_ratio: f64,
    momentum_zscore: f64,
    momentum_threshold: f64,
    risk_regime: String,
    stop_loss: f64,
    tp1: f64,
    tp2: f64,
    tp3: Option<f64>,
    risk_reward: f64,
    position_size: f64,
}

pub fn write_signals_csv(path: impl AsRef<Path>, signals: &[SignalEvaluation]) -> Result<usize> {
    let rows = signals.iter().map(|s| SignalRow {
        symbol: s.symbol.as_str(),
        date: s.date,
        price: s.price,
        entry_ok: s.entry_ok,
        strength: s.strength,
        recommendation_score: s.recommendation_score,
        base_score: s.base_score,
        filter_score: s.filter_score,
        alignment_ratio: s.alignment_ratio,
        momentum_ratio: s.momentum_ratio,
        momentum_zscore: s.momentum.dominant_zscore,
        momentum_threshold: s.momentum.effective_threshold,
        risk_regime: format!("{:?}", s.risk_regime).to_lowercase(),
        stop_loss: s.stop_loss,
        tp1: s.tp1,
        tp2: s.tp2,
        tp3: s.tp3,
        risk_reward: s.risk_reward,
        position_size: s.position_size,
    });
    write_rows(path.as_ref(), rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::ParameterSet;
    use crate::types::Symbol;
    use serde_json::json;

    fn out_dir(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("momentum_scanner_report_{}_{}", name, std::process::id()))
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_windows_csv_columns() {
        let windows = vec![
            WindowResult {
                train_start: d(1),
                train_end: d(10),
                test_start: d(11),
                test_end: d(15),
                chosen_parameters: Some(ParameterSet::from([(
                    "cooldown_days".to_string(),
                    json!(3),
                )])),
                in_sample_metric: Some(0.4),
                in_sample: Some(PerformanceMetrics {
                    cagr: 0.4,
                    ..Default::default()
                }),
                out_of_sample: Some(PerformanceMetrics {
                    cagr: 0.1,
                    total_trades: 2,
                    ..Default::default()
                }),
            },
            WindowResult {
                train_start: d(6),
                train_end: d(15),
                test_start: d(16),
                test_end: d(20),
                chosen_parameters: None,
                in_sample_metric: None,
                in_sample: None,
                out_of_sample: None,
            },
        ];

        let path = out_dir("windows").join("windows.csv");
        assert_eq!(write_windows_csv(&path, &windows).unwrap(), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "train_start,train_end,test_start,test_end,params,CAGR,Sharpe,MaxDD,WinRate,AvgR,Expectancy,Trades,InSampleCAGR,InSampleObjective"
        );
        assert!(lines.next().unwrap().starts_with("2024-01-01,2024-01-10,2024-01-11,2024-01-15,cooldown_days=3,0.1,"));
        assert_eq!(
            lines.next().unwrap(),
            "2024-01-06,2024-01-15,2024-01-16,2024-01-20,,,,,,,,,,"
        );
    }

    #[test]
    fn test_trades_csv() {
        let trade = ClosedTrade {
            symbol: Symbol::new("AAPL"),
            entry_date: d(2),
            entry_price: 100.0,
            exit_date: d(9),
            weighted_avg_exit_price: 122.7,
            shares: 10.0,
            initial_stop: 90.0,
            risk_per_share: 10.0,
            pnl_net: 227.0,
            commission_total: 0.0,
            r_multiple: 2.27,
            exit_reasons: vec!["tp1(50%)".into(), "tp2(30%)".into(), "trailing_stop(20%)".into()],
        };
        let path = out_dir("trades").join("trades.csv");
        write_trades_csv(&path, &[trade]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("tp1(50%)|tp2(30%)|trailing_stop(20%)"));
        assert!(text.starts_with("symbol,entry_date,entry_price,exit_date"));
    }
}
