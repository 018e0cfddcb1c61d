//! Performance metrics for a finished simulation
//!
//! All metrics are computed from the closed trades and the daily equity curve
//! produced by the simulator. A run without trades has no metrics at all.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::types::{ClosedTrade, EquityPoint};

/// US equity trading days, used to annualize the Sharpe ratio
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

const CALENDAR_DAYS_PER_YEAR: f64 = 365.0;

/// Std below this is treated as zero volatility
const STD_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Compound annual growth rate, as a fraction
    pub cagr: f64,
    pub sharpe: f64,
    /// Worst peak-to-trough move, as a negative fraction (0 when equity never fell)
    pub max_drawdown: f64,
    /// Winning trades in percent
    pub win_rate: f64,
    pub avg_r: f64,
    /// Expected R per trade
    pub expectancy: f64,
    pub total_trades: usize,
    /// Total return, as a fraction
    pub total_return: f64,
    pub profit_factor: f64,
    pub total_commission: f64,
    pub ending_equity: f64,
}

/// Compute metrics for one run. `None` when no trade was closed.
pub fn compute(
    trades: &[ClosedTrade],
    equity_curve: &[EquityPoint],
    starting_equity: f64,
) -> Option<PerformanceMetrics> {
    if trades.is_empty() || starting_equity <= 0.0 {
        return None;
    }

    let realized_end = starting_equity + trades.iter().map(|t| t.pnl_net).sum::<f64>();
    let ending_equity = equity_curve.last().map_or(realized_end, |p| p.equity);
    let total_return = ending_equity / starting_equity - 1.0;

    // ========================================================================
    // Trade statistics
    // ========================================================================

    let total_trades = trades.len();
    let winners: Vec<&ClosedTrade> = trades.iter().filter(|t| t.is_winner()).collect();
    let losers: Vec<&ClosedTrade> = trades.iter().filter(|t| !t.is_winner()).collect();

    let p_win = winners.len() as f64 / total_trades as f64;
    let win_rate = p_win * 100.0;

    let r_values: Vec<f64> = trades.iter().map(|t| t.r_multiple).collect();
    let avg_r = r_values.iter().sum::<f64>() / total_trades as f64;

    let avg_win_r = mean_or_zero(winners.iter().map(|t| t.r_multiple));
    let avg_loss_r = mean_or_zero(losers.iter().map(|t| t.r_multiple));
    let expectancy = p_win * avg_win_r + (1.0 - p_win) * avg_loss_r;

    let gross_profits: f64 = winners.iter().map(|t| t.pnl_net).sum();
    let gross_losses: f64 = losers.iter().map(|t| t.pnl_net.abs()).sum();
    let profit_factor = if gross_losses > 0.0 {
        gross_profits / gross_losses
    } else {
        0.0
    };

    let total_commission: f64 = trades.iter().map(|t| t.commission_total).sum();

    // ========================================================================
    // Equity curve statistics
    // ========================================================================

    let cagr = cagr(equity_curve, starting_equity, ending_equity);
    let sharpe = sharpe(equity_curve, starting_equity);
    let max_drawdown = max_drawdown(equity_curve);

    Some(PerformanceMetrics {
        cagr,
        sharpe,
        max_drawdown,
        win_rate,
        avg_r,
        expectancy,
        total_trades,
        total_return,
        profit_factor,
        total_commission,
        ending_equity,
    })
}

fn mean_or_zero(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// `(end / start)^(365 / days) - 1` over the calendar span of the curve
fn cagr(equity_curve: &[EquityPoint], starting_equity: f64, ending_equity: f64) -> f64 {
    let (Some(first), Some(last)) = (equity_curve.first(), equity_curve.last()) else {
        return 0.0;
    };
    let days = (last.date - first.date).num_days().max(1) as f64;
    if ending_equity <= 0.0 {
        return -1.0;
    }
    (ending_equity / starting_equity).powf(CALENDAR_DAYS_PER_YEAR / days) - 1.0
}

/// Annualized Sharpe of daily equity returns (population std, no risk-free rate).
/// The first day is measured against the starting equity.
fn sharpe(equity_curve: &[EquityPoint], starting_equity: f64) -> f64 {
    if equity_curve.is_empty() {
        return 0.0;
    }
    let mut prev = starting_equity;
    let mut returns = Vec::with_capacity(equity_curve.len());
    for point in equity_curve {
        returns.push(if prev > 0.0 { point.equity / prev - 1.0 } else { 0.0 });
        prev = point.equity;
    }

    let std_dev = returns.as_slice().population_std_dev();
    if !std_dev.is_finite() || std_dev <= STD_EPSILON {
        return 0.0;
    }
    returns.as_slice().mean() / std_dev * TRADING_DAYS_PER_YEAR.sqrt()
}

/// `min(equity / running_max - 1)`
fn max_drawdown(equity_curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for point in equity_curve {
        peak = peak.max(point.equity);
        if peak > 0.0 {
            worst = worst.min(point.equity / peak - 1.0);
        }
    }
    worst
}

// ============================================================================
// Objective
// ============================================================================

/// Metric the walk-forward optimizer maximizes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    #[default]
    Cagr,
    Sharpe,
    /// Shallowest drawdown wins
    MaxDrawdown,
    WinRate,
    AvgR,
    Expectancy,
    ProfitFactor,
}

impl Objective {
    /// Higher is better for every objective
    pub fn score(&self, metrics: &PerformanceMetrics) -> f64 {
        match self {
            Objective::Cagr => metrics.cagr,
            Objective::Sharpe => metrics.sharpe,
            Objective::MaxDrawdown => metrics.max_drawdown,
            Objective::WinRate => metrics.win_rate,
            Objective::AvgR => metrics.avg_r,
            Objective::Expectancy => metrics.expectancy,
            Objective::ProfitFactor => metrics.profit_factor,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Objective::Cagr => "cagr",
            Objective::Sharpe => "sharpe",
            Objective::MaxDrawdown => "max_drawdown",
            Objective::WinRate => "win_rate",
            Objective::AvgR => "avg_r",
            Objective::Expectancy => "expectancy",
            Objective::ProfitFactor => "profit_factor",
        }
    }
}

impl FromStr for Objective {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cagr" => Ok(Objective::Cagr),
            "sharpe" => Ok(Objective::Sharpe),
            "max_drawdown" | "maxdd" => Ok(Objective::MaxDrawdown),
            "win_rate" | "winrate" => Ok(Objective::WinRate),
            "avg_r" | "avgr" => Ok(Objective::AvgR),
            "expectancy" => Ok(Objective::Expectancy),
            "profit_factor" => Ok(Objective::ProfitFactor),
            other => Err(format!("unknown objective: {}", other)),
        }
    }
}

impl std::fmt::Display for Objective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Symbol;
    use approx::assert_relative_eq;
    use chrono::{Duration, NaiveDate};

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(n)
    }

    fn trade(pnl: f64, r: f64) -> ClosedTrade {
        ClosedTrade {
            symbol: Symbol::new("TEST"),
            entry_date: day(0),
            entry_price: 100.0,
            exit_date: day(5),
            weighted_avg_exit_price: 100.0 + r * 10.0,
            shares: 10.0,
            initial_stop: 90.0,
            risk_per_share: 10.0,
            pnl_net: pnl,
            commission_total: 1.0,
            r_multiple: r,
            exit_reasons: vec!["tp1(100%)".to_string()],
        }
    }

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint {
                date: day(i as i64),
                equity,
                realized: equity,
                open_positions: 0,
            })
            .collect()
    }

    #[test]
    fn test_no_trades_has_no_metrics() {
        assert!(compute(&[], &curve(&[100.0, 101.0]), 100.0).is_none());
    }

    #[test]
    fn test_trade_statistics() {
        let trades = vec![trade(200.0, 2.0), trade(100.0, 1.0), trade(-100.0, -1.0)];
        let m = compute(&trades, &curve(&[10_000.0, 10_200.0]), 10_000.0).unwrap();

        assert_eq!(m.total_trades, 3);
        assert_relative_eq!(m.win_rate, 200.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(m.avg_r, 2.0 / 3.0, epsilon = 1e-9);
        // 2/3 * 1.5 + 1/3 * -1
        assert_relative_eq!(m.expectancy, 2.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(m.profit_factor, 3.0, epsilon = 1e-9);
        assert_relative_eq!(m.total_commission, 3.0, epsilon = 1e-9);
        assert_relative_eq!(m.total_return, 0.02, epsilon = 1e-9);
    }

    #[test]
    fn test_profit_factor_without_losses() {
        let m = compute(&[trade(50.0, 0.5)], &curve(&[100.0, 150.0]), 100.0).unwrap();
        assert_eq!(m.profit_factor, 0.0);
    }

    #[test]
    fn test_max_drawdown() {
        let dd = max_drawdown(&curve(&[100.0, 120.0, 90.0, 130.0, 117.0]));
        assert_relative_eq!(dd, -0.25, epsilon = 1e-12);
        assert_eq!(max_drawdown(&curve(&[100.0, 101.0, 102.0])), 0.0);
    }

    #[test]
    fn test_cagr_over_one_year() {
        let mut points = curve(&[100.0, 110.0]);
        points[1].date = day(365);
        assert_relative_eq!(cagr(&points, 100.0, 110.0), 0.10, epsilon = 1e-12);
    }

    #[test]
    fn test_sharpe_flat_curve_is_zero() {
        assert_eq!(sharpe(&curve(&[100.0, 100.0, 100.0]), 100.0), 0.0);
        assert!(sharpe(&curve(&[100.0, 101.0, 100.5, 102.0]), 100.0) > 0.0);
    }

    #[test]
    fn test_objective_parse_and_score() {
        assert_eq!("CAGR".parse::<Objective>(), Ok(Objective::Cagr));
        assert_eq!("maxdd".parse::<Objective>(), Ok(Objective::MaxDrawdown));
        assert!("nope".parse::<Objective>().is_err());

        let m = PerformanceMetrics {
            sharpe: 1.5,
            max_drawdown: -0.2,
            ..Default::default()
        };
        assert_eq!(Objective::Sharpe.score(&m), 1.5);
        assert_eq!(Objective::MaxDrawdown.score(&m), -0.2);
    }
}
