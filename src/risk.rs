//! Position sizing and execution costs
//!
//! Sizing blends two budgets and takes the smaller:
//! ```text
//! kelly_budget = equity * kelly_fraction * kelly_estimate
//! risk_budget  = equity * risk_percent / 100
//! shares       = min(kelly_budget, risk_budget) / (entry - stop)
//! ```
//! then caps the notional at `max_allocation_pct * equity`.
//!
//! `kelly_fraction` is the user's damping factor and `kelly_estimate` comes
//! from realized trade statistics, so the two multiply. Both are kept as
//! separate parameters.
//!
//! All values are currency-agnostic: equity and prices only need to share a unit.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SimulationConfig;
use crate::error::{CoreError, CoreResult};
use crate::types::ClosedTrade;

pub const KELLY_MIN: f64 = 0.01;
pub const KELLY_MAX: f64 = 1.0;

// =============================================================================
// Kelly estimate
// =============================================================================

/// Win/loss statistics the Kelly estimate is computed from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KellyInputs {
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
}

impl Default for KellyInputs {
    /// Prior used until enough trades have closed
    fn default() -> Self {
        KellyInputs {
            win_rate: 0.5,
            avg_win: 2.0,
            avg_loss: 1.0,
        }
    }
}

impl KellyInputs {
    /// Observed statistics once more than `min_trades` trades exist, else the prior.
    /// A side with no observations keeps its prior value.
    pub fn from_trades(trades: &[ClosedTrade], min_trades: usize) -> Self {
        let prior = Self::default();
        if trades.len() <= min_trades {
            return prior;
        }

        let wins: Vec<f64> = trades
            .iter()
            .filter(|t| t.pnl_net > 0.0)
            .map(|t| t.pnl_net)
            .collect();
        let losses: Vec<f64> = trades
            .iter()
            .filter(|t| t.pnl_net <= 0.0)
            .map(|t| t.pnl_net.abs())
            .collect();

        let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
        let avg_win = if wins.is_empty() { prior.avg_win } else { mean(&wins) };
        let avg_loss = if losses.is_empty() { 0.0 } else { mean(&losses) };
        let avg_loss = if avg_loss > 0.0 { avg_loss } else { prior.avg_loss };

        KellyInputs {
            win_rate: wins.len() as f64 / trades.len() as f64,
            avg_win,
            avg_loss,
        }
    }

    /// `p - (1 - p) / b` with `b = avg_win / avg_loss`, clamped to [0.01, 1.0]
    pub fn kelly(&self) -> f64 {
        if self.avg_loss <= 0.0 || self.avg_win <= 0.0 {
            return KELLY_MIN;
        }
        let b = self.avg_win / self.avg_loss;
        let raw = self.win_rate - (1.0 - self.win_rate) / b;
        if raw.is_finite() {
            raw.clamp(KELLY_MIN, KELLY_MAX)
        } else {
            KELLY_MIN
        }
    }
}

// =============================================================================
// Execution costs
// =============================================================================

/// Slippage against the trader on both legs, commission on both notionals
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    pub commission_rate: f64,
    pub slippage_rate: f64,
}

/// Net result of closing `quantity` shares
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegResult {
    pub pnl_net: f64,
    pub commission: f64,
}

impl CostModel {
    pub fn from_config(config: &SimulationConfig) -> Self {
        CostModel {
            commission_rate: config.commission_rate(),
            slippage_rate: config.slippage_rate(),
        }
    }

    pub fn entry_exec(&self, price: f64) -> f64 {
        price * (1.0 + self.slippage_rate)
    }

    pub fn exit_exec(&self, price: f64) -> f64 {
        price * (1.0 - self.slippage_rate)
    }

    pub fn leg(&self, entry_price: f64, exit_price: f64, quantity: f64) -> LegResult {
        let entry_exec = self.entry_exec(entry_price);
        let exit_exec = self.exit_exec(exit_price);
        let commission = self.commission_rate * (entry_exec + exit_exec) * quantity;
        LegResult {
            pnl_net: (exit_exec - entry_exec) * quantity - commission,
            commission,
        }
    }
}

// =============================================================================
// Position sizing
// =============================================================================

/// Configuration for RiskManager using builder pattern
#[derive(Debug, Clone)]
pub struct RiskManagerConfig {
    pub kelly_fraction: f64,
    /// Percent of equity (2.0 = 2%)
    pub risk_percent: f64,
    /// Fraction of equity (0.10 = 10%)
    pub max_allocation_pct: f64,
    pub max_open_positions: usize,
}

impl Default for RiskManagerConfig {
    fn default() -> Self {
        Self {
            kelly_fraction: 0.5,
            risk_percent: 2.0,
            max_allocation_pct: 0.10,
            max_open_positions: 10,
        }
    }
}

impl RiskManagerConfig {
    pub fn from_simulation(config: &SimulationConfig) -> Self {
        Self::default()
            .with_kelly_fraction(config.kelly_fraction)
            .with_risk_percent(config.risk_percent)
            .with_max_allocation_pct(config.max_allocation_pct)
            .with_max_open_positions(config.max_open_positions)
    }

    pub fn with_kelly_fraction(mut self, fraction: f64) -> Self {
        self.kelly_fraction = fraction;
        self
    }

    /// Set risk per trade in percent (e.g., 2.0 = 2%)
    pub fn with_risk_percent(mut self, risk: f64) -> Self {
        self.risk_percent = risk;
        self
    }

    pub fn with_max_allocation_pct(mut self, pct: f64) -> Self {
        self.max_allocation_pct = pct;
        self
    }

    pub fn with_max_open_positions(mut self, max: usize) -> Self {
        self.max_open_positions = max;
        self
    }

    pub fn build(self) -> RiskManager {
        RiskManager { config: self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSize {
    pub shares: f64,
    pub risk_per_share: f64,
    /// Dollar risk budget before the allocation cap
    pub risk_budget: f64,
    pub capped: bool,
}

/// Stateless sizing rules; the caller supplies equity and the Kelly estimate
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskManagerConfig,
}

impl RiskManager {
    pub fn new(config: RiskManagerConfig) -> Self {
        RiskManager { config }
    }

    pub fn config(&self) -> &RiskManagerConfig {
        &self.config
    }

    pub fn can_open_position(&self, open_positions: usize) -> bool {
        open_positions < self.config.max_open_positions
    }

    /// Shares for a long entry at `entry` with initial stop `stop`.
    ///
    /// Non-positive per-share risk or equity is a `SimulationInconsistency`:
    /// the entry is skipped.
    pub fn size_position(
        &self,
        equity: f64,
        entry: f64,
        stop: f64,
        kelly: f64,
    ) -> CoreResult<PositionSize> {
        let risk_per_share = entry - stop;
        if !(risk_per_share > 0.0) || !risk_per_share.is_finite() {
            return Err(CoreError::SimulationInconsistency(format!(
                "non-positive per-share risk: entry {:.4}, stop {:.4}",
                entry, stop
            )));
        }
        if !(equity > 0.0) {
            return Err(CoreError::SimulationInconsistency(format!(
                "non-positive equity {:.2}",
                equity
            )));
        }

        let kelly_budget = equity * self.config.kelly_fraction * kelly;
        let percent_budget = equity * self.config.risk_percent / 100.0;
        let risk_budget = kelly_budget.min(percent_budget);

        let mut shares = risk_budget / risk_per_share;
        let max_shares = self.config.max_allocation_pct * equity / entry;
        let capped = shares > max_shares;
        if capped {
            debug!(
                "Position capped by allocation: {:.4} -> {:.4} shares",
                shares, max_shares
            );
            shares = max_shares;
        }

        if !(shares > 0.0) {
            return Err(CoreError::SimulationInconsistency(format!(
                "computed share count {:.6} is not positive",
                shares
            )));
        }

        Ok(PositionSize {
            shares,
            risk_per_share,
            risk_budget,
            capped,
        })
    }
}
