//! Open position exit state machine
//!
//! ```text
//! OPEN(100%) --TP1--> PARTIAL(50%, stop >= entry) --TP2--> PARTIAL(20%, trailing) --stop--> CLOSED
//!      \__________________________stop / timeout______________________________________/
//! ```
//!
//! Each bar is processed in a fixed order: track the high, stop breach, TP1,
//! TP2, trailing ratchet. The stop never moves down. The remaining size is
//! tracked in basis points so the fills always add up to exactly 100%.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{checked_ratio, CoreError, CoreResult};
use crate::risk::CostModel;
use crate::types::{ClosedTrade, ExitReason, PriceBar};
use crate::Symbol;

/// 100% of the position, in basis points
pub const FULL_BPS: u32 = 10_000;
pub const TP1_FILL_BPS: u32 = 5_000;
pub const TP2_FILL_BPS: u32 = 3_000;

/// One partial (or final) exit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitLeg {
    pub date: NaiveDate,
    pub price: f64,
    pub fraction_bps: u32,
    pub reason: ExitReason,
    pub pnl_net: f64,
    pub commission: f64,
}

impl ExitLeg {
    pub fn fraction(&self) -> f64 {
        self.fraction_bps as f64 / FULL_BPS as f64
    }

    /// e.g. `tp1(50%)`
    pub fn label(&self) -> String {
        let pct = self.fraction_bps as f64 / 100.0;
        if pct.fract() == 0.0 {
            format!("{}({}%)", self.reason, pct as u32)
        } else {
            format!("{}({:.2}%)", self.reason, pct)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub symbol: Symbol,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub initial_stop: f64,
    /// Current stop; only ever raised
    pub stop_loss: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub shares: f64,
    pub highest_favorable_price: f64,
    pub trailing_active: bool,
    /// `k * (entry - initial_stop) / 2`
    pub trailing_distance: f64,
    remaining_bps: u32,
    legs: Vec<ExitLeg>,
}

impl OpenPosition {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        symbol: Symbol,
        entry_date: NaiveDate,
        entry_price: f64,
        stop: f64,
        tp1: f64,
        tp2: f64,
        shares: f64,
        trailing_atr_mult: f64,
    ) -> CoreResult<Self> {
        if !(stop < entry_price) {
            return Err(CoreError::SimulationInconsistency(format!(
                "{}: stop {:.4} is not below entry {:.4}",
                symbol, stop, entry_price
            )));
        }
        if !(tp1 > entry_price && tp2 >= tp1) {
            return Err(CoreError::SimulationInconsistency(format!(
                "{}: targets {:.4}/{:.4} not above entry {:.4}",
                symbol, tp1, tp2, entry_price
            )));
        }
        if !(shares > 0.0) || !shares.is_finite() {
            return Err(CoreError::SimulationInconsistency(format!(
                "{}: share count {} is not positive",
                symbol, shares
            )));
        }

        let atr_estimate = (entry_price - stop) / 2.0;
        Ok(OpenPosition {
            symbol,
            entry_date,
            entry_price,
            initial_stop: stop,
            stop_loss: stop,
            tp1,
            tp2,
            shares,
            highest_favorable_price: entry_price,
            trailing_active: false,
            trailing_distance: trailing_atr_mult * atr_estimate,
            remaining_bps: FULL_BPS,
            legs: Vec::new(),
        })
    }

    pub fn remaining_bps(&self) -> u32 {
        self.remaining_bps
    }

    pub fn remaining_fraction(&self) -> f64 {
        self.remaining_bps as f64 / FULL_BPS as f64
    }

    pub fn remaining_shares(&self) -> f64 {
        self.shares * self.remaining_fraction()
    }

    pub fn is_closed(&self) -> bool {
        self.remaining_bps == 0
    }

    pub fn legs(&self) -> &[ExitLeg] {
        &self.legs
    }

    pub fn risk_per_share(&self) -> f64 {
        self.entry_price - self.initial_stop
    }

    /// Unrealized P&L of the open remainder at `price`, before exit costs
    pub fn unrealized_pnl(&self, price: f64, costs: &CostModel) -> f64 {
        (price - costs.entry_exec(self.entry_price)) * self.remaining_shares()
    }

    /// Apply one daily bar. Returns the net P&L realized by fills on this bar.
    pub fn on_bar(&mut self, date: NaiveDate, bar: &PriceBar, costs: &CostModel) -> f64 {
        if self.is_closed() {
            return 0.0;
        }
        self.highest_favorable_price = self.highest_favorable_price.max(bar.high);

        // 1. stop breach closes everything that is left
        if bar.low <= self.stop_loss {
            let reason = self.stop_reason();
            return self.fill(date, self.stop_loss, self.remaining_bps, reason, costs);
        }

        let mut realized = 0.0;

        // 2. first target: half off, stop to breakeven
        if self.remaining_bps == FULL_BPS && bar.high >= self.tp1 {
            realized += self.fill(date, self.tp1, TP1_FILL_BPS, ExitReason::TakeProfit1, costs);
            self.raise_stop(self.entry_price);
        }

        // 3. second target: 30% off, trailing starts
        if self.remaining_bps >= FULL_BPS - TP1_FILL_BPS && bar.high >= self.tp2 {
            realized += self.fill(date, self.tp2, TP2_FILL_BPS, ExitReason::TakeProfit2, costs);
            self.trailing_active = true;
        }

        // 4. runner follows the high
        if self.trailing_active {
            self.raise_stop(self.highest_favorable_price - self.trailing_distance);
        }

        realized
    }

    /// Close the remainder at `price` (timeout, end of window)
    pub fn force_close(
        &mut self,
        date: NaiveDate,
        price: f64,
        reason: ExitReason,
        costs: &CostModel,
    ) -> f64 {
        if self.is_closed() {
            return 0.0;
        }
        self.fill(date, price, self.remaining_bps, reason, costs)
    }

    /// Aggregate the fills into one record. Errors while part of the position is open.
    pub fn into_closed_trade(self) -> CoreResult<ClosedTrade> {
        if !self.is_closed() {
            return Err(CoreError::SimulationInconsistency(format!(
                "{}: {} bps still open",
                self.symbol, self.remaining_bps
            )));
        }

        let total_bps: u32 = self.legs.iter().map(|l| l.fraction_bps).sum();
        let weighted: f64 = self
            .legs
            .iter()
            .map(|l| l.price * l.fraction_bps as f64)
            .sum();
        let weighted_avg_exit_price = weighted / total_bps as f64;
        let pnl_net: f64 = self.legs.iter().map(|l| l.pnl_net).sum();
        let commission_total: f64 = self.legs.iter().map(|l| l.commission).sum();
        let risk_per_share = self.risk_per_share();
        let r_multiple = checked_ratio(pnl_net, risk_per_share * self.shares).unwrap_or(0.0);
        let exit_date = self.legs.last().map(|l| l.date).unwrap_or(self.entry_date);

        Ok(ClosedTrade {
            symbol: self.symbol,
            entry_date: self.entry_date,
            entry_price: self.entry_price,
            exit_date,
            weighted_avg_exit_price,
            shares: self.shares,
            initial_stop: self.initial_stop,
            risk_per_share,
            pnl_net,
            commission_total,
            r_multiple,
            exit_reasons: self.legs.iter().map(ExitLeg::label).collect(),
        })
    }

    fn stop_reason(&self) -> ExitReason {
        if self.trailing_active {
            ExitReason::TrailingStop
        } else if self.stop_loss > self.initial_stop {
            ExitReason::BreakevenStop
        } else {
            ExitReason::StopLoss
        }
    }

    fn raise_stop(&mut self, candidate: f64) {
        if candidate > self.stop_loss {
            self.stop_loss = candidate;
        }
    }

    fn fill(
        &mut self,
        date: NaiveDate,
        price: f64,
        bps: u32,
        reason: ExitReason,
        costs: &CostModel,
    ) -> f64 {
        let bps = bps.min(self.remaining_bps);
        if bps == 0 {
            return 0.0;
        }
        let quantity = self.shares * bps as f64 / FULL_BPS as f64;
        let leg = costs.leg(self.entry_price, price, quantity);
        self.remaining_bps -= bps;
        self.legs.push(ExitLeg {
            date,
            price,
            fraction_bps: bps,
            reason,
            pnl_net: leg.pnl_net,
            commission: leg.commission,
        });
        leg.pnl_net
    }
}
