//! Portfolio trade simulator
//!
//! Day-by-day replay over a symbol universe. Each day, open positions are
//! managed against that day's bar first; then, if the market-regime gate is
//! open, flat symbols are evaluated for entries. Entries fill at the signal
//! day's close and are only checked for exits from the next bar on, so no
//! decision ever sees a bar beyond the day being simulated.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SimulationConfig;
use crate::error::{CoreError, CoreResult};
use crate::metrics::{self, PerformanceMetrics};
use crate::position::OpenPosition;
use crate::regime::MarketRegimeGate;
use crate::risk::{CostModel, KellyInputs, RiskManager, RiskManagerConfig};
use crate::signal::{SignalEvaluation, SignalSource};
use crate::types::{ClosedTrade, EquityPoint, ExitReason, PriceBar, Symbol};

/// Capital and history of one simulation run. Only the simulator writes to it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioLedger {
    pub starting_equity: f64,
    /// Starting equity plus every realized leg so far
    pub realized_equity: f64,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<ClosedTrade>,
}

impl PortfolioLedger {
    pub fn new(starting_equity: f64) -> Self {
        PortfolioLedger {
            starting_equity,
            realized_equity: starting_equity,
            equity_curve: Vec::new(),
            trades: Vec::new(),
        }
    }

    fn realize(&mut self, pnl: f64) {
        self.realized_equity += pnl;
    }

    fn record_trade(&mut self, trade: ClosedTrade) {
        debug!(
            "Closed {} {} -> {} pnl {:.2} R {:.2} [{}]",
            trade.symbol,
            trade.entry_date,
            trade.exit_date,
            trade.pnl_net,
            trade.r_multiple,
            trade.exit_reasons.join(", ")
        );
        self.trades.push(trade);
    }

    /// Most recent exit date for `symbol`
    pub fn last_exit(&self, symbol: &Symbol) -> Option<NaiveDate> {
        self.trades
            .iter()
            .rev()
            .find(|t| &t.symbol == symbol)
            .map(|t| t.exit_date)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulationResult {
    pub ledger: PortfolioLedger,
    /// `None` when the run closed no trades
    pub metrics: Option<PerformanceMetrics>,
}

impl SimulationResult {
    pub fn trades(&self) -> &[ClosedTrade] {
        &self.ledger.trades
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.ledger.equity_curve
    }
}

/// Whether a new entry on `date` clears the cooldown after the previous exit.
/// Entries on or before `exit + cooldown_days` are rejected.
pub fn cooldown_clear(last_exit: Option<NaiveDate>, date: NaiveDate, cooldown_days: i64) -> bool {
    match last_exit {
        Some(exit) => (date - exit).num_days() > cooldown_days,
        None => true,
    }
}

/// Number of bars in `bars` dated on or before `date`
fn bars_through(bars: &[PriceBar], date: NaiveDate) -> usize {
    bars.partition_point(|b| b.date() <= date)
}

/// The bar dated exactly `date`, if the symbol traded that day
fn bar_on(bars: &[PriceBar], date: NaiveDate) -> Option<&PriceBar> {
    let n = bars_through(bars, date);
    n.checked_sub(1)
        .and_then(|i| bars.get(i))
        .filter(|b| b.date() == date)
}

pub struct TradeSimulator {
    config: SimulationConfig,
    costs: CostModel,
    risk: RiskManager,
}

impl TradeSimulator {
    /// Fails with `ConfigurationInvalid` before anything is simulated
    pub fn new(config: SimulationConfig) -> CoreResult<Self> {
        config.validate()?;
        let costs = CostModel::from_config(&config);
        let risk = RiskManagerConfig::from_simulation(&config).build();
        Ok(TradeSimulator {
            config,
            costs,
            risk,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Replay `[start, end]` over the union of trading dates in `universe`.
    ///
    /// Bars must carry enriched indicators. Signals only ever see history up to
    /// and including the day being simulated.
    pub fn run(
        &self,
        universe: &BTreeMap<Symbol, Vec<PriceBar>>,
        gate: &MarketRegimeGate,
        source: &dyn SignalSource,
        start: NaiveDate,
        end: NaiveDate,
    ) -> SimulationResult {
        let mut ledger = PortfolioLedger::new(self.config.starting_equity);

        let dates: BTreeSet<NaiveDate> = universe
            .values()
            .flat_map(|bars| bars.iter().map(PriceBar::date))
            .filter(|d| *d >= start && *d <= end)
            .collect();

        if dates.is_empty() {
            warn!("No bars between {} and {}", start, end);
            return SimulationResult {
                ledger,
                metrics: None,
            };
        }

        let mut positions: BTreeMap<Symbol, OpenPosition> = BTreeMap::new();

        for &date in &dates {
            self.manage_positions(universe, &mut positions, &mut ledger, date);

            if gate.allows_entries(date) {
                self.open_entries(universe, source, &mut positions, &ledger, date);
            } else {
                debug!("{}: regime gate closed, no new entries", date);
            }

            let point = self.mark_to_market(universe, &positions, &ledger, date);
            ledger.equity_curve.push(point);
        }

        self.close_remaining(universe, positions, &mut ledger, end);

        let metrics = metrics::compute(
            &ledger.trades,
            &ledger.equity_curve,
            ledger.starting_equity,
        );

        info!(
            "Simulated {} days {} -> {}: {} trades, equity {:.2} -> {:.2}",
            dates.len(),
            start,
            end,
            ledger.trades.len(),
            ledger.starting_equity,
            ledger.realized_equity
        );

        SimulationResult { ledger, metrics }
    }

    // ========================================================================
    // Daily steps
    // ========================================================================

    /// Exits and timeouts against today's bar. Runs even when the gate is closed.
    fn manage_positions(
        &self,
        universe: &BTreeMap<Symbol, Vec<PriceBar>>,
        positions: &mut BTreeMap<Symbol, OpenPosition>,
        ledger: &mut PortfolioLedger,
        date: NaiveDate,
    ) {
        let mut closed = Vec::new();

        for (symbol, position) in positions.iter_mut() {
            let Some(bar) = universe.get(symbol).and_then(|bars| bar_on(bars, date)) else {
                continue;
            };

            ledger.realize(position.on_bar(date, bar, &self.costs));

            if !position.is_closed() {
                if let Some(max_days) = self.config.max_holding_days {
                    if (date - position.entry_date).num_days() >= max_days {
                        ledger.realize(position.force_close(
                            date,
                            bar.close,
                            ExitReason::Timeout,
                            &self.costs,
                        ));
                    }
                }
            }

            if position.is_closed() {
                closed.push(symbol.clone());
            }
        }

        for symbol in closed {
            if let Some(position) = positions.remove(&symbol) {
                self.finish(position, ledger);
            }
        }
    }

    fn open_entries(
        &self,
        universe: &BTreeMap<Symbol, Vec<PriceBar>>,
        source: &dyn SignalSource,
        positions: &mut BTreeMap<Symbol, OpenPosition>,
        ledger: &PortfolioLedger,
        date: NaiveDate,
    ) {
        if !self.risk.can_open_position(positions.len()) {
            return;
        }

        let candidates: Vec<(&Symbol, &[PriceBar])> = universe
            .iter()
            .filter(|(symbol, _)| !positions.contains_key(*symbol))
            .filter(|(symbol, _)| {
                cooldown_clear(ledger.last_exit(symbol), date, self.config.cooldown_days)
            })
            .filter_map(|(symbol, bars)| {
                let n = bars_through(bars, date);
                let history = &bars[..n];
                history
                    .last()
                    .filter(|b| b.date() == date)
                    .map(|_| (symbol, history))
            })
            .collect();

        let signals: Vec<SignalEvaluation> = candidates
            .par_iter()
            .filter_map(|(symbol, history)| match source.signal(symbol, history) {
                Ok(eval) if eval.entry_ok => Some(eval),
                Ok(_) => None,
                Err(CoreError::DataInsufficient(msg)) => {
                    debug!("{}: {}", date, msg);
                    None
                }
                Err(e) => {
                    warn!("{} {}: signal failed: {}", date, symbol, e);
                    None
                }
            })
            .collect();

        if signals.is_empty() {
            return;
        }
        let kelly = KellyInputs::from_trades(&ledger.trades, self.config.kelly_min_trades).kelly();

        for signal in signals {
            if !self.risk.can_open_position(positions.len()) {
                debug!("{}: max open positions reached", date);
                break;
            }
            match self.open_position(&signal, ledger.realized_equity, kelly, date) {
                Ok(position) => {
                    debug!(
                        "Opened {} {} @ {:.2} x {:.4} (stop {:.2}, tp1 {:.2}, tp2 {:.2})",
                        position.symbol,
                        date,
                        position.entry_price,
                        position.shares,
                        position.stop_loss,
                        position.tp1,
                        position.tp2
                    );
                    positions.insert(position.symbol.clone(), position);
                }
                Err(e) => debug!("{} {}: entry skipped: {}", date, signal.symbol, e),
            }
        }
    }

    fn open_position(
        &self,
        signal: &SignalEvaluation,
        equity: f64,
        kelly: f64,
        date: NaiveDate,
    ) -> CoreResult<OpenPosition> {
        let entry = signal.price;
        let (stop, tp1, tp2) = match self.config.exit_multiples {
            Some(m) => (
                entry - m.stop * signal.atr,
                entry + m.tp1 * signal.atr,
                entry + m.tp2 * signal.atr,
            ),
            None => (signal.stop_loss, signal.tp1, signal.tp2),
        };

        let size = self.risk.size_position(equity, entry, stop, kelly)?;
        OpenPosition::open(
            signal.symbol.clone(),
            date,
            entry,
            stop,
            tp1,
            tp2,
            size.shares,
            self.config.trailing_atr_mult,
        )
    }

    /// Realized equity plus open remainders marked at their latest close
    fn mark_to_market(
        &self,
        universe: &BTreeMap<Symbol, Vec<PriceBar>>,
        positions: &BTreeMap<Symbol, OpenPosition>,
        ledger: &PortfolioLedger,
        date: NaiveDate,
    ) -> EquityPoint {
        let unrealized: f64 = positions
            .iter()
            .filter_map(|(symbol, position)| {
                let bars = universe.get(symbol)?;
                let n = bars_through(bars, date);
                let close = bars.get(n.checked_sub(1)?)?.close;
                Some(position.unrealized_pnl(close, &self.costs))
            })
            .sum();

        EquityPoint {
            date,
            equity: ledger.realized_equity + unrealized,
            realized: ledger.realized_equity,
            open_positions: positions.len(),
        }
    }

    /// Force-close what is still open at the last close on or before `end`
    fn close_remaining(
        &self,
        universe: &BTreeMap<Symbol, Vec<PriceBar>>,
        positions: BTreeMap<Symbol, OpenPosition>,
        ledger: &mut PortfolioLedger,
        end: NaiveDate,
    ) {
        if positions.is_empty() {
            return;
        }

        for (symbol, mut position) in positions {
            let last = universe.get(&symbol).and_then(|bars| {
                let n = bars_through(bars, end);
                n.checked_sub(1).and_then(|i| bars.get(i))
            });
            let Some(bar) = last else {
                warn!("{}: no bar to close the position at", symbol);
                continue;
            };
            let date = bar.date().max(position.entry_date);
            ledger.realize(position.force_close(date, bar.close, ExitReason::Timeout, &self.costs));
            self.finish(position, ledger);
        }

        // the last mark excluded exit costs; book the final realized value
        if let Some(last) = ledger.equity_curve.last_mut() {
            last.equity = ledger.realized_equity;
            last.realized = ledger.realized_equity;
            last.open_positions = 0;
        }
    }

    fn finish(&self, position: OpenPosition, ledger: &mut PortfolioLedger) {
        match position.into_closed_trade() {
            Ok(trade) => ledger.record_trade(trade),
            Err(e) => warn!("Dropping inconsistent position: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AtrMultiples;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashSet;

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(n)
    }

    fn ymd(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn bar(n: i64, high: f64, low: f64, close: f64) -> PriceBar {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n);
        PriceBar::new_unchecked(ts, close, high, low, close, 1e6)
    }

    /// Emits an entry on the scripted dates (or every day), at the close with a fixed ATR
    struct ScriptedSource {
        dates: Option<HashSet<NaiveDate>>,
        atr: f64,
    }

    impl SignalSource for ScriptedSource {
        fn signal(&self, symbol: &Symbol, history: &[PriceBar]) -> CoreResult<SignalEvaluation> {
            let bar = history
                .last()
                .ok_or_else(|| CoreError::DataInsufficient("empty".into()))?;
            let date = bar.date();
            Ok(SignalEvaluation {
                symbol: symbol.clone(),
                date,
                price: bar.close,
                atr: self.atr,
                entry_ok: self.dates.as_ref().map_or(true, |d| d.contains(&date)),
                stop_loss: bar.close - 2.0 * self.atr,
                tp1: bar.close + 4.0 * self.atr,
                tp2: bar.close + 6.0 * self.atr,
                ..Default::default()
            })
        }
    }

    fn flat_series(days: i64) -> Vec<PriceBar> {
        (0..days).map(|n| bar(n, 101.0, 99.0, 100.0)).collect()
    }

    fn universe(bars: Vec<PriceBar>) -> BTreeMap<Symbol, Vec<PriceBar>> {
        let mut u = BTreeMap::new();
        u.insert(Symbol::new("X"), bars);
        u
    }

    #[test]
    fn test_cooldown_clear() {
        let exit = Some(ymd(1, 10));
        assert!(!cooldown_clear(exit, ymd(1, 12), 3));
        assert!(!cooldown_clear(exit, ymd(1, 13), 3));
        assert!(cooldown_clear(exit, ymd(1, 14), 3));
        assert!(cooldown_clear(None, ymd(1, 1), 3));
    }

    #[test]
    fn test_reentry_waits_for_cooldown() {
        let mut bars = flat_series(20);
        // 2024-01-10: stop at 90 is hit
        bars[9] = bar(9, 100.0, 85.0, 100.0);
        let sim = TradeSimulator::new(SimulationConfig::default()).unwrap();
        let source = ScriptedSource {
            dates: None,
            atr: 5.0,
        };

        let result = sim.run(
            &universe(bars),
            &MarketRegimeGate::open(),
            &source,
            day(0),
            day(19),
        );
        let trades = result.trades();

        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].entry_date, ymd(1, 1));
        assert_eq!(trades[0].exit_date, ymd(1, 10));
        assert_eq!(trades[0].exit_reasons, vec!["stop_loss(100%)".to_string()]);
        assert_eq!(trades[1].entry_date, ymd(1, 14));
        assert_eq!(trades[1].exit_reasons, vec!["timeout(100%)".to_string()]);
    }

    #[test]
    fn test_sizing_and_costs_flow_into_ledger() {
        let mut bars = flat_series(10);
        bars[3] = bar(3, 100.0, 85.0, 100.0);
        let sim = TradeSimulator::new(SimulationConfig {
            max_holding_days: None,
            ..Default::default()
        })
        .unwrap();
        let source = ScriptedSource {
            dates: Some([day(0)].into_iter().collect()),
            atr: 5.0,
        };

        let result = sim.run(&universe(bars), &MarketRegimeGate::open(), &source, day(0), day(9));
        let trades = result.trades();
        assert_eq!(trades.len(), 1);

        // risk budget min(10000*0.5*0.25, 200) = 200 -> 20 shares, capped at 10% of equity = 10
        let t = &trades[0];
        assert_relative_eq!(t.shares, 10.0, epsilon = 1e-9);
        let entry_exec = 100.0 * 1.001;
        let exit_exec = 90.0 * 0.999;
        let commission = 0.0005 * (entry_exec + exit_exec) * 10.0;
        let expected = (exit_exec - entry_exec) * 10.0 - commission;
        assert_relative_eq!(t.pnl_net, expected, epsilon = 1e-9);
        assert_relative_eq!(t.commission_total, commission, epsilon = 1e-9);

        assert_relative_eq!(result.ledger.realized_equity, 10_000.0 + expected, epsilon = 1e-9);
        let last = result.equity_curve().last().unwrap();
        assert_relative_eq!(last.equity, 10_000.0 + expected, epsilon = 1e-9);
        assert!(result.metrics.is_some());
    }

    #[test]
    fn test_closed_gate_blocks_entries_but_not_exits() {
        let mut bars = flat_series(10);
        bars[5] = bar(5, 100.0, 85.0, 100.0);
        let sim = TradeSimulator::new(SimulationConfig::default()).unwrap();
        let source = ScriptedSource {
            dates: None,
            atr: 5.0,
        };

        // index: green above ema on day 0 only, red afterwards
        let index: Vec<PriceBar> = (0..10)
            .map(|n| {
                let mut b = if n == 0 {
                    bar(n, 101.0, 99.0, 101.0)
                } else {
                    let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n);
                    PriceBar::new_unchecked(ts, 101.0, 101.0, 99.0, 99.5, 1e6)
                };
                b.indicators.ema_fast = Some(95.0);
                b
            })
            .collect();

        let result = sim.run(
            &universe(bars),
            &MarketRegimeGate::new(index),
            &source,
            day(0),
            day(9),
        );
        assert_eq!(result.trades().len(), 1);
        assert_eq!(result.trades()[0].exit_date, day(5));
    }

    #[test]
    fn test_max_holding_timeout() {
        let sim = TradeSimulator::new(SimulationConfig {
            max_holding_days: Some(5),
            cooldown_days: 100,
            ..Default::default()
        })
        .unwrap();
        let source = ScriptedSource {
            dates: None,
            atr: 5.0,
        };
        let result = sim.run(
            &universe(flat_series(15)),
            &MarketRegimeGate::open(),
            &source,
            day(0),
            day(14),
        );
        let trades = result.trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].holding_days(), 5);
        assert_eq!(trades[0].exit_reasons, vec!["timeout(100%)".to_string()]);
    }

    #[test]
    fn test_max_open_positions() {
        let mut u = BTreeMap::new();
        for name in ["A", "B", "C"] {
            u.insert(Symbol::new(name), flat_series(5));
        }
        let sim = TradeSimulator::new(SimulationConfig {
            max_open_positions: 2,
            ..Default::default()
        })
        .unwrap();
        let source = ScriptedSource {
            dates: Some([day(0)].into_iter().collect()),
            atr: 5.0,
        };
        let result = sim.run(&u, &MarketRegimeGate::open(), &source, day(0), day(4));
        let symbols: Vec<&str> = result.trades().iter().map(|t| t.symbol.as_str()).collect();
        // opened in symbol order
        assert_eq!(symbols, vec!["A", "B"]);
    }

    #[test]
    fn test_signal_levels_used_without_fixed_multiples() {
        let mut bars = flat_series(6);
        // 2 ATR stop from the signal would be 90; 1 ATR multiple would be 95
        bars[2] = bar(2, 100.0, 93.0, 100.0);
        let with_signal = TradeSimulator::new(SimulationConfig {
            exit_multiples: None,
            ..Default::default()
        })
        .unwrap();
        let tight = TradeSimulator::new(SimulationConfig {
            exit_multiples: Some(AtrMultiples {
                stop: 1.0,
                tp1: 4.0,
                tp2: 6.0,
            }),
            ..Default::default()
        })
        .unwrap();
        let source = ScriptedSource {
            dates: Some([day(0)].into_iter().collect()),
            atr: 5.0,
        };

        let u = universe(bars);
        let a = with_signal.run(&u, &MarketRegimeGate::open(), &source, day(0), day(5));
        let b = tight.run(&u, &MarketRegimeGate::open(), &source, day(0), day(5));
        assert_eq!(a.trades()[0].exit_reasons, vec!["timeout(100%)".to_string()]);
        assert_eq!(b.trades()[0].exit_reasons, vec!["stop_loss(100%)".to_string()]);
        assert_eq!(b.trades()[0].exit_date, day(2));
    }

    #[test]
    fn test_empty_window() {
        let sim = TradeSimulator::new(SimulationConfig::default()).unwrap();
        let source = ScriptedSource {
            dates: None,
            atr: 5.0,
        };
        let result = sim.run(
            &universe(flat_series(5)),
            &MarketRegimeGate::open(),
            &source,
            day(100),
            day(200),
        );
        assert!(result.trades().is_empty());
        assert!(result.metrics.is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = TradeSimulator::new(SimulationConfig {
            kelly_fraction: 0.0,
            ..Default::default()
        });
        assert!(matches!(result, Err(CoreError::ConfigurationInvalid(_))));
    }
}
