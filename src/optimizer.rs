//! Walk-forward parameter optimization
//!
//! The date range is cut into rolling train/test windows. For each window every
//! grid cell is simulated over the train window only, on a universe truncated at
//! the train end, and the best cell by the objective is then simulated over the
//! following test window. Cells within a window run in parallel.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backtest::TradeSimulator;
use crate::config::{ScannerConfig, SimulationConfig, WalkForwardConfig};
use crate::error::CoreResult;
use crate::grid::{self, Grid, ParameterSet};
use crate::metrics::{Objective, PerformanceMetrics};
use crate::regime::MarketRegimeGate;
use crate::signal::{self, SignalSource};
use crate::types::{PriceBar, Symbol};

/// Train and test date ranges, both inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
}

/// Rolling windows over `[first, last]`, stepping by the test length.
///
/// Yields `floor((total_days - train_days) / test_days)` windows, where
/// `total_days` counts both ends.
pub fn windows(first: NaiveDate, last: NaiveDate, train_days: i64, test_days: i64) -> Vec<Window> {
    let mut result = Vec::new();
    if train_days <= 0 || test_days <= 0 || last < first {
        return result;
    }
    let total_days = (last - first).num_days() + 1;

    let mut offset = 0;
    while offset + train_days + test_days <= total_days {
        let train_start = first + Duration::days(offset);
        let test_start = train_start + Duration::days(train_days);
        result.push(Window {
            train_start,
            train_end: test_start - Duration::days(1),
            test_start,
            test_end: test_start + Duration::days(test_days - 1),
        });
        offset += test_days;
    }
    result
}

/// Earliest and latest bar dates in the universe
pub fn date_span(universe: &BTreeMap<Symbol, Vec<PriceBar>>) -> Option<(NaiveDate, NaiveDate)> {
    let first = universe.values().filter_map(|b| b.first()).map(PriceBar::date).min()?;
    let last = universe.values().filter_map(|b| b.last()).map(PriceBar::date).max()?;
    Some((first, last))
}

/// Copy of the universe without any bar dated after `end`
pub fn truncate_universe(
    universe: &BTreeMap<Symbol, Vec<PriceBar>>,
    end: NaiveDate,
) -> BTreeMap<Symbol, Vec<PriceBar>> {
    universe
        .iter()
        .map(|(symbol, bars)| {
            let n = bars.partition_point(|b| b.date() <= end);
            (symbol.clone(), bars[..n].to_vec())
        })
        .filter(|(_, bars)| !bars.is_empty())
        .collect()
}

fn truncate_bars(bars: &[PriceBar], end: NaiveDate) -> Vec<PriceBar> {
    let n = bars.partition_point(|b| b.date() <= end);
    bars[..n].to_vec()
}

/// Outcome of one walk-forward window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowResult {
    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
    /// `None` when no cell traded in the train window
    pub chosen_parameters: Option<ParameterSet>,
    /// Objective value of the chosen cell in the train window
    pub in_sample_metric: Option<f64>,
    pub in_sample: Option<PerformanceMetrics>,
    pub out_of_sample: Option<PerformanceMetrics>,
}

impl WindowResult {
    fn empty(window: &Window) -> Self {
        WindowResult {
            train_start: window.train_start,
            train_end: window.train_end,
            test_start: window.test_start,
            test_end: window.test_end,
            chosen_parameters: None,
            in_sample_metric: None,
            in_sample: None,
            out_of_sample: None,
        }
    }
}

/// One grid cell with its settings already applied
#[derive(Debug, Clone)]
struct Cell {
    params: ParameterSet,
    scanner: ScannerConfig,
    simulation: SimulationConfig,
}

#[derive(Debug, Clone)]
struct CellScore {
    index: usize,
    score: f64,
    metrics: PerformanceMetrics,
}

pub struct WalkForwardOptimizer {
    config: WalkForwardConfig,
    cells: Vec<Cell>,
    cancel: Arc<AtomicBool>,
}

impl WalkForwardOptimizer {
    /// Expands and validates the grid against the base settings up front
    pub fn new(
        scanner: &ScannerConfig,
        simulation: &SimulationConfig,
        config: WalkForwardConfig,
        grid: Option<&Grid>,
    ) -> CoreResult<Self> {
        config.validate()?;
        scanner.validate()?;
        simulation.validate()?;

        let cells = grid::parameter_sets(grid)
            .into_iter()
            .map(|params| {
                let (scanner, simulation) = grid::apply_parameters(scanner, simulation, &params)?;
                Ok(Cell {
                    params,
                    scanner,
                    simulation,
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;

        Ok(WalkForwardOptimizer {
            config,
            cells,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Share a cancellation flag; setting it abandons the remaining cells and windows
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn objective(&self) -> Objective {
        self.config.objective
    }

    pub fn windows(&self, first: NaiveDate, last: NaiveDate) -> Vec<Window> {
        windows(first, last, self.config.train_days, self.config.test_days)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Walk forward over `[first, last]`, each cell signalling with its configured entry rule
    pub fn run(
        &self,
        universe: &BTreeMap<Symbol, Vec<PriceBar>>,
        index: &[PriceBar],
        first: NaiveDate,
        last: NaiveDate,
        progress: Option<&ProgressBar>,
    ) -> Vec<WindowResult> {
        self.run_with(universe, index, first, last, &signal::source_for, progress)
    }

    /// Walk forward with signals built by `factory` for each cell's scanner settings.
    ///
    /// Bars must carry enriched indicators. `index` feeds the market-regime gate
    /// (empty disables it). Returns the windows completed before any cancellation.
    pub fn run_with<F>(
        &self,
        universe: &BTreeMap<Symbol, Vec<PriceBar>>,
        index: &[PriceBar],
        first: NaiveDate,
        last: NaiveDate,
        factory: &F,
        progress: Option<&ProgressBar>,
    ) -> Vec<WindowResult>
    where
        F: Fn(&ScannerConfig) -> Box<dyn SignalSource> + Sync,
    {
        let windows = self.windows(first, last);
        info!(
            "Walk-forward {} -> {}: {} windows x {} cells (train {}d, test {}d, objective {})",
            first,
            last,
            windows.len(),
            self.cells.len(),
            self.config.train_days,
            self.config.test_days,
            self.config.objective
        );

        let mut results = Vec::with_capacity(windows.len());
        for window in &windows {
            if self.is_cancelled() {
                warn!("Walk-forward cancelled after {} windows", results.len());
                break;
            }
            match self.run_window(universe, index, window, factory, progress) {
                Some(result) => results.push(result),
                None => {
                    warn!("Walk-forward cancelled during window {}", window.train_start);
                    break;
                }
            }
        }
        results
    }

    /// `None` only when cancelled mid-window
    fn run_window<F>(
        &self,
        universe: &BTreeMap<Symbol, Vec<PriceBar>>,
        index: &[PriceBar],
        window: &Window,
        factory: &F,
        progress: Option<&ProgressBar>,
    ) -> Option<WindowResult>
    where
        F: Fn(&ScannerConfig) -> Box<dyn SignalSource> + Sync,
    {
        // nothing after train_end is visible while choosing parameters
        let train_universe = truncate_universe(universe, window.train_end);
        let train_gate = MarketRegimeGate::new(truncate_bars(index, window.train_end));

        let scores: Vec<Option<CellScore>> = self
            .cells
            .par_iter()
            .enumerate()
            .map(|(i, cell)| {
                if self.is_cancelled() {
                    return None;
                }
                let score = self.score_cell(i, cell, &train_universe, &train_gate, window, factory);
                if let Some(pb) = progress {
                    pb.inc(1);
                }
                score
            })
            .collect();

        if self.is_cancelled() {
            return None;
        }

        let mut result = WindowResult::empty(window);
        let Some(best) = best_cell(scores) else {
            info!(
                "Window {} -> {}: no cell traded in the train window",
                window.train_start, window.train_end
            );
            return Some(result);
        };

        let cell = &self.cells[best.index];
        let test_universe = truncate_universe(universe, window.test_end);
        let test_gate = MarketRegimeGate::new(truncate_bars(index, window.test_end));
        let out_of_sample = TradeSimulator::new(cell.simulation.clone())
            .map(|sim| {
                let source = factory(&cell.scanner);
                sim.run(
                    &test_universe,
                    &test_gate,
                    source.as_ref(),
                    window.test_start,
                    window.test_end,
                )
                .metrics
            })
            .unwrap_or_else(|e| {
                warn!("Out-of-sample run failed: {}", e);
                None
            });

        info!(
            "Window {} -> {} | {} -> {}: [{}] in-sample {} {:.4}, out-of-sample {}",
            window.train_start,
            window.train_end,
            window.test_start,
            window.test_end,
            grid::format_params(&cell.params),
            self.config.objective,
            best.score,
            out_of_sample
                .as_ref()
                .map_or("no trades".to_string(), |m| format!("{} trades, CAGR {:.4}", m.total_trades, m.cagr))
        );

        result.chosen_parameters = Some(cell.params.clone());
        result.in_sample_metric = Some(best.score);
        result.in_sample = Some(best.metrics);
        result.out_of_sample = out_of_sample;
        Some(result)
    }

    fn score_cell<F>(
        &self,
        index: usize,
        cell: &Cell,
        universe: &BTreeMap<Symbol, Vec<PriceBar>>,
        gate: &MarketRegimeGate,
        window: &Window,
        factory: &F,
    ) -> Option<CellScore>
    where
        F: Fn(&ScannerConfig) -> Box<dyn SignalSource> + Sync,
    {
        let sim = match TradeSimulator::new(cell.simulation.clone()) {
            Ok(sim) => sim,
            Err(e) => {
                warn!("Skipping cell [{}]: {}", grid::format_params(&cell.params), e);
                return None;
            }
        };
        let source = factory(&cell.scanner);
        let metrics = sim
            .run(universe, gate, source.as_ref(), window.train_start, window.train_end)
            .metrics?;
        let score = self.config.objective.score(&metrics);
        if !score.is_finite() {
            debug!("Cell [{}] scored {}", grid::format_params(&cell.params), score);
            return None;
        }
        Some(CellScore {
            index,
            score,
            metrics,
        })
    }
}

/// Highest score wins; ties go to the earlier cell in grid order
fn best_cell(scores: Vec<Option<CellScore>>) -> Option<CellScore> {
    scores.into_iter().flatten().fold(None, |best, candidate| match best {
        Some(b) if b.score >= candidate.score => Some(b),
        _ => Some(candidate),
    })
}
