//! Configuration management
//!
//! Loads the JSON configuration file and validates it before anything runs.
//! Every section falls back to its defaults, so a config file only needs the
//! values it changes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};
use crate::metrics::Objective;
use crate::Symbol;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scanner: ScannerConfig,
    pub simulation: SimulationConfig,
    pub walk_forward: WalkForwardConfig,
    pub data: DataConfig,
    /// Grid search parameters for walk-forward optimization (optional).
    /// Each key is a scanner or simulation option, the value the list to test.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid: Option<HashMap<String, Vec<serde_json::Value>>>,
}

impl AppConfig {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let config: AppConfig =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.validate().context("Configuration rejected")?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        self.scanner.validate()?;
        self.simulation.validate()?;
        self.walk_forward.validate()?;
        if let Some(grid) = &self.grid {
            crate::grid::validate_grid(grid, &self.scanner, &self.simulation)?;
        }
        Ok(())
    }
}

// =============================================================================
// Scanner (signal detection) settings
// =============================================================================

/// Per-segment z-score thresholds. A missing segment falls back to the base threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentThresholds {
    pub high: Option<f64>,
    pub mid: Option<f64>,
    pub low: Option<f64>,
}

impl Default for SegmentThresholds {
    fn default() -> Self {
        SegmentThresholds {
            high: Some(2.0),
            mid: Some(1.6),
            low: Some(1.4),
        }
    }
}

/// Average-volume breakpoints separating the liquidity segments
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiquidityBreakpoints {
    pub high: f64,
    pub low: f64,
}

impl Default for LiquidityBreakpoints {
    fn default() -> Self {
        LiquidityBreakpoints {
            high: 1_000_000.0,
            low: 300_000.0,
        }
    }
}

/// Entry thresholds, swapped wholesale for allow-listed symbols
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    pub min_signal_score: u8,
    pub min_filter_score: u8,
    pub min_alignment_ratio: f64,
    pub min_momentum_ratio: f64,
}

impl Default for ThresholdSet {
    fn default() -> Self {
        ThresholdSet {
            min_signal_score: 2,
            min_filter_score: 1,
            min_alignment_ratio: 0.67,
            min_momentum_ratio: 0.5,
        }
    }
}

/// Which rule decides a daily entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryRule {
    /// Full scanner gate: pattern score, filters, confluence and liquidity
    #[default]
    Scanner,
    /// Regime and direction plus at least two of RSI band, volume and rising MACD
    DailyScore,
}

impl EntryRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryRule::Scanner => "scanner",
            EntryRule::DailyScore => "daily_score",
        }
    }
}

impl FromStr for EntryRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "scanner" | "full" => Ok(EntryRule::Scanner),
            "daily_score" | "daily" | "simple" => Ok(EntryRule::DailyScore),
            other => Err(format!("unknown entry rule: {}", other)),
        }
    }
}

impl std::fmt::Display for EntryRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signal detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Rule used by backtests and walk-forward to open positions
    pub entry_rule: EntryRule,
    pub vol_multiplier: f64,
    /// Fallback momentum filter: minimum 3-bar change in percent
    pub momentum_pct: f64,
    /// Minimum EMA50/EMA200 gap in percent
    pub trend_gap_pct: f64,
    pub min_alignment_ratio: f64,
    pub min_momentum_ratio: f64,
    pub min_signal_score: u8,
    pub min_filter_score: u8,
    pub min_price: f64,
    pub min_avg_vol: f64,

    pub momentum_windows: Vec<usize>,
    pub momentum_baseline_window: usize,
    pub momentum_z_threshold: f64,
    pub momentum_dynamic_enabled: bool,
    pub momentum_dynamic_window: usize,
    pub momentum_dynamic_quantile: f64,
    pub momentum_dynamic_alpha: f64,
    pub momentum_dynamic_min: f64,
    pub momentum_dynamic_max: f64,
    pub momentum_segment_thresholds: SegmentThresholds,
    pub momentum_liquidity_breakpoints: LiquidityBreakpoints,

    /// Symbols evaluated against `relaxed_thresholds`
    pub premium_symbols: Vec<String>,
    pub relaxed_thresholds: ThresholdSet,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig {
            entry_rule: EntryRule::Scanner,
            vol_multiplier: 1.5,
            momentum_pct: 2.0,
            trend_gap_pct: 3.0,
            min_alignment_ratio: 0.75,
            min_momentum_ratio: 0.6,
            min_signal_score: 3,
            min_filter_score: 2,
            min_price: 2.0,
            min_avg_vol: 300_000.0,
            momentum_windows: vec![1, 3, 5],
            momentum_baseline_window: 60,
            momentum_z_threshold: 1.5,
            momentum_dynamic_enabled: true,
            momentum_dynamic_window: 60,
            momentum_dynamic_quantile: 0.975,
            momentum_dynamic_alpha: 0.6,
            momentum_dynamic_min: 1.1,
            momentum_dynamic_max: 3.0,
            momentum_segment_thresholds: SegmentThresholds::default(),
            momentum_liquidity_breakpoints: LiquidityBreakpoints::default(),
            premium_symbols: ["SPY", "QQQ", "GOOGL", "NVDA", "AAPL", "MSFT"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            relaxed_thresholds: ThresholdSet::default(),
        }
    }
}

impl ScannerConfig {
    /// Looser preset for broader scans
    pub fn aggressive() -> Self {
        Self::default().with_aggressive()
    }

    /// Apply the aggressive entry thresholds on top of these settings
    pub fn with_aggressive(self) -> Self {
        ScannerConfig {
            vol_multiplier: 1.3,
            momentum_pct: 1.2,
            trend_gap_pct: 2.2,
            min_alignment_ratio: 0.67,
            min_momentum_ratio: 0.5,
            min_signal_score: 2,
            min_filter_score: 1,
            min_price: 1.5,
            min_avg_vol: 200_000.0,
            momentum_z_threshold: 1.2,
            ..self
        }
    }

    /// Default entry thresholds as a set
    pub fn thresholds(&self) -> ThresholdSet {
        ThresholdSet {
            min_signal_score: self.min_signal_score,
            min_filter_score: self.min_filter_score,
            min_alignment_ratio: self.min_alignment_ratio,
            min_momentum_ratio: self.min_momentum_ratio,
        }
    }

    /// Thresholds that apply to `symbol`
    pub fn thresholds_for(&self, symbol: &Symbol) -> ThresholdSet {
        if self.is_premium(symbol) {
            self.relaxed_thresholds
        } else {
            self.thresholds()
        }
    }

    pub fn is_premium(&self, symbol: &Symbol) -> bool {
        self.premium_symbols
            .iter()
            .any(|s| s.eq_ignore_ascii_case(symbol.as_str()))
    }

    pub fn validate(&self) -> CoreResult<()> {
        let invalid = |msg: String| Err(CoreError::ConfigurationInvalid(msg));

        if self.vol_multiplier <= 0.0 {
            return invalid(format!("vol_multiplier must be > 0, got {}", self.vol_multiplier));
        }
        if self.momentum_windows.is_empty() || self.momentum_windows.contains(&0) {
            return invalid("momentum_windows must be non-empty positive bar counts".into());
        }
        if self.momentum_baseline_window < 2 {
            return invalid(format!(
                "momentum_baseline_window must be >= 2, got {}",
                self.momentum_baseline_window
            ));
        }
        if self.momentum_dynamic_window == 0 {
            return invalid("momentum_dynamic_window must be > 0".into());
        }
        if !(self.momentum_dynamic_quantile > 0.0 && self.momentum_dynamic_quantile < 1.0) {
            return invalid(format!(
                "momentum_dynamic_quantile must be in (0, 1), got {}",
                self.momentum_dynamic_quantile
            ));
        }
        if !(0.0..=1.0).contains(&self.momentum_dynamic_alpha) {
            return invalid(format!(
                "momentum_dynamic_alpha must be in [0, 1], got {}",
                self.momentum_dynamic_alpha
            ));
        }
        if self.momentum_dynamic_min <= 0.0 || self.momentum_dynamic_min > self.momentum_dynamic_max {
            return invalid(format!(
                "momentum_dynamic_min/max must satisfy 0 < min <= max, got {}/{}",
                self.momentum_dynamic_min, self.momentum_dynamic_max
            ));
        }
        if self.momentum_z_threshold <= 0.0 {
            return invalid("momentum_z_threshold must be > 0".into());
        }
        let segments = &self.momentum_segment_thresholds;
        if [segments.high, segments.mid, segments.low]
            .iter()
            .flatten()
            .any(|t| *t <= 0.0)
        {
            return invalid("momentum_segment_thresholds must be > 0".into());
        }
        let breakpoints = &self.momentum_liquidity_breakpoints;
        if breakpoints.low < 0.0 || breakpoints.low > breakpoints.high {
            return invalid(format!(
                "momentum_liquidity_breakpoints must satisfy 0 <= low <= high, got {}/{}",
                breakpoints.low, breakpoints.high
            ));
        }
        if self.min_price < 0.0 || self.min_avg_vol < 0.0 {
            return invalid("min_price and min_avg_vol must be >= 0".into());
        }
        for set in [self.thresholds(), self.relaxed_thresholds] {
            if set.min_signal_score > 4 || set.min_filter_score > 3 {
                return invalid("signal score is 0-4 and filter score is 0-3".into());
            }
            if !(0.0..=1.0).contains(&set.min_alignment_ratio)
                || !(0.0..=1.0).contains(&set.min_momentum_ratio)
            {
                return invalid("alignment/momentum ratios must be in [0, 1]".into());
            }
        }
        Ok(())
    }
}

// =============================================================================
// Simulation settings
// =============================================================================

/// ATR multiples used to place the initial stop and targets
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AtrMultiples {
    pub stop: f64,
    pub tp1: f64,
    pub tp2: f64,
}

impl Default for AtrMultiples {
    fn default() -> Self {
        AtrMultiples {
            stop: 2.0,
            tp1: 4.0,
            tp2: 6.0,
        }
    }
}

/// Portfolio simulation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub starting_equity: f64,
    pub commission_bps: f64,
    pub slippage_bps: f64,
    /// User-level damping applied on top of the computed Kelly estimate
    pub kelly_fraction: f64,
    /// Percent of equity risked per trade (2.0 = 2%)
    pub risk_percent: f64,
    /// Fraction of equity a single position may occupy (0.10 = 10%)
    pub max_allocation_pct: f64,
    pub cooldown_days: i64,
    /// Trailing distance in units of the estimated ATR
    pub trailing_atr_mult: f64,
    /// Positions older than this are closed at the close (None = hold until exit)
    pub max_holding_days: Option<i64>,
    pub max_open_positions: usize,
    /// Closed trades required before the Kelly estimate uses observed stats
    pub kelly_min_trades: usize,
    /// Fixed stop/target multiples. None uses the signal's tiered risk parameters.
    pub exit_multiples: Option<AtrMultiples>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            starting_equity: 10_000.0,
            commission_bps: 5.0,
            slippage_bps: 10.0,
            kelly_fraction: 0.5,
            risk_percent: 2.0,
            max_allocation_pct: 0.10,
            cooldown_days: 3,
            trailing_atr_mult: 2.5,
            max_holding_days: Some(90),
            max_open_positions: 10,
            kelly_min_trades: 10,
            exit_multiples: Some(AtrMultiples::default()),
        }
    }
}

impl SimulationConfig {
    pub fn commission_rate(&self) -> f64 {
        self.commission_bps / 10_000.0
    }

    pub fn slippage_rate(&self) -> f64 {
        self.slippage_bps / 10_000.0
    }

    pub fn validate(&self) -> CoreResult<()> {
        let invalid = |msg: String| Err(CoreError::ConfigurationInvalid(msg));

        if self.starting_equity <= 0.0 {
            return invalid(format!("starting_equity must be > 0, got {}", self.starting_equity));
        }
        if self.commission_bps < 0.0 || self.slippage_bps < 0.0 {
            return invalid("commission_bps and slippage_bps must be >= 0".into());
        }
        if !(self.kelly_fraction > 0.0 && self.kelly_fraction <= 1.0) {
            return invalid(format!("kelly_fraction must be in (0, 1], got {}", self.kelly_fraction));
        }
        if !(self.risk_percent > 0.0 && self.risk_percent <= 100.0) {
            return invalid(format!("risk_percent must be in (0, 100], got {}", self.risk_percent));
        }
        if !(self.max_allocation_pct > 0.0 && self.max_allocation_pct <= 1.0) {
            return invalid(format!(
                "max_allocation_pct must be in (0, 1], got {}",
                self.max_allocation_pct
            ));
        }
        if self.cooldown_days < 0 {
            return invalid(format!("cooldown_days must be >= 0, got {}", self.cooldown_days));
        }
        if self.trailing_atr_mult <= 0.0 {
            return invalid("trailing_atr_mult must be > 0".into());
        }
        if matches!(self.max_holding_days, Some(d) if d <= 0) {
            return invalid("max_holding_days must be > 0".into());
        }
        if self.max_open_positions == 0 {
            return invalid("max_open_positions must be > 0".into());
        }
        if let Some(m) = self.exit_multiples {
            if m.stop <= 0.0 || m.tp1 <= 0.0 || m.tp2 < m.tp1 {
                return invalid(format!(
                    "exit_multiples must satisfy stop > 0 and 0 < tp1 <= tp2, got {:?}",
                    m
                ));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Walk-forward and data settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkForwardConfig {
    /// Training window length in calendar days
    pub train_days: i64,
    /// Test window length in calendar days
    pub test_days: i64,
    pub objective: Objective,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        WalkForwardConfig {
            train_days: 120,
            test_days: 30,
            objective: Objective::Cagr,
        }
    }
}

impl WalkForwardConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.train_days <= 0 || self.test_days <= 0 {
            return Err(CoreError::ConfigurationInvalid(format!(
                "train_days and test_days must be > 0, got {}/{}",
                self.train_days, self.test_days
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub data_dir: String,
    /// File suffix, bars are read from `{SYMBOL}_{timeframe}.csv`
    pub timeframe: String,
    pub symbols: Vec<String>,
    /// Index used by the market-regime gate. None disables the gate.
    pub index_symbol: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            data_dir: "data".to_string(),
            timeframe: "1d".to_string(),
            symbols: vec![],
            index_symbol: Some("SPY".to_string()),
            start_date: None,
            end_date: None,
        }
    }
}

impl DataConfig {
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.iter().map(Symbol::new).collect()
    }
}
