//! Momentum Scanner
//!
//! Adaptive momentum signal detection for equities, with a portfolio trade
//! simulator and walk-forward parameter optimization built on top of it.
//!
//! Data flows one way: price history -> momentum analysis and timeframe
//! confluence -> signal evaluation -> trade simulation -> walk-forward
//! optimization.

pub mod backtest;
pub mod confluence;
pub mod config;
pub mod data;
pub mod error;
pub mod grid;
pub mod indicators;
pub mod metrics;
pub mod momentum;
pub mod multi_timeframe;
pub mod optimizer;
pub mod position;
pub mod regime;
pub mod report;
pub mod risk;
pub mod signal;
pub mod types;

pub use backtest::{PortfolioLedger, SimulationResult, TradeSimulator};
pub use config::{AppConfig, EntryRule, ScannerConfig, SimulationConfig, WalkForwardConfig};
pub use error::{CoreError, CoreResult};
pub use metrics::{Objective, PerformanceMetrics};
pub use momentum::{MomentumAnalyzer, MomentumProfile};
pub use optimizer::{WalkForwardOptimizer, WindowResult};
pub use signal::{DailyScoreRule, SignalEvaluation, SignalEvaluator, SignalSource};
pub use types::*;
