//! Entry signal evaluation
//!
//! Combines trend regime, a base pattern score, momentum/volume/trend filters,
//! multi-timeframe confluence and a liquidity floor into one `SignalEvaluation`
//! per symbol per tick, with ATR-based stops and targets attached.

use chrono::NaiveDate;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::{EntryRule, ScannerConfig};
use crate::confluence;
use crate::error::{checked_ratio, CoreError, CoreResult};
use crate::indicators::EMA_SLOW_PERIOD;
use crate::momentum::{MomentumAnalyzer, MomentumProfile};
use crate::multi_timeframe::{closes, resample_weekly, TimeframeBars};
use crate::risk::{KellyInputs, RiskManager, RiskManagerConfig};
use crate::types::PriceBar;
use crate::Symbol;

/// Highest possible recommendation score (premium bonus included)
pub const MAX_RECOMMENDATION_SCORE: f64 = 18.3;

/// Volume must reach this multiple of the 20-bar median for the base score
const VOLUME_MEDIAN_MULT: f64 = 1.2;
/// Bars used by the fallback price-momentum check
const FALLBACK_MOMENTUM_BARS: usize = 3;

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterFlags {
    pub volume_spike: bool,
    pub price_momentum: bool,
    pub trend_strength: bool,
}

impl FilterFlags {
    pub fn score(&self) -> u8 {
        self.volume_spike as u8 + self.price_momentum as u8 + self.trend_strength as u8
    }
}

/// Stop/target multiple set, chosen by momentum score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskRegime {
    Aggressive,
    #[default]
    Normal,
    Defensive,
}

/// ATR multiples for the stop and each target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskMultiples {
    pub stop: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub tp3: Option<f64>,
}

impl RiskRegime {
    pub fn from_momentum_score(score: f64) -> Self {
        if score >= 70.0 {
            RiskRegime::Aggressive
        } else if score < 50.0 {
            RiskRegime::Defensive
        } else {
            RiskRegime::Normal
        }
    }

    pub fn multiples(&self) -> RiskMultiples {
        match self {
            RiskRegime::Aggressive => RiskMultiples {
                stop: 1.5,
                tp1: 3.0,
                tp2: 5.0,
                tp3: Some(8.0),
            },
            RiskRegime::Normal => RiskMultiples {
                stop: 2.0,
                tp1: 3.5,
                tp2: 5.5,
                tp3: Some(7.5),
            },
            RiskRegime::Defensive => RiskMultiples {
                stop: 2.5,
                tp1: 4.5,
                tp2: 6.5,
                tp3: None,
            },
        }
    }
}

/// One symbol's signal state at one evaluation tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalEvaluation {
    pub symbol: Symbol,
    pub date: NaiveDate,
    pub price: f64,
    pub atr: f64,
    /// Close above the long (200) EMA
    pub regime: bool,
    /// Close above the medium (50) EMA
    pub direction: bool,
    /// 0-4
    pub base_score: u8,
    /// 0-3
    pub filter_score: u8,
    pub filters: FilterFlags,
    pub aligned: bool,
    pub alignment_ratio: f64,
    pub confluent: bool,
    pub momentum_ratio: f64,
    pub liquidity_ok: bool,
    pub premium: bool,
    pub entry_ok: bool,
    pub risk_regime: RiskRegime,
    pub momentum_score: f64,
    pub stop_loss: f64,
    pub stop_loss_pct: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub tp3: Option<f64>,
    pub take_profit: f64,
    /// Suggested shares at the evaluator's notional equity
    pub position_size: f64,
    pub risk_reward: f64,
    pub recommendation_score: f64,
    /// 0-100
    pub strength: u8,
    pub momentum: MomentumProfile,
}

/// Anything that can produce an entry signal from a symbol's history.
///
/// `history` ends at the evaluation bar; implementations must not look past it.
pub trait SignalSource: Send + Sync {
    fn signal(&self, symbol: &Symbol, history: &[PriceBar]) -> CoreResult<SignalEvaluation>;
}

// =============================================================================
// Evaluator
// =============================================================================

#[derive(Debug, Clone)]
pub struct SignalEvaluator {
    config: ScannerConfig,
    analyzer: MomentumAnalyzer,
    risk: RiskManager,
    notional_equity: f64,
}

impl SignalEvaluator {
    pub fn new(config: ScannerConfig) -> Self {
        let analyzer = MomentumAnalyzer::from_config(&config);
        SignalEvaluator {
            config,
            analyzer,
            risk: RiskManagerConfig::default().build(),
            notional_equity: 10_000.0,
        }
    }

    /// Sizing rules and equity used for the suggested position size
    pub fn with_sizing(mut self, risk: RiskManager, equity: f64) -> Self {
        self.risk = risk;
        self.notional_equity = equity;
        self
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Evaluate daily history, using weekly bars built from it as the slow timeframe
    pub fn evaluate_daily(&self, symbol: &Symbol, daily: &[PriceBar]) -> CoreResult<SignalEvaluation> {
        let weekly = resample_weekly(daily);
        let view = TimeframeBars::from_daily(daily, Some(&weekly));
        self.evaluate(symbol, daily, &view)
    }

    /// Evaluate the last bar of `daily` (indicators must be enriched) with an
    /// explicit multi-timeframe view for confluence.
    pub fn evaluate(
        &self,
        symbol: &Symbol,
        daily: &[PriceBar],
        view: &TimeframeBars<'_>,
    ) -> CoreResult<SignalEvaluation> {
        if daily.len() < EMA_SLOW_PERIOD {
            return Err(CoreError::DataInsufficient(format!(
                "{}: {} bars, need {}",
                symbol,
                daily.len(),
                EMA_SLOW_PERIOD
            )));
        }

        let bar = &daily[daily.len() - 1];
        let prev = &daily[daily.len() - 2];
        let ind = &bar.indicators;
        let (Some(ema_fast), Some(ema_slow), Some(atr)) = (ind.ema_fast, ind.ema_slow, ind.atr)
        else {
            return Err(CoreError::DataInsufficient(format!(
                "{}: indicators not available on {}",
                symbol,
                bar.date()
            )));
        };

        let price = bar.close;
        let regime = price > ema_slow;
        let direction = price > ema_fast;
        let base_score = base_pattern_score(prev, bar);

        let close_series = closes(daily);
        let momentum = self.analyzer.analyze(&close_series, ind.vol_avg);

        let filters = FilterFlags {
            volume_spike: ind
                .vol_avg
                .is_some_and(|avg| bar.volume > avg * self.config.vol_multiplier),
            price_momentum: if momentum.has_reading() {
                momentum.positive
            } else {
                fallback_momentum(&close_series, self.config.momentum_pct)
            },
            trend_strength: checked_ratio(ema_fast - ema_slow, ema_slow)
                .is_ok_and(|gap| gap * 100.0 >= self.config.trend_gap_pct),
        };
        let filter_score = filters.score();

        let score = confluence::score(view);
        let liquidity_ok = price >= self.config.min_price
            && ind.vol_avg.unwrap_or(0.0) >= self.config.min_avg_vol;

        let premium = self.config.is_premium(symbol);
        let thresholds = self.config.thresholds_for(symbol);
        let entry_ok = regime
            && direction
            && base_score >= thresholds.min_signal_score
            && filter_score >= thresholds.min_filter_score
            && score.alignment.ratio >= thresholds.min_alignment_ratio
            && score.confluence.ratio >= thresholds.min_momentum_ratio
            && liquidity_ok;

        let momentum_score = momentum_score(ind.rsi, ind.macd_hist, direction);
        let risk_regime = RiskRegime::from_momentum_score(momentum_score);
        let m = risk_regime.multiples();
        let stop_loss = price - m.stop * atr;
        let tp1 = price + m.tp1 * atr;
        let tp2 = price + m.tp2 * atr;
        let tp3 = m.tp3.map(|mult| price + mult * atr);
        let take_profit = tp2;

        let risk_reward = checked_ratio(take_profit - price, price - stop_loss).unwrap_or_else(|e| {
            debug!("{}: risk/reward fallback to 0 ({})", symbol, e);
            0.0
        });
        let stop_loss_pct = checked_ratio(price - stop_loss, price).unwrap_or(0.0) * 100.0;

        let position_size = match self.risk.size_position(
            self.notional_equity,
            price,
            stop_loss,
            KellyInputs::default().kelly(),
        ) {
            Ok(size) => size.shares,
            Err(e) => {
                debug!("{}: no suggested size ({})", symbol, e);
                0.0
            }
        };

        let mut evaluation = SignalEvaluation {
            symbol: symbol.clone(),
            date: bar.date(),
            price,
            atr,
            regime,
            direction,
            base_score,
            filter_score,
            filters,
            aligned: score.alignment.aligned,
            alignment_ratio: score.alignment.ratio,
            confluent: score.confluence.confluent,
            momentum_ratio: score.confluence.ratio,
            liquidity_ok,
            premium,
            entry_ok,
            risk_regime,
            momentum_score,
            stop_loss,
            stop_loss_pct,
            tp1,
            tp2,
            tp3,
            take_profit,
            position_size,
            risk_reward,
            recommendation_score: 0.0,
            strength: 0,
            momentum,
        };
        evaluation.recommendation_score = recommendation_score(&evaluation);
        evaluation.strength = strength(evaluation.recommendation_score);
        Ok(evaluation)
    }

    /// Evaluate every symbol in parallel, strongest first.
    ///
    /// Symbols that fail (too little history, missing indicators) are logged and dropped.
    pub fn scan(&self, universe: &BTreeMap<Symbol, Vec<PriceBar>>) -> Vec<SignalEvaluation> {
        let mut results: Vec<SignalEvaluation> = universe
            .par_iter()
            .filter_map(|(symbol, bars)| match self.evaluate_daily(symbol, bars) {
                Ok(eval) => Some(eval),
                Err(e) => {
                    warn!("Skipping {}: {}", symbol, e);
                    None
                }
            })
            .collect();

        results.sort_by(|a, b| {
            OrderedFloat(b.recommendation_score)
                .cmp(&OrderedFloat(a.recommendation_score))
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        results
    }
}

impl SignalSource for SignalEvaluator {
    fn signal(&self, symbol: &Symbol, history: &[PriceBar]) -> CoreResult<SignalEvaluation> {
        self.evaluate_daily(symbol, history)
    }
}

// =============================================================================
// Daily score rule
// =============================================================================

/// Bars the daily score rule needs before it evaluates
pub const DAILY_RULE_MIN_BARS: usize = 30;
/// Points out of 3 required by the daily score rule
pub const DAILY_RULE_MIN_SCORE: u8 = 2;

const DAILY_RULE_MULTIPLES: RiskMultiples = RiskMultiples {
    stop: 2.0,
    tp1: 4.0,
    tp2: 6.0,
    tp3: Some(9.0),
};

/// Lightweight daily entry rule for backtests.
///
/// Enters when the close is above both the 200 and 50 EMA and at least two of
/// these hold: RSI inside 30-70, volume above 1.2x its 20-bar median, MACD
/// histogram positive and above the previous bar's. No confluence, momentum
/// or liquidity checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct DailyScoreRule;

impl DailyScoreRule {
    pub fn evaluate(&self, symbol: &Symbol, daily: &[PriceBar]) -> CoreResult<SignalEvaluation> {
        if daily.len() < DAILY_RULE_MIN_BARS {
            return Err(CoreError::DataInsufficient(format!(
                "{}: {} bars, need {}",
                symbol,
                daily.len(),
                DAILY_RULE_MIN_BARS
            )));
        }

        let bar = &daily[daily.len() - 1];
        let prev = &daily[daily.len() - 2];
        let ind = &bar.indicators;
        let (Some(ema_fast), Some(ema_slow), Some(atr)) = (ind.ema_fast, ind.ema_slow, ind.atr)
        else {
            return Err(CoreError::DataInsufficient(format!(
                "{}: indicators not available on {}",
                symbol,
                bar.date()
            )));
        };

        let price = bar.close;
        let regime = price > ema_slow;
        let direction = price > ema_fast;
        let score = daily_score(prev, bar);
        let entry_ok = regime && direction && score >= DAILY_RULE_MIN_SCORE;

        let m = DAILY_RULE_MULTIPLES;
        let stop_loss = price - m.stop * atr;
        let tp2 = price + m.tp2 * atr;

        let mut evaluation = SignalEvaluation {
            symbol: symbol.clone(),
            date: bar.date(),
            price,
            atr,
            regime,
            direction,
            base_score: score,
            entry_ok,
            momentum_score: momentum_score(ind.rsi, ind.macd_hist, direction),
            stop_loss,
            stop_loss_pct: checked_ratio(price - stop_loss, price).unwrap_or(0.0) * 100.0,
            tp1: price + m.tp1 * atr,
            tp2,
            tp3: m.tp3.map(|mult| price + mult * atr),
            take_profit: tp2,
            risk_reward: checked_ratio(tp2 - price, price - stop_loss).unwrap_or(0.0),
            ..SignalEvaluation::default()
        };
        evaluation.recommendation_score = recommendation_score(&evaluation);
        evaluation.strength = strength(evaluation.recommendation_score);
        Ok(evaluation)
    }
}

impl SignalSource for DailyScoreRule {
    fn signal(&self, symbol: &Symbol, history: &[PriceBar]) -> CoreResult<SignalEvaluation> {
        self.evaluate(symbol, history)
    }
}

/// Signal source for the configured entry rule
pub fn source_for(config: &ScannerConfig) -> Box<dyn SignalSource> {
    match config.entry_rule {
        EntryRule::Scanner => Box::new(SignalEvaluator::new(config.clone())),
        EntryRule::DailyScore => Box::new(DailyScoreRule),
    }
}

// =============================================================================
// Scoring helpers
// =============================================================================

/// 0-4: Bollinger lower-band reclaim, RSI turning up from 30-45, MACD histogram
/// crossing above zero, volume at least 1.2x its 20-bar median
pub fn base_pattern_score(prev: &PriceBar, bar: &PriceBar) -> u8 {
    let (p, c) = (&prev.indicators, &bar.indicators);
    let mut score = 0;

    if let (Some(prev_lower), Some(lower)) = (p.bb_lower, c.bb_lower) {
        if prev.close < prev_lower && bar.close > lower {
            score += 1;
        }
    }
    if let (Some(prev_rsi), Some(rsi)) = (p.rsi, c.rsi) {
        if (30.0..=45.0).contains(&rsi) && rsi > prev_rsi {
            score += 1;
        }
    }
    if let (Some(prev_hist), Some(hist)) = (p.macd_hist, c.macd_hist) {
        if prev_hist < 0.0 && hist > 0.0 {
            score += 1;
        }
    }
    if let Some(median) = c.vol_median {
        if bar.volume >= median * VOLUME_MEDIAN_MULT {
            score += 1;
        }
    }

    score
}

/// 0-3: RSI inside 30-70, volume above 1.2x its 20-bar median, MACD histogram
/// positive and rising
pub fn daily_score(prev: &PriceBar, bar: &PriceBar) -> u8 {
    let c = &bar.indicators;
    let mut score = 0;

    if c.rsi.is_some_and(|rsi| (30.0..=70.0).contains(&rsi)) {
        score += 1;
    }
    if c.vol_median.is_some_and(|median| bar.volume > median * VOLUME_MEDIAN_MULT) {
        score += 1;
    }
    if let (Some(prev_hist), Some(hist)) = (prev.indicators.macd_hist, c.macd_hist) {
        if hist > 0.0 && hist > prev_hist {
            score += 1;
        }
    }

    score
}

/// 3-bar percent change at or above `min_pct`
fn fallback_momentum(closes: &[f64], min_pct: f64) -> bool {
    if closes.len() <= FALLBACK_MOMENTUM_BARS {
        return false;
    }
    let last = closes[closes.len() - 1];
    let reference = closes[closes.len() - 1 - FALLBACK_MOMENTUM_BARS];
    checked_ratio(last - reference, reference).is_ok_and(|r| r * 100.0 >= min_pct)
}

/// 0.4 * RSI score + 0.3 * MACD score + 0.3 * trend score, 0-100
pub fn momentum_score(rsi: Option<f64>, macd_hist: Option<f64>, direction: bool) -> f64 {
    let rsi_score = rsi
        .map(|r| ((r - 30.0) / 70.0 * 100.0).clamp(0.0, 100.0))
        .unwrap_or(50.0);
    let macd_score = if macd_hist.is_some_and(|h| h > 0.0) { 100.0 } else { 0.0 };
    let trend_score = if direction { 100.0 } else { 0.0 };
    rsi_score * 0.4 + macd_score * 0.3 + trend_score * 0.3
}

/// Fixed-weight sum of the evaluation's components, 0 to 18.3
pub fn recommendation_score(eval: &SignalEvaluation) -> f64 {
    let flag = |b: bool, w: f64| if b { w } else { 0.0 };

    flag(eval.regime, 2.0)
        + flag(eval.direction, 2.0)
        + eval.base_score as f64
        + eval.filter_score as f64 * 1.5
        + eval.alignment_ratio * 2.0
        + eval.momentum_ratio * 2.0
        + flag(eval.filters.volume_spike, 0.5)
        + flag(eval.filters.price_momentum, 0.5)
        + flag(eval.filters.trend_strength, 0.5)
        + flag(eval.premium, 0.3)
}

/// Recommendation score rescaled to 0-100
pub fn strength(score: f64) -> u8 {
    (score / MAX_RECOMMENDATION_SCORE * 100.0).clamp(0.0, 100.0).round() as u8
}
