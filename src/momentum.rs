//! Multi-horizon momentum analysis
//!
//! For every horizon `h` the latest h-bar return is compared against the
//! distribution of h-bar returns over a trailing baseline window, giving a
//! z-score. The significance threshold those z-scores are judged against is
//! resolved per call:
//!
//! 1. liquidity segment (by average volume) picks a segment threshold, else the base one
//! 2. optional dynamic calibration blends in an upper quantile of the historical |z|
//! 3. the result is always clipped to `[dynamic_min, dynamic_max]`
//!
//! The analyzer holds no state between calls; identical inputs give identical output.

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, Statistics};
use tracing::debug;

use crate::config::{LiquidityBreakpoints, ScannerConfig, SegmentThresholds};

/// Standard deviations at or below this are treated as zero
pub const STD_EPSILON: f64 = 1e-9;

/// Minimum number of historical returns needed for a dynamic threshold candidate
const MIN_DYNAMIC_SAMPLES: usize = 10;

/// Volume bucket used to select the z-score threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquiditySegment {
    High,
    Mid,
    Low,
}

impl LiquiditySegment {
    pub fn classify(avg_volume: f64, breakpoints: &LiquidityBreakpoints) -> Self {
        if avg_volume >= breakpoints.high {
            LiquiditySegment::High
        } else if avg_volume <= breakpoints.low {
            LiquiditySegment::Low
        } else {
            LiquiditySegment::Mid
        }
    }

    fn threshold(&self, thresholds: &SegmentThresholds) -> Option<f64> {
        match self {
            LiquiditySegment::High => thresholds.high,
            LiquiditySegment::Mid => thresholds.mid,
            LiquiditySegment::Low => thresholds.low,
        }
    }
}

/// Momentum reading for one horizon. Percent units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MomentumMetric {
    pub horizon: usize,
    pub return_pct: f64,
    pub mean_pct: f64,
    pub std_pct: f64,
    pub zscore: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MomentumProfile {
    /// One metric per evaluated horizon, in horizon order
    pub metrics: Vec<MomentumMetric>,
    pub dominant: Option<MomentumMetric>,
    pub positive: bool,
    pub negative: bool,
    pub dominant_zscore: f64,
    pub dominant_return_pct: f64,
    /// +1 / -1 when the dominant z-score crosses the threshold, else 0
    pub dominant_direction: i8,
    pub effective_threshold: f64,
    pub base_threshold: f64,
    pub segment_threshold: Option<f64>,
    pub dynamic_threshold: Option<f64>,
    pub liquidity_segment: Option<LiquiditySegment>,
    pub baseline_window: usize,
    pub dynamic_sample_count: usize,
}

impl MomentumProfile {
    /// Profile with no readings and every flag false
    pub fn neutral(base_threshold: f64, effective_threshold: f64, baseline_window: usize) -> Self {
        MomentumProfile {
            metrics: Vec::new(),
            dominant: None,
            positive: false,
            negative: false,
            dominant_zscore: 0.0,
            dominant_return_pct: 0.0,
            dominant_direction: 0,
            effective_threshold,
            base_threshold,
            segment_threshold: None,
            dynamic_threshold: None,
            liquidity_segment: None,
            baseline_window,
            dynamic_sample_count: 0,
        }
    }

    pub fn has_reading(&self) -> bool {
        !self.metrics.is_empty()
    }
}

/// Dynamic threshold calibration settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicCalibration {
    pub window: usize,
    pub quantile: f64,
    pub alpha: f64,
}

/// Computes `MomentumProfile`s for close series
#[derive(Debug, Clone, PartialEq)]
pub struct MomentumAnalyzer {
    horizons: Vec<usize>,
    baseline_window: usize,
    base_threshold: f64,
    segments: SegmentThresholds,
    breakpoints: LiquidityBreakpoints,
    dynamic: Option<DynamicCalibration>,
    threshold_min: f64,
    threshold_max: f64,
}

impl MomentumAnalyzer {
    pub fn from_config(config: &ScannerConfig) -> Self {
        let dynamic = config.momentum_dynamic_enabled.then_some(DynamicCalibration {
            window: config.momentum_dynamic_window,
            quantile: config.momentum_dynamic_quantile,
            alpha: config.momentum_dynamic_alpha,
        });

        MomentumAnalyzer {
            horizons: config.momentum_windows.clone(),
            baseline_window: config.momentum_baseline_window.max(1),
            base_threshold: config.momentum_z_threshold,
            segments: config.momentum_segment_thresholds,
            breakpoints: config.momentum_liquidity_breakpoints,
            dynamic,
            threshold_min: config.momentum_dynamic_min,
            threshold_max: config.momentum_dynamic_max,
        }
    }

    /// Analyze a close series (oldest first).
    ///
    /// `avg_volume` enables liquidity segmentation; without it the base
    /// threshold is used.
    pub fn analyze(&self, closes: &[f64], avg_volume: Option<f64>) -> MomentumProfile {
        let liquidity_segment = avg_volume
            .filter(|v| v.is_finite())
            .map(|v| LiquiditySegment::classify(v, &self.breakpoints));
        let segment_threshold = liquidity_segment.and_then(|s| s.threshold(&self.segments));
        let static_threshold = segment_threshold.unwrap_or(self.base_threshold);

        let mut metrics = Vec::with_capacity(self.horizons.len());
        let mut candidates = Vec::new();

        for &horizon in &self.horizons {
            let Some((metric, returns)) = self.horizon_metric(closes, horizon) else {
                debug!(
                    "Skipping momentum horizon {}: {} closes available",
                    horizon,
                    closes.len()
                );
                continue;
            };
            metrics.push(metric);

            if let Some(dynamic) = &self.dynamic {
                if let Some(candidate) = self.dynamic_candidate(&returns, dynamic) {
                    candidates.push(candidate);
                }
            }
        }

        let dynamic_threshold = match (&self.dynamic, candidates.is_empty()) {
            (Some(_), false) => {
                let mut data = Data::new(candidates.clone());
                Some(self.clip(data.median()))
            }
            _ => None,
        };

        let blended = match (dynamic_threshold, &self.dynamic) {
            (Some(dynamic), Some(cal)) => cal.alpha * dynamic + (1.0 - cal.alpha) * static_threshold,
            _ => static_threshold,
        };
        let effective_threshold = self.clip(blended);

        if metrics.is_empty() {
            let mut profile = MomentumProfile::neutral(
                self.base_threshold,
                effective_threshold,
                self.baseline_window,
            );
            profile.segment_threshold = segment_threshold;
            profile.liquidity_segment = liquidity_segment;
            return profile;
        }

        let dominant = metrics
            .iter()
            .copied()
            .max_by(|a, b| {
                a.zscore
                    .abs()
                    .partial_cmp(&b.zscore.abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

        let positive = metrics.iter().any(|m| m.zscore >= effective_threshold);
        let negative = metrics.iter().any(|m| m.zscore <= -effective_threshold);

        let (dominant_zscore, dominant_return_pct) = dominant
            .map(|m| (m.zscore, m.return_pct))
            .unwrap_or((0.0, 0.0));
        let dominant_direction = if dominant_zscore >= effective_threshold {
            1
        } else if dominant_zscore <= -effective_threshold {
            -1
        } else {
            0
        };

        MomentumProfile {
            metrics,
            dominant,
            positive,
            negative,
            dominant_zscore,
            dominant_return_pct,
            dominant_direction,
            effective_threshold,
            base_threshold: self.base_threshold,
            segment_threshold,
            dynamic_threshold,
            liquidity_segment,
            baseline_window: self.baseline_window,
            dynamic_sample_count: candidates.len(),
        }
    }

    /// Metric for one horizon plus the full h-bar return series it came from
    fn horizon_metric(&self, closes: &[f64], horizon: usize) -> Option<(MomentumMetric, Vec<f64>)> {
        if horizon == 0 || closes.len() <= horizon {
            return None;
        }

        let last = closes[closes.len() - 1];
        let reference = closes[closes.len() - 1 - horizon];
        if reference == 0.0 {
            return None;
        }
        let current = (last - reference) / reference;
        if !current.is_finite() {
            return None;
        }

        let returns = horizon_returns(closes, horizon);
        let start = returns.len().saturating_sub(self.baseline_window);
        let recent = &returns[start..];
        if recent.is_empty() {
            return None;
        }

        let mean = recent.mean();
        let std = recent.population_std_dev();
        let zscore = zscore(current, mean, std);

        Some((
            MomentumMetric {
                horizon,
                return_pct: current * 100.0,
                mean_pct: mean * 100.0,
                std_pct: if std.is_finite() { std * 100.0 } else { 0.0 },
                zscore,
            },
            returns,
        ))
    }

    /// Upper quantile of the absolute z history over the dynamic window
    fn dynamic_candidate(&self, returns: &[f64], dynamic: &DynamicCalibration) -> Option<f64> {
        let window_len = dynamic.window.max(self.baseline_window);
        let start = returns.len().saturating_sub(window_len);
        let history = &returns[start..];

        let required = MIN_DYNAMIC_SAMPLES.max(window_len / 3);
        if history.len() < required {
            return None;
        }

        let mean = history.mean();
        let std = history.population_std_dev();
        if !(std > STD_EPSILON) {
            return None;
        }

        let abs_z: Vec<f64> = history.iter().map(|r| ((r - mean) / std).abs()).collect();
        let candidate = Data::new(abs_z).quantile(dynamic.quantile);
        (candidate.is_finite() && candidate > 0.0).then_some(candidate)
    }

    fn clip(&self, value: f64) -> f64 {
        value.max(self.threshold_min).min(self.threshold_max)
    }
}

/// `(value - mean) / std`, defined as 0 when the std is ~0 or not finite
pub fn zscore(value: f64, mean: f64, std: f64) -> f64 {
    if std.is_finite() && std > STD_EPSILON {
        let z = (value - mean) / std;
        if z.is_finite() {
            return z;
        }
    }
    0.0
}

/// h-bar fractional returns, skipping zero reference prices
pub fn horizon_returns(closes: &[f64], horizon: usize) -> Vec<f64> {
    if horizon == 0 || closes.len() <= horizon {
        return Vec::new();
    }
    closes
        .windows(horizon + 1)
        .filter_map(|w| {
            let reference = w[0];
            let r = (w[horizon] - reference) / reference;
            (reference != 0.0 && r.is_finite()).then_some(r)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn static_config() -> ScannerConfig {
        ScannerConfig {
            momentum_dynamic_enabled: false,
            ..ScannerConfig::default()
        }
    }

    #[test]
    fn test_horizon_returns() {
        let returns = horizon_returns(&[100.0, 110.0, 121.0], 1);
        assert_eq!(returns.len(), 2);
        assert_relative_eq!(returns[0], 0.1, epsilon = 1e-12);
        assert_relative_eq!(returns[1], 0.1, epsilon = 1e-12);

        let skipped = horizon_returns(&[0.0, 10.0, 11.0], 1);
        assert_eq!(skipped.len(), 1);
        assert!(horizon_returns(&[1.0, 2.0], 2).is_empty());
    }

    #[test]
    fn test_zscore_fallback() {
        assert_eq!(zscore(5.0, 1.0, 0.0), 0.0);
        assert_eq!(zscore(5.0, 1.0, f64::NAN), 0.0);
        assert_eq!(zscore(5.0, 1.0, 1e-12), 0.0);
        assert_relative_eq!(zscore(5.0, 1.0, 2.0), 2.0);
    }

    #[test]
    fn test_constant_series_is_neutral_flags() {
        let closes = vec![100.0; 30];
        let analyzer = MomentumAnalyzer::from_config(&ScannerConfig::default());
        let profile = analyzer.analyze(&closes, Some(500_000.0));

        assert_eq!(profile.metrics.len(), 3);
        for m in &profile.metrics {
            assert_eq!(m.zscore, 0.0);
            assert_eq!(m.std_pct, 0.0);
        }
        assert!(!profile.positive);
        assert!(!profile.negative);
        assert_eq!(profile.dominant_direction, 0);
        assert_eq!(profile.dynamic_threshold, None);
    }

    #[test]
    fn test_empty_series_gives_neutral_profile() {
        let analyzer = MomentumAnalyzer::from_config(&ScannerConfig::default());
        let profile = analyzer.analyze(&[], None);
        assert!(!profile.has_reading());
        assert!(profile.dominant.is_none());
        assert!(!profile.positive && !profile.negative);
        assert_relative_eq!(profile.effective_threshold, 1.5);
    }

    #[test]
    fn test_short_series_skips_long_horizons() {
        let analyzer = MomentumAnalyzer::from_config(&static_config());
        let profile = analyzer.analyze(&[100.0, 101.0, 103.0], None);
        let horizons: Vec<usize> = profile.metrics.iter().map(|m| m.horizon).collect();
        assert_eq!(horizons, vec![1]);
    }

    #[test]
    fn test_accelerating_move_is_positive() {
        let mut closes: Vec<f64> = (0..40).map(|i| 100.0 + (i % 2) as f64 * 0.5).collect();
        closes.push(110.0);
        let config = ScannerConfig {
            momentum_windows: vec![1],
            momentum_baseline_window: 20,
            ..static_config()
        };
        let profile = MomentumAnalyzer::from_config(&config).analyze(&closes, None);

        let dominant = profile.dominant.unwrap();
        assert_eq!(dominant.horizon, 1);
        assert!(dominant.zscore > profile.effective_threshold);
        assert!(profile.positive);
        assert_eq!(profile.dominant_direction, 1);
        assert_relative_eq!(profile.dominant_return_pct, (110.0 / 100.5 - 1.0) * 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_segment_selection() {
        let bp = LiquidityBreakpoints::default();
        assert_eq!(LiquiditySegment::classify(2_000_000.0, &bp), LiquiditySegment::High);
        assert_eq!(LiquiditySegment::classify(1_000_000.0, &bp), LiquiditySegment::High);
        assert_eq!(LiquiditySegment::classify(500_000.0, &bp), LiquiditySegment::Mid);
        assert_eq!(LiquiditySegment::classify(300_000.0, &bp), LiquiditySegment::Low);

        let analyzer = MomentumAnalyzer::from_config(&static_config());
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let high = analyzer.analyze(&closes, Some(5_000_000.0));
        assert_eq!(high.liquidity_segment, Some(LiquiditySegment::High));
        assert_eq!(high.segment_threshold, Some(2.0));
        assert_relative_eq!(high.effective_threshold, 2.0);

        let low = analyzer.analyze(&closes, Some(1_000.0));
        assert_relative_eq!(low.effective_threshold, 1.4);

        let none = analyzer.analyze(&closes, None);
        assert_eq!(none.liquidity_segment, None);
        assert_relative_eq!(none.effective_threshold, 1.5);
    }

    #[test]
    fn test_missing_segment_threshold_uses_base() {
        let config = ScannerConfig {
            momentum_segment_thresholds: SegmentThresholds {
                high: None,
                mid: None,
                low: None,
            },
            ..static_config()
        };
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let profile = MomentumAnalyzer::from_config(&config).analyze(&closes, Some(5_000_000.0));
        assert_eq!(profile.segment_threshold, None);
        assert_relative_eq!(profile.effective_threshold, 1.5);
    }

    #[test]
    fn test_static_threshold_is_clipped() {
        let config = ScannerConfig {
            momentum_z_threshold: 9.0,
            momentum_segment_thresholds: SegmentThresholds {
                high: None,
                mid: None,
                low: None,
            },
            ..static_config()
        };
        let profile = MomentumAnalyzer::from_config(&config).analyze(&[1.0, 2.0, 3.0], None);
        assert_relative_eq!(profile.effective_threshold, 3.0);
    }

    #[test]
    fn test_dynamic_threshold_blends_and_clips() {
        // Noisy series long enough for the dynamic window
        let closes: Vec<f64> = (0..120)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 3.0 + i as f64 * 0.05)
            .collect();
        let config = ScannerConfig::default();
        let profile = MomentumAnalyzer::from_config(&config).analyze(&closes, None);

        let dynamic = profile.dynamic_threshold.unwrap();
        assert!(dynamic >= config.momentum_dynamic_min && dynamic <= config.momentum_dynamic_max);
        assert_eq!(profile.dynamic_sample_count, 3);

        let expected = (0.6 * dynamic + 0.4 * 1.5).clamp(1.1, 3.0);
        assert_relative_eq!(profile.effective_threshold, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_dynamic_requires_enough_history() {
        let closes: Vec<f64> = (0..12).map(|i| 100.0 + (i as f64).sin()).collect();
        let profile =
            MomentumAnalyzer::from_config(&ScannerConfig::default()).analyze(&closes, None);
        assert!(profile.has_reading());
        assert_eq!(profile.dynamic_threshold, None);
        assert_eq!(profile.dynamic_sample_count, 0);
    }

    #[test]
    fn test_idempotent() {
        let closes: Vec<f64> = (0..90).map(|i| 50.0 + (i as f64 * 0.3).cos() * 2.0).collect();
        let analyzer = MomentumAnalyzer::from_config(&ScannerConfig::default());
        assert_eq!(
            analyzer.analyze(&closes, Some(400_000.0)),
            analyzer.analyze(&closes, Some(400_000.0))
        );
    }
}
