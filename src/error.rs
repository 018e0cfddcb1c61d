//! Error taxonomy for the quant core
//!
//! Library code returns `CoreError`; the binary wraps everything in `anyhow`.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoreError {
    /// Too few bars for a horizon, window or indicator. The caller skips that
    /// symbol/horizon/day and continues.
    #[error("insufficient data: {0}")]
    DataInsufficient(String),

    /// Zero variance or zero reference price. Always resolved by a fallback value.
    #[error("degenerate computation: {0}")]
    ComputationDegenerate(String),

    /// Rejected configuration. Fatal before any simulation starts.
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    /// The candidate entry is skipped and no trade is opened.
    #[error("simulation inconsistency: {0}")]
    SimulationInconsistency(String),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// `num / den`, or `ComputationDegenerate` when the denominator is ~0 or the
/// result is not finite.
pub fn checked_ratio(num: f64, den: f64) -> CoreResult<f64> {
    if den.abs() <= f64::EPSILON {
        return Err(CoreError::ComputationDegenerate(format!(
            "division of {} by ~0",
            num
        )));
    }
    let value = num / den;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CoreError::ComputationDegenerate(format!(
            "{} / {} is not finite",
            num, den
        )))
    }
}
