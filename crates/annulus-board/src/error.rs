/// Caller-programming errors raised at configuration time.
///
/// Per-frame outcomes (no detection, ambiguous topology, decode failure)
/// are *not* errors; they are reported through [`crate::FrameDetection`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be positive and finite (got {value})")]
    NonPositive { name: &'static str, value: f64 },
    #[error("inner circle diameter ({inner}) must be smaller than outer ({outer})")]
    InnerNotSmaller { inner: f64, outer: f64 },
    #[error("{name} must be non-negative and finite (got {value})")]
    NegativeTolerance { name: &'static str, value: f64 },
    #[error("numbering layout has no code cells")]
    EmptyNumberingLayout,
}

pub(crate) fn require_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::NonPositive { name, value });
    }
    Ok(())
}

pub(crate) fn require_tolerance(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::NegativeTolerance { name, value });
    }
    Ok(())
}
