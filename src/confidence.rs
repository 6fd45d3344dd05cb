//! Confidence arithmetic: bounded exponential-moving-average merges.
//!
//! Every belief in the knowledge graph carries a confidence score in [0, 1].
//! New evidence never overwrites an existing score; it is folded in with an
//! EMA step that contracts toward the observed signal. All functions here are
//! pure, deterministic, and clamp rather than fail — validation of inputs
//! happens at the ingestion boundary, not here.
//!
//! There is deliberately no time-based decay: a score only moves when new
//! evidence arrives.

use crate::error::GraphError;

/// Merge an existing confidence with a newly observed signal.
///
/// `new = clamp(old + rate * (signal - old), 0.0, 1.0)`
///
/// The result always lies between `old` and `signal` (for `rate` in [0, 1]),
/// so repeated observations of the same signal converge without overshooting.
pub fn merge(old: f64, signal: f64, rate: f64) -> f64 {
    (old + rate * (signal - old)).clamp(0.0, 1.0)
}

/// Merge with an optional prior.
///
/// The first observation initializes the score to the signal directly rather
/// than taking an EMA step from an arbitrary default.
pub fn merge_or_init(old: Option<f64>, signal: f64, rate: f64) -> f64 {
    match old {
        Some(prior) => merge(prior, signal, rate),
        None => signal.clamp(0.0, 1.0),
    }
}

/// Absolute disagreement between two confidence scores.
pub fn divergence(a: f64, b: f64) -> f64 {
    (a - b).abs()
}

/// Validate that a value is a finite unit-interval scalar.
///
/// Used at ingestion boundaries; confidence arithmetic itself never errors.
pub fn validate_unit(value: f64, context: &str) -> Result<(), GraphError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(GraphError::InvalidConfidence {
            value,
            context: context.to_string(),
        });
    }
    Ok(())
}
