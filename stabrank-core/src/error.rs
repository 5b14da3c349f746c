//! Engine error taxonomy.
//!
//! Every error is raised at the point of detection. Operations are
//! deterministic, so nothing here is retryable.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid range for {metric}: max {max} < min {min}")]
    InvalidRange { metric: String, min: f64, max: f64 },

    #[error("non-finite range bound for {metric}: [{min}, {max}]")]
    NonFiniteRange { metric: String, min: f64, max: f64 },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("insufficient models: {count} < minimum 2")]
    InsufficientModels { count: usize },

    #[error("insufficient sample: {count} observations < minimum {required}")]
    InsufficientSample { count: usize, required: usize },

    #[error("bootstrap sample has {actual} rows, requested {requested}")]
    SampleSize { requested: usize, actual: usize },

    #[error("probability {value} at estimator {estimator}, sample {sample} is outside [0, 1]")]
    InvalidProbability {
        estimator: usize,
        sample: usize,
        value: f64,
    },

    #[error("label {value} at sample {sample} is not binary")]
    InvalidLabel { sample: usize, value: u8 },

    #[error("non-finite value at position {position}")]
    NonFiniteValue { position: usize },

    #[error("tolerance must be non-negative, got {0}")]
    InvalidTolerance(f64),
}

pub type Result<T> = std::result::Result<T, EngineError>;
