//! StabRank Core — bootstrap aggregation and stability metrics.
//!
//! This crate contains the numeric heart of the engine:
//! - Prediction matrices with the label-0 probability convention
//! - Bootstrap sampling with a deterministic per-estimator RNG hierarchy
//! - Ensemble aggregation into point predictions and label matrices
//! - Stability, uncertainty, and statistical-bias metrics
//!
//! Everything here is a pure function over immutable inputs.

pub mod bootstrap;
pub mod error;
pub mod prediction;
pub mod rng;
pub mod stability;

pub use bootstrap::{
    aggregate, bootstrap_plan, draw_bootstrap_sample, BootstrapAggregate, BootstrapConfig,
};
pub use error::{EngineError, Result};
pub use prediction::{binarize, PredictionMatrix, DECISION_THRESHOLD};
pub use rng::SeedHierarchy;
pub use stability::{
    churn, confidence_interval_95, entropy, jitter, label_stability, mean_std_iqr,
    per_sample_accuracy_and_stability, statistical_bias, OverallStability, PerSampleOutcome,
    PredictionStats, SampleSpread,
};
