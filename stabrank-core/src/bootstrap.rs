//! Bootstrap sampling and ensemble aggregation.
//!
//! Each bootstrap estimator is trained on a uniform resample of the training
//! rows; its label-0 probabilities on the test set form one row of a
//! [`PredictionMatrix`]. Aggregation collapses the matrix into the ensemble's
//! point prediction and binarized per-estimator labels.
//!
//! Draws are reproducible: [`bootstrap_plan`] derives one RNG per estimator
//! from the master seed, so the plan does not depend on thread count.

use rand::seq::index;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::prediction::{binarize, PredictionMatrix};
use crate::rng::SeedHierarchy;

// ─── Configuration ───────────────────────────────────────────────────

/// Configuration for bootstrap resampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Number of bootstrap estimators (default 200).
    pub n_estimators: usize,
    /// Sample size as a fraction of the input rows (default 0.8).
    pub bootstrap_fraction: f64,
    /// Draw with replacement (default true).
    pub with_replacement: bool,
    /// Master seed for the per-estimator RNG hierarchy.
    pub seed: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            bootstrap_fraction: 0.8,
            with_replacement: true,
            seed: 42,
        }
    }
}

impl BootstrapConfig {
    /// Number of rows each estimator draws from `n_rows` input rows.
    pub fn sample_size(&self, n_rows: usize) -> usize {
        (self.bootstrap_fraction * n_rows as f64).round() as usize
    }
}

// ─── Result types ────────────────────────────────────────────────────

/// Ensemble aggregate of a prediction matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapAggregate {
    /// Original sample identifiers, in input order.
    pub index: Vec<usize>,
    /// Column-wise mean label-0 probability.
    pub main_prediction: Vec<f64>,
    /// Binarized `main_prediction`.
    pub predicted_labels: Vec<u8>,
    /// Binarized prediction matrix, estimator × sample.
    pub per_sample_labels: Vec<Vec<u8>>,
}

// ─── Sampling ────────────────────────────────────────────────────────

/// Draw `size` row indices uniformly from `0..n_rows`.
///
/// Without replacement the draw is capped at `n_rows`; the caller detects the
/// short sample.
fn draw_indices<R: Rng + ?Sized>(
    n_rows: usize,
    size: usize,
    with_replacement: bool,
    rng: &mut R,
) -> Vec<usize> {
    if n_rows == 0 {
        return Vec::new();
    }
    if with_replacement {
        (0..size).map(|_| rng.gen_range(0..n_rows)).collect()
    } else {
        index::sample(rng, n_rows, size.min(n_rows)).into_vec()
    }
}

/// Draw a bootstrap sample of `size` aligned rows from `features` and `labels`.
///
/// Fails with `SampleSize` when the drawn sample does not have exactly `size`
/// rows (e.g. `size > n` without replacement, or an empty input).
pub fn draw_bootstrap_sample<F, L, R>(
    features: &[F],
    labels: &[L],
    size: usize,
    with_replacement: bool,
    rng: &mut R,
) -> Result<(Vec<F>, Vec<L>)>
where
    F: Clone,
    L: Clone,
    R: Rng + ?Sized,
{
    if features.len() != labels.len() {
        return Err(EngineError::DimensionMismatch {
            expected: features.len(),
            actual: labels.len(),
        });
    }

    let indices = draw_indices(features.len(), size, with_replacement, rng);
    if indices.len() != size {
        return Err(EngineError::SampleSize {
            requested: size,
            actual: indices.len(),
        });
    }

    let sampled_features = indices.iter().map(|&i| features[i].clone()).collect();
    let sampled_labels = indices.iter().map(|&i| labels[i].clone()).collect();
    Ok((sampled_features, sampled_labels))
}

/// Produce one reproducible index draw per estimator.
pub fn bootstrap_plan(n_rows: usize, config: &BootstrapConfig) -> Result<Vec<Vec<usize>>> {
    let size = config.sample_size(n_rows);
    let hierarchy = SeedHierarchy::new(config.seed);

    debug!(
        n_rows,
        size,
        n_estimators = config.n_estimators,
        with_replacement = config.with_replacement,
        "building bootstrap plan"
    );

    (0..config.n_estimators)
        .into_par_iter()
        .map(|estimator| {
            let mut rng = hierarchy.rng_for("bootstrap", estimator as u64);
            let indices = draw_indices(n_rows, size, config.with_replacement, &mut rng);
            if indices.len() != size {
                return Err(EngineError::SampleSize {
                    requested: size,
                    actual: indices.len(),
                });
            }
            Ok(indices)
        })
        .collect()
}

// ─── Aggregation ─────────────────────────────────────────────────────

/// Aggregate a prediction matrix into point predictions and label matrices.
///
/// `main_prediction` is the column-wise mean; it and every estimator row are
/// binarized with [`binarize`]. Sample order and index are preserved.
pub fn aggregate(predictions: &PredictionMatrix) -> BootstrapAggregate {
    let main_prediction = predictions.column_means();
    let predicted_labels = main_prediction.iter().map(|&p| binarize(p)).collect();
    let per_sample_labels = predictions
        .rows()
        .iter()
        .map(|row| row.iter().map(|&p| binarize(p)).collect())
        .collect();

    BootstrapAggregate {
        index: predictions.index().to_vec(),
        main_prediction,
        predicted_labels,
        per_sample_labels,
    }
}
