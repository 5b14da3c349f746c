//! Prediction inputs: per-estimator probability matrices and binary labels.
//!
//! Probabilities follow the label-0 convention: each entry is the probability
//! that the sample belongs to the reference class (label 0). A value below the
//! 0.5 threshold therefore predicts label 1.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Decision threshold used for every binarization in the engine.
pub const DECISION_THRESHOLD: f64 = 0.5;

/// Binarize a label-0 probability: `1` if `p < 0.5`, else `0`.
///
/// Exactly 0.5 maps to label 0.
#[inline]
pub fn binarize(probability: f64) -> u8 {
    u8::from(probability < DECISION_THRESHOLD)
}

/// Estimator × sample matrix of label-0 probabilities.
///
/// Rows are bootstrap estimators, columns are test samples. The `index` holds
/// the caller's original sample identifiers so aggregated outputs can be
/// re-aligned with the source rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPredictionMatrix")]
pub struct PredictionMatrix {
    rows: Vec<Vec<f64>>,
    index: Vec<usize>,
}

/// Wire form of [`PredictionMatrix`]; validated on the way in.
#[derive(Deserialize)]
struct RawPredictionMatrix {
    rows: Vec<Vec<f64>>,
    index: Vec<usize>,
}

impl TryFrom<RawPredictionMatrix> for PredictionMatrix {
    type Error = EngineError;

    fn try_from(raw: RawPredictionMatrix) -> Result<Self> {
        PredictionMatrix::new(raw.rows)?.with_index(raw.index)
    }
}

impl PredictionMatrix {
    /// Build a matrix from estimator rows.
    ///
    /// Rejects empty input, ragged rows, and probabilities outside [0, 1].
    pub fn new(rows: Vec<Vec<f64>>) -> Result<Self> {
        let n_samples = match rows.first() {
            Some(first) if !first.is_empty() => first.len(),
            _ => {
                return Err(EngineError::InsufficientSample {
                    count: 0,
                    required: 1,
                })
            }
        };

        for (estimator, row) in rows.iter().enumerate() {
            if row.len() != n_samples {
                return Err(EngineError::DimensionMismatch {
                    expected: n_samples,
                    actual: row.len(),
                });
            }
            for (sample, &value) in row.iter().enumerate() {
                if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                    return Err(EngineError::InvalidProbability {
                        estimator,
                        sample,
                        value,
                    });
                }
            }
        }

        Ok(Self {
            rows,
            index: (0..n_samples).collect(),
        })
    }

    /// Attach original sample identifiers.
    pub fn with_index(mut self, index: Vec<usize>) -> Result<Self> {
        if index.len() != self.n_samples() {
            return Err(EngineError::DimensionMismatch {
                expected: self.n_samples(),
                actual: index.len(),
            });
        }
        self.index = index;
        Ok(self)
    }

    pub fn n_estimators(&self) -> usize {
        self.rows.len()
    }

    pub fn n_samples(&self) -> usize {
        self.index.len()
    }

    pub fn index(&self) -> &[usize] {
        &self.index
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// All estimators' probabilities for one sample.
    pub fn column(&self, sample: usize) -> Vec<f64> {
        self.rows.iter().map(|row| row[sample]).collect()
    }

    /// Column-wise mean probability (the ensemble's main prediction).
    pub fn column_means(&self) -> Vec<f64> {
        let n = self.rows.len() as f64;
        let mut sums = vec![0.0; self.n_samples()];
        for row in &self.rows {
            for (acc, &p) in sums.iter_mut().zip(row) {
                *acc += p;
            }
        }
        sums.into_iter().map(|s| s / n).collect()
    }
}

/// Check that every label is 0 or 1 and the length matches `expected`.
pub fn validate_labels(labels: &[u8], expected: usize) -> Result<()> {
    if labels.len() != expected {
        return Err(EngineError::DimensionMismatch {
            expected,
            actual: labels.len(),
        });
    }
    if let Some((sample, &value)) = labels.iter().enumerate().find(|&(_, &v)| v > 1) {
        return Err(EngineError::InvalidLabel { sample, value });
    }
    Ok(())
}
