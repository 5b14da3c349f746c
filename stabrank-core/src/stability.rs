//! Stability, uncertainty, and statistical-bias metrics.
//!
//! Every metric is a pure function: labels and/or probabilities in, scalar or
//! per-sample vector out. Probabilities use the label-0 convention described
//! in [`crate::prediction`].
//!
//! Per-sample work and pairwise churn are embarrassingly parallel and run on
//! the rayon pool.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::prediction::{binarize, validate_labels, PredictionMatrix};

/// Two-sided 95% standard normal quantile, Φ⁻¹(0.975).
const Z_95: f64 = 1.959_963_984_540_054;

// ─── Label agreement ─────────────────────────────────────────────────

/// `|ones − zeros| / n` over a set of binary predictions for one sample.
///
/// 1.0 means every run agreed; 0.0 means an even split.
pub fn label_stability(labels: &[u8]) -> Result<f64> {
    if labels.is_empty() {
        return Err(EngineError::InsufficientSample {
            count: 0,
            required: 1,
        });
    }
    let ones = labels.iter().filter(|&&l| l == 1).count() as f64;
    let zeros = labels.len() as f64 - ones;
    Ok((ones - zeros).abs() / labels.len() as f64)
}

/// Fraction of positions where two prediction sequences disagree.
pub fn churn(a: &[u8], b: &[u8]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(EngineError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    if a.is_empty() {
        return Ok(0.0);
    }
    Ok(disagreements(a, b) as f64 / a.len() as f64)
}

/// Positions where two equal-length sequences differ.
fn disagreements(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).filter(|(x, y)| x != y).count()
}

/// Mean churn over all unordered pairs of prediction sequences.
///
/// 0.0 is perfect agreement between models, 1.0 total disagreement.
pub fn jitter(sequences: &[Vec<u8>]) -> Result<f64> {
    let m = sequences.len();
    if m < 2 {
        return Err(EngineError::InsufficientModels { count: m });
    }
    let expected = sequences[0].len();
    if let Some(bad) = sequences.iter().find(|s| s.len() != expected) {
        return Err(EngineError::DimensionMismatch {
            expected,
            actual: bad.len(),
        });
    }

    if expected == 0 {
        return Ok(0.0);
    }

    let differing: usize = (0..m)
        .into_par_iter()
        .map(|i| {
            ((i + 1)..m)
                .map(|j| disagreements(&sequences[i], &sequences[j]))
                .sum::<usize>()
        })
        .sum();

    let pairs = (m * (m - 1)) as f64 / 2.0;
    Ok(differing as f64 / expected as f64 / pairs)
}

// ─── Probability-based metrics ───────────────────────────────────────

/// Shannon entropy (bits) of a Bernoulli(p) prediction.
///
/// 0 at p ∈ {0, 1}, maximum 1.0 at p = 0.5.
pub fn entropy(p: f64) -> f64 {
    if p <= 0.0 || p >= 1.0 {
        return 0.0;
    }
    let q = 1.0 - p;
    -(p * p.log2() + q * q.log2())
}

/// `|true_label − E[label]|` where `E[label] = 1 − p` for label-0 probability `p`.
pub fn statistical_bias(p: f64, true_label: u8) -> f64 {
    (f64::from(true_label) - (1.0 - p)).abs()
}

// ─── Summary statistics ──────────────────────────────────────────────

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n − 1). Zero for fewer than two values.
fn sample_std(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}

/// Percentile of a sorted slice using linear interpolation, `p` in [0, 100].
fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    let frac = rank - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}

fn iqr(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(&sorted, 75.0) - percentile_sorted(&sorted, 25.0)
}

/// Normal-approximation 95% confidence interval for the mean.
///
/// Uses the standard error of the mean with the n − 1 sample deviation. A
/// constant sample yields the degenerate interval `(mean, mean)`.
pub fn confidence_interval_95(values: &[f64]) -> Result<(f64, f64)> {
    if values.len() < 2 {
        return Err(EngineError::InsufficientSample {
            count: values.len(),
            required: 2,
        });
    }
    if let Some(position) = values.iter().position(|v| !v.is_finite()) {
        return Err(EngineError::NonFiniteValue { position });
    }
    let m = mean(values);
    let sem = sample_std(values) / (values.len() as f64).sqrt();
    Ok((m - Z_95 * sem, m + Z_95 * sem))
}

/// Spread of one sample's predictions across estimators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleSpread {
    pub mean: f64,
    pub std: f64,
    pub iqr: f64,
}

/// Column-wise mean, standard deviation, and interquartile range.
///
/// `matrix` is model/estimator × sample. One [`SampleSpread`] per column.
pub fn mean_std_iqr(matrix: &[Vec<f64>]) -> Result<Vec<SampleSpread>> {
    let n_columns = match matrix.first() {
        Some(row) => row.len(),
        None => return Err(EngineError::InsufficientModels { count: 0 }),
    };
    if let Some(bad) = matrix.iter().find(|r| r.len() != n_columns) {
        return Err(EngineError::DimensionMismatch {
            expected: n_columns,
            actual: bad.len(),
        });
    }

    Ok((0..n_columns)
        .into_par_iter()
        .map(|j| {
            let column: Vec<f64> = matrix.iter().map(|row| row[j]).collect();
            SampleSpread {
                mean: mean(&column),
                std: sample_std(&column),
                iqr: iqr(&column),
            }
        })
        .collect())
}

// ─── Per-sample accuracy and stability ───────────────────────────────

/// Per-sample accuracy and label stability across estimators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerSampleOutcome {
    pub accuracy: Vec<f64>,
    pub label_stability: Vec<f64>,
}

/// For each sample, binarize every estimator's prediction and derive the
/// fraction of correct predictions and the label stability.
pub fn per_sample_accuracy_and_stability(
    true_labels: &[u8],
    predictions: &PredictionMatrix,
) -> Result<PerSampleOutcome> {
    validate_labels(true_labels, predictions.n_samples())?;

    let (accuracy, label_stability): (Vec<f64>, Vec<f64>) = (0..predictions.n_samples())
        .into_par_iter()
        .map(|sample| {
            let labels: Vec<u8> = predictions
                .rows()
                .iter()
                .map(|row| binarize(row[sample]))
                .collect();
            let share_ones =
                labels.iter().map(|&l| f64::from(l)).sum::<f64>() / labels.len() as f64;
            let accuracy = if true_labels[sample] == 1 {
                share_ones
            } else {
                1.0 - share_ones
            };
            // |ones - zeros| / n; a PredictionMatrix always has an estimator.
            let stability = (2.0 * share_ones - 1.0).abs();
            (accuracy, stability)
        })
        .unzip();

    Ok(PerSampleOutcome {
        accuracy,
        label_stability,
    })
}

// ─── Prediction stats bundle ─────────────────────────────────────────

/// Every per-sample statistic for one model's bootstrap ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionStats {
    pub jitter: f64,
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
    pub iqrs: Vec<f64>,
    /// Mean over estimators of each prediction's entropy.
    pub mean_ensemble_entropy: Vec<f64>,
    /// Entropy of the ensemble's main prediction.
    pub overall_entropy: Vec<f64>,
    pub statistical_bias: Vec<f64>,
    pub per_sample_accuracy: Vec<f64>,
    pub label_stability: Vec<f64>,
}

/// Sample-averaged view of [`PredictionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverallStability {
    pub mean: f64,
    pub std: f64,
    pub iqr: f64,
    pub entropy: f64,
    pub jitter: f64,
    pub per_sample_accuracy: f64,
    pub label_stability: f64,
    pub statistical_bias: f64,
}

impl OverallStability {
    /// Metric names and values, in report order.
    pub fn named_values(&self) -> [(&'static str, f64); 8] {
        [
            ("Mean", self.mean),
            ("Std", self.std),
            ("IQR", self.iqr),
            ("Entropy", self.entropy),
            ("Jitter", self.jitter),
            ("Per_Sample_Accuracy", self.per_sample_accuracy),
            ("Label_Stability", self.label_stability),
            ("Statistical_Bias", self.statistical_bias),
        ]
    }
}

impl PredictionStats {
    /// Compute all statistics for `predictions` against `true_labels`.
    ///
    /// Jitter needs at least two estimators.
    pub fn compute(true_labels: &[u8], predictions: &PredictionMatrix) -> Result<Self> {
        validate_labels(true_labels, predictions.n_samples())?;

        debug!(
            n_estimators = predictions.n_estimators(),
            n_samples = predictions.n_samples(),
            "computing prediction stats"
        );

        let spreads = mean_std_iqr(predictions.rows())?;

        let label_rows: Vec<Vec<u8>> = predictions
            .rows()
            .iter()
            .map(|row| row.iter().map(|&p| binarize(p)).collect())
            .collect();
        let jitter = jitter(&label_rows)?;

        let mean_ensemble_entropy = (0..predictions.n_samples())
            .map(|j| {
                let column = predictions.column(j);
                column.iter().map(|&p| entropy(p)).sum::<f64>() / column.len() as f64
            })
            .collect();

        let main_prediction: Vec<f64> = spreads.iter().map(|s| s.mean).collect();
        let overall_entropy = main_prediction.iter().map(|&p| entropy(p)).collect();
        let statistical_bias = main_prediction
            .iter()
            .zip(true_labels)
            .map(|(&p, &y)| statistical_bias(p, y))
            .collect();

        let outcome = per_sample_accuracy_and_stability(true_labels, predictions)?;

        Ok(Self {
            jitter,
            means: main_prediction,
            stds: spreads.iter().map(|s| s.std).collect(),
            iqrs: spreads.iter().map(|s| s.iqr).collect(),
            mean_ensemble_entropy,
            overall_entropy,
            statistical_bias,
            per_sample_accuracy: outcome.accuracy,
            label_stability: outcome.label_stability,
        })
    }

    /// Average every per-sample statistic over samples.
    pub fn summary(&self) -> OverallStability {
        OverallStability {
            mean: mean(&self.means),
            std: mean(&self.stds),
            iqr: mean(&self.iqrs),
            entropy: mean(&self.overall_entropy),
            jitter: self.jitter,
            per_sample_accuracy: mean(&self.per_sample_accuracy),
            label_stability: mean(&self.label_stability),
            statistical_bias: mean(&self.statistical_bias),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    // ─── Label stability ─────────────────────────────────────────

    #[test]
    fn label_stability_unanimous() {
        assert_eq!(label_stability(&[1, 1, 1, 1, 1]).unwrap(), 1.0);
        assert_eq!(label_stability(&[0, 0, 0]).unwrap(), 1.0);
    }

    #[test]
    fn label_stability_even_split() {
        assert_eq!(label_stability(&[1, 0, 1, 0]).unwrap(), 0.0);
    }

    #[test]
    fn label_stability_partial() {
        assert!(approx(label_stability(&[1, 1, 1, 0]).unwrap(), 0.5));
    }

    #[test]
    fn label_stability_empty_fails() {
        assert!(label_stability(&[]).is_err());
    }

    // ─── Churn and jitter ────────────────────────────────────────

    #[test]
    fn churn_identical_is_zero() {
        let a = [1, 0, 1, 1, 0];
        assert_eq!(churn(&a, &a).unwrap(), 0.0);
    }

    #[test]
    fn churn_counts_differences() {
        assert!(approx(churn(&[1, 0, 1, 0], &[1, 1, 1, 1]).unwrap(), 0.5));
        assert_eq!(churn(&[0, 0], &[1, 1]).unwrap(), 1.0);
    }

    #[test]
    fn churn_length_mismatch() {
        assert_eq!(
            churn(&[1, 0], &[1]).unwrap_err(),
            EngineError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn jitter_identical_is_zero() {
        let s = vec![1, 0, 0, 1];
        assert_eq!(jitter(&[s.clone(), s.clone(), s]).unwrap(), 0.0);
    }

    #[test]
    fn jitter_averages_pairs() {
        // pairs: (a,b)=0.5, (a,c)=1.0, (b,c)=0.5 → mean 2/3
        let a = vec![0, 0];
        let b = vec![0, 1];
        let c = vec![1, 1];
        assert!(approx(jitter(&[a, b, c]).unwrap(), 2.0 / 3.0));
    }

    #[test]
    fn jitter_matches_mean_pairwise_churn() {
        let sequences = vec![
            vec![1, 0, 1, 1, 0],
            vec![1, 1, 1, 0, 0],
            vec![0, 0, 1, 1, 1],
            vec![1, 0, 0, 1, 0],
        ];
        let mut total = 0.0;
        let mut pairs = 0.0;
        for i in 0..sequences.len() {
            for j in (i + 1)..sequences.len() {
                total += churn(&sequences[i], &sequences[j]).unwrap();
                pairs += 1.0;
            }
        }
        assert!(approx(jitter(&sequences).unwrap(), total / pairs));
        assert_eq!(jitter(&[vec![], vec![]]).unwrap(), 0.0);
    }

    #[test]
    fn jitter_single_model_fails() {
        assert_eq!(
            jitter(&[vec![1, 0]]).unwrap_err(),
            EngineError::InsufficientModels { count: 1 }
        );
    }

    #[test]
    fn jitter_ragged_fails() {
        assert!(matches!(
            jitter(&[vec![1, 0], vec![1]]),
            Err(EngineError::DimensionMismatch { .. })
        ));
    }

    // ─── Entropy and bias ────────────────────────────────────────

    #[test]
    fn entropy_endpoints_and_peak() {
        assert_eq!(entropy(0.0), 0.0);
        assert_eq!(entropy(1.0), 0.0);
        assert!(approx(entropy(0.5), 1.0));
        assert!(entropy(0.3) < entropy(0.5));
        assert!(approx(entropy(0.3), entropy(0.7)));
    }

    #[test]
    fn statistical_bias_label_zero_probability() {
        // p = 0.4 → expected label 0.6
        assert!(approx(statistical_bias(0.4, 0), 0.6));
        assert!(approx(statistical_bias(0.4, 1), 0.4));
    }

    // ─── Confidence interval ─────────────────────────────────────

    #[test]
    fn ci_95_brackets_mean() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let (lo, hi) = confidence_interval_95(&values).unwrap();
        // sem = sqrt(2.5)/sqrt(5)
        let half = Z_95 * (2.5_f64).sqrt() / (5.0_f64).sqrt();
        assert!(approx(lo, 3.0 - half));
        assert!(approx(hi, 3.0 + half));
    }

    #[test]
    fn ci_95_constant_sample_is_degenerate() {
        assert_eq!(confidence_interval_95(&[2.0, 2.0, 2.0]).unwrap(), (2.0, 2.0));
    }

    #[test]
    fn ci_95_needs_two_observations() {
        assert_eq!(
            confidence_interval_95(&[1.0]).unwrap_err(),
            EngineError::InsufficientSample {
                count: 1,
                required: 2
            }
        );
    }

    // ─── Spread ──────────────────────────────────────────────────

    #[test]
    fn mean_std_iqr_per_column() {
        let matrix = vec![
            vec![1.0, 0.5],
            vec![2.0, 0.5],
            vec![3.0, 0.5],
            vec![4.0, 0.5],
        ];
        let spreads = mean_std_iqr(&matrix).unwrap();
        assert_eq!(spreads.len(), 2);
        assert!(approx(spreads[0].mean, 2.5));
        assert!(approx(spreads[0].std, (5.0_f64 / 3.0).sqrt()));
        // q1 = 1.75, q3 = 3.25
        assert!(approx(spreads[0].iqr, 1.5));
        assert_eq!(spreads[1].std, 0.0);
        assert_eq!(spreads[1].iqr, 0.0);
    }

    #[test]
    fn mean_std_iqr_single_row_is_zero_spread() {
        let spreads = mean_std_iqr(&[vec![0.3, 0.9]]).unwrap();
        assert_eq!(spreads[0].std, 0.0);
        assert_eq!(spreads[1].iqr, 0.0);
    }

    // ─── Per-sample ──────────────────────────────────────────────

    #[test]
    fn per_sample_accuracy_follows_true_label() {
        // sample 0: probs 0.2, 0.3, 0.7 → labels 1,1,0 ; true 1 → acc 2/3
        // sample 1: probs 0.9, 0.5, 0.6 → labels 0,0,0 ; true 0 → acc 1
        let m = PredictionMatrix::new(vec![vec![0.2, 0.9], vec![0.3, 0.5], vec![0.7, 0.6]])
            .unwrap();
        let out = per_sample_accuracy_and_stability(&[1, 0], &m).unwrap();
        assert!(approx(out.accuracy[0], 2.0 / 3.0));
        assert!(approx(out.accuracy[1], 1.0));
        assert!(approx(out.label_stability[0], 1.0 / 3.0));
        assert!(approx(out.label_stability[1], 1.0));
    }

    #[test]
    fn per_sample_stability_agrees_with_label_stability() {
        let m = PredictionMatrix::new(vec![
            vec![0.2, 0.9, 0.4],
            vec![0.7, 0.8, 0.1],
            vec![0.1, 0.6, 0.3],
            vec![0.6, 0.2, 0.9],
        ])
        .unwrap();
        let out = per_sample_accuracy_and_stability(&[1, 0, 1], &m).unwrap();
        for (sample, &stability) in out.label_stability.iter().enumerate() {
            let labels: Vec<u8> = m.column(sample).into_iter().map(binarize).collect();
            assert!(approx(stability, label_stability(&labels).unwrap()));
        }
    }

    #[test]
    fn per_sample_rejects_misaligned_labels() {
        let m = PredictionMatrix::new(vec![vec![0.2, 0.9]]).unwrap();
        assert!(per_sample_accuracy_and_stability(&[1], &m).is_err());
    }

    // ─── Bundle ──────────────────────────────────────────────────

    #[test]
    fn prediction_stats_bundle() {
        let m = PredictionMatrix::new(vec![
            vec![0.1, 0.8, 0.4],
            vec![0.2, 0.6, 0.6],
            vec![0.3, 0.7, 0.5],
        ])
        .unwrap();
        let stats = PredictionStats::compute(&[1, 0, 1], &m).unwrap();

        assert_eq!(stats.means.len(), 3);
        assert!(approx(stats.means[0], 0.2));
        // sample 0 and 1 unanimous; sample 2 labels 1,0,0 → agreement splits
        assert!(stats.jitter > 0.0 && stats.jitter < 1.0);
        assert!(approx(stats.statistical_bias[0], 0.2));
        assert!(approx(stats.per_sample_accuracy[0], 1.0));
        assert!(approx(stats.per_sample_accuracy[1], 1.0));

        let summary = stats.summary();
        assert_eq!(summary.jitter, stats.jitter);
        let names: Vec<&str> = summary.named_values().iter().map(|(n, _)| *n).collect();
        assert!(names.contains(&"Label_Stability"));
        assert!(names.contains(&"Jitter"));
    }

    #[test]
    fn prediction_stats_needs_two_estimators() {
        let m = PredictionMatrix::new(vec![vec![0.1, 0.8]]).unwrap();
        assert!(matches!(
            PredictionStats::compute(&[1, 0], &m),
            Err(EngineError::InsufficientModels { count: 1 })
        ));
    }
}
