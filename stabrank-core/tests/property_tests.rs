//! Property tests for stability metric invariants.
//!
//! Uses proptest to verify:
//! 1. Range bounds — label stability, churn, jitter, entropy, bias stay in [0, 1]
//! 2. Symmetry — churn(a, b) == churn(b, a); entropy(p) == entropy(1 − p)
//! 3. Identity — identical predictions give zero churn/jitter and full stability
//! 4. Aggregation — binarized main prediction agrees with per-estimator labels
//!    whenever all estimators agree

use proptest::prelude::*;
use stabrank_core::{
    aggregate, bootstrap_plan, churn, confidence_interval_95, entropy, jitter, label_stability,
    mean_std_iqr, statistical_bias, BootstrapConfig, PredictionMatrix, PredictionStats,
};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_labels(len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0u8..=1, len)
}

fn arb_probability() -> impl Strategy<Value = f64> {
    (0.0..=1.0_f64).prop_map(|p| (p * 1000.0).round() / 1000.0)
}

/// Estimator × sample probability matrix with 2..8 estimators, 1..20 samples.
fn arb_matrix() -> impl Strategy<Value = Vec<Vec<f64>>> {
    (2usize..8, 1usize..20).prop_flat_map(|(estimators, samples)| {
        prop::collection::vec(prop::collection::vec(arb_probability(), samples), estimators)
    })
}

// ── 1. Range bounds ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn label_stability_in_unit_interval(labels in prop::collection::vec(0u8..=1, 1..50)) {
        let s = label_stability(&labels).unwrap();
        prop_assert!((0.0..=1.0).contains(&s));
    }

    #[test]
    fn churn_in_unit_interval(
        (a, b) in (1usize..50).prop_flat_map(|n| (arb_labels(n), arb_labels(n)))
    ) {
        let c = churn(&a, &b).unwrap();
        prop_assert!((0.0..=1.0).contains(&c));
    }

    #[test]
    fn jitter_in_unit_interval(
        sequences in (2usize..6, 1usize..30).prop_flat_map(|(m, n)| {
            prop::collection::vec(arb_labels(n), m)
        })
    ) {
        let j = jitter(&sequences).unwrap();
        prop_assert!((0.0..=1.0).contains(&j));
    }

    #[test]
    fn entropy_and_bias_in_unit_interval(p in arb_probability(), y in 0u8..=1) {
        let h = entropy(p);
        prop_assert!((0.0..=1.0 + 1e-12).contains(&h));
        let b = statistical_bias(p, y);
        prop_assert!((0.0..=1.0).contains(&b));
    }

    #[test]
    fn confidence_interval_brackets_mean(values in prop::collection::vec(-10.0..10.0_f64, 2..40)) {
        let (lo, hi) = confidence_interval_95(&values).unwrap();
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        prop_assert!(lo <= mean + 1e-9);
        prop_assert!(mean <= hi + 1e-9);
    }

    #[test]
    fn spread_is_non_negative(rows in arb_matrix()) {
        for spread in mean_std_iqr(&rows).unwrap() {
            prop_assert!(spread.std >= 0.0);
            prop_assert!(spread.iqr >= 0.0);
            prop_assert!((0.0..=1.0).contains(&spread.mean));
        }
    }
}

// ── 2. Symmetry ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn churn_is_symmetric(
        (a, b) in (1usize..50).prop_flat_map(|n| (arb_labels(n), arb_labels(n)))
    ) {
        prop_assert_eq!(churn(&a, &b).unwrap(), churn(&b, &a).unwrap());
    }

    #[test]
    fn entropy_is_symmetric(p in arb_probability()) {
        prop_assert!((entropy(p) - entropy(1.0 - p)).abs() < 1e-9);
    }
}

// ── 3. Identity ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn identical_sequences_have_no_churn(a in prop::collection::vec(0u8..=1, 1..50), m in 2usize..5) {
        prop_assert_eq!(churn(&a, &a).unwrap(), 0.0);
        let copies = vec![a; m];
        prop_assert_eq!(jitter(&copies).unwrap(), 0.0);
    }

    #[test]
    fn identical_estimators_are_fully_stable(row in prop::collection::vec(arb_probability(), 1..20)) {
        let matrix = PredictionMatrix::new(vec![row.clone(), row.clone(), row]).unwrap();
        let labels = vec![0u8; matrix.n_samples()];
        let stats = PredictionStats::compute(&labels, &matrix).unwrap();
        prop_assert_eq!(stats.jitter, 0.0);
        prop_assert!(stats.label_stability.iter().all(|&s| s == 1.0));
        prop_assert!(stats.stds.iter().all(|&s| s.abs() < 1e-12));
    }
}

// ── 4. Aggregation ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn unanimous_estimators_fix_main_label(rows in arb_matrix()) {
        let matrix = PredictionMatrix::new(rows).unwrap();
        let agg = aggregate(&matrix);
        prop_assert_eq!(agg.per_sample_labels.len(), matrix.n_estimators());

        for sample in 0..matrix.n_samples() {
            let column: Vec<u8> = agg.per_sample_labels.iter().map(|r| r[sample]).collect();
            if column.iter().all(|&l| l == column[0]) {
                prop_assert_eq!(agg.predicted_labels[sample], column[0]);
            }
        }
    }

    #[test]
    fn bootstrap_plan_indices_in_bounds(rows in 1usize..200, seed in any::<u64>()) {
        let config = BootstrapConfig { n_estimators: 4, seed, ..BootstrapConfig::default() };
        let plan = bootstrap_plan(rows, &config).unwrap();
        prop_assert_eq!(plan.len(), 4);
        for draw in &plan {
            prop_assert_eq!(draw.len(), config.sample_size(rows));
            prop_assert!(draw.iter().all(|&i| i < rows));
        }
    }
}
