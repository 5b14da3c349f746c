//! Tolerance-aware, direction-aware dense ranking of models.
//!
//! Each metric row is turned into distances from that metric's ideal value,
//! near-equal distances are merged into clusters, and clusters receive dense
//! ranks (1 = best, no gaps). Which ideal applies is looked up in a
//! [`DirectionTable`]:
//!
//! | Family | Ideal | Distance |
//! |---|---|---|
//! | ratio / impact | 1 | `abs(v - 1)` |
//! | inverted performance | 1 (raw) | `abs(1 - v)` |
//! | difference | 0 | `abs(v)` |
//!
//! Rows are independent and are ranked in parallel.

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use stabrank_core::error::{EngineError, Result};

use crate::table::{MetricsMatrix, RowKey, TableError};

/// Float guard added to the tolerance when comparing adjacent gaps.
const TOLERANCE_EPSILON: f64 = 1e-10;

/// Added to every rank when summing group totals. Ranks are already 1-based,
/// so the best possible per-row contribution is 1.
pub const RANK_OFFSET: u32 = 0;

// ─── Directionality ──────────────────────────────────────────────────

/// How a raw metric value maps to a distance from its ideal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceTransform {
    /// Ratio / impact metrics, ideal 1.
    Ratio,
    /// Raw performance rates where higher is healthier.
    Inverted,
    /// Difference / parity metrics, ideal 0.
    Difference,
}

impl DistanceTransform {
    /// Signed offset from the ideal, before the absolute value.
    pub fn apply(self, value: f64) -> f64 {
        match self {
            Self::Ratio => value - 1.0,
            Self::Inverted => 1.0 - value,
            Self::Difference => value,
        }
    }

    /// Non-negative distance from the ideal.
    pub fn distance(self, value: f64) -> f64 {
        self.apply(value).abs()
    }
}

/// Which metric names a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricPattern {
    /// Exact metric name.
    Exact(String),
    /// Case-insensitive substring of the metric name.
    Contains(String),
}

impl MetricPattern {
    pub fn matches(&self, metric: &str) -> bool {
        match self {
            Self::Exact(name) => name == metric,
            Self::Contains(fragment) => metric
                .to_ascii_lowercase()
                .contains(&fragment.to_ascii_lowercase()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionRule {
    pub pattern: MetricPattern,
    pub transform: DistanceTransform,
}

/// Ordered strategy map from metric identity to distance transform.
///
/// The first matching rule wins; unmatched metrics use the default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionTable {
    rules: Vec<DirectionRule>,
    default: DistanceTransform,
}

impl DirectionTable {
    pub fn new(default: DistanceTransform) -> Self {
        Self {
            rules: Vec::new(),
            default,
        }
    }

    pub fn with_rule(mut self, pattern: MetricPattern, transform: DistanceTransform) -> Self {
        self.push(pattern, transform);
        self
    }

    pub fn push(&mut self, pattern: MetricPattern, transform: DistanceTransform) {
        self.rules.push(DirectionRule { pattern, transform });
    }

    /// Insert a rule ahead of the existing ones so it takes precedence.
    pub fn prepend(&mut self, rule: DirectionRule) {
        self.rules.insert(0, rule);
    }

    pub fn rules(&self) -> &[DirectionRule] {
        &self.rules
    }

    pub fn lookup(&self, metric: &str) -> DistanceTransform {
        self.rules
            .iter()
            .find(|rule| rule.pattern.matches(metric))
            .map(|rule| rule.transform)
            .unwrap_or(self.default)
    }

    /// Group fairness/stability metrics: ratios and impacts have ideal 1,
    /// everything else is a difference with ideal 0.
    pub fn group_metrics() -> Self {
        Self::new(DistanceTransform::Difference)
            .with_rule(
                MetricPattern::Contains("impact".into()),
                DistanceTransform::Ratio,
            )
            .with_rule(
                MetricPattern::Contains("ratio".into()),
                DistanceTransform::Ratio,
            )
    }

    /// Raw subgroup metrics: performance and agreement rates are inverted so
    /// that closer to zero is better; error-style metrics stay as they are.
    pub fn subgroup_metrics() -> Self {
        ["TPR", "TNR", "PPV", "Accuracy", "F1", "Label_Stability"]
            .into_iter()
            .fold(Self::new(DistanceTransform::Difference), |table, name| {
                table.with_rule(
                    MetricPattern::Contains(name.into()),
                    DistanceTransform::Inverted,
                )
            })
    }
}

// ─── Row ranking ─────────────────────────────────────────────────────

/// Dense-rank one row of metric values.
///
/// Distances are sorted and deduplicated; adjacent distinct distances whose
/// gap is within `tolerance` join the cluster of the smaller one, so chains
/// of near-ties collapse transitively. Clusters get ranks `1..=k` in
/// ascending distance.
pub fn rank_row(values: &[f64], transform: DistanceTransform, tolerance: f64) -> Result<Vec<u32>> {
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(EngineError::InvalidTolerance(tolerance));
    }

    let distances = values
        .iter()
        .enumerate()
        .map(|(position, &v)| {
            if v.is_finite() {
                Ok(transform.distance(v))
            } else {
                Err(EngineError::NonFiniteValue { position })
            }
        })
        .collect::<Result<Vec<f64>>>()?;

    let mut distinct = distances.clone();
    distinct.sort_by(|a, b| a.total_cmp(b));
    distinct.dedup();

    // cluster[k] = dense cluster index of distinct[k]
    let guard = tolerance + TOLERANCE_EPSILON;
    let mut cluster = Vec::with_capacity(distinct.len());
    let mut current = 0u32;
    for k in 0..distinct.len() {
        if k > 0 && distinct[k] - distinct[k - 1] > guard {
            current += 1;
        }
        cluster.push(current);
    }

    Ok(distances
        .iter()
        .map(|d| {
            let k = distinct
                .binary_search_by(|probe| probe.total_cmp(d))
                .unwrap_or_default();
            cluster[k] + 1
        })
        .collect())
}

// ─── Rank matrix ─────────────────────────────────────────────────────

/// Dense ranks with the same shape as the source [`MetricsMatrix`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRankMatrix")]
pub struct RankMatrix {
    rows: Vec<RowKey>,
    models: Vec<String>,
    ranks: Vec<Vec<u32>>,
}

#[derive(Deserialize)]
struct RawRankMatrix {
    rows: Vec<RowKey>,
    models: Vec<String>,
    ranks: Vec<Vec<u32>>,
}

impl TryFrom<RawRankMatrix> for RankMatrix {
    type Error = TableError;

    fn try_from(raw: RawRankMatrix) -> std::result::Result<Self, TableError> {
        if raw.ranks.len() != raw.rows.len() {
            return Err(TableError::Shape {
                expected: raw.rows.len(),
                actual: raw.ranks.len(),
            });
        }
        if let Some(bad) = raw.ranks.iter().find(|r| r.len() != raw.models.len()) {
            return Err(TableError::Shape {
                expected: raw.models.len(),
                actual: bad.len(),
            });
        }
        Ok(Self {
            rows: raw.rows,
            models: raw.models,
            ranks: raw.ranks,
        })
    }
}

impl RankMatrix {
    pub fn rows(&self) -> &[RowKey] {
        &self.rows
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn ranks(&self) -> &[Vec<u32>] {
        &self.ranks
    }

    pub fn rank(&self, row: &RowKey, model: &str) -> Option<u32> {
        let i = self.rows.iter().position(|r| r == row)?;
        let j = self.models.iter().position(|m| m == model)?;
        Some(self.ranks[i][j])
    }

    /// Largest rank in the matrix (the number of colour bands a heatmap needs).
    pub fn max_rank(&self) -> u32 {
        self.ranks
            .iter()
            .flat_map(|row| row.iter().copied())
            .max()
            .unwrap_or(0)
    }
}

/// Rank every row of `matrix`, looking up each row's direction by metric name.
pub fn rank_matrix(
    matrix: &MetricsMatrix,
    directions: &DirectionTable,
    tolerance: f64,
) -> Result<RankMatrix> {
    debug!(
        rows = matrix.n_rows(),
        models = matrix.n_models(),
        tolerance,
        "ranking metrics matrix"
    );

    let ranks = matrix
        .rows()
        .par_iter()
        .zip(matrix.values().par_iter())
        .map(|(row, values)| rank_row(values, directions.lookup(&row.metric), tolerance))
        .collect::<Result<Vec<_>>>()?;

    Ok(RankMatrix {
        rows: matrix.rows().to_vec(),
        models: matrix.models().to_vec(),
        ranks,
    })
}

// ─── Group totals ────────────────────────────────────────────────────

/// Named partitions of metric names, e.g. bias vs variance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricGroups(BTreeMap<String, BTreeSet<String>>);

impl MetricGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group<I, S>(mut self, name: &str, metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0
            .insert(name.to_string(), metrics.into_iter().map(Into::into).collect());
        self
    }

    /// Statistical bias vs variance group fairness metrics.
    pub fn bias_variance() -> Self {
        Self::new()
            .with_group(
                "Bias",
                [
                    "Accuracy_Parity",
                    "Equalized_Odds_TPR",
                    "Equalized_Odds_FPR",
                    "Equalized_Odds_FNR",
                    "Disparate_Impact",
                    "Statistical_Parity_Difference",
                ],
            )
            .with_group(
                "Variance",
                [
                    "IQR_Parity",
                    "Label_Stability_Ratio",
                    "Label_Stability_Impact",
                    "Std_Parity",
                    "Std_Ratio",
                    "Jitter_Parity",
                ],
            )
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn metrics(&self, group: &str) -> Option<&BTreeSet<String>> {
        self.0.get(group)
    }

    /// Every metric in any group, sorted and deduplicated.
    pub fn all_metrics(&self) -> BTreeSet<&str> {
        self.0
            .values()
            .flat_map(|set| set.iter().map(String::as_str))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-model rank sums for each metric group. Lower is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRankTotals {
    pub groups: Vec<String>,
    pub models: Vec<String>,
    /// `totals[model][group]`.
    pub totals: Vec<Vec<u64>>,
}

impl GroupRankTotals {
    pub fn total(&self, model: &str, group: &str) -> Option<u64> {
        let i = self.models.iter().position(|m| m == model)?;
        let g = self.groups.iter().position(|n| n == group)?;
        Some(self.totals[i][g])
    }
}

/// Sum `rank + RANK_OFFSET` per model over each group's rows.
///
/// A row belongs to a group when its metric name is listed in that group.
pub fn group_rank_totals(ranks: &RankMatrix, groups: &MetricGroups) -> GroupRankTotals {
    let n_models = ranks.models.len();

    let per_group: Vec<Vec<u64>> = groups
        .0
        .values()
        .map(|members| {
            ranks
                .rows
                .par_iter()
                .zip(ranks.ranks.par_iter())
                .filter(|(row, _)| members.contains(&row.metric))
                .map(|(_, row_ranks)| {
                    row_ranks
                        .iter()
                        .map(|&r| u64::from(r + RANK_OFFSET))
                        .collect::<Vec<u64>>()
                })
                .reduce(
                    || vec![0; n_models],
                    |mut acc, row| {
                        for (a, r) in acc.iter_mut().zip(row) {
                            *a += r;
                        }
                        acc
                    },
                )
        })
        .collect();

    let totals = (0..n_models)
        .map(|m| per_group.iter().map(|group| group[m]).collect())
        .collect();

    GroupRankTotals {
        groups: groups.0.keys().cloned().collect(),
        models: ranks.models.clone(),
        totals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Direction table ──

    #[test]
    fn group_preset_detects_ratio_family() {
        let table = DirectionTable::group_metrics();
        assert_eq!(table.lookup("Disparate_Impact"), DistanceTransform::Ratio);
        assert_eq!(table.lookup("Std_Ratio"), DistanceTransform::Ratio);
        assert_eq!(table.lookup("Label_Stability_Impact"), DistanceTransform::Ratio);
        assert_eq!(
            table.lookup("Statistical_Parity_Difference"),
            DistanceTransform::Difference
        );
        assert_eq!(table.lookup("Std_Parity"), DistanceTransform::Difference);
    }

    #[test]
    fn subgroup_preset_inverts_performance() {
        let table = DirectionTable::subgroup_metrics();
        assert_eq!(table.lookup("TPR"), DistanceTransform::Inverted);
        assert_eq!(table.lookup("Accuracy"), DistanceTransform::Inverted);
        assert_eq!(table.lookup("Label_Stability"), DistanceTransform::Inverted);
        assert_eq!(table.lookup("FPR"), DistanceTransform::Difference);
        assert_eq!(table.lookup("Std"), DistanceTransform::Difference);
    }

    #[test]
    fn first_matching_rule_wins() {
        let mut table = DirectionTable::group_metrics();
        table.prepend(DirectionRule {
            pattern: MetricPattern::Exact("Std_Ratio".into()),
            transform: DistanceTransform::Difference,
        });
        assert_eq!(table.lookup("Std_Ratio"), DistanceTransform::Difference);
        assert_eq!(table.lookup("Disparate_Impact"), DistanceTransform::Ratio);
    }

    #[test]
    fn transforms_measure_distance_from_ideal() {
        assert!((DistanceTransform::Ratio.distance(0.8) - 0.2).abs() < 1e-12);
        assert!((DistanceTransform::Inverted.distance(0.9) - 0.1).abs() < 1e-12);
        assert!((DistanceTransform::Difference.distance(-0.3) - 0.3).abs() < 1e-12);
    }

    // ── rank_row ──

    #[test]
    fn exact_ties_share_rank() {
        let ranks = rank_row(&[0.5, 0.5, 0.9], DistanceTransform::Difference, 0.0).unwrap();
        assert_eq!(ranks, vec![1, 1, 2]);
    }

    #[test]
    fn near_ties_merge_within_tolerance() {
        let ranks = rank_row(&[1.0, 1.05, 2.0], DistanceTransform::Ratio, 0.1).unwrap();
        assert_eq!(ranks, vec![1, 1, 2]);
    }

    #[test]
    fn chains_collapse_transitively() {
        // gaps of 0.05 each; the whole chain is one cluster
        let ranks = rank_row(&[0.0, 0.05, 0.1, 0.15, 0.5], DistanceTransform::Difference, 0.06)
            .unwrap();
        assert_eq!(ranks, vec![1, 1, 1, 1, 2]);
    }

    #[test]
    fn ranks_are_dense() {
        let ranks = rank_row(&[0.3, -0.1, 0.9, 0.1], DistanceTransform::Difference, 0.0).unwrap();
        // distances 0.3, 0.1, 0.9, 0.1
        assert_eq!(ranks, vec![2, 1, 3, 1]);
    }

    #[test]
    fn signed_values_rank_by_absolute_distance() {
        let ranks = rank_row(&[-0.2, 0.1], DistanceTransform::Difference, 0.0).unwrap();
        assert_eq!(ranks, vec![2, 1]);
    }

    #[test]
    fn gap_exactly_at_tolerance_merges() {
        let ranks = rank_row(&[0.1, 0.2], DistanceTransform::Difference, 0.1).unwrap();
        assert_eq!(ranks, vec![1, 1]);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert_eq!(
            rank_row(&[0.1], DistanceTransform::Difference, -0.1).unwrap_err(),
            EngineError::InvalidTolerance(-0.1)
        );
        assert_eq!(
            rank_row(&[0.1, f64::NAN], DistanceTransform::Difference, 0.0).unwrap_err(),
            EngineError::NonFiniteValue { position: 1 }
        );
    }

    #[test]
    fn empty_row_is_empty() {
        assert!(rank_row(&[], DistanceTransform::Ratio, 0.0).unwrap().is_empty());
    }

    // ── Matrix and totals ──

    fn sample_matrix() -> MetricsMatrix {
        MetricsMatrix::new(
            vec![
                RowKey::new("Disparate_Impact", "sex"),
                RowKey::new("Statistical_Parity_Difference", "sex"),
                RowKey::new("Std_Parity", "sex"),
            ],
            vec!["a".into(), "b".into(), "c".into()],
            vec![
                vec![0.98, 0.7, 1.2],
                vec![0.01, -0.2, 0.1],
                vec![0.0, 0.02, -0.05],
            ],
        )
        .unwrap()
    }

    #[test]
    fn rank_matrix_applies_per_row_direction() {
        let ranks = rank_matrix(&sample_matrix(), &DirectionTable::group_metrics(), 0.0).unwrap();
        assert_eq!(ranks.ranks()[0], vec![1, 3, 2]); // distances 0.02, 0.3, 0.2
        assert_eq!(ranks.ranks()[1], vec![1, 3, 2]);
        assert_eq!(ranks.ranks()[2], vec![1, 2, 3]);
        assert_eq!(ranks.rank(&RowKey::new("Std_Parity", "sex"), "c"), Some(3));
    }

    #[test]
    fn uniformly_better_model_has_lower_total() {
        let ranks = rank_matrix(&sample_matrix(), &DirectionTable::group_metrics(), 0.0).unwrap();
        let groups = MetricGroups::bias_variance();
        let totals = group_rank_totals(&ranks, &groups);

        let a_bias = totals.total("a", "Bias").unwrap();
        let b_bias = totals.total("b", "Bias").unwrap();
        assert!(a_bias < b_bias);
        assert_eq!(a_bias, 2);
        assert_eq!(totals.total("a", "Variance"), Some(1));
        assert_eq!(totals.total("c", "Variance"), Some(3));
    }

    #[test]
    fn groups_without_rows_total_zero() {
        let ranks = rank_matrix(&sample_matrix(), &DirectionTable::group_metrics(), 0.0).unwrap();
        let groups = MetricGroups::new().with_group("Other", ["Not_A_Metric"]);
        let totals = group_rank_totals(&ranks, &groups);
        assert_eq!(totals.total("a", "Other"), Some(0));
    }

    #[test]
    fn deserialized_rank_matrix_shape_is_checked() {
        let ranks = rank_matrix(&sample_matrix(), &DirectionTable::group_metrics(), 0.0).unwrap();
        let json = serde_json::to_string(&ranks).unwrap();
        assert_eq!(serde_json::from_str::<RankMatrix>(&json).unwrap(), ranks);

        let ragged = serde_json::from_str::<RankMatrix>(
            r#"{"rows":[{"metric":"A","subgroup":"g"}],"models":["a","b"],"ranks":[[1]]}"#,
        );
        assert!(ragged.is_err());
    }
}
