//! Constraint-based model selection.
//!
//! A [`ConstraintSet`] maps metric names to inclusive `[min, max]` ranges.
//! Keys joined with `&` (e.g. `Accuracy&Label_Stability`) are conjunctions:
//! a model passes when every component metric lies inside its own range.
//! [`models_in_range`] counts passing models per model type for every key and
//! lists the models that pass the full conjunction.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use stabrank_core::error::EngineError;

use crate::table::{MetricsTable, OVERALL_SUBGROUP};

/// Separator between components of a conjunctive constraint key.
pub const CONJUNCTION: char = '&';

/// Default separator between a model type and the rest of a model name.
pub const DEFAULT_MODEL_TYPE_DELIMITER: &str = "__";

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("constraint {key:?} has no range for component metric {metric:?}")]
    MissingConstraint { key: String, metric: String },

    #[error("metric {metric:?} is not present for any model")]
    UnknownMetric { metric: String },

    #[error("conjunctive constraint {key:?} must not declare a range")]
    ConjunctionRange { key: String },
}

// ─── Constraints ─────────────────────────────────────────────────────

/// Inclusive value range, serialized as `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }

    fn check(&self, metric: &str) -> Result<(), EngineError> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(EngineError::NonFiniteRange {
                metric: metric.to_string(),
                min: self.min,
                max: self.max,
            });
        }
        if self.max < self.min {
            return Err(EngineError::InvalidRange {
                metric: metric.to_string(),
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

impl From<(f64, f64)> for ValueRange {
    fn from((min, max): (f64, f64)) -> Self {
        Self { min, max }
    }
}

impl From<ValueRange> for (f64, f64) {
    fn from(range: ValueRange) -> Self {
        (range.min, range.max)
    }
}

/// One constraint entry. Conjunctive keys carry no range of their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<ValueRange>,
}

impl Constraint {
    /// Component metric names; a single-metric key yields itself.
    pub fn components(&self) -> Vec<&str> {
        split_key(&self.key)
    }

    pub fn is_conjunction(&self) -> bool {
        self.key.contains(CONJUNCTION)
    }
}

fn split_key(key: &str) -> Vec<&str> {
    key.split(CONJUNCTION).map(str::trim).collect()
}

/// Ordered list of constraints, evaluated in declaration order.
///
/// TOML form:
///
/// ```toml
/// [[constraint]]
/// key = "Accuracy"
/// range = [0.7, 1.0]
///
/// [[constraint]]
/// key = "Accuracy&Label_Stability"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSet {
    #[serde(default, rename = "constraint")]
    constraints: Vec<Constraint>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single-metric range.
    pub fn with_range(mut self, metric: &str, range: impl Into<ValueRange>) -> Self {
        self.constraints.push(Constraint {
            key: metric.to_string(),
            range: Some(range.into()),
        });
        self
    }

    /// Add a conjunctive key over metrics that have their own ranges.
    pub fn with_conjunction(mut self, metrics: &[&str]) -> Self {
        self.constraints.push(Constraint {
            key: metrics.join("&"),
            range: None,
        });
        self
    }

    pub fn push(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Range declared for a single metric key.
    pub fn range_for(&self, metric: &str) -> Option<ValueRange> {
        self.constraints
            .iter()
            .find(|c| c.key == metric)
            .and_then(|c| c.range)
    }

    /// Reject non-finite or `max < min` ranges, and ranges attached to
    /// conjunctive keys.
    pub fn validate(&self) -> Result<(), SelectionError> {
        for constraint in &self.constraints {
            let Some(range) = constraint.range else {
                continue;
            };
            if constraint.is_conjunction() {
                return Err(SelectionError::ConjunctionRange {
                    key: constraint.key.clone(),
                });
            }
            range.check(&constraint.key)?;
        }
        Ok(())
    }

    /// The conjunctive key with the most components; the earliest wins ties.
    pub fn full_conjunction_key(&self) -> Option<&str> {
        self.constraints
            .iter()
            .filter(|c| c.is_conjunction())
            .fold(None::<(&Constraint, usize)>, |best, c| {
                let n = c.components().len();
                match best {
                    Some((_, best_n)) if best_n >= n => best,
                    _ => Some((c, n)),
                }
            })
            .map(|(c, _)| c.key.as_str())
    }
}

// ─── Model × metric frame ────────────────────────────────────────────

/// Pivot of metric values per model: `model → metric → value`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetricsFrame {
    rows: BTreeMap<String, BTreeMap<String, f64>>,
}

impl ModelMetricsFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model_name: &str, metric: &str, value: f64) {
        self.rows
            .entry(model_name.to_string())
            .or_default()
            .insert(metric.to_string(), value);
    }

    /// All metrics recorded for one subgroup.
    pub fn from_subgroup(table: &MetricsTable, subgroup: &str) -> Self {
        let mut frame = Self::new();
        for record in table.records().filter(|r| r.subgroup == subgroup) {
            frame.insert(&record.model_name, &record.metric, record.value);
        }
        frame
    }

    /// Group metrics for `group` merged with each model's `overall` metrics.
    ///
    /// Where both carry the same metric name, the group value is kept.
    pub fn for_group(table: &MetricsTable, group: &str) -> Self {
        let mut frame = Self::from_subgroup(table, OVERALL_SUBGROUP);
        for record in table.records().filter(|r| r.subgroup == group) {
            frame.insert(&record.model_name, &record.metric, record.value);
        }
        frame
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(String::as_str)
    }

    pub fn value(&self, model_name: &str, metric: &str) -> Option<f64> {
        self.rows.get(model_name)?.get(metric).copied()
    }

    pub fn has_metric(&self, metric: &str) -> bool {
        self.rows.values().any(|row| row.contains_key(metric))
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Model type: the part of the model name before the first `delimiter`.
pub fn model_type<'a>(model_name: &'a str, delimiter: &str) -> &'a str {
    model_name
        .split_once(delimiter)
        .map_or(model_name, |(head, _)| head)
}

// ─── Filtering ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InRangeCount {
    pub constraint_key: String,
    pub model_type: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedModel {
    pub model_type: String,
    pub model_name: String,
}

/// Per-key counts plus the models satisfying the full conjunction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelsInRange {
    /// One row per (constraint key, model type), zero-filled.
    pub counts: Vec<InRangeCount>,
    pub full_conjunction_key: Option<String>,
    pub satisfying_all: Vec<SelectedModel>,
}

impl ModelsInRange {
    pub fn count(&self, constraint_key: &str, model_type: &str) -> Option<usize> {
        self.counts
            .iter()
            .find(|c| c.constraint_key == constraint_key && c.model_type == model_type)
            .map(|c| c.count)
    }
}

/// Resolved key: `(key, [(component, range)])`.
type ResolvedKey<'a> = (&'a str, Vec<(&'a str, ValueRange)>);

fn resolve<'a>(
    frame: &ModelMetricsFrame,
    constraints: &'a ConstraintSet,
) -> Result<Vec<ResolvedKey<'a>>, SelectionError> {
    constraints
        .iter()
        .map(|constraint| {
            let components = constraint
                .components()
                .into_iter()
                .map(|metric| {
                    let range = if constraint.is_conjunction() {
                        constraints.range_for(metric)
                    } else {
                        constraint.range
                    };
                    let range = range.ok_or_else(|| SelectionError::MissingConstraint {
                        key: constraint.key.clone(),
                        metric: metric.to_string(),
                    })?;
                    if !frame.has_metric(metric) {
                        return Err(SelectionError::UnknownMetric {
                            metric: metric.to_string(),
                        });
                    }
                    Ok((metric, range))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok((constraint.key.as_str(), components))
        })
        .collect()
}

fn satisfies(frame: &ModelMetricsFrame, model_name: &str, components: &[(&str, ValueRange)]) -> bool {
    components.iter().all(|(metric, range)| {
        frame
            .value(model_name, metric)
            .is_some_and(|v| range.contains(v))
    })
}

/// Count models inside every constraint, grouped by model type.
///
/// All ranges are validated and all keys resolved before any model is
/// examined. A model missing a component's value does not satisfy that key.
pub fn models_in_range(
    frame: &ModelMetricsFrame,
    constraints: &ConstraintSet,
    delimiter: &str,
) -> Result<ModelsInRange, SelectionError> {
    constraints.validate()?;
    let resolved = resolve(frame, constraints)?;

    let model_types: BTreeSet<&str> = frame.models().map(|m| model_type(m, delimiter)).collect();
    debug!(
        constraints = resolved.len(),
        models = frame.rows.len(),
        model_types = model_types.len(),
        "evaluating model constraints"
    );

    let mut counts = Vec::with_capacity(resolved.len() * model_types.len());
    for (key, components) in &resolved {
        let mut per_type: BTreeMap<&str, usize> =
            model_types.iter().map(|&t| (t, 0)).collect();
        for model_name in frame.models() {
            if satisfies(frame, model_name, components) {
                *per_type.entry(model_type(model_name, delimiter)).or_default() += 1;
            }
        }
        counts.extend(per_type.into_iter().map(|(t, count)| InRangeCount {
            constraint_key: key.to_string(),
            model_type: t.to_string(),
            count,
        }));
    }

    let full_conjunction_key = constraints.full_conjunction_key();
    let satisfying_all = match full_conjunction_key {
        Some(full_key) => resolved
            .iter()
            .find(|(key, _)| *key == full_key)
            .map(|(_, components)| {
                frame
                    .models()
                    .filter(|m| satisfies(frame, m, components))
                    .map(|m| SelectedModel {
                        model_type: model_type(m, delimiter).to_string(),
                        model_name: m.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        None => {
            warn!("no conjunctive constraint key; satisfying_all is empty");
            Vec::new()
        }
    };

    Ok(ModelsInRange {
        counts,
        full_conjunction_key: full_conjunction_key.map(str::to_string),
        satisfying_all,
    })
}

// ─── Display aliases ─────────────────────────────────────────────────

/// Category aliases used to title constraint keys, e.g. `C1 & C3`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAliases {
    aliases: BTreeMap<String, String>,
}

impl Default for MetricAliases {
    fn default() -> Self {
        let groups: [(&str, &[&str]); 4] = [
            ("C1", &["TPR", "TNR", "FNR", "FPR", "PPV", "Accuracy", "F1"]),
            (
                "C2",
                &[
                    "Equalized_Odds_TPR",
                    "Equalized_Odds_FPR",
                    "Equalized_Odds_FNR",
                    "Disparate_Impact",
                    "Statistical_Parity_Difference",
                ],
            ),
            ("C3", &["Std", "IQR", "Jitter", "Label_Stability"]),
            (
                "C4",
                &[
                    "IQR_Parity",
                    "Label_Stability_Ratio",
                    "Std_Parity",
                    "Std_Ratio",
                    "Jitter_Parity",
                ],
            ),
        ];
        let aliases = groups
            .iter()
            .flat_map(|(alias, metrics)| {
                metrics
                    .iter()
                    .map(move |m| (m.to_string(), alias.to_string()))
            })
            .collect();
        Self { aliases }
    }
}

impl MetricAliases {
    pub fn alias(&self, metric: &str) -> Option<&str> {
        self.aliases.get(metric).map(String::as_str)
    }

    /// Title for a constraint key; unaliased metrics keep their own name.
    pub fn title(&self, key: &str) -> String {
        split_key(key)
            .into_iter()
            .map(|metric| self.alias(metric).unwrap_or(metric))
            .collect::<Vec<_>>()
            .join(" & ")
    }
}
