//! End-to-end model comparison: pivot → rank → group totals.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use stabrank_core::{EngineError, PredictionStats};

use crate::config::{ConfigError, ConfigId, EngineConfig};
use crate::rank::{group_rank_totals, rank_matrix, GroupRankTotals, RankMatrix};
use crate::table::{MetricRecord, MetricsMatrix, MetricsTable, TableError, OVERALL_SUBGROUP};

/// Current comparison schema version. Bump when the serialized shape changes.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("none of the grouped metrics appear in the table")]
    NoGroupedMetrics,

    #[error("inconsistent comparison: {0}")]
    Inconsistent(String),
}

/// Output of [`evaluate_models`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawModelComparison")]
pub struct ModelComparison {
    pub schema_version: u32,
    pub config_id: ConfigId,
    pub metrics: MetricsMatrix,
    pub ranks: RankMatrix,
    pub totals: GroupRankTotals,
}

#[derive(Deserialize)]
struct RawModelComparison {
    schema_version: u32,
    config_id: ConfigId,
    metrics: MetricsMatrix,
    ranks: RankMatrix,
    totals: GroupRankTotals,
}

impl TryFrom<RawModelComparison> for ModelComparison {
    type Error = EvaluationError;

    fn try_from(raw: RawModelComparison) -> Result<Self, EvaluationError> {
        let comparison = Self {
            schema_version: raw.schema_version,
            config_id: raw.config_id,
            metrics: raw.metrics,
            ranks: raw.ranks,
            totals: raw.totals,
        };
        comparison.check_consistency()?;
        Ok(comparison)
    }
}

impl ModelComparison {
    /// Ranks and totals must describe the same rows and models as `metrics`.
    pub fn check_consistency(&self) -> Result<(), EvaluationError> {
        if self.ranks.rows() != self.metrics.rows() {
            return Err(EvaluationError::Inconsistent(
                "rank rows differ from metric rows".into(),
            ));
        }
        if self.ranks.models() != self.metrics.models()
            || self.totals.models != self.metrics.models()
        {
            return Err(EvaluationError::Inconsistent(
                "models differ between metrics, ranks and totals".into(),
            ));
        }
        if self.totals.totals.len() != self.totals.models.len() {
            return Err(EvaluationError::Inconsistent(format!(
                "{} total rows for {} models",
                self.totals.totals.len(),
                self.totals.models.len()
            )));
        }
        if let Some(bad) = self
            .totals
            .totals
            .iter()
            .find(|row| row.len() != self.totals.groups.len())
        {
            return Err(EvaluationError::Inconsistent(format!(
                "total row has {} entries for {} groups",
                bad.len(),
                self.totals.groups.len()
            )));
        }
        Ok(())
    }

    /// Models with the lowest total in `group`. Several models tie when their
    /// totals are equal.
    pub fn leaders(&self, group: &str) -> Vec<&str> {
        let Some(g) = self.totals.groups.iter().position(|n| n == group) else {
            return Vec::new();
        };
        let best = self.totals.totals.iter().map(|row| row[g]).min();
        self.totals
            .models
            .iter()
            .zip(&self.totals.totals)
            .filter(|(_, row)| Some(row[g]) == best)
            .map(|(model, _)| model.as_str())
            .collect()
    }
}

/// Compare every model on the configured metric groups.
///
/// Rows are each grouped metric present in the table, crossed with every
/// subgroup that reports any grouped metric.
pub fn evaluate_models(
    table: &MetricsTable,
    config: &EngineConfig,
) -> Result<ModelComparison, EvaluationError> {
    let grouped = config.groups.all_metrics();
    let subgroups: BTreeSet<String> = table
        .records()
        .filter(|r| grouped.contains(r.metric.as_str()))
        .map(|r| r.subgroup)
        .collect();
    let subgroups: Vec<&str> = subgroups.iter().map(String::as_str).collect();
    evaluate_models_for(table, config, &subgroups)
}

/// [`evaluate_models`] restricted to the named subgroups.
pub fn evaluate_models_for(
    table: &MetricsTable,
    config: &EngineConfig,
    subgroups: &[&str],
) -> Result<ModelComparison, EvaluationError> {
    config.validate()?;

    let present = table.metrics();
    let metrics: Vec<&str> = config
        .groups
        .all_metrics()
        .into_iter()
        .filter(|m| present.contains(m))
        .collect();
    if metrics.is_empty() || subgroups.is_empty() {
        return Err(EvaluationError::NoGroupedMetrics);
    }
    debug!(metrics = metrics.len(), subgroups = subgroups.len(), "pivoting metrics table");

    let matrix = table.metrics_matrix(&metrics, subgroups)?;
    if matrix.n_models() < 2 {
        return Err(EngineError::InsufficientModels {
            count: matrix.n_models(),
        }
        .into());
    }

    let ranks = rank_matrix(&matrix, &config.direction_table(), config.tolerance)?;
    let totals = group_rank_totals(&ranks, &config.groups);

    info!(
        models = matrix.n_models(),
        rows = matrix.n_rows(),
        max_rank = ranks.max_rank(),
        "models ranked"
    );

    Ok(ModelComparison {
        schema_version: SCHEMA_VERSION,
        config_id: config.config_id()?,
        metrics: matrix,
        ranks,
        totals,
    })
}

/// Overall stability summary as `overall`-subgroup metric records.
pub fn stability_records(model_name: &str, stats: &PredictionStats) -> Vec<MetricRecord> {
    stats
        .summary()
        .named_values()
        .into_iter()
        .map(|(metric, value)| MetricRecord::new(metric, model_name, OVERALL_SUBGROUP, value))
        .collect()
}
