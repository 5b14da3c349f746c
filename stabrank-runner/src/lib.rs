//! StabRank Runner — metrics tables, model ranking, constraint-based selection.
//!
//! This crate builds on `stabrank-core` to provide:
//! - Long-format metrics tables with run averaging and dense pivots
//! - Tolerance-aware, direction-aware dense ranking with group rank totals
//! - Range-constraint model selection with conjunctive keys
//! - TOML engine configuration and constraint files
//! - End-to-end model comparison and JSON/CSV/Markdown export

pub mod config;
pub mod evaluation;
pub mod export;
pub mod rank;
pub mod selection;
pub mod table;

pub use config::{ConfigError, ConfigId, DirectionConfig, DirectionPreset, EngineConfig};
pub use evaluation::{
    evaluate_models, evaluate_models_for, stability_records, EvaluationError, ModelComparison,
    SCHEMA_VERSION,
};
pub use rank::{
    group_rank_totals, rank_matrix, rank_row, DirectionRule, DirectionTable, DistanceTransform,
    GroupRankTotals, MetricGroups, MetricPattern, RankMatrix,
};
pub use selection::{
    model_type, models_in_range, Constraint, ConstraintSet, InRangeCount, MetricAliases,
    ModelMetricsFrame, ModelsInRange, SelectedModel, SelectionError, ValueRange,
};
pub use table::{MetricRecord, MetricsMatrix, MetricsTable, RowKey, TableError, OVERALL_SUBGROUP};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn table_types_are_send_sync() {
        assert_send::<MetricsTable>();
        assert_sync::<MetricsTable>();
        assert_send::<MetricsMatrix>();
        assert_sync::<MetricsMatrix>();
    }

    #[test]
    fn rank_types_are_send_sync() {
        assert_send::<DirectionTable>();
        assert_sync::<DirectionTable>();
        assert_send::<RankMatrix>();
        assert_sync::<RankMatrix>();
        assert_send::<GroupRankTotals>();
        assert_sync::<GroupRankTotals>();
        assert_send::<MetricGroups>();
        assert_sync::<MetricGroups>();
    }

    #[test]
    fn selection_types_are_send_sync() {
        assert_send::<ConstraintSet>();
        assert_sync::<ConstraintSet>();
        assert_send::<ModelMetricsFrame>();
        assert_sync::<ModelMetricsFrame>();
        assert_send::<ModelsInRange>();
        assert_sync::<ModelsInRange>();
    }

    #[test]
    fn config_and_comparison_are_send_sync() {
        assert_send::<EngineConfig>();
        assert_sync::<EngineConfig>();
        assert_send::<ModelComparison>();
        assert_sync::<ModelComparison>();
    }

    #[test]
    fn error_types_are_send_sync() {
        assert_send::<SelectionError>();
        assert_sync::<SelectionError>();
        assert_send::<ConfigError>();
        assert_sync::<ConfigError>();
        assert_send::<EvaluationError>();
        assert_sync::<EvaluationError>();
    }
}
