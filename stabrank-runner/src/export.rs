//! Reporting and export: JSON, CSV, and Markdown artifact generation.
//!
//! - **JSON**: full round-trip of a [`ModelComparison`] with schema versioning
//! - **CSV**: long-format rank tables and in-range counts for plotting tools
//! - **Markdown**: human-readable comparison and selection reports
//!
//! Persisted comparisons carry a `schema_version`; newer versions are rejected
//! on load.

use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::evaluation::{ModelComparison, SCHEMA_VERSION};
use crate::selection::{MetricAliases, ModelsInRange};

// ─── JSON export ────────────────────────────────────────────────────

/// Serialize a `ModelComparison` to pretty JSON.
pub fn export_json(comparison: &ModelComparison) -> Result<String> {
    serde_json::to_string_pretty(comparison).context("failed to serialize ModelComparison to JSON")
}

/// Deserialize a `ModelComparison`, rejecting unknown schema versions and
/// comparisons whose ranks or totals do not line up with the metrics.
pub fn import_json(json: &str) -> Result<ModelComparison> {
    let comparison: ModelComparison =
        serde_json::from_str(json).context("failed to deserialize ModelComparison from JSON")?;
    if comparison.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            comparison.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(comparison)
}

/// Load a comparison previously written with [`export_json`].
pub fn load_json(path: &Path) -> Result<ModelComparison> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_json(&json)
}

// ─── CSV export ─────────────────────────────────────────────────────

fn finish(wtr: csv::Writer<Vec<u8>>) -> Result<String> {
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Long-format ranks. Columns: metric, subgroup, model_name, value, rank
pub fn export_ranks_csv(comparison: &ModelComparison) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["metric", "subgroup", "model_name", "value", "rank"])?;

    let rows = comparison.ranks.rows();
    let models = comparison.ranks.models();
    for (i, row) in rows.iter().enumerate() {
        for (j, model) in models.iter().enumerate() {
            let value = comparison.metrics.values()[i][j].to_string();
            let rank = comparison.ranks.ranks()[i][j].to_string();
            wtr.write_record([
                row.metric.as_str(),
                row.subgroup.as_str(),
                model.as_str(),
                value.as_str(),
                rank.as_str(),
            ])?;
        }
    }
    finish(wtr)
}

/// Group totals. Columns: model_name, one per group.
pub fn export_totals_csv(comparison: &ModelComparison) -> Result<String> {
    let totals = &comparison.totals;
    let mut wtr = csv::Writer::from_writer(vec![]);

    let mut header = vec!["model_name"];
    header.extend(totals.groups.iter().map(String::as_str));
    wtr.write_record(&header)?;

    for (model, row) in totals.models.iter().zip(&totals.totals) {
        let mut record = vec![model.clone()];
        record.extend(row.iter().map(u64::to_string));
        wtr.write_record(&record)?;
    }
    finish(wtr)
}

/// In-range counts. Columns: constraint_key, title, model_type, count
pub fn export_in_range_csv(result: &ModelsInRange, aliases: &MetricAliases) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["constraint_key", "title", "model_type", "count"])?;
    for row in &result.counts {
        let title = aliases.title(&row.constraint_key);
        let count = row.count.to_string();
        wtr.write_record([
            row.constraint_key.as_str(),
            title.as_str(),
            row.model_type.as_str(),
            count.as_str(),
        ])?;
    }
    finish(wtr)
}

// ─── Markdown reports ───────────────────────────────────────────────

/// Markdown report: metadata, group totals, and the full rank table.
pub fn generate_report(comparison: &ModelComparison) -> String {
    let mut md = String::with_capacity(2048);
    let totals = &comparison.totals;

    md.push_str("# Model Comparison\n\n");

    md.push_str("## Metadata\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Models | {} |\n", totals.models.len()));
    md.push_str(&format!("| Metric rows | {} |\n", comparison.ranks.rows().len()));
    md.push_str(&format!("| Distinct ranks | {} |\n", comparison.ranks.max_rank()));
    md.push_str(&format!("| Config | {} |\n", comparison.config_id));
    md.push('\n');

    md.push_str("## Group Totals\n\n");
    md.push_str("Lower is better.\n\n");
    md.push_str("| Model |");
    for group in &totals.groups {
        md.push_str(&format!(" {group} |"));
    }
    md.push_str("\n| --- |");
    md.push_str(&" --- |".repeat(totals.groups.len()));
    md.push('\n');
    for (model, row) in totals.models.iter().zip(&totals.totals) {
        md.push_str(&format!("| {model} |"));
        for total in row {
            md.push_str(&format!(" {total} |"));
        }
        md.push('\n');
    }
    md.push('\n');

    for group in &totals.groups {
        let leaders = comparison.leaders(group);
        if !leaders.is_empty() {
            md.push_str(&format!("- **{group}** leader: {}\n", leaders.join(", ")));
        }
    }
    md.push('\n');

    md.push_str("## Ranks\n\n");
    md.push_str("| Metric | Subgroup |");
    for model in comparison.ranks.models() {
        md.push_str(&format!(" {model} |"));
    }
    md.push_str("\n| --- | --- |");
    md.push_str(&" --- |".repeat(comparison.ranks.models().len()));
    md.push('\n');
    for (row, ranks) in comparison.ranks.rows().iter().zip(comparison.ranks.ranks()) {
        md.push_str(&format!("| {} | {} |", row.metric, row.subgroup));
        for rank in ranks {
            md.push_str(&format!(" {rank} |"));
        }
        md.push('\n');
    }

    md
}

/// Markdown report for a selection run.
pub fn generate_selection_report(result: &ModelsInRange, aliases: &MetricAliases) -> String {
    let mut md = String::with_capacity(1024);

    md.push_str("# Models In Range\n\n");
    md.push_str("| Constraint | Model Type | Models |\n");
    md.push_str("| --- | --- | --- |\n");
    for row in &result.counts {
        md.push_str(&format!(
            "| {} | {} | {} |\n",
            aliases.title(&row.constraint_key),
            row.model_type,
            row.count
        ));
    }
    md.push('\n');

    match &result.full_conjunction_key {
        Some(key) => {
            md.push_str(&format!("## Satisfying {}\n\n", aliases.title(key)));
            if result.satisfying_all.is_empty() {
                md.push_str("No model satisfies every constraint.\n");
            }
            for model in &result.satisfying_all {
                md.push_str(&format!("- {} ({})\n", model.model_name, model.model_type));
            }
        }
        None => md.push_str("No conjunctive constraint given.\n"),
    }

    md
}
