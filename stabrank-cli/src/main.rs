//! StabRank CLI — stability statistics, model ranking, and model selection.
//!
//! Commands:
//! - `stats` — per-model stability summary from a bootstrap prediction matrix
//! - `plan` — reproducible bootstrap index draws for a training set
//! - `rank` — tolerance-aware ranks and group rank totals from a metrics table
//! - `select` — count models inside metric range constraints
//!
//! Results go to stdout; logs go to stderr (`RUST_LOG`, default `info`).

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use stabrank_core::{bootstrap_plan, PredictionMatrix, PredictionStats};
use stabrank_runner::export::{
    export_in_range_csv, export_json, export_ranks_csv, export_totals_csv, generate_report,
    generate_selection_report,
};
use stabrank_runner::{
    evaluate_models, evaluate_models_for, models_in_range, stability_records, ConstraintSet,
    EngineConfig, MetricAliases, MetricsTable, ModelMetricsFrame,
};

#[derive(Parser)]
#[command(
    name = "stabrank",
    about = "StabRank CLI — bootstrap stability metrics and fairness-aware model ranking"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
    Markdown,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize prediction stability for one model.
    Stats {
        /// CSV of label-0 probabilities, one row per estimator, no header.
        #[arg(long)]
        predictions: PathBuf,

        /// CSV of true labels (0/1), no header.
        #[arg(long)]
        labels: PathBuf,

        /// Emit metric records for this model name instead of the summary.
        #[arg(long)]
        model: Option<String>,
    },
    /// Print per-estimator bootstrap row indices.
    Plan {
        /// Number of training rows.
        #[arg(long)]
        rows: usize,

        /// Engine config TOML (bootstrap section).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Rank models on grouped metrics and sum ranks per group.
    Rank {
        /// Metrics CSV with columns Metric,Model_Name,Subgroup,Value.
        #[arg(long)]
        metrics: PathBuf,

        /// Engine config TOML.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Restrict rows to these subgroups (comma separated).
        #[arg(long, value_delimiter = ',')]
        subgroups: Vec<String>,

        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
    /// Count models per type that satisfy metric range constraints.
    Select {
        /// Metrics CSV with columns Metric,Model_Name,Subgroup,Value.
        #[arg(long)]
        metrics: PathBuf,

        /// Constraint TOML (`[[constraint]]` entries).
        #[arg(long)]
        constraints: PathBuf,

        /// Sensitive-attribute group whose group metrics are used.
        #[arg(long)]
        group: String,

        /// Engine config TOML (model type delimiter).
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Stats {
            predictions,
            labels,
            model,
        } => run_stats(&predictions, &labels, model.as_deref()),
        Commands::Plan { rows, config } => run_plan(rows, config.as_deref()),
        Commands::Rank {
            metrics,
            config,
            subgroups,
            format,
        } => run_rank(&metrics, config.as_deref(), &subgroups, format),
        Commands::Select {
            metrics,
            constraints,
            group,
            config,
            format,
        } => run_select(&metrics, &constraints, &group, config.as_deref(), format),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn load_table(path: &Path) -> Result<MetricsTable> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let table = MetricsTable::read_csv(file)
        .with_context(|| format!("failed to read metrics from {}", path.display()))?;
    info!(
        records = table.len(),
        models = table.models().len(),
        "loaded metrics table"
    );
    Ok(table)
}

/// Read every field of a headerless CSV, row by row.
fn read_fields<T>(path: &Path) -> Result<Vec<Vec<T>>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    reader
        .records()
        .enumerate()
        .map(|(line, record)| -> Result<Vec<T>> {
            let record = record?;
            record
                .iter()
                .map(|field| {
                    field.trim().parse::<T>().with_context(|| {
                        format!("{}: bad value {field:?} on row {}", path.display(), line + 1)
                    })
                })
                .collect()
        })
        .collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_stats(predictions: &Path, labels: &Path, model: Option<&str>) -> Result<()> {
    let rows: Vec<Vec<f64>> = read_fields(predictions)?;
    let labels: Vec<u8> = read_fields(labels)?.into_iter().flatten().collect();

    let matrix = PredictionMatrix::new(rows).context("invalid prediction matrix")?;
    info!(
        estimators = matrix.n_estimators(),
        samples = matrix.n_samples(),
        "computing stability"
    );
    let stats = PredictionStats::compute(&labels, &matrix)?;

    match model {
        Some(name) => {
            let mut wtr = csv::Writer::from_writer(std::io::stdout());
            for record in stability_records(name, &stats) {
                wtr.serialize(record)?;
            }
            wtr.flush()?;
            Ok(())
        }
        None => print_json(&stats.summary()),
    }
}

fn run_plan(rows: usize, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    if rows == 0 {
        bail!("--rows must be at least 1");
    }
    let plan = bootstrap_plan(rows, &config.bootstrap)?;
    print_json(&plan)
}

fn run_rank(
    metrics: &Path,
    config: Option<&Path>,
    subgroups: &[String],
    format: OutputFormat,
) -> Result<()> {
    let config = load_config(config)?;
    let table = load_table(metrics)?;

    let comparison = if subgroups.is_empty() {
        evaluate_models(&table, &config)?
    } else {
        let subgroups: Vec<&str> = subgroups.iter().map(String::as_str).collect();
        evaluate_models_for(&table, &config, &subgroups)?
    };

    match format {
        OutputFormat::Json => println!("{}", export_json(&comparison)?),
        OutputFormat::Csv => {
            print!("{}", export_ranks_csv(&comparison)?);
            println!();
            print!("{}", export_totals_csv(&comparison)?);
        }
        OutputFormat::Markdown => print!("{}", generate_report(&comparison)),
    }
    Ok(())
}

fn run_select(
    metrics: &Path,
    constraints: &Path,
    group: &str,
    config: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let config = load_config(config)?;
    let table = load_table(metrics)?;
    let constraints = ConstraintSet::from_file(constraints)
        .with_context(|| format!("failed to load constraints {}", constraints.display()))?;

    if !table.subgroups().contains(group) {
        bail!("group {group:?} not found in {}", metrics.display());
    }

    let frame = ModelMetricsFrame::for_group(&table, group);
    let result = models_in_range(&frame, &constraints, &config.model_type_delimiter)?;
    info!(
        constraints = constraints.len(),
        satisfying_all = result.satisfying_all.len(),
        "selection complete"
    );

    let aliases = MetricAliases::default();
    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Csv => print!("{}", export_in_range_csv(&result, &aliases)?),
        OutputFormat::Markdown => print!("{}", generate_selection_report(&result, &aliases)),
    }
    Ok(())
}
