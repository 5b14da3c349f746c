//! Metrics tables and their pivots.
//!
//! A [`MetricsTable`] is a set of `(metric, model, subgroup) → value` facts
//! with unique keys. Ranking consumes the metric × model pivot
//! ([`MetricsMatrix`]); model selection consumes the model × metric pivot in
//! [`crate::selection`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Read;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Subgroup label for metrics computed on the whole population.
pub const OVERALL_SUBGROUP: &str = "overall";

/// Errors from table construction and pivoting.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("duplicate record for metric '{metric}', model '{model_name}', subgroup '{subgroup}'")]
    DuplicateRecord {
        metric: String,
        model_name: String,
        subgroup: String,
    },
    #[error("no value for row '{row}' and model '{model}'")]
    MissingCell { row: String, model: String },
    #[error("matrix shape mismatch: expected {expected} values, got {actual}")]
    Shape { expected: usize, actual: usize },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// One atomic metric fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    #[serde(rename = "Metric")]
    pub metric: String,
    #[serde(rename = "Model_Name")]
    pub model_name: String,
    #[serde(rename = "Subgroup")]
    pub subgroup: String,
    #[serde(rename = "Value")]
    pub value: f64,
}

impl MetricRecord {
    pub fn new(metric: &str, model_name: &str, subgroup: &str, value: f64) -> Self {
        Self {
            metric: metric.to_string(),
            model_name: model_name.to_string(),
            subgroup: subgroup.to_string(),
            value,
        }
    }

    fn key(&self) -> RecordKey {
        RecordKey {
            metric: self.metric.clone(),
            model_name: self.model_name.clone(),
            subgroup: self.subgroup.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RecordKey {
    metric: String,
    model_name: String,
    subgroup: String,
}

/// Set of metric records keyed by `(metric, model, subgroup)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsTable {
    records: BTreeMap<RecordKey, f64>,
}

impl MetricsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record. Fails if the key is already present.
    pub fn insert(&mut self, record: MetricRecord) -> Result<(), TableError> {
        let key = record.key();
        if self.records.contains_key(&key) {
            return Err(TableError::DuplicateRecord {
                metric: record.metric,
                model_name: record.model_name,
                subgroup: record.subgroup,
            });
        }
        self.records.insert(key, record.value);
        Ok(())
    }

    /// Build a table from records with unique keys.
    pub fn from_records<I>(records: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = MetricRecord>,
    {
        let mut table = Self::new();
        for record in records {
            table.insert(record)?;
        }
        Ok(table)
    }

    /// Build a table from repeated runs, averaging records that share a key.
    pub fn mean_over_runs<I>(records: I) -> Self
    where
        I: IntoIterator<Item = MetricRecord>,
    {
        let mut sums: BTreeMap<RecordKey, (f64, usize)> = BTreeMap::new();
        for record in records {
            let entry = sums.entry(record.key()).or_insert((0.0, 0));
            entry.0 += record.value;
            entry.1 += 1;
        }
        Self {
            records: sums
                .into_iter()
                .map(|(key, (sum, n))| (key, sum / n as f64))
                .collect(),
        }
    }

    /// Read `Metric,Model_Name,Subgroup,Value` CSV rows, averaging repeated runs.
    ///
    /// Extra columns (run numbers, seeds) are ignored.
    pub fn read_csv<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut rdr = csv::Reader::from_reader(reader);
        let records = rdr
            .deserialize::<MetricRecord>()
            .collect::<Result<Vec<_>, _>>()?;
        debug!(rows = records.len(), "read metrics csv");
        Ok(Self::mean_over_runs(records))
    }

    pub fn get(&self, metric: &str, model_name: &str, subgroup: &str) -> Option<f64> {
        self.records
            .get(&RecordKey {
                metric: metric.to_string(),
                model_name: model_name.to_string(),
                subgroup: subgroup.to_string(),
            })
            .copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in key order.
    pub fn records(&self) -> impl Iterator<Item = MetricRecord> + '_ {
        self.records.iter().map(|(key, &value)| MetricRecord {
            metric: key.metric.clone(),
            model_name: key.model_name.clone(),
            subgroup: key.subgroup.clone(),
            value,
        })
    }

    pub fn models(&self) -> BTreeSet<&str> {
        self.records.keys().map(|k| k.model_name.as_str()).collect()
    }

    pub fn metrics(&self) -> BTreeSet<&str> {
        self.records.keys().map(|k| k.metric.as_str()).collect()
    }

    pub fn subgroups(&self) -> BTreeSet<&str> {
        self.records.keys().map(|k| k.subgroup.as_str()).collect()
    }

    /// Pivot into a dense metric × model matrix.
    ///
    /// Rows are `metrics × subgroups` in the given order; columns are every
    /// model in the table, sorted. Any missing combination is an error.
    pub fn metrics_matrix(
        &self,
        metrics: &[&str],
        subgroups: &[&str],
    ) -> Result<MetricsMatrix, TableError> {
        let models: Vec<String> = self.models().into_iter().map(String::from).collect();
        let mut rows = Vec::with_capacity(metrics.len() * subgroups.len());
        let mut values = Vec::with_capacity(rows.capacity());

        for metric in metrics {
            for subgroup in subgroups {
                let row = RowKey::new(metric, subgroup);
                let mut row_values = Vec::with_capacity(models.len());
                for model in &models {
                    let value = self.get(metric, model, subgroup).ok_or_else(|| {
                        TableError::MissingCell {
                            row: row.to_string(),
                            model: model.clone(),
                        }
                    })?;
                    row_values.push(value);
                }
                rows.push(row);
                values.push(row_values);
            }
        }

        MetricsMatrix::new(rows, models, values)
    }
}

/// Row identity of a metrics matrix: a metric qualified by subgroup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey {
    pub metric: String,
    pub subgroup: String,
}

impl RowKey {
    pub fn new(metric: &str, subgroup: &str) -> Self {
        Self {
            metric: metric.to_string(),
            subgroup: subgroup.to_string(),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.metric, self.subgroup)
    }
}

/// Dense metric × model matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMetricsMatrix")]
pub struct MetricsMatrix {
    rows: Vec<RowKey>,
    models: Vec<String>,
    values: Vec<Vec<f64>>,
}

#[derive(Deserialize)]
struct RawMetricsMatrix {
    rows: Vec<RowKey>,
    models: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl TryFrom<RawMetricsMatrix> for MetricsMatrix {
    type Error = TableError;

    fn try_from(raw: RawMetricsMatrix) -> Result<Self, TableError> {
        MetricsMatrix::new(raw.rows, raw.models, raw.values)
    }
}

impl MetricsMatrix {
    /// Build a matrix, checking that `values` is `rows × models`.
    pub fn new(
        rows: Vec<RowKey>,
        models: Vec<String>,
        values: Vec<Vec<f64>>,
    ) -> Result<Self, TableError> {
        if values.len() != rows.len() {
            return Err(TableError::Shape {
                expected: rows.len(),
                actual: values.len(),
            });
        }
        if let Some(bad) = values.iter().find(|r| r.len() != models.len()) {
            return Err(TableError::Shape {
                expected: models.len(),
                actual: bad.len(),
            });
        }
        Ok(Self {
            rows,
            models,
            values,
        })
    }

    pub fn rows(&self) -> &[RowKey] {
        &self.rows
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn values(&self) -> &[Vec<f64>] {
        &self.values
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_models(&self) -> usize {
        self.models.len()
    }

    pub fn value(&self, row: &RowKey, model: &str) -> Option<f64> {
        let i = self.rows.iter().position(|r| r == row)?;
        let j = self.models.iter().position(|m| m == model)?;
        Some(self.values[i][j])
    }
}
