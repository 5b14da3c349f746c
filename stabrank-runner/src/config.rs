//! Serializable engine configuration.
//!
//! ```toml
//! tolerance = 0.01
//! model_type_delimiter = "__"
//!
//! [direction]
//! preset = "group"
//!
//! [[direction.rules]]
//! pattern = { exact = "Std_Ratio" }
//! transform = "difference"
//!
//! [groups]
//! Bias = ["Disparate_Impact", "Statistical_Parity_Difference"]
//! Variance = ["Std_Parity", "Label_Stability_Ratio"]
//!
//! [bootstrap]
//! n_estimators = 100
//! seed = 7
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stabrank_core::BootstrapConfig;

use crate::rank::{DirectionRule, DirectionTable, MetricGroups};
use crate::selection::{ConstraintSet, DEFAULT_MODEL_TYPE_DELIMITER};

/// Content hash of a configuration, hex-encoded.
pub type ConfigId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ─── Direction ───────────────────────────────────────────────────────

/// Built-in direction table to start from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionPreset {
    /// Group fairness/stability metrics (ratios ideal 1, differences ideal 0).
    #[default]
    Group,
    /// Raw per-subgroup metrics (performance rates inverted).
    Subgroup,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionConfig {
    pub preset: DirectionPreset,
    /// Extra rules, consulted before the preset's own rules.
    pub rules: Vec<DirectionRule>,
}

impl DirectionConfig {
    pub fn table(&self) -> DirectionTable {
        let mut table = match self.preset {
            DirectionPreset::Group => DirectionTable::group_metrics(),
            DirectionPreset::Subgroup => DirectionTable::subgroup_metrics(),
        };
        for rule in self.rules.iter().rev() {
            table.prepend(rule.clone());
        }
        table
    }
}

// ─── Engine ──────────────────────────────────────────────────────────

/// Settings for a ranking / selection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Distance gap within which models share a rank.
    pub tolerance: f64,
    /// Separator between model type and the rest of a model name.
    pub model_type_delimiter: String,
    pub direction: DirectionConfig,
    /// Metric groups for rank totals.
    pub groups: MetricGroups,
    pub bootstrap: BootstrapConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.0,
            model_type_delimiter: DEFAULT_MODEL_TYPE_DELIMITER.to_string(),
            direction: DirectionConfig::default(),
            groups: MetricGroups::bias_variance(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load and validate a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml(&read_file(path)?)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "tolerance must be a non-negative number, got {}",
                self.tolerance
            )));
        }
        if self.model_type_delimiter.is_empty() {
            return Err(ConfigError::Invalid(
                "model_type_delimiter must not be empty".into(),
            ));
        }
        if self.groups.is_empty() {
            return Err(ConfigError::Invalid("at least one metric group is required".into()));
        }
        let fraction = self.bootstrap.bootstrap_fraction;
        if !(fraction > 0.0 && fraction.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "bootstrap_fraction must be positive, got {fraction}"
            )));
        }
        if self.bootstrap.n_estimators == 0 {
            return Err(ConfigError::Invalid("n_estimators must be at least 1".into()));
        }
        Ok(())
    }

    pub fn direction_table(&self) -> DirectionTable {
        self.direction.table()
    }

    /// Deterministic content id; identical configs share an id.
    pub fn config_id(&self) -> Result<ConfigId, ConfigError> {
        let json = serde_json::to_string(self)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

// ─── Constraint files ────────────────────────────────────────────────

impl ConstraintSet {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml(&read_file(path)?)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}
