//! Experiment configuration.
//!
//! Loaded from YAML; every section and field is optional and falls back to
//! the published experimental protocol (50 training molecules, 100 trials,
//! seeds 1..=100).

use crate::models::ModelPanel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid evaluation mode: {0} (expected mae or r2)")]
    InvalidMode(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Which aggregation a run performs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvalMode {
    /// Mean/std/median of per-trial absolute errors, ranked ascending
    #[default]
    Mae,
    /// Pooled R² over all trials, ranked descending
    R2,
}

impl std::str::FromStr for EvalMode {
    type Err = ConfigError;

    /// Parse an evaluation mode
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidMode` for anything but `mae` or `r2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mae" => Ok(Self::Mae),
            "r2" | "r²" | "r_squared" => Ok(Self::R2),
            _ => Err(ConfigError::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for EvalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mae => write!(f, "mae"),
            Self::R2 => write!(f, "r2"),
        }
    }
}

/// Dataset section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetSettings {
    /// JSON-lines dataset file
    #[serde(default = "default_dataset_path")]
    pub path: PathBuf,
    /// Target properties, one task each
    #[serde(default = "default_target_properties")]
    pub target_properties: Vec<String>,
    /// Representations evaluated per task
    #[serde(default = "default_representations")]
    pub representations: Vec<String>,
    /// Training molecules per trial
    #[serde(default = "default_train_size")]
    pub train_size: usize,
}

fn default_dataset_path() -> PathBuf {
    PathBuf::from("dataset.jsonl")
}

fn default_target_properties() -> Vec<String> {
    [
        "aM_w+b",
        "LogP",
        "sp3",
        "TPSA",
        "MolMR",
        "HKA",
        "BJ",
        "Chi",
        "Molecular Weight",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

fn default_representations() -> Vec<String> {
    ["ecfp", "rdkit", "maccs", "chemberta"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

const fn default_train_size() -> usize {
    50
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            path: default_dataset_path(),
            target_properties: default_target_properties(),
            representations: default_representations(),
            train_size: default_train_size(),
        }
    }
}

/// Evaluation section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluationSettings {
    /// Trials per (task, representation); seeds run 1..=n_trials
    #[serde(default = "default_n_trials")]
    pub n_trials: usize,
    /// Aggregation mode
    #[serde(default)]
    pub mode: EvalMode,
}

const fn default_n_trials() -> usize {
    100
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            n_trials: default_n_trials(),
            mode: EvalMode::default(),
        }
    }
}

/// Model panel section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelSettings {
    /// Seed handed to every stochastic model
    #[serde(default = "default_random_state")]
    pub random_state: u64,
    /// Hidden-layer widths, one MLP per entry
    #[serde(default = "default_mlp_architectures")]
    pub mlp_architectures: Vec<Vec<usize>>,
}

const fn default_random_state() -> u64 {
    42
}

fn default_mlp_architectures() -> Vec<Vec<usize>> {
    vec![
        vec![256, 64],
        vec![512, 128],
        vec![1024, 256],
        vec![512],
        vec![512, 512],
        vec![512, 512, 512],
    ]
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            random_state: default_random_state(),
            mlp_architectures: default_mlp_architectures(),
        }
    }
}

/// Output section; patterns substitute `{task}` and `{predictor}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputSettings {
    /// Directory holding result bundles
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// Directory holding external predictor response logs
    #[serde(default = "default_responses_dir")]
    pub responses_dir: PathBuf,
    /// File name of MAE bundles
    #[serde(default = "default_mae_pattern")]
    pub mae_pattern: String,
    /// File name of R² bundles
    #[serde(default = "default_r2_pattern")]
    pub r2_pattern: String,
    /// File name of response logs
    #[serde(default = "default_response_pattern")]
    pub response_pattern: String,
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("Results")
}

fn default_responses_dir() -> PathBuf {
    PathBuf::from("Responses")
}

fn default_mae_pattern() -> String {
    "results_dict_{task}.json".to_string()
}

fn default_r2_pattern() -> String {
    "r2_results_{task}.json".to_string()
}

fn default_response_pattern() -> String {
    "{predictor}_{task}_results.txt".to_string()
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            responses_dir: default_responses_dir(),
            mae_pattern: default_mae_pattern(),
            r2_pattern: default_r2_pattern(),
            response_pattern: default_response_pattern(),
        }
    }
}

impl OutputSettings {
    /// Bundle file name for a task code
    #[must_use]
    pub fn bundle_file(&self, task_code: &str, mode: EvalMode) -> String {
        let pattern = match mode {
            EvalMode::Mae => &self.mae_pattern,
            EvalMode::R2 => &self.r2_pattern,
        };
        pattern.replace("{task}", task_code)
    }

    /// Response log path for a predictor on a task
    #[must_use]
    pub fn response_path(&self, predictor: &str, task_code: &str) -> PathBuf {
        let file = self
            .response_pattern
            .replace("{predictor}", &predictor.to_lowercase())
            .replace("{task}", task_code);
        self.responses_dir.join(file)
    }
}

/// Complete experiment configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub dataset: DatasetSettings,
    #[serde(default)]
    pub evaluation: EvaluationSettings,
    #[serde(default)]
    pub models: ModelSettings,
    #[serde(default)]
    pub output: OutputSettings,
    /// Human property name to short file-name code
    #[serde(default = "default_task_codes")]
    pub task_codes: BTreeMap<String, String>,
}

fn default_task_codes() -> BTreeMap<String, String> {
    [
        ("aM_w+b", "ltmw"),
        ("LogP", "logp"),
        ("sp3", "sp3"),
        ("TPSA", "tpsa"),
        ("MolMR", "mr"),
        ("HKA", "hka"),
        ("BJ", "bj"),
        ("Chi", "chi1v"),
        ("Molecular Weight", "mw"),
    ]
    .iter()
    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
    .collect()
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetSettings::default(),
            evaluation: EvaluationSettings::default(),
            models: ModelSettings::default(),
            output: OutputSettings::default(),
            task_codes: default_task_codes(),
        }
    }
}

impl ExperimentConfig {
    /// Load and validate configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed or fails validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string
    ///
    /// # Errors
    ///
    /// Returns error if YAML is invalid or fails validation.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check protocol parameters
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for a zero train size or trial count,
    /// or an empty MLP architecture list or layer.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dataset.train_size == 0 {
            return Err(ConfigError::Invalid("dataset.train_size must be > 0".to_string()));
        }
        if self.evaluation.n_trials == 0 {
            return Err(ConfigError::Invalid("evaluation.n_trials must be > 0".to_string()));
        }
        if self.models.mlp_architectures.is_empty() {
            return Err(ConfigError::Invalid(
                "models.mlp_architectures must not be empty".to_string(),
            ));
        }
        if let Some(arch) = self
            .models
            .mlp_architectures
            .iter()
            .find(|a| a.is_empty() || a.contains(&0))
        {
            return Err(ConfigError::Invalid(format!(
                "MLP architecture {arch:?} needs at least one non-empty layer"
            )));
        }
        Ok(())
    }

    /// Short code used in file names for a target property
    ///
    /// Unmapped names are lowercased with spaces replaced by underscores.
    #[must_use]
    pub fn task_code(&self, property: &str) -> String {
        self.task_codes
            .get(property)
            .cloned()
            .unwrap_or_else(|| property.to_lowercase().replace(' ', "_"))
    }

    /// The full model panel described by the models section
    #[must_use]
    pub fn panel(&self) -> ModelPanel {
        ModelPanel::standard(&self.models.mlp_architectures, self.models.random_state)
    }
}
