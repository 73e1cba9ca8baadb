//! Run-scoped settings.
//!
//! Supports both environment variables and YAML config file.
//! Environment variables take precedence over config file values.
//! Once built, a `Settings` value is never mutated: it is handed by
//! reference to every operator's `setup`.

use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Embedding model defaults and backend connection details.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Default embedding model identifier (e.g., "hashing", "api:text-embedding-3-small").
    pub embedding_model: String,

    /// Output dimension for the hashing embedder.
    pub embedding_dim: usize,

    /// Number of texts sent to a backend per call.
    pub embedding_batch_size: usize,

    /// Base URL for an OpenAI-compatible embeddings API.
    pub api_base: String,

    /// API key for authentication.
    pub api_key: String,

    /// Request timeout for the HTTP backend.
    pub api_timeout_secs: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            embedding_model: "hashing".to_string(),
            embedding_dim: 384,
            embedding_batch_size: 32,
            api_base: String::new(),
            api_key: String::new(),
            api_timeout_secs: 60,
        }
    }
}

/// Numeric parameters of the built-in metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricSettings {
    /// Neighborhood size of the UMAP graph.
    pub umap_neighbors: usize,

    /// Minimum distance between embedded points.
    pub umap_min_dist: f64,

    /// Optimisation epochs for the layout.
    pub umap_epochs: usize,

    /// Number of clusters assigned on the 2D layout.
    pub umap_clusters: usize,

    /// Seed for negative sampling.
    pub seed: u64,

    /// Default ROUGE variant ("precision", "recall", "f1").
    pub rouge_score_type: String,
}

impl Default for MetricSettings {
    fn default() -> Self {
        Self {
            umap_neighbors: 15,
            umap_min_dist: 0.1,
            umap_epochs: 200,
            umap_clusters: 4,
            seed: 42,
            rouge_score_type: "f1".to_string(),
        }
    }
}

/// How a check set is executed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Run independent checks on the rayon pool.
    pub parallel_checks: bool,

    /// External visualisation command, invoked with the logs folder as its last argument.
    pub dashboard_command: Option<String>,
}

/// Full run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root directory for run artifacts.
    pub logs_folder: PathBuf,

    /// Model settings
    pub models: ModelSettings,

    /// Metric settings
    pub metrics: MetricSettings,

    /// Execution settings
    pub execution: ExecutionSettings,
}

fn default_logs_folder() -> PathBuf {
    env::temp_dir().join("evalchain_logs")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logs_folder: default_logs_folder(),
            models: ModelSettings::default(),
            metrics: MetricSettings::default(),
            execution: ExecutionSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from environment variables and optional config file.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (EVALCHAIN_LOGS_FOLDER, EVALCHAIN_EMBEDDING_MODEL, ...)
    /// 2. Explicit config file, or ~/.config/evalchain/config.yaml
    /// 3. Default values
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut settings = match config_path {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::config_file_path() {
                Some(path) if path.exists() => Self::load_from_file(&path)?,
                _ => Settings::default(),
            },
        };

        settings.apply_env(|key| env::var(key).ok());
        Ok(settings)
    }

    /// Load settings from a specific YAML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;

        serde_yaml::from_str(&content)
            .map_err(|e| EvalError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Override fields from environment-style lookups.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(folder) = lookup("EVALCHAIN_LOGS_FOLDER") {
            self.logs_folder = PathBuf::from(folder);
        }

        if let Some(model) = lookup("EVALCHAIN_EMBEDDING_MODEL") {
            self.models.embedding_model = model;
        }

        if let Some(api_base) = lookup("EVALCHAIN_API_BASE") {
            self.models.api_base = api_base;
        }

        if let Some(api_key) = lookup("EVALCHAIN_API_KEY") {
            self.models.api_key = api_key;
        }

        if let Some(parallel) = lookup("EVALCHAIN_PARALLEL_CHECKS") {
            if let Ok(flag) = parallel.parse() {
                self.execution.parallel_checks = flag;
            }
        }
    }

    /// Get the default config file path.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "evalchain")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Validate numeric options before any operator sees them.
    pub fn validate(&self) -> Result<()> {
        if self.logs_folder.as_os_str().is_empty() {
            return Err(EvalError::Config("logs_folder must not be empty".to_string()));
        }

        if self.models.embedding_dim == 0 {
            return Err(EvalError::Config(
                "models.embedding_dim must be greater than zero".to_string(),
            ));
        }

        if self.models.embedding_batch_size == 0 {
            return Err(EvalError::Config(
                "models.embedding_batch_size must be greater than zero".to_string(),
            ));
        }

        if self.metrics.umap_neighbors == 0 || self.metrics.umap_epochs == 0 {
            return Err(EvalError::Config(
                "metrics.umap_neighbors and metrics.umap_epochs must be positive".to_string(),
            ));
        }

        if self.metrics.umap_clusters == 0 {
            return Err(EvalError::Config(
                "metrics.umap_clusters must be positive".to_string(),
            ));
        }

        if self.metrics.umap_min_dist.is_nan() || self.metrics.umap_min_dist <= 0.0 {
            return Err(EvalError::Config(
                "metrics.umap_min_dist must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Create settings writing to a given logs folder (useful for testing).
    pub fn with_logs_folder(logs_folder: impl Into<PathBuf>) -> Self {
        Self {
            logs_folder: logs_folder.into(),
            ..Default::default()
        }
    }
}
