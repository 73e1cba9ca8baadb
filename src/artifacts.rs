//! On-disk artifacts of check set runs.
//!
//! Layout under the logs folder:
//!
//! ```text
//! <logs_folder>/<run_id>/summary.json
//! <logs_folder>/<run_id>/<check>/data.jsonl
//! <logs_folder>/<run_id>/<check>/plots.json
//! <logs_folder>/<run_id>/<check>/schema.json
//! ```
//!
//! `schema.json` lists the persisted columns so a zero-row `data.jsonl`
//! still reloads with its column set.

use crate::batch::RecordBatch;
use crate::checkset::CheckStatus;
use crate::error::{EvalError, Result};
use crate::persistence::{JsonReader, JsonWriter, Sink, Source};
use crate::plots::EvaluatedPlot;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const SUMMARY_FILE: &str = "summary.json";
pub const DATA_FILE: &str = "data.jsonl";
pub const PLOTS_FILE: &str = "plots.json";
pub const SCHEMA_FILE: &str = "schema.json";

/// Status map and timing of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub checks: IndexMap<String, CheckStatus>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.checks
            .values()
            .filter(|s| matches!(s, CheckStatus::Succeeded { .. }))
            .count()
    }
}

/// Writes the artifacts of a single run into its own directory.
#[derive(Debug, Clone)]
pub struct ArtifactLogger {
    run_id: String,
    run_dir: PathBuf,
}

impl ArtifactLogger {
    /// Claim a fresh run directory under `logs_folder`.
    pub fn create(logs_folder: &Path) -> Result<Self> {
        fs::create_dir_all(logs_folder).map_err(|e| EvalError::io(logs_folder, e))?;

        let base = format!("run-{}", Utc::now().format("%Y%m%d-%H%M%S"));
        let mut attempt = 0usize;
        loop {
            let run_id = if attempt == 0 {
                base.clone()
            } else {
                format!("{}-{}", base, attempt)
            };
            let run_dir = logs_folder.join(&run_id);
            match fs::create_dir(&run_dir) {
                Ok(()) => {
                    tracing::debug!(run_dir = %run_dir.display(), "created run directory");
                    return Ok(Self { run_id, run_dir });
                }
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(EvalError::io(&run_dir, e)),
            }
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Persist one check's final batch and plots under `dir_name`.
    ///
    /// `dir_name` comes from [`check_dir_names`]; the directory must not
    /// exist yet. Returns the directory.
    pub fn log_check(
        &self,
        check_name: &str,
        dir_name: &str,
        batch: &RecordBatch,
        plots: &[EvaluatedPlot],
    ) -> Result<PathBuf> {
        let dir = self.run_dir.join(dir_name);
        fs::create_dir(&dir).map_err(|e| EvalError::io(&dir, e))?;

        JsonWriter::new(dir.join(DATA_FILE)).write(batch)?;

        let schema_path = dir.join(SCHEMA_FILE);
        let json = serde_json::to_string_pretty(&batch.column_names())?;
        fs::write(&schema_path, json).map_err(|e| EvalError::io(&schema_path, e))?;

        let plots_path = dir.join(PLOTS_FILE);
        let json = serde_json::to_string_pretty(plots)?;
        fs::write(&plots_path, json).map_err(|e| EvalError::io(&plots_path, e))?;

        tracing::debug!(check = check_name, dir = %dir.display(), "wrote check artifacts");
        Ok(dir)
    }

    pub fn write_summary(&self, summary: &RunSummary) -> Result<PathBuf> {
        let path = self.run_dir.join(SUMMARY_FILE);
        let json = serde_json::to_string_pretty(summary)?;
        fs::write(&path, json).map_err(|e| EvalError::io(&path, e))?;
        Ok(path)
    }
}

/// Distinct directory names for checks, in declaration order.
///
/// Names that sanitize to the same directory (compared case-insensitively)
/// get a numeric suffix, first come first served.
pub fn check_dir_names<S: AsRef<str>>(check_names: &[S]) -> Vec<String> {
    let mut taken = HashSet::new();
    check_names
        .iter()
        .map(|name| {
            let base = dir_name(name.as_ref());
            let mut candidate = base.clone();
            let mut attempt = 0usize;
            while !taken.insert(candidate.to_lowercase()) {
                attempt += 1;
                candidate = format!("{}-{}", base, attempt);
            }
            candidate
        })
        .collect()
}

/// Reload a check's persisted batch, keeping its columns even when empty.
pub fn load_check_data(dir: &Path) -> Result<RecordBatch> {
    let schema_path = dir.join(SCHEMA_FILE);
    let reader = JsonReader::new(dir.join(DATA_FILE));
    let reader = if schema_path.exists() {
        let content = fs::read_to_string(&schema_path).map_err(|e| EvalError::io(&schema_path, e))?;
        reader.with_schema(serde_json::from_str(&content)?)
    } else {
        reader
    };
    reader.load()
}

/// File-system safe directory name for a check.
fn dir_name(check_name: &str) -> String {
    let name: String = check_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() {
        "_".to_string()
    } else {
        name
    }
}

/// Every run under `logs_folder` that has a readable summary, oldest first.
pub fn list_runs(logs_folder: &Path) -> Result<Vec<(PathBuf, RunSummary)>> {
    if !logs_folder.exists() {
        return Ok(Vec::new());
    }

    let mut runs = Vec::new();
    for entry in WalkDir::new(logs_folder)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == SUMMARY_FILE)
    {
        let path = entry.path();
        let content = fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
        match serde_json::from_str::<RunSummary>(&content) {
            Ok(summary) => {
                let run_dir = path.parent().unwrap_or(logs_folder).to_path_buf();
                runs.push((run_dir, summary));
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable summary"),
        }
    }

    runs.sort_by(|a, b| {
        a.1.started_at
            .cmp(&b.1.started_at)
            .then_with(|| a.1.run_id.cmp(&b.1.run_id))
    });
    Ok(runs)
}
