//! Check sets: many checks against one shared source.
//!
//! A [`CheckSet`] loads its source once, then runs every check against the
//! same immutable batch. One check's failure is recorded in the run's status
//! map and never stops the others.

use crate::artifacts::{ArtifactLogger, RunSummary, check_dir_names};
use crate::batch::RecordBatch;
use crate::check::{Check, CheckSpec};
use crate::config::Settings;
use crate::error::{ErrorKind, EvalError, Result};
use crate::persistence::Source;
use chrono::Utc;
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome of one check in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckStatus {
    Succeeded { rows: usize, artifact_dir: PathBuf },
    Failed { kind: ErrorKind, message: String },
    Cancelled,
}

impl CheckStatus {
    fn failed(err: &EvalError) -> Self {
        CheckStatus::Failed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CheckStatus::Succeeded { .. })
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Succeeded { .. } => write!(f, "succeeded"),
            CheckStatus::Failed { kind, .. } => write!(f, "failed: {}", kind),
            CheckStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Stops a running check set from launching further checks.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Check file contents: a list of checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckSetSpec {
    pub checks: Vec<CheckSpec>,
}

impl CheckSetSpec {
    /// Read a YAML or JSON check file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
        let spec = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        Ok(spec)
    }

    pub fn build(&self) -> Result<Vec<Check>> {
        self.checks.iter().map(Check::from_spec).collect()
    }
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_dir: PathBuf,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn status(&self, check: &str) -> Option<&CheckStatus> {
        self.summary.checks.get(check)
    }

    pub fn statuses(&self) -> &IndexMap<String, CheckStatus> {
        &self.summary.checks
    }
}

struct Prepared {
    settings: Settings,
    batch: RecordBatch,
    setup_errors: Vec<Option<CheckStatus>>,
    dir_names: Vec<String>,
}

pub struct CheckSet {
    source: Box<dyn Source>,
    checks: Vec<Check>,
    cancel: CancelHandle,
    prepared: Option<Prepared>,
}

impl CheckSet {
    pub fn new(source: Box<dyn Source>, checks: Vec<Check>) -> Self {
        Self {
            source,
            checks,
            cancel: CancelHandle::default(),
            prepared: None,
        }
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    /// Handle that stops checks which have not started yet.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Load the source, then set up and validate every check.
    ///
    /// Fails only for run-level problems: invalid settings, duplicate check
    /// names, or an unreadable source. A check that fails setup is recorded
    /// and reported as failed by [`CheckSet::run`].
    pub fn setup(mut self, settings: &Settings) -> Result<Self> {
        settings.validate()?;

        let mut seen = HashSet::new();
        for check in &self.checks {
            if !seen.insert(check.name().to_string()) {
                return Err(EvalError::Config(format!(
                    "Duplicate check name '{}'",
                    check.name()
                )));
            }
        }

        let batch = self.source.load()?;
        tracing::info!(
            source = %self.source.describe(),
            rows = batch.num_rows(),
            columns = batch.num_columns(),
            "loaded source"
        );

        let schema: Vec<String> = batch.column_names().into_iter().map(str::to_string).collect();
        let setup_errors = self
            .checks
            .iter_mut()
            .map(|check| {
                let result = check.setup(settings).and_then(|_| check.validate(&schema));
                match result {
                    Ok(_) => None,
                    Err(err) => {
                        tracing::warn!(check = check.name(), error = %err, "check setup failed");
                        Some(CheckStatus::failed(&err))
                    }
                }
            })
            .collect();

        let names: Vec<&str> = self.checks.iter().map(Check::name).collect();
        let dir_names = check_dir_names(&names);

        self.prepared = Some(Prepared {
            settings: settings.clone(),
            batch,
            setup_errors,
            dir_names,
        });
        Ok(self)
    }

    /// Run every check and write the run's artifacts.
    pub fn run(&self) -> Result<RunReport> {
        let prepared = self
            .prepared
            .as_ref()
            .ok_or_else(|| EvalError::NotSetUp("check set".to_string()))?;

        let logger = ArtifactLogger::create(&prepared.settings.logs_folder)?;
        let started_at = Utc::now();
        tracing::info!(
            run_id = logger.run_id(),
            checks = self.checks.len(),
            parallel = prepared.settings.execution.parallel_checks,
            "starting run"
        );

        type Job<'a> = ((&'a Check, &'a Option<CheckStatus>), &'a String);
        let run_one = |((check, setup_error), dir_name): Job<'_>| {
            self.run_check(check, setup_error.as_ref(), dir_name, &prepared.batch, &logger)
        };
        let pairs = self
            .checks
            .iter()
            .zip(prepared.setup_errors.iter())
            .zip(prepared.dir_names.iter());
        let statuses: Vec<CheckStatus> = if prepared.settings.execution.parallel_checks {
            pairs.collect::<Vec<_>>().into_par_iter().map(run_one).collect()
        } else {
            pairs.map(run_one).collect()
        };

        let checks: IndexMap<String, CheckStatus> = self
            .checks
            .iter()
            .map(|c| c.name().to_string())
            .zip(statuses)
            .collect();

        let summary = RunSummary {
            run_id: logger.run_id().to_string(),
            source: self.source.describe(),
            started_at,
            finished_at: Utc::now(),
            checks,
        };
        logger.write_summary(&summary)?;

        tracing::info!(
            run_id = logger.run_id(),
            succeeded = summary.succeeded(),
            total = summary.checks.len(),
            "run finished"
        );

        Ok(RunReport {
            run_dir: logger.run_dir().to_path_buf(),
            summary,
        })
    }

    fn run_check(
        &self,
        check: &Check,
        setup_error: Option<&CheckStatus>,
        dir_name: &str,
        batch: &RecordBatch,
        logger: &ArtifactLogger,
    ) -> CheckStatus {
        if let Some(status) = setup_error {
            return status.clone();
        }
        if self.cancel.is_cancelled() {
            tracing::info!(check = check.name(), "check cancelled");
            return CheckStatus::Cancelled;
        }

        tracing::info!(check = check.name(), "running check");
        let result = check.run(batch).and_then(|output| {
            let persisted = check.project(&output.batch)?;
            let dir = logger.log_check(check.name(), dir_name, &persisted, &output.plots)?;
            Ok(CheckStatus::Succeeded {
                rows: output.batch.num_rows(),
                artifact_dir: dir,
            })
        });

        match result {
            Ok(status) => {
                tracing::info!(check = check.name(), "check succeeded");
                status
            }
            Err(err) => {
                tracing::warn!(check = check.name(), kind = %err.kind(), error = %err, "check failed");
                CheckStatus::failed(&err)
            }
        }
    }
}
