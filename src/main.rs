//! evalchain CLI
//!
//! Runs check sets over JSON Lines datasets and inspects past runs.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use evalchain::{
    artifacts::list_runs,
    check::Check,
    checkset::{CheckSet, CheckSetSpec, CheckStatus},
    config::Settings,
    persistence::{JsonReader, JsonWriter, Sink, Source},
    presets, RecordBatch,
};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// evalchain - declarative checks over question answering datasets
#[derive(Parser)]
#[command(name = "evalchain")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a check set against a dataset
    Run {
        /// JSON Lines dataset
        #[arg(short, long)]
        source: PathBuf,

        /// Check file (YAML or JSON); the documentation Q&A preset when absent
        #[arg(short, long)]
        checks: Option<PathBuf>,

        /// Settings file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the logs folder
        #[arg(short, long)]
        logs_folder: Option<PathBuf>,

        /// Run checks in parallel
        #[arg(long)]
        parallel: bool,

        /// Launch the configured dashboard command afterwards
        #[arg(long)]
        start_dashboard: bool,
    },

    /// Add question, document and response embeddings to a dataset
    Embed {
        /// JSON Lines dataset
        #[arg(short, long)]
        source: PathBuf,

        /// Output JSON Lines file
        #[arg(short, long)]
        output: PathBuf,

        /// Embedding model id (defaults to the configured model)
        #[arg(short, long)]
        model: Option<String>,

        /// Settings file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Replace the output file if it exists
        #[arg(long)]
        overwrite: bool,
    },

    /// List previous runs
    Runs {
        /// Logs folder to scan
        #[arg(short, long)]
        logs_folder: Option<PathBuf>,

        /// Settings file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok(), cli.verbose))
        .init();

    match cli.command {
        Commands::Run {
            source,
            checks,
            config,
            logs_folder,
            parallel,
            start_dashboard,
        } => cmd_run(
            source,
            checks,
            config,
            logs_folder,
            parallel,
            start_dashboard,
        ),
        Commands::Embed {
            source,
            output,
            model,
            config,
            overwrite,
        } => cmd_embed(source, output, model, config, overwrite),
        Commands::Runs {
            logs_folder,
            config,
        } => cmd_runs(logs_folder, config),
    }
}

/// RUST_LOG when set and valid, otherwise `debug` or `info`.
fn log_filter(rust_log: Option<String>, verbose: bool) -> EnvFilter {
    let default = if verbose { "debug" } else { "info" };
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default))
}

fn load_settings(config: Option<&Path>, logs_folder: Option<PathBuf>) -> Result<Settings> {
    let mut settings = Settings::load(config).context("Failed to load configuration")?;
    if let Some(logs_folder) = logs_folder {
        settings.logs_folder = logs_folder;
    }
    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

fn cmd_run(
    source: PathBuf,
    checks_path: Option<PathBuf>,
    config: Option<PathBuf>,
    logs_folder: Option<PathBuf>,
    parallel: bool,
    start_dashboard: bool,
) -> Result<()> {
    let mut settings = load_settings(config.as_deref(), logs_folder)?;
    if parallel {
        settings.execution.parallel_checks = true;
    }

    let specs = match &checks_path {
        Some(path) => {
            CheckSetSpec::load_from_file(path)
                .with_context(|| format!("Failed to read check file '{}'", path.display()))?
                .checks
        }
        None => presets::docs_qna_checks(),
    };
    let checks = specs
        .iter()
        .map(Check::from_spec)
        .collect::<evalchain::Result<Vec<_>>>()
        .context("Invalid check definition")?;

    println!("Running {} checks on {}", checks.len(), source.display());
    let start = Instant::now();

    let report = CheckSet::new(Box::new(JsonReader::new(&source)), checks)
        .setup(&settings)
        .context("Check set setup failed")?
        .run()
        .context("Check set run failed")?;

    println!();
    println!("Run {}", report.summary.run_id);
    println!("{}", "─".repeat(60));
    for (name, status) in report.statuses() {
        println!("  {:<40} {}", name, status);
        if let CheckStatus::Failed { message, .. } = status {
            println!("    {}", message);
        }
    }
    println!("{}", "─".repeat(60));
    println!(
        "{}/{} checks succeeded in {:.2?}",
        report.summary.succeeded(),
        report.statuses().len(),
        start.elapsed()
    );
    println!("Artifacts: {}", report.run_dir.display());

    if start_dashboard {
        launch_dashboard(&settings)?;
    }

    Ok(())
}

fn launch_dashboard(settings: &Settings) -> Result<()> {
    let command = settings
        .execution
        .dashboard_command
        .as_deref()
        .context("No dashboard command configured (execution.dashboard_command)")?;

    let mut parts = command.split_whitespace();
    let program = parts.next().context("Dashboard command is empty")?;

    println!("Starting dashboard: {} {}", command, settings.logs_folder.display());
    let status = Command::new(program)
        .args(parts)
        .arg(&settings.logs_folder)
        .status()
        .with_context(|| format!("Failed to launch dashboard '{}'", program))?;

    if !status.success() {
        anyhow::bail!("Dashboard exited with {}", status);
    }
    Ok(())
}

fn cmd_embed(
    source: PathBuf,
    output: PathBuf,
    model: Option<String>,
    config: Option<PathBuf>,
    overwrite: bool,
) -> Result<()> {
    let settings = load_settings(config.as_deref(), None)?;
    let start = Instant::now();
    let rows = embed_file(&settings, &source, &output, model.as_deref(), overwrite)?;
    println!(
        "Wrote {} rows with embeddings to {} in {:.2?}",
        rows,
        output.display(),
        start.elapsed()
    );
    Ok(())
}

/// Run the embedding pass over `source` and write the result to `output`.
fn embed_file(
    settings: &Settings,
    source: &Path,
    output: &Path,
    model: Option<&str>,
    overwrite: bool,
) -> Result<usize> {
    if output.exists() && !overwrite {
        anyhow::bail!(
            "Output '{}' already exists. Pass --overwrite to replace it.",
            output.display()
        );
    }

    let mut batch = JsonReader::new(source)
        .load()
        .context("Failed to load dataset")?;
    println!("Loaded {} rows from {}", batch.num_rows(), source.display());

    for spec in presets::embedding_pass(model) {
        let mut op = spec.build()?;
        op.setup(settings).context("Failed to set up embedding model")?;
        batch = op
            .run(&batch)
            .with_context(|| format!("Failed to compute {}", op.outputs().join(", ")))?;
    }

    replace_output(&JsonWriter::new(output), &batch)?;
    Ok(batch.num_rows())
}

/// Swap the output file for `batch`; the old file stays until the new rows
/// are ready.
fn replace_output(writer: &JsonWriter, batch: &RecordBatch) -> Result<()> {
    writer.clear().context("Failed to remove existing output")?;
    writer.write(batch).context("Failed to write dataset")?;
    Ok(())
}

fn cmd_runs(logs_folder: Option<PathBuf>, config: Option<PathBuf>) -> Result<()> {
    let settings = load_settings(config.as_deref(), logs_folder)?;
    let runs = list_runs(&settings.logs_folder).context("Failed to list runs")?;

    if runs.is_empty() {
        println!("No runs found in {}", settings.logs_folder.display());
        return Ok(());
    }

    println!("Runs in {}", settings.logs_folder.display());
    println!("{}", "─".repeat(60));
    for (dir, summary) in &runs {
        println!(
            "  {}  {}  {}/{} succeeded  ({})",
            summary.run_id,
            summary.started_at.format("%Y-%m-%d %H:%M:%S"),
            summary.succeeded(),
            summary.checks.len(),
            summary.source
        );
        for (name, status) in &summary.checks {
            println!("      {:<36} {}", name, status);
        }
        tracing::debug!(dir = %dir.display(), "listed run");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;
    use tracing_subscriber::filter::LevelFilter;

    const ROW: &str = r#"{"question": "How do I install it?", "document_text": "pip install foo", "response": "Use pip."}"#;

    #[test]
    fn test_log_filter_prefers_rust_log() {
        let level = |rust_log: Option<&str>, verbose| {
            log_filter(rust_log.map(str::to_string), verbose).max_level_hint()
        };
        assert_eq!(level(None, false), Some(LevelFilter::INFO));
        assert_eq!(level(None, true), Some(LevelFilter::DEBUG));
        assert_eq!(level(Some("warn"), true), Some(LevelFilter::WARN));
        assert_eq!(level(Some("evalchain=trace"), false), Some(LevelFilter::TRACE));
        assert_eq!(level(Some(""), false), Some(LevelFilter::INFO));
        assert_eq!(level(Some("evalchain=loud"), true), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn test_embed_file_replaces_output() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("qna.jsonl");
        let output = temp.path().join("embedded.jsonl");
        fs::write(&source, format!("{}\n", ROW)).unwrap();
        fs::write(&output, "{\"stale\": true}\n").unwrap();

        let settings = Settings::default();
        assert!(embed_file(&settings, &source, &output, None, false).is_err());

        let rows = embed_file(&settings, &source, &output, None, true).unwrap();
        assert_eq!(rows, 1);
        let batch = JsonReader::new(&output).load().unwrap();
        assert!(!batch.contains("stale"));
        for (_, column) in presets::EMBEDDED_COLUMNS {
            assert!(batch.contains(column));
        }
    }

    #[test]
    fn test_failed_embedding_keeps_existing_output() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("qna.jsonl");
        let output = temp.path().join("embedded.jsonl");
        // no document_text column
        fs::write(&source, "{\"question\": \"q\", \"response\": \"r\"}\n").unwrap();
        fs::write(&output, "{\"previous\": 1}\n").unwrap();

        let settings = Settings::default();
        assert!(embed_file(&settings, &source, &output, None, true).is_err());
        let missing = temp.path().join("missing.jsonl");
        assert!(embed_file(&settings, &missing, &output, None, true).is_err());
        assert_eq!(fs::read_to_string(&output).unwrap(), "{\"previous\": 1}\n");
    }
}
