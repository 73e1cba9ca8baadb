//! evalchain - declarative operator chains for evaluating generated answers.
//!
//! Records (questions, retrieved documents, model responses, embeddings) are
//! loaded into a columnar [`RecordBatch`]. A [`Check`] pushes that batch
//! through an ordered chain of operators, each of which appends new columns,
//! and then evaluates plot declarations over the result. A [`CheckSet`] runs
//! many checks against one shared source, isolating failures, and persists
//! every check's data and plots under the logs folder.
//!
//! # Quick Start
//!
//! ```no_run
//! use evalchain::{
//!     check::Check,
//!     checkset::CheckSet,
//!     config::Settings,
//!     operators::TextLength,
//!     persistence::JsonReader,
//!     plots::PlotSpec,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load(None)?;
//!
//!     let check = Check::new("response_length")
//!         .with_operator(TextLength::new("response", "response_length"))
//!         .with_plot(PlotSpec::histogram("Response length", "response_length", 20));
//!
//!     let report = CheckSet::new(Box::new(JsonReader::new("qna.jsonl")), vec![check])
//!         .setup(&settings)?
//!         .run()?;
//!
//!     for (name, status) in report.statuses() {
//!         println!("{}: {}", name, status);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **RecordBatch**: append-only columnar table with shared column storage
//! - **Operator**: one named transformation with declared inputs and outputs
//! - **EmbeddingModel**: text → vector capability (hashing, HTTP API, local BERT)
//! - **Check**: operator chain plus plots
//! - **CheckSet**: checks over a shared source with per-check status reporting

pub mod artifacts;
pub mod batch;
pub mod check;
pub mod checkset;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod operators;
pub mod persistence;
pub mod plots;
pub mod presets;

// Re-export commonly used types
pub use batch::{Column, RecordBatch, Value};
pub use check::{Check, CheckSpec};
pub use checkset::{CancelHandle, CheckSet, CheckSetSpec, CheckStatus, RunReport};
pub use config::Settings;
pub use error::{ErrorKind, EvalError, Result};
pub use operators::{Operator, OperatorSpec};
pub use persistence::{JsonReader, JsonWriter, MemorySource, Sink, Source};
pub use plots::{EvaluatedPlot, PlotSpec};
