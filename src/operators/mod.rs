//! Operators: the atomic transformations of a check.
//!
//! Every operator declares the columns it reads and writes, is bound to a
//! [`Settings`] value by `setup`, and then maps a batch to a new batch that
//! carries every input column unchanged plus its outputs.
//!
//! Operators are built from an [`OperatorSpec`], which is what check files
//! deserialize into. The `kind` field selects the operator.

mod distribution;
mod embedding;
mod similarity;
mod text;
mod umap;

pub use distribution::{Distribution, DistributionMetric, DistributionShape};
pub use embedding::Embedding;
pub use similarity::{CosineSimilarity, RougeScore, RougeType, rouge_l};
pub use text::{DocsLinkVersion, TextComparison, TextLength};
pub use umap::{Umap, UmapParams};

use crate::batch::RecordBatch;
use crate::config::Settings;
use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};

/// Row shape of an operator's output batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputShape {
    /// One output row per input row; every input column is kept.
    PerRow,
    /// One output row per group; only key and output columns remain.
    PerGroup,
}

/// A single named transformation with a setup/run lifecycle.
pub trait Operator: Send + Sync {
    /// Stable kind identifier, as used in check files.
    fn kind(&self) -> &'static str;

    /// Columns this operator reads.
    fn inputs(&self) -> Vec<String>;

    /// Columns this operator adds.
    fn outputs(&self) -> Vec<String>;

    fn shape(&self) -> OutputShape {
        OutputShape::PerRow
    }

    /// Columns present after this operator, given the columns before it.
    fn output_schema(&self, input: &[String]) -> Vec<String> {
        let mut schema = input.to_vec();
        schema.extend(self.outputs());
        schema
    }

    /// Bind runtime capabilities. Calling it again is a no-op.
    fn setup(&mut self, settings: &Settings) -> Result<()>;

    /// Transform a batch. Fails if `setup` has not run.
    fn run(&self, batch: &RecordBatch) -> Result<RecordBatch>;
}

/// Fail with a usage error when an operator is run before setup.
pub(crate) fn ensure_ready(ready: bool, kind: &str) -> Result<()> {
    if ready {
        Ok(())
    } else {
        Err(EvalError::NotSetUp(kind.to_string()))
    }
}

/// One reference text or several.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// Declarative operator configuration, keyed by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperatorSpec {
    Embedding {
        #[serde(default)]
        model: Option<String>,
        col_in_text: String,
        col_out: String,
    },
    CosineSimilarity {
        col_in_vector_1: String,
        col_in_vector_2: String,
        col_out: String,
    },
    RougeScore {
        #[serde(default)]
        score_type: Option<RougeType>,
        col_in_generated: String,
        col_in_source: String,
        col_out: String,
    },
    Distribution {
        metric: DistributionMetric,
        col_in: Vec<String>,
        col_in_groupby: Vec<String>,
        col_out: Vec<String>,
        #[serde(default)]
        shape: DistributionShape,
    },
    Umap {
        col_in_embs_1: String,
        #[serde(default)]
        col_in_embs_2: Option<String>,
    },
    TextLength {
        col_in_text: String,
        col_out: String,
    },
    TextComparison {
        reference_texts: OneOrMany,
        col_in_text: String,
        col_out: String,
    },
    DocsLinkVersion {
        col_in_text: String,
        col_out: String,
    },
}

impl OperatorSpec {
    /// Construct the operator this spec describes.
    pub fn build(&self) -> Result<Box<dyn Operator>> {
        let op: Box<dyn Operator> = match self.clone() {
            OperatorSpec::Embedding {
                model,
                col_in_text,
                col_out,
            } => {
                let op = Embedding::new(col_in_text, col_out);
                Box::new(match model {
                    Some(model) => op.with_model(model),
                    None => op,
                })
            }
            OperatorSpec::CosineSimilarity {
                col_in_vector_1,
                col_in_vector_2,
                col_out,
            } => Box::new(CosineSimilarity::new(
                col_in_vector_1,
                col_in_vector_2,
                col_out,
            )),
            OperatorSpec::RougeScore {
                score_type,
                col_in_generated,
                col_in_source,
                col_out,
            } => {
                let op = RougeScore::new(col_in_generated, col_in_source, col_out);
                Box::new(match score_type {
                    Some(score_type) => op.with_score_type(score_type),
                    None => op,
                })
            }
            OperatorSpec::Distribution {
                metric,
                col_in,
                col_in_groupby,
                col_out,
                shape,
            } => Box::new(Distribution::new(metric, col_in, col_in_groupby, col_out)?.with_shape(shape)),
            OperatorSpec::Umap {
                col_in_embs_1,
                col_in_embs_2,
            } => Box::new(Umap::new(col_in_embs_1, col_in_embs_2)),
            OperatorSpec::TextLength {
                col_in_text,
                col_out,
            } => Box::new(TextLength::new(col_in_text, col_out)),
            OperatorSpec::TextComparison {
                reference_texts,
                col_in_text,
                col_out,
            } => Box::new(TextComparison::new(
                reference_texts.into_vec(),
                col_in_text,
                col_out,
            )),
            OperatorSpec::DocsLinkVersion {
                col_in_text,
                col_out,
            } => Box::new(DocsLinkVersion::new(col_in_text, col_out)?),
        };
        Ok(op)
    }
}
