//! Text → vector via a pluggable embedding model.

use super::Operator;
use crate::batch::{RecordBatch, Value};
use crate::config::Settings;
use crate::embeddings::{ModelHandle, load_model};
use crate::error::{EvalError, Result};

/// Embeds one text column into a vector column.
///
/// The model is resolved during `setup`, from the explicit identifier if one
/// was given, otherwise from `models.embedding_model`. Null texts produce
/// null vectors.
pub struct Embedding {
    model_id: Option<String>,
    col_in_text: String,
    col_out: String,
    batch_size: usize,
    model: Option<ModelHandle>,
}

impl Embedding {
    pub fn new(col_in_text: impl Into<String>, col_out: impl Into<String>) -> Self {
        Self {
            model_id: None,
            col_in_text: col_in_text.into(),
            col_out: col_out.into(),
            batch_size: 32,
            model: None,
        }
    }

    /// Use a specific model instead of the settings default.
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Bind an already-loaded model; `setup` will keep it.
    pub fn with_handle(mut self, model: ModelHandle) -> Self {
        self.model = Some(model);
        self
    }
}

impl Operator for Embedding {
    fn kind(&self) -> &'static str {
        "embedding"
    }

    fn inputs(&self) -> Vec<String> {
        vec![self.col_in_text.clone()]
    }

    fn outputs(&self) -> Vec<String> {
        vec![self.col_out.clone()]
    }

    fn setup(&mut self, settings: &Settings) -> Result<()> {
        self.batch_size = settings.models.embedding_batch_size.max(1);
        if self.model.is_none() {
            let id = self
                .model_id
                .as_deref()
                .unwrap_or(&settings.models.embedding_model);
            tracing::debug!(model = id, column = %self.col_in_text, "loading embedding model");
            self.model = Some(load_model(id, settings)?);
        }
        Ok(())
    }

    fn run(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        let model = self.model.as_ref().ok_or_else(|| EvalError::NotSetUp(self.kind().into()))?;

        let texts = batch.texts(&self.col_in_text)?;
        let present: Vec<(usize, &str)> = texts
            .iter()
            .enumerate()
            .filter_map(|(row, text)| text.map(|t| (row, t)))
            .collect();

        let mut output = vec![Value::Null; batch.num_rows()];
        let mut dimension: Option<usize> = None;

        for chunk in present.chunks(self.batch_size) {
            let inputs: Vec<&str> = chunk.iter().map(|(_, t)| *t).collect();
            let vectors = model.embed_batch(&inputs)?;

            if vectors.len() != inputs.len() {
                return Err(EvalError::Model(format!(
                    "Model '{}' returned {} vectors for {} texts",
                    model.id(),
                    vectors.len(),
                    inputs.len()
                )));
            }

            for ((row, _), vector) in chunk.iter().zip(vectors) {
                let expected = *dimension.get_or_insert(vector.len());
                if vector.len() != expected {
                    return Err(EvalError::Model(format!(
                        "Model '{}' returned vectors of length {} and {}",
                        model.id(),
                        expected,
                        vector.len()
                    )));
                }
                output[*row] = Value::Vector(vector);
            }
        }

        batch.with_column(&self.col_out, output)
    }
}
