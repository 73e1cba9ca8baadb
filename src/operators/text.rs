//! Per-row string metrics.

use super::{Operator, ensure_ready};
use crate::batch::{RecordBatch, Value};
use crate::config::Settings;
use crate::error::{EvalError, Result};
use regex::Regex;

/// Apply `f` to every non-null text cell of `column`.
fn map_texts(
    batch: &RecordBatch,
    column: &str,
    f: impl Fn(&str) -> Value,
) -> Result<Vec<Value>> {
    Ok(batch
        .texts(column)?
        .into_iter()
        .map(|text| text.map(&f).unwrap_or(Value::Null))
        .collect())
}

/// Character count of a text column.
#[derive(Debug, Clone)]
pub struct TextLength {
    col_in_text: String,
    col_out: String,
    ready: bool,
}

impl TextLength {
    pub fn new(col_in_text: impl Into<String>, col_out: impl Into<String>) -> Self {
        Self {
            col_in_text: col_in_text.into(),
            col_out: col_out.into(),
            ready: false,
        }
    }
}

impl Operator for TextLength {
    fn kind(&self) -> &'static str {
        "text_length"
    }

    fn inputs(&self) -> Vec<String> {
        vec![self.col_in_text.clone()]
    }

    fn outputs(&self) -> Vec<String> {
        vec![self.col_out.clone()]
    }

    fn setup(&mut self, _settings: &Settings) -> Result<()> {
        self.ready = true;
        Ok(())
    }

    fn run(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        ensure_ready(self.ready, self.kind())?;
        let lengths = map_texts(batch, &self.col_in_text, |t| {
            Value::Int(t.chars().count() as i64)
        })?;
        batch.with_column(&self.col_out, lengths)
    }
}

/// Whether a text equals any of a set of reference texts.
#[derive(Debug, Clone)]
pub struct TextComparison {
    reference_texts: Vec<String>,
    col_in_text: String,
    col_out: String,
    ready: bool,
}

impl TextComparison {
    pub fn new(
        reference_texts: Vec<String>,
        col_in_text: impl Into<String>,
        col_out: impl Into<String>,
    ) -> Self {
        Self {
            reference_texts,
            col_in_text: col_in_text.into(),
            col_out: col_out.into(),
            ready: false,
        }
    }
}

impl Operator for TextComparison {
    fn kind(&self) -> &'static str {
        "text_comparison"
    }

    fn inputs(&self) -> Vec<String> {
        vec![self.col_in_text.clone()]
    }

    fn outputs(&self) -> Vec<String> {
        vec![self.col_out.clone()]
    }

    fn setup(&mut self, _settings: &Settings) -> Result<()> {
        if self.reference_texts.is_empty() {
            return Err(EvalError::Config(
                "text_comparison needs at least one reference text".to_string(),
            ));
        }
        self.ready = true;
        Ok(())
    }

    fn run(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        ensure_ready(self.ready, self.kind())?;
        let matches = map_texts(batch, &self.col_in_text, |t| {
            Value::Bool(self.reference_texts.iter().any(|r| r == t))
        })?;
        batch.with_column(&self.col_out, matches)
    }
}

/// Extracts a version token such as `1.2` or `v2.0.1` from a link.
#[derive(Debug, Clone)]
pub struct DocsLinkVersion {
    col_in_text: String,
    col_out: String,
    pattern: Regex,
    ready: bool,
}

impl DocsLinkVersion {
    pub fn new(col_in_text: impl Into<String>, col_out: impl Into<String>) -> Result<Self> {
        let pattern = Regex::new(r"(?:^|[/\-_=@])(v?\d+(?:\.\d+)+)(?:$|[/\-_#?])")
            .map_err(|e| EvalError::Config(format!("Invalid version pattern: {}", e)))?;
        Ok(Self {
            col_in_text: col_in_text.into(),
            col_out: col_out.into(),
            pattern,
            ready: false,
        })
    }

    /// First version token in `link`, if any.
    pub fn extract<'a>(&self, link: &'a str) -> Option<&'a str> {
        self.pattern
            .captures(link)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }
}

impl Operator for DocsLinkVersion {
    fn kind(&self) -> &'static str {
        "docs_link_version"
    }

    fn inputs(&self) -> Vec<String> {
        vec![self.col_in_text.clone()]
    }

    fn outputs(&self) -> Vec<String> {
        vec![self.col_out.clone()]
    }

    fn setup(&mut self, _settings: &Settings) -> Result<()> {
        self.ready = true;
        Ok(())
    }

    fn run(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        ensure_ready(self.ready, self.kind())?;
        let versions = map_texts(batch, &self.col_in_text, |t| self.extract(t).into())?;
        batch.with_column(&self.col_out, versions)
    }
}
