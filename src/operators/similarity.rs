//! Pairwise row metrics: cosine similarity and ROUGE-L.

use super::{Operator, ensure_ready};
use crate::batch::{RecordBatch, Value};
use crate::config::Settings;
use crate::embeddings::{cosine_similarity, tokenize};
use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Cosine similarity between two vector columns, one float per row.
#[derive(Debug, Clone)]
pub struct CosineSimilarity {
    col_in_vector_1: String,
    col_in_vector_2: String,
    col_out: String,
    ready: bool,
}

impl CosineSimilarity {
    pub fn new(
        col_in_vector_1: impl Into<String>,
        col_in_vector_2: impl Into<String>,
        col_out: impl Into<String>,
    ) -> Self {
        Self {
            col_in_vector_1: col_in_vector_1.into(),
            col_in_vector_2: col_in_vector_2.into(),
            col_out: col_out.into(),
            ready: false,
        }
    }
}

impl Operator for CosineSimilarity {
    fn kind(&self) -> &'static str {
        "cosine_similarity"
    }

    fn inputs(&self) -> Vec<String> {
        vec![self.col_in_vector_1.clone(), self.col_in_vector_2.clone()]
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
        batch.require(&self.inputs())?;

        let left = batch.vectors(&self.col_in_vector_1)?;
        let right = batch.vectors(&self.col_in_vector_2)?;

        let scores = left
            .iter()
            .zip(right.iter())
            .enumerate()
            .map(|(row, pair)| match pair {
                (Some(a), Some(b)) => cosine_similarity(a, b).map(Value::float).ok_or_else(|| {
                    EvalError::data(
                        &self.col_in_vector_2,
                        format!(
                            "vector length {} does not match '{}' length {} at row {}",
                            b.len(),
                            self.col_in_vector_1,
                            a.len(),
                            row
                        ),
                    )
                }),
                _ => Ok(Value::Null),
            })
            .collect::<Result<Vec<_>>>()?;

        batch.with_column(&self.col_out, scores)
    }
}

/// Which ROUGE-L component to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RougeType {
    Precision,
    Recall,
    F1,
}

impl FromStr for RougeType {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "precision" => Ok(RougeType::Precision),
            "recall" => Ok(RougeType::Recall),
            "f1" => Ok(RougeType::F1),
            other => Err(EvalError::Config(format!(
                "Unknown ROUGE score type '{}' (expected precision, recall, or f1)",
                other
            ))),
        }
    }
}

/// ROUGE-L precision, recall and F1 from the longest common token subsequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RougeScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl RougeScores {
    pub fn get(&self, score_type: RougeType) -> f64 {
        match score_type {
            RougeType::Precision => self.precision,
            RougeType::Recall => self.recall,
            RougeType::F1 => self.f1,
        }
    }
}

/// Score `generated` against `reference` with ROUGE-L.
///
/// F1 is symmetric in its arguments.
pub fn rouge_l(generated: &str, reference: &str) -> RougeScores {
    let gen_tokens = tokenize(generated);
    let ref_tokens = tokenize(reference);

    if gen_tokens.is_empty() || ref_tokens.is_empty() {
        return RougeScores {
            precision: 0.0,
            recall: 0.0,
            f1: 0.0,
        };
    }

    let lcs = lcs_len(&gen_tokens, &ref_tokens) as f64;
    let gen_len = gen_tokens.len() as f64;
    let ref_len = ref_tokens.len() as f64;

    RougeScores {
        precision: lcs / gen_len,
        recall: lcs / ref_len,
        f1: 2.0 * lcs / (gen_len + ref_len),
    }
}

fn lcs_len(a: &[String], b: &[String]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for token_a in a {
        for (j, token_b) in b.iter().enumerate() {
            curr[j + 1] = if token_a == token_b {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// ROUGE-L between a generated and a source text column.
#[derive(Debug, Clone)]
pub struct RougeScore {
    score_type: Option<RougeType>,
    col_in_generated: String,
    col_in_source: String,
    col_out: String,
    resolved: Option<RougeType>,
}

impl RougeScore {
    pub fn new(
        col_in_generated: impl Into<String>,
        col_in_source: impl Into<String>,
        col_out: impl Into<String>,
    ) -> Self {
        Self {
            score_type: None,
            col_in_generated: col_in_generated.into(),
            col_in_source: col_in_source.into(),
            col_out: col_out.into(),
            resolved: None,
        }
    }

    /// Fix the score type instead of using `metrics.rouge_score_type`.
    pub fn with_score_type(mut self, score_type: RougeType) -> Self {
        self.score_type = Some(score_type);
        self
    }
}

impl Operator for RougeScore {
    fn kind(&self) -> &'static str {
        "rouge_score"
    }

    fn inputs(&self) -> Vec<String> {
        vec![self.col_in_generated.clone(), self.col_in_source.clone()]
    }

    fn outputs(&self) -> Vec<String> {
        vec![self.col_out.clone()]
    }

    fn setup(&mut self, settings: &Settings) -> Result<()> {
        let score_type = match self.score_type {
            Some(score_type) => score_type,
            None => settings.metrics.rouge_score_type.parse()?,
        };
        self.resolved = Some(score_type);
        Ok(())
    }

    fn run(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        let score_type = self
            .resolved
            .ok_or_else(|| EvalError::NotSetUp(self.kind().to_string()))?;
        batch.require(&self.inputs())?;

        let generated = batch.texts(&self.col_in_generated)?;
        let source = batch.texts(&self.col_in_source)?;

        let scores = generated
            .iter()
            .zip(source.iter())
            .map(|pair| match pair {
                (Some(g), Some(s)) => Value::float(rouge_l(g, s).get(score_type)),
                _ => Value::Null,
            })
            .collect();

        batch.with_column(&self.col_out, scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn vectors_batch(rows: usize, dim: usize) -> RecordBatch {
        let make = |offset: usize| -> Vec<Value> {
            (0..rows)
                .map(|r| {
                    Value::Vector(
                        (0..dim)
                            .map(|d| (((r * 31 + d * 7 + offset) % 13) as f32) - 6.0)
                            .collect(),
                    )
                })
                .collect()
        };
        RecordBatch::from_columns(vec![
            ("question_embeddings", make(0)),
            ("response_embeddings", make(5)),
        ])
        .unwrap()
    }

    #[test]
    fn test_cosine_scores_within_bounds() {
        let batch = vectors_batch(10, 384);
        let mut op = CosineSimilarity::new(
            "question_embeddings",
            "response_embeddings",
            "question_response_similarity",
        );
        op.setup(&Settings::default()).unwrap();
        let out = op.run(&batch).unwrap();

        assert_eq!(out.num_rows(), 10);
        let scores = out.numbers("question_response_similarity").unwrap();
        assert_eq!(scores.len(), 10);
        for score in scores {
            let score = score.unwrap();
            assert!((-1.0..=1.0).contains(&score));
        }
    }

    #[test]
    fn test_cosine_is_idempotent() {
        let batch = vectors_batch(4, 8);
        let mut op = CosineSimilarity::new("question_embeddings", "response_embeddings", "sim");
        op.setup(&Settings::default()).unwrap();

        let first = op.run(&batch).unwrap();
        let second = op.run(&batch).unwrap();
        assert_eq!(first.column("sim").unwrap(), second.column("sim").unwrap());
    }

    #[test]
    fn test_cosine_length_mismatch_is_data_error() {
        let batch = RecordBatch::from_columns(vec![
            ("a", vec![Value::Vector(vec![1.0, 0.0])]),
            ("b", vec![Value::Vector(vec![1.0])]),
        ])
        .unwrap();
        let mut op = CosineSimilarity::new("a", "b", "sim");
        op.setup(&Settings::default()).unwrap();
        assert_eq!(op.run(&batch).unwrap_err().kind(), ErrorKind::DataError);
    }

    #[test]
    fn test_cosine_missing_column() {
        let batch = vectors_batch(2, 4);
        let mut op = CosineSimilarity::new("question_embeddings", "context_embeddings", "sim");
        op.setup(&Settings::default()).unwrap();
        assert_eq!(
            op.run(&batch).unwrap_err().kind(),
            ErrorKind::ConfigurationError
        );
    }

    #[test]
    fn test_rouge_l() {
        let scores = rouge_l("the cat sat on the mat", "the cat is on the mat");
        // LCS: the cat on the mat = 5 tokens
        assert!((scores.precision - 5.0 / 6.0).abs() < 1e-9);
        assert!((scores.recall - 5.0 / 6.0).abs() < 1e-9);
        assert!((scores.f1 - 5.0 / 6.0).abs() < 1e-9);

        let partial = rouge_l("rust is fast", "rust");
        assert!((partial.precision - 1.0 / 3.0).abs() < 1e-9);
        assert!((partial.recall - 1.0).abs() < 1e-9);

        assert_eq!(rouge_l("", "anything").f1, 0.0);
        assert_eq!(rouge_l("a b c", "c b a").f1, rouge_l("c b a", "a b c").f1);
    }

    #[test]
    fn test_rouge_operator_uses_settings_default() {
        let batch = RecordBatch::from_columns(vec![
            ("response", vec![Value::from("rust is fast"), Value::Null]),
            ("document_text", vec![Value::from("rust"), Value::from("x")]),
        ])
        .unwrap();

        let mut settings = Settings::default();
        settings.metrics.rouge_score_type = "recall".to_string();

        let mut op = RougeScore::new("response", "document_text", "overlap");
        op.setup(&settings).unwrap();
        let out = op.run(&batch).unwrap();
        assert_eq!(
            out.column("overlap").unwrap().values(),
            &[Value::Float(1.0), Value::Null]
        );

        settings.metrics.rouge_score_type = "bleu".to_string();
        let mut bad = RougeScore::new("response", "document_text", "overlap");
        assert_eq!(
            bad.setup(&settings).unwrap_err().kind(),
            ErrorKind::ConfigurationError
        );
    }
}
