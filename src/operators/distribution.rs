//! Grouped pairwise aggregates.

use super::{Operator, OutputShape, ensure_ready};
use super::similarity::rouge_l;
use crate::batch::{Group, RecordBatch, Value};
use crate::config::Settings;
use crate::embeddings::cosine_similarity;
use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};

/// Pairwise metric aggregated within each group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionMetric {
    /// Cosine similarity between vector cells.
    CosineSimilarity,
    /// ROUGE-L F1 between text cells.
    Rouge,
}

/// Output shape of a distribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionShape {
    /// Every input row receives its group's aggregate.
    #[default]
    Broadcast,
    /// One row per group: key columns followed by aggregate columns.
    Collapse,
}

/// Mean pairwise metric among rows sharing the same group key.
///
/// For each group the aggregate is the mean of the metric over every
/// unordered pair of distinct rows with non-null values. Groups with fewer
/// than two such rows aggregate to null. Pair scores are sorted before
/// summing, so the result does not depend on row order.
///
/// With [`DistributionShape::Broadcast`] the row count is preserved; with
/// [`DistributionShape::Collapse`] the batch becomes one row per group,
/// ordered by key.
#[derive(Debug, Clone)]
pub struct Distribution {
    metric: DistributionMetric,
    col_in: Vec<String>,
    col_in_groupby: Vec<String>,
    col_out: Vec<String>,
    shape: DistributionShape,
    ready: bool,
}

impl Distribution {
    pub fn new(
        metric: DistributionMetric,
        col_in: Vec<String>,
        col_in_groupby: Vec<String>,
        col_out: Vec<String>,
    ) -> Result<Self> {
        if col_in.is_empty() || col_in_groupby.is_empty() {
            return Err(EvalError::Config(
                "distribution needs at least one input and one group-by column".to_string(),
            ));
        }
        if col_in.len() != col_out.len() {
            return Err(EvalError::Config(format!(
                "distribution has {} input columns but {} output columns",
                col_in.len(),
                col_out.len()
            )));
        }
        Ok(Self {
            metric,
            col_in,
            col_in_groupby,
            col_out,
            shape: DistributionShape::default(),
            ready: false,
        })
    }

    pub fn with_shape(mut self, shape: DistributionShape) -> Self {
        self.shape = shape;
        self
    }

    /// Typed view of one input column, read once per run.
    fn cells<'a>(&self, batch: &'a RecordBatch, column: &str) -> Result<Cells<'a>> {
        Ok(match self.metric {
            DistributionMetric::CosineSimilarity => Cells::Vectors(batch.vectors(column)?),
            DistributionMetric::Rouge => Cells::Texts(batch.texts(column)?),
        })
    }

    fn aggregate(&self, cells: &Cells<'_>, column: &str, group: &Group) -> Result<Value> {
        let mut scores = cells.pair_scores(column, &group.rows)?;
        if scores.is_empty() {
            return Ok(Value::Null);
        }
        scores.sort_by(f64::total_cmp);
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        Ok(Value::float(mean))
    }

    /// One row per group: key columns then aggregates.
    fn collapse(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        let groups = batch.group_by(&self.col_in_groupby)?;

        let mut columns: Vec<(String, Vec<Value>)> = self
            .col_in_groupby
            .iter()
            .enumerate()
            .map(|(k, name)| {
                let values = groups.iter().map(|g| g.key.0[k].clone()).collect();
                (name.clone(), values)
            })
            .collect();

        for (input, output) in self.col_in.iter().zip(&self.col_out) {
            let cells = self.cells(batch, input)?;
            let values = groups
                .iter()
                .map(|g| self.aggregate(&cells, input, g))
                .collect::<Result<Vec<_>>>()?;
            columns.push((output.clone(), values));
        }

        RecordBatch::from_columns(columns)
    }
}

enum Cells<'a> {
    Vectors(Vec<Option<&'a [f32]>>),
    Texts(Vec<Option<&'a str>>),
}

impl Cells<'_> {
    /// Metric over every unordered pair of non-null cells in `rows`.
    fn pair_scores(&self, column: &str, rows: &[usize]) -> Result<Vec<f64>> {
        let mut scores = Vec::new();
        match self {
            Cells::Vectors(vectors) => {
                let items: Vec<&[f32]> = rows.iter().filter_map(|&r| vectors[r]).collect();
                for i in 0..items.len() {
                    for j in (i + 1)..items.len() {
                        let score = cosine_similarity(items[i], items[j]).ok_or_else(|| {
                            EvalError::data(column, "vectors within a group differ in length")
                        })?;
                        scores.push(score);
                    }
                }
            }
            Cells::Texts(texts) => {
                let items: Vec<&str> = rows.iter().filter_map(|&r| texts[r]).collect();
                for i in 0..items.len() {
                    for j in (i + 1)..items.len() {
                        scores.push(rouge_l(items[i], items[j]).f1);
                    }
                }
            }
        }
        Ok(scores)
    }
}

impl Operator for Distribution {
    fn kind(&self) -> &'static str {
        "distribution"
    }

    fn inputs(&self) -> Vec<String> {
        let mut inputs = self.col_in.clone();
        inputs.extend(self.col_in_groupby.iter().cloned());
        inputs
    }

    fn outputs(&self) -> Vec<String> {
        self.col_out.clone()
    }

    fn shape(&self) -> OutputShape {
        match self.shape {
            DistributionShape::Broadcast => OutputShape::PerRow,
            DistributionShape::Collapse => OutputShape::PerGroup,
        }
    }

    fn output_schema(&self, input: &[String]) -> Vec<String> {
        let mut schema = match self.shape {
            DistributionShape::Broadcast => input.to_vec(),
            DistributionShape::Collapse => self.col_in_groupby.clone(),
        };
        schema.extend(self.col_out.iter().cloned());
        schema
    }

    fn setup(&mut self, _settings: &Settings) -> Result<()> {
        self.ready = true;
        Ok(())
    }

    fn run(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        ensure_ready(self.ready, self.kind())?;
        batch.require(&self.inputs())?;

        let collapsed = self.collapse(batch)?;
        tracing::debug!(
            metric = ?self.metric,
            groups = collapsed.num_rows(),
            shape = ?self.shape,
            "computed distribution"
        );

        match self.shape {
            DistributionShape::Collapse => Ok(collapsed),
            DistributionShape::Broadcast => batch.left_join(&collapsed, &self.col_in_groupby),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn docs_batch(order: &[usize]) -> RecordBatch {
        let rows = [
            (1, "rust ownership and borrowing", vec![1.0, 0.0, 0.0]),
            (1, "rust ownership rules", vec![0.8, 0.2, 0.0]),
            (1, "garbage collection in java", vec![0.0, 1.0, 0.0]),
            (2, "python packaging", vec![0.0, 0.0, 1.0]),
            (2, "python packaging tools", vec![0.1, 0.0, 0.9]),
            (3, "lonely document", vec![0.5, 0.5, 0.0]),
        ];
        let picked: Vec<_> = order.iter().map(|&i| rows[i].clone()).collect();
        RecordBatch::from_columns(vec![
            (
                "question_idx",
                picked.iter().map(|r| Value::Int(r.0)).collect(),
            ),
            (
                "document_text",
                picked.iter().map(|r| Value::from(r.1)).collect(),
            ),
            (
                "context_embeddings",
                picked.iter().map(|r| Value::Vector(r.2.clone())).collect(),
            ),
        ])
        .unwrap()
    }

    fn op(metric: DistributionMetric, input: &str, shape: DistributionShape) -> Distribution {
        let mut op = Distribution::new(
            metric,
            strings(&[input]),
            strings(&["question_idx"]),
            strings(&["score"]),
        )
        .unwrap()
        .with_shape(shape);
        op.setup(&Settings::default()).unwrap();
        op
    }

    #[test]
    fn test_collapse_one_row_per_group() {
        let batch = docs_batch(&[0, 1, 2, 3, 4, 5]);
        let out = op(
            DistributionMetric::CosineSimilarity,
            "context_embeddings",
            DistributionShape::Collapse,
        )
        .run(&batch)
        .unwrap();

        assert_eq!(out.column_names(), vec!["question_idx", "score"]);
        assert_eq!(out.num_rows(), 3);
        let scores = out.numbers("score").unwrap();
        assert!(scores[0].is_some());
        assert!(scores[1].unwrap() > 0.9);
        assert_eq!(scores[2], None);
    }

    #[test]
    fn test_broadcast_preserves_rows() {
        let batch = docs_batch(&[0, 3, 1, 5, 2, 4]);
        let out = op(DistributionMetric::Rouge, "document_text", DistributionShape::Broadcast)
            .run(&batch)
            .unwrap();

        assert_eq!(out.num_rows(), batch.num_rows());
        for name in batch.column_names() {
            assert_eq!(out.column(name).unwrap(), batch.column(name).unwrap());
        }
        let scores = out.numbers("score").unwrap();
        // rows 0 and 2 are both question 1
        assert_eq!(scores[0], scores[2]);
        assert_eq!(scores[3], None);
    }

    #[test]
    fn test_aggregates_are_order_independent() {
        let forward = docs_batch(&[0, 1, 2, 3, 4, 5]);
        let shuffled = docs_batch(&[4, 2, 5, 0, 3, 1]);

        for (metric, input) in [
            (DistributionMetric::CosineSimilarity, "context_embeddings"),
            (DistributionMetric::Rouge, "document_text"),
        ] {
            let a = op(metric, input, DistributionShape::Collapse).run(&forward).unwrap();
            let b = op(metric, input, DistributionShape::Collapse).run(&shuffled).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_empty_batch() {
        let batch = docs_batch(&[]);
        let collapsed = op(DistributionMetric::Rouge, "document_text", DistributionShape::Collapse)
            .run(&batch)
            .unwrap();
        assert_eq!(collapsed.num_rows(), 0);
        assert_eq!(collapsed.column_names(), vec!["question_idx", "score"]);

        let broadcast = op(DistributionMetric::Rouge, "document_text", DistributionShape::Broadcast)
            .run(&batch)
            .unwrap();
        assert_eq!(broadcast.num_rows(), 0);
        assert!(broadcast.contains("score"));
    }

    #[test]
    fn test_many_groups() {
        let groups = 200i64;
        let keys: Vec<Value> = (0..groups).flat_map(|g| [Value::Int(g), Value::Int(g)]).collect();
        let vectors: Vec<Value> = (0..groups)
            .flat_map(|g| {
                let x = g as f32 + 1.0;
                [Value::Vector(vec![x, 0.0]), Value::Vector(vec![x, x])]
            })
            .collect();
        let batch = RecordBatch::from_columns(vec![
            ("question_idx", keys),
            ("context_embeddings", vectors),
        ])
        .unwrap();

        let out = op(
            DistributionMetric::CosineSimilarity,
            "context_embeddings",
            DistributionShape::Collapse,
        )
        .run(&batch)
        .unwrap();
        assert_eq!(out.num_rows(), groups as usize);
        let expected = std::f64::consts::FRAC_1_SQRT_2;
        for score in out.numbers("score").unwrap() {
            assert!((score.unwrap() - expected).abs() < 1e-5);
        }

        // a mistyped column is rejected before any group is scored
        let mixed = batch
            .with_column("label", (0..groups * 2).map(Value::Int).collect())
            .unwrap();
        let err = op(DistributionMetric::Rouge, "label", DistributionShape::Collapse)
            .run(&mixed)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataError);
    }

    #[test]
    fn test_invalid_configuration() {
        let err = Distribution::new(
            DistributionMetric::Rouge,
            strings(&["a", "b"]),
            strings(&["g"]),
            strings(&["out"]),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);

        let wrong_type = op(
            DistributionMetric::CosineSimilarity,
            "document_text",
            DistributionShape::Collapse,
        )
        .run(&docs_batch(&[0, 1]))
        .unwrap_err();
        assert_eq!(wrong_type.kind(), ErrorKind::DataError);
    }
}
