//! A check: an ordered operator chain plus plot declarations.

use crate::batch::RecordBatch;
use crate::config::Settings;
use crate::error::{EvalError, Result};
use crate::operators::{Operator, OperatorSpec, OutputShape};
use crate::plots::{EvaluatedPlot, PlotSpec};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declarative check configuration, as found in check files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckSpec {
    pub name: String,
    pub operators: Vec<OperatorSpec>,
    #[serde(default)]
    pub plots: Vec<PlotSpec>,
    /// Columns to persist; the whole final batch when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_columns: Option<Vec<String>>,
}

/// Result of a successful check run.
#[derive(Debug, Clone)]
pub struct CheckOutput {
    pub batch: RecordBatch,
    pub plots: Vec<EvaluatedPlot>,
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    Created,
    Ready,
    Unusable(String),
}

pub struct Check {
    name: String,
    operators: Vec<Box<dyn Operator>>,
    plots: Vec<PlotSpec>,
    persist_columns: Option<Vec<String>>,
    state: State,
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check")
            .field("name", &self.name)
            .field(
                "operators",
                &self.operators.iter().map(|op| op.kind()).collect::<Vec<_>>(),
            )
            .field("plots", &self.plots.len())
            .field("state", &self.state)
            .finish()
    }
}

impl Check {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operators: Vec::new(),
            plots: Vec::new(),
            persist_columns: None,
            state: State::Created,
        }
    }

    pub fn with_operator(self, op: impl Operator + 'static) -> Self {
        self.with_boxed_operator(Box::new(op))
    }

    pub fn with_boxed_operator(mut self, op: Box<dyn Operator>) -> Self {
        self.operators.push(op);
        self
    }

    pub fn with_plot(mut self, plot: PlotSpec) -> Self {
        self.plots.push(plot);
        self
    }

    /// Persist only these columns of the final batch.
    pub fn with_persist_columns(mut self, columns: Vec<String>) -> Self {
        self.persist_columns = Some(columns);
        self
    }

    /// Build a check from its declarative form.
    pub fn from_spec(spec: &CheckSpec) -> Result<Self> {
        let mut check = Check::new(&spec.name);
        for op in &spec.operators {
            check = check.with_boxed_operator(op.build()?);
        }
        check.plots = spec.plots.clone();
        check.persist_columns = spec.persist_columns.clone();
        Ok(check)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operators(&self) -> &[Box<dyn Operator>] {
        &self.operators
    }

    pub fn plots(&self) -> &[PlotSpec] {
        &self.plots
    }

    pub fn is_ready(&self) -> bool {
        self.state == State::Ready
    }

    /// Set up every operator in order.
    ///
    /// The first failure leaves the check unusable and is returned.
    pub fn setup(&mut self, settings: &Settings) -> Result<()> {
        match &self.state {
            State::Ready => return Ok(()),
            State::Unusable(reason) => return Err(EvalError::NotSetUp(reason.clone())),
            State::Created => {}
        }

        for (index, op) in self.operators.iter_mut().enumerate() {
            if let Err(err) = op.setup(settings) {
                self.state = State::Unusable(format!(
                    "check '{}' failed setup at operator {} ({}): {}",
                    self.name,
                    index,
                    op.kind(),
                    err
                ));
                return Err(err);
            }
        }

        tracing::debug!(check = %self.name, operators = self.operators.len(), "check ready");
        self.state = State::Ready;
        Ok(())
    }

    /// Walk the chain against a source schema without touching data.
    ///
    /// Returns the final column set.
    pub fn validate(&self, columns: &[String]) -> Result<Vec<String>> {
        let mut schema = columns.to_vec();
        for op in &self.operators {
            for input in op.inputs() {
                if !schema.contains(&input) {
                    return Err(EvalError::MissingColumn {
                        column: input,
                        available: schema.join(", "),
                    });
                }
            }
            if op.shape() == OutputShape::PerRow {
                if let Some(clash) = op.outputs().into_iter().find(|o| schema.contains(o)) {
                    return Err(EvalError::Config(format!(
                        "Operator '{}' would overwrite existing column '{}'",
                        op.kind(),
                        clash
                    )));
                }
            }
            schema = op.output_schema(&schema);
        }

        for plot in &self.plots {
            if let Some(missing) = plot
                .referenced_columns()
                .into_iter()
                .find(|c| !schema.contains(c))
            {
                return Err(EvalError::Config(format!(
                    "Plot '{}' references missing column '{}'",
                    plot.title(),
                    missing
                )));
            }
        }

        if let Some(persist) = &self.persist_columns {
            if let Some(missing) = persist.iter().find(|c| !schema.contains(c)) {
                return Err(EvalError::MissingColumn {
                    column: missing.clone(),
                    available: schema.join(", "),
                });
            }
        }

        Ok(schema)
    }

    /// Feed `batch` through the chain, then evaluate the plots.
    ///
    /// Stops at the first operator error.
    pub fn run(&self, batch: &RecordBatch) -> Result<CheckOutput> {
        match &self.state {
            State::Ready => {}
            State::Created => return Err(EvalError::NotSetUp(format!("check '{}'", self.name))),
            State::Unusable(reason) => return Err(EvalError::NotSetUp(reason.clone())),
        }

        let mut current = batch.clone();
        for op in &self.operators {
            let next = op.run(&current)?;
            if op.shape() == OutputShape::PerRow {
                verify_append_only(op.as_ref(), &current, &next)?;
            }
            tracing::debug!(
                check = %self.name,
                operator = op.kind(),
                rows = next.num_rows(),
                columns = next.num_columns(),
                "operator finished"
            );
            current = next;
        }

        let plots = self
            .plots
            .iter()
            .map(|plot| plot.evaluate(&current))
            .collect::<Result<Vec<_>>>()?;

        Ok(CheckOutput {
            batch: current,
            plots,
        })
    }

    /// The part of a final batch that gets persisted.
    pub fn project(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        match &self.persist_columns {
            Some(columns) => batch.select(columns),
            None => Ok(batch.clone()),
        }
    }
}

fn verify_append_only(op: &dyn Operator, before: &RecordBatch, after: &RecordBatch) -> Result<()> {
    if after.num_rows() != before.num_rows() {
        return Err(EvalError::Config(format!(
            "Operator '{}' changed the row count from {} to {}",
            op.kind(),
            before.num_rows(),
            after.num_rows()
        )));
    }
    for name in before.column_names() {
        let unchanged = match (before.column(name), after.column(name)) {
            (Ok(a), Ok(b)) => a.ptr_eq(b) || a == b,
            _ => false,
        };
        if !unchanged {
            return Err(EvalError::Config(format!(
                "Operator '{}' dropped or modified column '{}'",
                op.kind(),
                name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Value;
    use crate::error::ErrorKind;
    use crate::operators::{CosineSimilarity, TextLength};
    use pretty_assertions::assert_eq;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn batch() -> RecordBatch {
        RecordBatch::from_columns(vec![
            ("response", vec![Value::from("short"), Value::from("a longer one")]),
            (
                "question_embeddings",
                vec![Value::Vector(vec![1.0, 0.0]), Value::Vector(vec![0.0, 1.0])],
            ),
            (
                "response_embeddings",
                vec![Value::Vector(vec![1.0, 0.0]), Value::Vector(vec![1.0, 0.0])],
            ),
        ])
        .unwrap()
    }

    fn quality_check() -> Check {
        Check::new("quality")
            .with_operator(TextLength::new("response", "response_length"))
            .with_operator(CosineSimilarity::new(
                "question_embeddings",
                "response_embeddings",
                "similarity",
            ))
            .with_plot(PlotSpec::histogram("Lengths", "response_length", 20))
            .with_plot(PlotSpec::table("Scores"))
    }

    #[test]
    fn test_run_chain() {
        let mut check = quality_check();
        check.setup(&Settings::default()).unwrap();
        let output = check.run(&batch()).unwrap();

        assert_eq!(
            output.batch.column_names(),
            vec![
                "response",
                "question_embeddings",
                "response_embeddings",
                "response_length",
                "similarity"
            ]
        );
        assert_eq!(
            output.batch.numbers("similarity").unwrap(),
            vec![Some(1.0), Some(0.0)]
        );
        assert_eq!(output.plots.len(), 2);
        assert_eq!(
            output.plots[1].columns,
            strings(&["response", "response_length", "similarity"])
        );
    }

    #[test]
    fn test_run_before_setup() {
        let err = quality_check().run(&batch()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
    }

    #[test]
    fn test_validate_walks_chain() {
        let check = quality_check();
        let schema = check
            .validate(&strings(&["response", "question_embeddings", "response_embeddings"]))
            .unwrap();
        assert_eq!(schema.last().map(String::as_str), Some("similarity"));

        let err = check.validate(&strings(&["response"])).unwrap_err();
        assert!(matches!(err, EvalError::MissingColumn { ref column, .. } if column == "question_embeddings"));
    }

    #[test]
    fn test_validate_plot_columns() {
        let check = Check::new("lengths")
            .with_operator(TextLength::new("response", "response_length"))
            .with_plot(PlotSpec::bar_chart("Versions", "version"));
        let err = check.validate(&strings(&["response"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
    }

    #[test]
    fn test_validate_rejects_overwrite() {
        let check = Check::new("dup").with_operator(TextLength::new("response", "response"));
        assert!(check.validate(&strings(&["response"])).is_err());
    }

    #[test]
    fn test_failed_setup_marks_unusable() {
        let spec: CheckSpec = serde_yaml::from_str(
            r#"
name: rouge
operators:
  - kind: rouge_score
    col_in_generated: response
    col_in_source: document_text
    col_out: overlap
"#,
        )
        .unwrap();
        let mut check = Check::from_spec(&spec).unwrap();
        let mut settings = Settings::default();
        settings.metrics.rouge_score_type = "bleu".to_string();

        assert!(check.setup(&settings).is_err());
        assert!(!check.is_ready());
        // a second attempt does not resurrect the check
        assert!(check.setup(&Settings::default()).is_err());
        assert!(check.run(&batch()).is_err());
    }

    #[test]
    fn test_empty_batch() {
        let mut check = quality_check();
        check.setup(&Settings::default()).unwrap();
        let empty = batch().take(&[]).unwrap();
        let output = check.run(&empty).unwrap();
        assert_eq!(output.batch.num_rows(), 0);
        assert!(output.plots.iter().all(|p| p.row_count == 0));
    }

    #[test]
    fn test_projection() {
        let mut check = quality_check().with_persist_columns(strings(&["response_length"]));
        check.setup(&Settings::default()).unwrap();
        let output = check.run(&batch()).unwrap();
        let projected = check.project(&output.batch).unwrap();
        assert_eq!(projected.column_names(), vec!["response_length"]);
    }
}
