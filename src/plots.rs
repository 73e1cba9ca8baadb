//! Declarative plot specifications.
//!
//! The core never renders anything. Evaluating a plot against a batch
//! checks its column references and freezes the bindings into an
//! [`EvaluatedPlot`], which an external renderer reads from the artifacts.

use crate::batch::{RecordBatch, Value};
use crate::error::{EvalError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

fn default_nbins() -> usize {
    20
}

/// A plot to draw from a check's final batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlotSpec {
    Histogram {
        title: String,
        x: String,
        #[serde(default = "default_nbins")]
        nbins: usize,
        #[serde(default)]
        color: Option<String>,
    },
    BarChart {
        title: String,
        x: String,
        #[serde(default)]
        y: Option<String>,
    },
    ScatterPlot {
        title: String,
        x: String,
        y: String,
        #[serde(default)]
        symbol: Option<String>,
        #[serde(default)]
        color: Option<String>,
    },
    /// A table of columns; empty means every non-vector column.
    Table {
        title: String,
        #[serde(default)]
        columns: Vec<String>,
    },
}

/// A plot whose column bindings were checked against a concrete batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatedPlot {
    pub kind: String,
    pub title: String,
    /// Role (x, y, color, ...) → column name.
    pub bindings: IndexMap<String, String>,
    /// Every column the renderer needs, in display order.
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub options: IndexMap<String, serde_json::Value>,
    pub row_count: usize,
}

impl PlotSpec {
    pub fn histogram(title: impl Into<String>, x: impl Into<String>, nbins: usize) -> Self {
        PlotSpec::Histogram {
            title: title.into(),
            x: x.into(),
            nbins,
            color: None,
        }
    }

    pub fn bar_chart(title: impl Into<String>, x: impl Into<String>) -> Self {
        PlotSpec::BarChart {
            title: title.into(),
            x: x.into(),
            y: None,
        }
    }

    pub fn scatter(title: impl Into<String>, x: impl Into<String>, y: impl Into<String>) -> Self {
        PlotSpec::ScatterPlot {
            title: title.into(),
            x: x.into(),
            y: y.into(),
            symbol: None,
            color: None,
        }
    }

    pub fn table(title: impl Into<String>) -> Self {
        PlotSpec::Table {
            title: title.into(),
            columns: Vec::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PlotSpec::Histogram { .. } => "histogram",
            PlotSpec::BarChart { .. } => "bar_chart",
            PlotSpec::ScatterPlot { .. } => "scatter_plot",
            PlotSpec::Table { .. } => "table",
        }
    }

    pub fn title(&self) -> &str {
        match self {
            PlotSpec::Histogram { title, .. }
            | PlotSpec::BarChart { title, .. }
            | PlotSpec::ScatterPlot { title, .. }
            | PlotSpec::Table { title, .. } => title,
        }
    }

    /// Role → column pairs this spec names explicitly.
    fn bindings(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        match self {
            PlotSpec::Histogram { x, color, .. } => {
                out.push(("x", x.as_str()));
                if let Some(c) = color {
                    out.push(("color", c.as_str()));
                }
            }
            PlotSpec::BarChart { x, y, .. } => {
                out.push(("x", x.as_str()));
                if let Some(y) = y {
                    out.push(("y", y.as_str()));
                }
            }
            PlotSpec::ScatterPlot {
                x, y, symbol, color, ..
            } => {
                out.push(("x", x.as_str()));
                out.push(("y", y.as_str()));
                if let Some(s) = symbol {
                    out.push(("symbol", s.as_str()));
                }
                if let Some(c) = color {
                    out.push(("color", c.as_str()));
                }
            }
            PlotSpec::Table { columns, .. } => {
                out.extend(columns.iter().map(|c| ("column", c.as_str())));
            }
        }
        out
    }

    /// Columns this spec references explicitly.
    pub fn referenced_columns(&self) -> Vec<String> {
        self.bindings()
            .into_iter()
            .map(|(_, c)| c.to_string())
            .collect()
    }

    /// Check the spec against `batch` and freeze its bindings.
    pub fn evaluate(&self, batch: &RecordBatch) -> Result<EvaluatedPlot> {
        let bindings = self.bindings();
        for (_, column) in &bindings {
            batch.column(column).map_err(|_| {
                EvalError::Config(format!(
                    "Plot '{}' references missing column '{}'",
                    self.title(),
                    column
                ))
            })?;
        }

        let mut options = IndexMap::new();
        match self {
            PlotSpec::Histogram { x, nbins, .. } => {
                if *nbins == 0 {
                    return Err(EvalError::Config(format!(
                        "Plot '{}' needs at least one bin",
                        self.title()
                    )));
                }
                batch.numbers(x)?;
                options.insert("nbins".to_string(), serde_json::Value::from(*nbins));
            }
            PlotSpec::ScatterPlot { x, y, .. } => {
                batch.numbers(x)?;
                batch.numbers(y)?;
            }
            _ => {}
        }

        let columns = match self {
            PlotSpec::Table { columns, .. } if columns.is_empty() => batch
                .column_names()
                .into_iter()
                .filter(|name| {
                    batch
                        .column(name)
                        .map(|c| !c.iter().any(|v| matches!(v, Value::Vector(_))))
                        .unwrap_or(false)
                })
                .map(str::to_string)
                .collect(),
            _ => {
                let mut seen: Vec<String> = Vec::new();
                for (_, column) in &bindings {
                    if !seen.iter().any(|s| s == column) {
                        seen.push(column.to_string());
                    }
                }
                seen
            }
        };

        let bindings = match self {
            PlotSpec::Table { .. } => IndexMap::new(),
            _ => bindings
                .into_iter()
                .map(|(role, column)| (role.to_string(), column.to_string()))
                .collect(),
        };

        Ok(EvaluatedPlot {
            kind: self.kind().to_string(),
            title: self.title().to_string(),
            bindings,
            columns,
            options,
            row_count: batch.num_rows(),
        })
    }
}
