//! Columnar record batches.
//!
//! A [`RecordBatch`] maps unique column names to equal-length columns of
//! [`Value`]s. Column storage is reference counted and never mutated, so
//! extending a batch is a cheap copy that leaves every earlier holder's
//! view untouched.

mod group;
mod value;

pub use group::{Group, GroupKey};
pub use value::Value;

use crate::error::{EvalError, Result};
use indexmap::IndexMap;
use std::sync::Arc;

/// An immutable, shareable column of values.
#[derive(Debug, Clone, PartialEq)]
pub struct Column(Arc<Vec<Value>>);

impl Column {
    pub fn new(values: Vec<Value>) -> Self {
        Self(Arc::new(values))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn get(&self, row: usize) -> Option<&Value> {
        self.0.get(row)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }

    /// True when both columns share the same storage.
    pub fn ptr_eq(&self, other: &Column) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A columnar table of rows sharing a fixed set of named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBatch {
    columns: IndexMap<String, Column>,
    num_rows: usize,
}

impl RecordBatch {
    /// An empty batch with a fixed row count and no columns yet.
    pub fn with_rows(num_rows: usize) -> Self {
        Self {
            columns: IndexMap::new(),
            num_rows,
        }
    }

    /// Build a batch from named columns, checking names and lengths.
    pub fn from_columns<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<Value>)>,
        S: Into<String>,
    {
        let mut batch: Option<RecordBatch> = None;
        for (name, values) in columns {
            let current = batch.take().unwrap_or_else(|| Self::with_rows(values.len()));
            batch = Some(current.with_column(name, values)?);
        }
        Ok(batch.unwrap_or_default())
    }

    /// Build a batch from row maps; keys missing from a row become null.
    ///
    /// Columns appear in first-seen order across the rows.
    pub fn from_rows(rows: Vec<IndexMap<String, Value>>) -> Self {
        let mut columns: IndexMap<String, Vec<Value>> = IndexMap::new();
        let num_rows = rows.len();

        for (index, row) in rows.into_iter().enumerate() {
            for (name, value) in row {
                let column = columns
                    .entry(name)
                    .or_insert_with(|| vec![Value::Null; index]);
                column.push(value);
            }
            for column in columns.values_mut() {
                if column.len() == index {
                    column.push(Value::Null);
                }
            }
        }

        Self {
            columns: columns
                .into_iter()
                .map(|(name, values)| (name, Column::new(values)))
                .collect(),
            num_rows,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    fn missing(&self, name: &str) -> EvalError {
        EvalError::MissingColumn {
            column: name.to_string(),
            available: self.column_names().join(", "),
        }
    }

    /// Look up a column, failing with a configuration error when absent.
    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns.get(name).ok_or_else(|| self.missing(name))
    }

    /// Check that every named column is present.
    pub fn require<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        for name in names {
            if !self.contains(name.as_ref()) {
                return Err(self.missing(name.as_ref()));
            }
        }
        Ok(())
    }

    /// Return a copy of this batch extended with one new column.
    ///
    /// Existing columns are never replaced or resized.
    pub fn with_column(&self, name: impl Into<String>, values: Vec<Value>) -> Result<Self> {
        let name = name.into();
        if self.columns.contains_key(&name) {
            return Err(EvalError::Config(format!(
                "Column '{}' already exists; operators may only append new columns",
                name
            )));
        }
        if values.len() != self.num_rows {
            return Err(EvalError::RowCountMismatch {
                column: name,
                expected: self.num_rows,
                actual: values.len(),
            });
        }

        let mut columns = self.columns.clone();
        columns.insert(name, Column::new(values));
        Ok(Self {
            columns,
            num_rows: self.num_rows,
        })
    }

    /// Project onto a subset of columns, in the given order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self> {
        let mut columns = IndexMap::new();
        for name in names {
            let column = self.column(name.as_ref())?;
            columns.insert(name.as_ref().to_string(), column.clone());
        }
        Ok(Self {
            columns,
            num_rows: self.num_rows,
        })
    }

    /// Gather rows by position into a new batch.
    pub fn take(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.num_rows) {
            return Err(EvalError::Config(format!(
                "Row index {} out of range for batch of {} rows",
                bad, self.num_rows
            )));
        }

        let columns = self
            .columns
            .iter()
            .map(|(name, column)| {
                let values = indices.iter().map(|&i| column.values()[i].clone()).collect();
                (name.clone(), Column::new(values))
            })
            .collect();

        Ok(Self {
            columns,
            num_rows: indices.len(),
        })
    }

    /// A row as a name → value map.
    pub fn row(&self, index: usize) -> Option<IndexMap<&str, &Value>> {
        if index >= self.num_rows {
            return None;
        }
        Some(
            self.columns
                .iter()
                .map(|(name, column)| (name.as_str(), &column.values()[index]))
                .collect(),
        )
    }

    /// Text view of a column; nulls map to `None`.
    pub fn texts(&self, name: &str) -> Result<Vec<Option<&str>>> {
        self.column(name)?
            .iter()
            .enumerate()
            .map(|(row, value)| match value {
                Value::Null => Ok(None),
                Value::Text(s) => Ok(Some(s.as_str())),
                other => Err(EvalError::data(
                    name,
                    format!("expected text at row {}, found {}", row, other.type_name()),
                )),
            })
            .collect()
    }

    /// Vector view of a column; nulls map to `None`.
    pub fn vectors(&self, name: &str) -> Result<Vec<Option<&[f32]>>> {
        self.column(name)?
            .iter()
            .enumerate()
            .map(|(row, value)| match value {
                Value::Null => Ok(None),
                Value::Vector(v) => Ok(Some(v.as_slice())),
                other => Err(EvalError::data(
                    name,
                    format!("expected vector at row {}, found {}", row, other.type_name()),
                )),
            })
            .collect()
    }

    /// Numeric view of a column; nulls map to `None`.
    pub fn numbers(&self, name: &str) -> Result<Vec<Option<f64>>> {
        self.column(name)?
            .iter()
            .enumerate()
            .map(|(row, value)| match value {
                Value::Null => Ok(None),
                other => other.as_f64().map(Some).ok_or_else(|| {
                    EvalError::data(
                        name,
                        format!("expected number at row {}, found {}", row, other.type_name()),
                    )
                }),
            })
            .collect()
    }
}
