//! Sources and sinks for record batches.
//!
//! The on-disk format is newline-delimited JSON: one object per row, with
//! embedding columns stored as numeric arrays.

use crate::batch::{RecordBatch, Value};
use crate::error::{EvalError, Result};
use indexmap::IndexMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Something that can produce the initial batch of a run.
pub trait Source: Send + Sync {
    /// Read the backing store into a batch.
    fn load(&self) -> Result<RecordBatch>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Something that can persist a batch.
pub trait Sink {
    fn write(&self, batch: &RecordBatch) -> Result<()>;
}

/// Reads a JSON Lines file.
#[derive(Debug, Clone)]
pub struct JsonReader {
    path: PathBuf,
    schema: Option<Vec<String>>,
}

impl JsonReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            schema: None,
        }
    }

    /// Declare the expected columns.
    ///
    /// They lead the loaded batch in this order, and any that no row
    /// carries (including every column of an empty file) become all-null.
    pub fn with_schema(mut self, columns: Vec<String>) -> Self {
        self.schema = Some(columns);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Source for JsonReader {
    fn load(&self) -> Result<RecordBatch> {
        let content = fs::read_to_string(&self.path).map_err(|e| EvalError::io(&self.path, e))?;

        let mut rows = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let row: IndexMap<String, Value> = serde_json::from_str(line).map_err(|e| {
                EvalError::Serialization(format!(
                    "{}:{}: {}",
                    self.path.display(),
                    line_num + 1,
                    e
                ))
            })?;
            rows.push(row);
        }

        let mut batch = RecordBatch::from_rows(rows);
        if let Some(schema) = &self.schema {
            batch = apply_schema(batch, schema)?;
        }
        tracing::debug!(
            path = %self.path.display(),
            rows = batch.num_rows(),
            columns = batch.num_columns(),
            "loaded source"
        );
        Ok(batch)
    }

    fn describe(&self) -> String {
        format!("jsonl:{}", self.path.display())
    }
}

fn apply_schema(batch: RecordBatch, schema: &[String]) -> Result<RecordBatch> {
    let mut batch = batch;
    for column in schema {
        if !batch.contains(column) {
            batch = batch.with_column(column, vec![Value::Null; batch.num_rows()])?;
        }
    }
    let mut order: Vec<String> = schema.to_vec();
    order.extend(
        batch
            .column_names()
            .into_iter()
            .filter(|name| !schema.iter().any(|s| s == name))
            .map(str::to_string),
    );
    batch.select(&order)
}

/// Serves a batch already held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    batch: RecordBatch,
}

impl MemorySource {
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }
}

impl Source for MemorySource {
    fn load(&self) -> Result<RecordBatch> {
        Ok(self.batch.clone())
    }

    fn describe(&self) -> String {
        format!("memory:{} rows", self.batch.num_rows())
    }
}

/// Writes a JSON Lines file.
///
/// Writing onto an existing file fails unless [`JsonWriter::clear`] removed
/// it first.
#[derive(Debug, Clone)]
pub struct JsonWriter {
    path: PathBuf,
}

impl JsonWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the target file if it exists.
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|e| EvalError::io(&self.path, e))?;
        }
        Ok(())
    }
}

impl Sink for JsonWriter {
    fn write(&self, batch: &RecordBatch) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| EvalError::io(parent, e))?;
            }
        }

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => EvalError::TargetExists(self.path.clone()),
                _ => EvalError::io(&self.path, e),
            })?;

        let mut writer = BufWriter::new(file);
        for index in 0..batch.num_rows() {
            if let Some(row) = batch.row(index) {
                serde_json::to_writer(&mut writer, &row)?;
                writer
                    .write_all(b"\n")
                    .map_err(|e| EvalError::io(&self.path, e))?;
            }
        }
        writer.flush().map_err(|e| EvalError::io(&self.path, e))?;

        tracing::debug!(path = %self.path.display(), rows = batch.num_rows(), "wrote sink");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn create_test_batch() -> RecordBatch {
        RecordBatch::from_columns(vec![
            ("question_idx", vec![Value::Int(0), Value::Int(1)]),
            ("question", vec![Value::from("What is Rust?"), Value::Null]),
            ("score", vec![Value::Float(0.25), Value::Float(2.0)]),
            ("flag", vec![Value::Bool(true), Value::Bool(false)]),
            (
                "question_embeddings",
                vec![Value::Vector(vec![0.1, 0.2]), Value::Vector(vec![0.3, 0.4])],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("data.jsonl");

        let original = create_test_batch();
        JsonWriter::new(&path).write(&original).unwrap();
        let loaded = JsonReader::new(&path).load().unwrap();

        assert_eq!(loaded.column_names(), original.column_names());
        for name in ["question_idx", "question", "score", "flag"] {
            assert_eq!(
                loaded.column(name).unwrap().values(),
                original.column(name).unwrap().values()
            );
        }
        assert_eq!(
            loaded.vectors("question_embeddings").unwrap()[1],
            Some(&[0.3f32, 0.4][..])
        );
    }

    #[test]
    fn test_writer_refuses_existing_target() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.jsonl");
        let writer = JsonWriter::new(&path);
        let batch = create_test_batch();

        writer.write(&batch).unwrap();
        let err = writer.write(&batch).unwrap_err();
        assert!(matches!(err, EvalError::TargetExists(_)));
        assert_eq!(err.kind(), ErrorKind::IOError);

        writer.clear().unwrap();
        writer.write(&batch).unwrap();
    }

    #[test]
    fn test_reader_skips_blank_lines_and_fills_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.jsonl");
        fs::write(&path, "{\"a\": 1}\n\n{\"b\": \"x\"}\n").unwrap();

        let batch = JsonReader::new(&path).load().unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.column("b").unwrap().values()[0], Value::Null);
    }

    #[test]
    fn test_reader_errors() {
        let missing = JsonReader::new("/nonexistent/data.jsonl").load().unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::IOError);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.jsonl");
        fs::write(&path, "{\"a\": 1}\nnot json\n").unwrap();
        let err = JsonReader::new(&path).load().unwrap_err();
        assert!(err.to_string().contains(":2:"));
    }

    #[test]
    fn test_empty_batch_round_trip_with_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.jsonl");
        let empty = RecordBatch::from_columns(vec![("a", Vec::new()), ("b", Vec::new())]).unwrap();
        JsonWriter::new(&path).write(&empty).unwrap();

        let schema: Vec<String> = empty.column_names().into_iter().map(str::to_string).collect();
        let loaded = JsonReader::new(&path).with_schema(schema).load().unwrap();
        assert_eq!(loaded.column_names(), vec!["a", "b"]);
        assert_eq!(loaded.num_rows(), 0);
    }

    #[test]
    fn test_schema_orders_and_fills_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.jsonl");
        fs::write(&path, "{\"b\": 1, \"extra\": true}\n").unwrap();

        let loaded = JsonReader::new(&path)
            .with_schema(vec!["a".to_string(), "b".to_string()])
            .load()
            .unwrap();
        assert_eq!(loaded.column_names(), vec!["a", "b", "extra"]);
        assert_eq!(loaded.column("a").unwrap().values(), &[Value::Null]);
    }

    #[test]
    fn test_empty_file_loads_zero_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.jsonl");
        fs::write(&path, "").unwrap();

        let batch = JsonReader::new(&path).load().unwrap();
        assert!(batch.is_empty());
    }
}
