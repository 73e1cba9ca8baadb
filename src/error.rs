//! Error types for operator chains and check sets.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Coarse error taxonomy reported per check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A column reference or parameter is invalid.
    ConfigurationError,
    /// A value has the wrong type or shape for the operation.
    DataError,
    /// An external model capability failed.
    ModelError,
    /// Reading or writing the backing store failed.
    IOError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ConfigurationError => "ConfigurationError",
            ErrorKind::DataError => "DataError",
            ErrorKind::ModelError => "ModelError",
            ErrorKind::IOError => "IOError",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while setting up or running checks.
#[derive(Error, Debug)]
pub enum EvalError {
    /// A declared column does not exist in the batch.
    #[error("Column '{column}' not found (available: {available})")]
    MissingColumn { column: String, available: String },

    /// Invalid operator, plot, or check parameters.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// An operator was run before `setup` bound its runtime state.
    #[error("Operator '{0}' was run before setup")]
    NotSetUp(String),

    /// A value's type or shape does not match what the operation requires.
    #[error("Data error in column '{column}': {message}")]
    Data { column: String, message: String },

    /// Batch construction violated the equal-length invariant.
    #[error("Column '{column}' has {actual} rows, expected {expected}")]
    RowCountMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    /// An embedding backend or reduction routine failed.
    #[error("Model error: {0}")]
    Model(String),

    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The sink target exists and was not cleared.
    #[error("Refusing to overwrite existing file '{0}'; clear it first")]
    TargetExists(PathBuf),

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl EvalError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a data error for a column.
    pub fn data(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Data {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Map this error onto the reporting taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvalError::MissingColumn { .. } | EvalError::Config(_) | EvalError::NotSetUp(_) => {
                ErrorKind::ConfigurationError
            }
            EvalError::Data { .. } | EvalError::RowCountMismatch { .. } => ErrorKind::DataError,
            EvalError::Model(_) => ErrorKind::ModelError,
            EvalError::Io { .. } | EvalError::TargetExists(_) | EvalError::Serialization(_) => {
                ErrorKind::IOError
            }
        }
    }
}

impl From<reqwest::Error> for EvalError {
    fn from(err: reqwest::Error) -> Self {
        EvalError::Model(format!("HTTP request failed: {}", err))
    }
}

impl From<serde_json::Error> for EvalError {
    fn from(err: serde_json::Error) -> Self {
        EvalError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for EvalError {
    fn from(err: serde_yaml::Error) -> Self {
        EvalError::Serialization(err.to_string())
    }
}
