//! Error types for the tile processor.
//!
//! Only configuration and query failures cross component boundaries as
//! errors. A tile whose external process fails is reported as a boolean
//! outcome by the worker, never through this type.
//!
//! Every error carries a stable numeric code and a category:
//! - 10-19: configuration errors
//! - 20-29: database errors
//! - 60-69: I/O and serialization errors

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for tile processor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid selection, run configuration, or worker wiring.
    Config,
    /// Tile index queries.
    Database,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Database => write!(f, "database"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Unified error type for the tile processor.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid extent: {0}")]
    InvalidExtent(String),

    #[error("worker '{key}' is not registered")]
    WorkerNotRegistered { key: String },

    #[error("no output target configured, expected a directory or a database")]
    OutputNotConfigured,

    #[error("no executable configured for '{name}'")]
    MissingExecutable { name: String },

    // Database errors (20-29)
    #[error("query failed: {0}")]
    Query(String),

    #[error("unexpected value in column '{column}': {detail}")]
    RowDecode { column: String, detail: String },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidExtent(_) => 11,
            Error::WorkerNotRegistered { .. } => 12,
            Error::OutputNotConfigured => 13,
            Error::MissingExecutable { .. } => 14,
            Error::Query(_) => 20,
            Error::RowDecode { .. } => 21,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
            Error::Yaml(_) => 62,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_)
            | Error::InvalidExtent(_)
            | Error::WorkerNotRegistered { .. }
            | Error::OutputNotConfigured
            | Error::MissingExecutable { .. } => ErrorCategory::Config,

            Error::Query(_) | Error::RowDecode { .. } => ErrorCategory::Database,

            Error::Io(_) | Error::Json(_) | Error::Yaml(_) => ErrorCategory::Io,
        }
    }

    /// Whether the error stems from how the run was configured.
    pub fn is_config(&self) -> bool {
        self.category() == ErrorCategory::Config
    }

    /// Shorthand for building a [`Error::Config`].
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_grouped_by_category() {
        let errors = [
            Error::config("x"),
            Error::InvalidExtent("x".into()),
            Error::WorkerNotRegistered { key: "x".into() },
            Error::OutputNotConfigured,
            Error::MissingExecutable { name: "x".into() },
            Error::Query("x".into()),
            Error::RowDecode {
                column: "tile".into(),
                detail: "null".into(),
            },
            Error::Io(std::io::Error::other("x")),
        ];
        for err in &errors {
            let expected = match err.code() {
                10..=19 => ErrorCategory::Config,
                20..=29 => ErrorCategory::Database,
                60..=69 => ErrorCategory::Io,
                other => panic!("unexpected code {other}"),
            };
            assert_eq!(err.category(), expected, "{err}");
        }
    }

    #[test]
    fn test_worker_not_registered_message() {
        let err = Error::WorkerNotRegistered {
            key: "lod22".into(),
        };
        assert_eq!(err.to_string(), "worker 'lod22' is not registered");
        assert!(err.is_config());
    }

    #[test]
    fn test_category_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorCategory::Database).unwrap();
        assert_eq!(json, "\"database\"");
        assert_eq!(ErrorCategory::Io.to_string(), "io");
    }

    #[test]
    fn test_yaml_error_converts() {
        let parsed: std::result::Result<Vec<u32>, _> = serde_yaml::from_str("{not: [a list");
        let err: Error = parsed.unwrap_err().into();
        assert_eq!(err.code(), 62);
        assert!(!err.is_config());
    }
}
