//! Error types for the bnb4 converter.
//!
//! One error enum covers the whole core crate. Front-ends either surface the
//! message to the user or map it to a JSON-RPC error code.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for the converter core.
#[derive(Debug, Error)]
pub enum ConverterError {
    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Job errors
    #[error("Please specify the model URL or repository id")]
    MissingSource,

    #[error("A conversion job is already running: {job_id}")]
    JobAlreadyRunning { job_id: String },

    #[error("Failed to start worker: {message}")]
    WorkerSpawn { message: String },

    #[error("Operation cancelled by user")]
    Cancelled,

    // Wrapped library errors
    #[error("{operation} failed: {message}")]
    Toolkit {
        operation: String,
        message: String,
        traceback: Option<String>,
    },

    #[error("Python environment not ready: {message}")]
    EnvironmentNotReady { message: String },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Invalid parameters: {message}")]
    InvalidParams { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for converter operations.
pub type Result<T> = std::result::Result<T, ConverterError>;

impl From<std::io::Error> for ConverterError {
    fn from(err: std::io::Error) -> Self {
        ConverterError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ConverterError {
    fn from(err: serde_json::Error) -> Self {
        ConverterError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl ConverterError {
    /// Create an IO error with an operation description and path.
    pub fn io(context: &str, path: impl AsRef<Path>, err: std::io::Error) -> Self {
        ConverterError::Io {
            message: format!("{context}: {err}"),
            path: Some(path.as_ref().to_path_buf()),
            source: Some(err),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32003: Worker or toolkit failure
    /// - -32004: Cancelled by user
    /// - -32005: Validation error (including a missing source)
    /// - -32006: A job is already running
    /// - -32007: Python environment not ready
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            ConverterError::WorkerSpawn { .. } | ConverterError::Toolkit { .. } => -32003,

            ConverterError::Cancelled => -32004,

            ConverterError::MissingSource | ConverterError::Validation { .. } => -32005,

            ConverterError::JobAlreadyRunning { .. } => -32006,

            ConverterError::EnvironmentNotReady { .. } => -32007,

            ConverterError::InvalidParams { .. } => -32602,

            _ => -32603,
        }
    }

    /// Whether this error represents a user-requested cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConverterError::Cancelled)
    }
}

/// Attach a path to `std::io::Result` errors.
pub trait IoResultExt<T> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| ConverterError::Io {
            message: e.to_string(),
            path: Some(path.as_ref().to_path_buf()),
            source: Some(e),
        })
    }
}
