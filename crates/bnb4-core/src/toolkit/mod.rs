//! Seam between the worker and the wrapped model library.
//!
//! The worker drives a [`ModelToolkit`] through a fixed sequence of calls. The
//! production implementation, [`PythonToolkit`], runs an embedded helper
//! script under a dedicated Python environment that has `transformers` and
//! `bitsandbytes` installed. Tests substitute in-process fakes.

mod environment;
mod protocol;
mod python;
pub(crate) mod scripts;

pub use environment::{ConverterEnvironment, EnvironmentStatus};
pub use python::{PythonToolkit, PythonToolkitFactory};

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::{ComputeDtype, DeviceMap, QuantizationConfig, Reporter};
use crate::{ConverterError, Result};

/// Which auto-class the library should load the model with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderKind {
    /// Vision-language loader (`AutoModelForImageTextToText`).
    ImageTextToText,
    /// Generic text loader (`AutoModelForCausalLM`).
    CausalLm,
}

/// Arguments of a model load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadModelRequest {
    pub source: String,
    pub loader: LoaderKind,
    /// `None` loads unquantized weights (CPU placement).
    pub quantization: Option<QuantizationConfig>,
    pub device_map: DeviceMap,
    /// Weight dtype. `None` keeps the library default.
    pub dtype: Option<ComputeDtype>,
    pub trust_remote_code: bool,
}

/// What the library reports about the accelerator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub cuda_available: bool,
    pub bf16_supported: bool,
    #[serde(default)]
    pub gpu_name: Option<String>,
    #[serde(default)]
    pub gpu_memory_bytes: Option<u64>,
}

/// Files written by a save.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedArtifacts {
    #[serde(default)]
    pub files: Vec<String>,
}

/// Classification of a library failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolkitErrorKind {
    /// The source or one of its artifacts does not exist.
    NotFound,
    /// The helper process or a required package is unavailable.
    Unavailable,
    Failed,
}

/// Error raised by a toolkit call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {message}")]
pub struct ToolkitError {
    pub operation: String,
    pub kind: ToolkitErrorKind,
    pub message: String,
    pub traceback: Option<String>,
}

impl ToolkitError {
    pub fn new(operation: &str, kind: ToolkitErrorKind, message: impl Into<String>) -> Self {
        Self {
            operation: operation.to_string(),
            kind,
            message: message.into(),
            traceback: None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ToolkitErrorKind::NotFound
    }
}

impl From<ToolkitError> for ConverterError {
    fn from(err: ToolkitError) -> Self {
        ConverterError::Toolkit {
            operation: err.operation,
            message: err.message,
            traceback: err.traceback,
        }
    }
}

pub type ToolkitResult<T> = std::result::Result<T, ToolkitError>;

/// One live session with the model library. A job owns exactly one.
#[async_trait]
pub trait ModelToolkit: Send {
    /// OS process id backing this toolkit, if any.
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn capabilities(&mut self) -> ToolkitResult<DeviceCapabilities>;

    async fn load_model(&mut self, request: &LoadModelRequest) -> ToolkitResult<()>;

    /// Load the tokenizer, capping its maximum sequence length.
    async fn load_tokenizer(&mut self, source: &str, max_length: u32) -> ToolkitResult<()>;

    async fn load_image_processor(&mut self, source: &str) -> ToolkitResult<()>;

    async fn release_memory(&mut self, device_map: DeviceMap) -> ToolkitResult<()>;

    /// Save the model, the tokenizer and the image processor (when loaded).
    async fn save(&mut self, dir: &Path, safe_serialization: bool) -> ToolkitResult<SavedArtifacts>;

    async fn shutdown(&mut self) {}
}

/// Creates a fresh toolkit for each job.
#[async_trait]
pub trait ToolkitFactory: Send + Sync {
    /// Output the model library prints while the toolkit runs (download
    /// progress, warnings) is forwarded to `reporter` as log lines.
    async fn spawn(&self, reporter: &Reporter) -> Result<Box<dyn ModelToolkit>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toolkit_error_converts() {
        let err = ToolkitError {
            operation: "load_model".to_string(),
            kind: ToolkitErrorKind::NotFound,
            message: "org/missing is not a valid model identifier".to_string(),
            traceback: Some("Traceback ...".to_string()),
        };
        assert!(err.is_not_found());

        let converted: ConverterError = err.into();
        match converted {
            ConverterError::Toolkit {
                operation,
                traceback,
                ..
            } => {
                assert_eq!(operation, "load_model");
                assert!(traceback.is_some());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_load_request_wire_format() {
        let request = LoadModelRequest {
            source: "org/model".to_string(),
            loader: LoaderKind::ImageTextToText,
            quantization: None,
            device_map: DeviceMap::Cpu,
            dtype: Some(ComputeDtype::Float16),
            trust_remote_code: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["loader"], "image_text_to_text");
        assert_eq!(json["device_map"], "cpu");
        assert_eq!(json["dtype"], "float16");
        assert!(json["quantization"].is_null());
    }
}
