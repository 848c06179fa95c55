//! bnb4 Core - headless library for converting Hugging Face models to 4-bit
//! bitsandbytes checkpoints.
//!
//! The crate owns everything except the presentation layer: the model
//! catalog, persisted settings, the conversion worker and its supervisor, and
//! the Python environment the model library runs in. Front-ends (the JSON-RPC
//! server and the `bnb4` CLI) drive it through [`ConverterController`].
//!
//! # Example
//!
//! ```rust,ignore
//! use bnb4_core::ConverterBuilder;
//!
//! #[tokio::main]
//! async fn main() -> bnb4_core::Result<()> {
//!     let converter = ConverterBuilder::new("/tmp/bnb4").build()?;
//!     converter.environment.ensure().await?;
//!
//!     let controller = converter.controller;
//!     controller.select_model("  Qwen2.5-7B-Instruct");
//!     controller.start()?;
//!     let _poller = controller.spawn_poller(bnb4_core::config::UiConfig::POLL_INTERVAL);
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod catalog;
pub mod config;
pub mod error;
pub mod job;
pub mod platform;
pub mod settings;
pub mod system;
pub mod toolkit;
pub mod ui;

mod builder;
mod persist;

pub use builder::{Converter, ConverterBuilder};
pub use cancel::{CancellationToken, CancelledError};
pub use catalog::{CatalogEntry, CatalogGroup, Modality, ModelCatalog};
pub use error::{ConverterError, Result};
pub use job::{
    Device, JobConfig, JobId, JobSupervisor, QuantType, SupervisorOptions, WorkerMessage,
};
pub use settings::{Settings, SettingsStore, CONTEXT_LENGTHS};
pub use system::SystemInfo;
pub use toolkit::{ConverterEnvironment, EnvironmentStatus, ModelToolkit, ToolkitFactory};
pub use ui::{ConverterController, FormState, JobOutcome, JobView, LogSink};
