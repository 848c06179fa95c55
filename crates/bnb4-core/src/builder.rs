//! Builder wiring the converter's components together.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::catalog::ModelCatalog;
use crate::error::IoResultExt;
use crate::job::{JobSupervisor, SupervisorOptions};
use crate::settings::SettingsStore;
use crate::toolkit::{ConverterEnvironment, PythonToolkitFactory, ToolkitFactory};
use crate::ui::{ConverterController, LogSink, TracingSink};
use crate::Result;

/// A fully wired converter.
pub struct Converter {
    pub controller: Arc<ConverterController>,
    pub environment: ConverterEnvironment,
}

/// Builder for [`Converter`].
///
/// # Example
///
/// ```rust,ignore
/// use bnb4_core::ConverterBuilder;
///
/// let converter = ConverterBuilder::new("/var/lib/bnb4")
///     .settings_path("./gui_settings.json")
///     .python("/usr/bin/python3")
///     .build()?;
/// converter.controller.start()?;
/// ```
pub struct ConverterBuilder {
    data_dir: PathBuf,
    settings_path: Option<PathBuf>,
    python: Option<PathBuf>,
    hard_stop_grace: Duration,
    sink: Option<Arc<dyn LogSink>>,
    factory: Option<Arc<dyn ToolkitFactory>>,
    catalog: Option<ModelCatalog>,
}

impl ConverterBuilder {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            settings_path: None,
            python: None,
            hard_stop_grace: SupervisorOptions::default().hard_stop_grace,
            sink: None,
            factory: None,
            catalog: None,
        }
    }

    /// Settings file location.
    ///
    /// Default: `gui_settings.json` in the working directory.
    pub fn settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_path = Some(path.into());
        self
    }

    /// Interpreter for the helper instead of the managed venv.
    pub fn python(mut self, python: impl Into<PathBuf>) -> Self {
        self.python = Some(python.into());
        self
    }

    pub fn hard_stop_grace(mut self, grace: Duration) -> Self {
        self.hard_stop_grace = grace;
        self
    }

    /// Destination of user-visible job text.
    ///
    /// Default: [`TracingSink`].
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replace the Python toolkit, e.g. with an in-process fake.
    pub fn toolkit_factory(mut self, factory: Arc<dyn ToolkitFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Create the data directory and wire everything up.
    pub fn build(self) -> Result<Converter> {
        std::fs::create_dir_all(&self.data_dir).with_path(&self.data_dir)?;

        let mut environment = ConverterEnvironment::new(&self.data_dir);
        if let Some(python) = self.python {
            environment = environment.with_python(python);
        }

        let factory = self
            .factory
            .unwrap_or_else(|| {
                Arc::new(PythonToolkitFactory::new(environment.clone())) as Arc<dyn ToolkitFactory>
            });
        let supervisor = JobSupervisor::new(
            factory,
            SupervisorOptions {
                hard_stop_grace: self.hard_stop_grace,
            },
        );

        let settings = self
            .settings_path
            .map(SettingsStore::new)
            .unwrap_or_default();
        debug!("Using settings file {}", settings.path().display());

        let controller = ConverterController::new(
            self.catalog.unwrap_or_default(),
            settings,
            supervisor,
            self.sink
                .unwrap_or_else(|| Arc::new(TracingSink) as Arc<dyn LogSink>),
        );

        Ok(Converter {
            controller: Arc::new(controller),
            environment,
        })
    }
}
