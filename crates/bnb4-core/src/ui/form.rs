//! Values entered in the conversion form.

use std::path::PathBuf;

use serde::Serialize;

use crate::catalog::{ModelCatalog, Modality};
use crate::job::{Device, JobConfig, QuantType};
use crate::settings::{Settings, CONTEXT_LENGTHS};
use crate::{ConverterError, Result};

/// Form state shared by the front-ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormState {
    /// Selected picker label.
    pub choice: String,
    pub source: String,
    /// Only the custom entry lets the user type a source.
    pub source_editable: bool,
    /// Summary line of the selected entry.
    pub info: String,
    pub output_path: String,
    pub context_length: u32,
    pub device: Device,
    pub safe_serialization: bool,
    pub quant_type: QuantType,
}

impl FormState {
    /// Form initialized from default settings.
    pub fn new(catalog: &ModelCatalog) -> Self {
        let mut form = Self {
            choice: String::new(),
            source: String::new(),
            source_editable: true,
            info: String::new(),
            output_path: String::new(),
            context_length: 0,
            device: Device::default(),
            safe_serialization: true,
            quant_type: QuantType::default(),
        };
        form.apply_settings(catalog, &Settings::default());
        form
    }

    /// Select a picker label. Group headers and unknown labels are ignored;
    /// returns whether the selection changed.
    pub fn select_model(&mut self, catalog: &ModelCatalog, label: &str) -> bool {
        let Some(entry) = catalog.resolve_choice(label) else {
            return false;
        };

        self.choice = format!("  {}", entry.display_name);
        self.source = entry.source.clone();
        self.source_editable = entry.is_custom();
        self.info = ModelCatalog::summary(entry);
        true
    }

    pub fn set_source(&mut self, source: &str) -> Result<()> {
        if !self.source_editable {
            return Err(ConverterError::Validation {
                field: "source".to_string(),
                message: "select the custom model to enter a source".to_string(),
            });
        }
        self.source = source.to_string();
        Ok(())
    }

    pub fn set_context_length(&mut self, context_length: u32) -> Result<()> {
        if !CONTEXT_LENGTHS.contains(&context_length) {
            return Err(ConverterError::Validation {
                field: "context_length".to_string(),
                message: format!("{context_length} is not one of {CONTEXT_LENGTHS:?}"),
            });
        }
        self.context_length = context_length;
        Ok(())
    }

    /// Apply persisted settings. The model is applied only when it is still a
    /// valid picker label.
    pub fn apply_settings(&mut self, catalog: &ModelCatalog, settings: &Settings) {
        if catalog.is_choice(&settings.model) {
            self.select_model(catalog, &settings.model);
        } else if self.choice.is_empty() {
            if let Some(default) = catalog.default_choice() {
                self.select_model(catalog, &default);
            }
        }

        self.output_path = settings.output_path.clone();
        if self.set_context_length(settings.context_length).is_err() && self.context_length == 0 {
            self.context_length = crate::settings::DEFAULT_CONTEXT_LENGTH;
        }
        self.device = settings.device;
        self.safe_serialization = settings.safe_serialization;
        self.quant_type = settings.quant_type;
    }

    pub fn to_settings(&self) -> Settings {
        Settings {
            model: self.choice.clone(),
            output_path: self.output_path.clone(),
            context_length: self.context_length,
            device: self.device,
            safe_serialization: self.safe_serialization,
            quant_type: self.quant_type,
        }
    }

    /// Snapshot the form as a job. Modality comes from the selected entry.
    pub fn to_job_config(&self, catalog: &ModelCatalog) -> JobConfig {
        let modality = catalog
            .resolve_choice(&self.choice)
            .map(|entry| entry.modality)
            .unwrap_or(Modality::Vision);

        JobConfig {
            source: self.source.trim().to_string(),
            output_root: PathBuf::from(&self.output_path),
            modality,
            safe_serialization: self.safe_serialization,
            context_length: self.context_length,
            device: self.device,
            quant_type: self.quant_type,
        }
    }
}
