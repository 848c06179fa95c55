//! User settings persisted between runs.
//!
//! Stored as a small JSON document (`gui_settings.json` by default). Loading
//! is lenient: a missing or unreadable file yields defaults, and absent fields
//! fall back to their defaults individually.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::catalog::ModelCatalog;
use crate::config::AppConfig;
use crate::job::{Device, QuantType};
use crate::persist;
use crate::Result;

/// Context lengths offered by the front-ends.
pub const CONTEXT_LENGTHS: [u32; 10] = [
    512, 1024, 2048, 4096, 8192, 16384, 32768, 65536, 131072, 262144,
];

pub const DEFAULT_CONTEXT_LENGTH: u32 = 4096;
pub const DEFAULT_OUTPUT_PATH: &str = "./output";

/// Persisted form values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Model picker label, e.g. `"  Qwen2.5-7B-Instruct"`.
    pub model: String,
    pub output_path: String,
    #[serde(deserialize_with = "number_or_string")]
    pub context_length: u32,
    pub device: Device,
    pub safe_serialization: bool,
    pub quant_type: QuantType,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: ModelCatalog::builtin().default_choice().unwrap_or_default(),
            output_path: DEFAULT_OUTPUT_PATH.to_string(),
            context_length: DEFAULT_CONTEXT_LENGTH,
            device: Device::Gpu,
            safe_serialization: true,
            quant_type: QuantType::Nf4,
        }
    }
}

/// Older files store the context length as a string.
fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Reads and writes [`Settings`] at a fixed path.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `gui_settings.json` inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(AppConfig::SETTINGS_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Strict load: `Ok(None)` when the file is absent, an error when it is
    /// unreadable or malformed.
    pub fn try_load(&self) -> Result<Option<Settings>> {
        persist::read_json(&self.path)
    }

    /// Load settings, falling back to defaults on any problem.
    pub fn load(&self) -> Settings {
        match self.try_load() {
            Ok(Some(settings)) => {
                debug!("Loaded settings from {}", self.path.display());
                settings
            }
            Ok(None) => Settings::default(),
            Err(e) => {
                warn!("Failed to load settings from {}: {}", self.path.display(), e);
                Settings::default()
            }
        }
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        persist::write_json(&self.path, settings)
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(AppConfig::SETTINGS_FILE_NAME)
    }
}
