//! Centralized configuration for the bnb4 converter.
//!
//! Compile-time constants for paths, worker timing and UI polling. User
//! choices that survive restarts live in [`crate::settings`].

use std::path::PathBuf;
use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const SETTINGS_FILE_NAME: &'static str = "gui_settings.json";
    pub const OUTPUT_DIR_SUFFIX: &'static str = "bnb4";
    /// Environment variable overriding the interpreter used for the helper.
    pub const PYTHON_ENV_VAR: &'static str = "BNB4_PYTHON";
}

/// Worker and supervisor timing.
pub struct WorkerConfig;

impl WorkerConfig {
    /// Time a cancelled worker gets to reach its next checkpoint before the
    /// supervisor terminates it.
    pub const HARD_STOP_GRACE: Duration = Duration::from_secs(2);
    /// Time the helper gets to exit after a termination request before the
    /// job's task is aborted, which kills it.
    pub const TERMINATE_GRACE: Duration = Duration::from_secs(1);
    /// Python venv creation and package installation.
    pub const VENV_CREATION_TIMEOUT: Duration = Duration::from_secs(120);
    pub const PIP_INSTALL_TIMEOUT: Duration = Duration::from_secs(1800);
}

/// UI timing.
pub struct UiConfig;

impl UiConfig {
    /// Interval of the message relay loop.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
    /// Maximum number of log lines kept by the status display.
    pub const MAX_LOG_LINES: usize = 5000;
}

/// Directory and file names below the data directory.
pub struct PathsConfig;

impl PathsConfig {
    pub const DATA_DIR_NAME: &'static str = "bnb4-converter";
    pub const SCRIPTS_DIR_NAME: &'static str = "converter-scripts";
    pub const VENV_DIR_NAME: &'static str = "converter-venv";
    pub const HELPER_SCRIPT_NAME: &'static str = "bnb4_helper.py";
    pub const REQUIREMENTS_FILE_NAME: &'static str = "requirements.txt";
}

/// Default data directory: the platform data dir, or `./.bnb4` when unknown.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(PathsConfig::DATA_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".bnb4"))
}
