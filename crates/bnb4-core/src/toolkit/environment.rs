//! The Python environment the helper runs in.
//!
//! Layout under the data directory:
//!
//! ```text
//! <data_dir>/
//! ├── converter-scripts/   helper script, requirements.txt, .hash sidecars
//! └── converter-venv/      virtual environment with torch and transformers
//! ```

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::scripts;
use crate::config::{AppConfig, PathsConfig, WorkerConfig};
use crate::platform;
use crate::{ConverterError, Result};

/// Locates and provisions the helper's interpreter.
#[derive(Debug, Clone)]
pub struct ConverterEnvironment {
    data_dir: PathBuf,
    python_override: Option<PathBuf>,
}

/// Snapshot reported to front-ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentStatus {
    pub ready: bool,
    pub interpreter: String,
    pub overridden: bool,
    pub venv_dir: String,
    pub scripts_deployed: bool,
}

impl ConverterEnvironment {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            python_override: None,
        }
    }

    /// Use `python` instead of the managed venv interpreter.
    pub fn with_python(mut self, python: impl Into<PathBuf>) -> Self {
        self.python_override = Some(python.into());
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.data_dir.join(PathsConfig::SCRIPTS_DIR_NAME)
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.data_dir.join(PathsConfig::VENV_DIR_NAME)
    }

    pub fn venv_python(&self) -> PathBuf {
        platform::venv_python(&self.venv_dir())
    }

    pub fn helper_script(&self) -> PathBuf {
        self.scripts_dir().join(PathsConfig::HELPER_SCRIPT_NAME)
    }

    fn override_python(&self) -> Option<PathBuf> {
        self.python_override.clone().or_else(|| {
            std::env::var_os(AppConfig::PYTHON_ENV_VAR)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        })
    }

    /// Interpreter used for the helper: explicit override, then the
    /// `BNB4_PYTHON` environment variable, then the managed venv.
    pub fn interpreter(&self) -> PathBuf {
        self.override_python().unwrap_or_else(|| self.venv_python())
    }

    /// An overridden interpreter is trusted as is; the managed one must exist.
    pub fn is_ready(&self) -> bool {
        self.override_python().is_some() || self.venv_python().exists()
    }

    pub fn status(&self) -> EnvironmentStatus {
        EnvironmentStatus {
            ready: self.is_ready(),
            interpreter: self.interpreter().to_string_lossy().to_string(),
            overridden: self.override_python().is_some(),
            venv_dir: self.venv_dir().to_string_lossy().to_string(),
            scripts_deployed: scripts::scripts_up_to_date(&self.scripts_dir()),
        }
    }

    /// Write the embedded helper files if they are missing or outdated.
    pub fn deploy_scripts(&self) -> Result<()> {
        scripts::ensure_scripts_deployed(&self.scripts_dir())
    }

    /// Deploy the scripts and create the venv with its requirements.
    ///
    /// Does nothing beyond deploying when an override interpreter is set or
    /// the venv already exists.
    pub async fn ensure(&self) -> Result<()> {
        self.deploy_scripts()?;

        if let Some(python) = self.override_python() {
            info!("Using interpreter {}; skipping venv setup", python.display());
            return Ok(());
        }

        let venv_dir = self.venv_dir();
        let python = self.venv_python();
        if python.exists() {
            debug!("Converter venv already exists at {}", venv_dir.display());
            return Ok(());
        }

        info!("Creating converter virtual environment at {}", venv_dir.display());
        let venv_arg = venv_dir.to_string_lossy().to_string();
        let output = run(
            Command::new(platform::system_python()).args(["-m", "venv", venv_arg.as_str()]),
            WorkerConfig::VENV_CREATION_TIMEOUT,
            "create venv",
        )
        .await?;
        if !output.status.success() {
            return Err(ConverterError::EnvironmentNotReady {
                message: format!(
                    "Failed to create Python venv. Ensure {} is installed. Error: {}",
                    platform::system_python(),
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }

        match run(
            Command::new(&python).args(["-m", "pip", "install", "--upgrade", "pip"]),
            WorkerConfig::PIP_INSTALL_TIMEOUT,
            "upgrade pip",
        )
        .await
        {
            Ok(output) if !output.status.success() => warn!(
                "pip upgrade failed (non-fatal): {}",
                String::from_utf8_lossy(&output.stderr)
            ),
            Err(e) => warn!("pip upgrade failed (non-fatal): {}", e),
            Ok(_) => {}
        }

        let requirements = self
            .scripts_dir()
            .join(PathsConfig::REQUIREMENTS_FILE_NAME)
            .to_string_lossy()
            .to_string();
        info!("Installing converter dependencies...");
        let output = run(
            Command::new(&python).args(["-m", "pip", "install", "-r", requirements.as_str()]),
            WorkerConfig::PIP_INSTALL_TIMEOUT,
            "install dependencies",
        )
        .await?;
        if !output.status.success() {
            return Err(ConverterError::EnvironmentNotReady {
                message: format!(
                    "Failed to install converter dependencies: {}",
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }

        info!("Converter environment ready");
        Ok(())
    }
}

async fn run(command: &mut Command, timeout: Duration, what: &str) -> Result<Output> {
    command.kill_on_drop(true);
    match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(ConverterError::EnvironmentNotReady {
            message: format!("Failed to {what}: {e}"),
        }),
        Err(_) => Err(ConverterError::EnvironmentNotReady {
            message: format!("Timed out after {}s trying to {what}", timeout.as_secs()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout() {
        let env = ConverterEnvironment::new("/data");
        assert_eq!(env.scripts_dir(), PathBuf::from("/data/converter-scripts"));
        assert_eq!(env.venv_dir(), PathBuf::from("/data/converter-venv"));
        assert_eq!(
            env.helper_script(),
            PathBuf::from("/data/converter-scripts/bnb4_helper.py")
        );
        assert!(env.venv_python().starts_with("/data/converter-venv"));
    }

    #[test]
    fn test_override_wins() {
        let env = ConverterEnvironment::new("/nonexistent").with_python("/opt/python/bin/python3");
        assert_eq!(env.interpreter(), PathBuf::from("/opt/python/bin/python3"));
        assert!(env.is_ready());
        assert!(env.status().overridden);
    }

    #[tokio::test]
    async fn test_ensure_with_override_only_deploys() {
        let temp = TempDir::new().unwrap();
        let env = ConverterEnvironment::new(temp.path()).with_python("python3");

        env.ensure().await.unwrap();

        assert!(env.helper_script().exists());
        assert!(env.status().scripts_deployed);
        assert!(!env.venv_dir().exists());
    }
}
