//! Interpreter paths.

use std::path::{Path, PathBuf};

/// Python executable inside the virtual environment rooted at `venv_dir`.
///
/// # Platform Behavior
/// - **Linux/macOS**: `{venv_dir}/bin/python`
/// - **Windows**: `{venv_dir}/Scripts/python.exe`
pub fn venv_python(venv_dir: &Path) -> PathBuf {
    #[cfg(windows)]
    {
        venv_dir.join("Scripts").join("python.exe")
    }
    #[cfg(not(windows))]
    {
        venv_dir.join("bin").join("python")
    }
}

/// Command used to create virtual environments.
pub fn system_python() -> &'static str {
    if cfg!(windows) {
        "python"
    } else {
        "python3"
    }
}
