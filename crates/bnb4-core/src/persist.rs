//! Atomic JSON persistence.
//!
//! Writes go to a temp file next to the target (PID-suffixed), are synced to
//! disk and then renamed over the target, so readers never see a partial file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::error::IoResultExt;
use crate::{ConverterError, Result};

/// Read and parse a JSON file. Returns `None` if the file doesn't exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ConverterError::io("reading", path, e)),
    };

    let data = serde_json::from_str(&contents).map_err(|e| ConverterError::Json {
        message: format!("Failed to parse {}: {}", path.display(), e),
        source: Some(e),
    })?;
    Ok(Some(data))
}

/// Serialize `data` as pretty JSON and atomically replace `path` with it.
pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_path(parent)?;
    }

    let serialized = serde_json::to_string_pretty(data).map_err(|e| ConverterError::Json {
        message: format!("Failed to serialize {}: {}", path.display(), e),
        source: Some(e),
    })?;

    let temp_path = path.with_extension(format!("json.{}.tmp", std::process::id()));
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .with_path(&temp_path)?;
        file.write_all(serialized.as_bytes()).with_path(&temp_path)?;
        file.write_all(b"\n").with_path(&temp_path)?;
        file.flush().with_path(&temp_path)?;
        file.sync_all().with_path(&temp_path)?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(ConverterError::io("replacing", path, e));
    }

    debug!("Atomically wrote {}", path.display());
    Ok(())
}
