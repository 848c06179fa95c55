//! Termination requests for helper processes.
//!
//! Helpers are children owned by a `tokio::process::Child`, which reaps them.
//! This module only delivers the request; it never waits on the pid.

use crate::error::{ConverterError, Result};
use tracing::debug;

/// Ask a process to exit.
///
/// # Platform Behavior
/// - **Linux/macOS**: SIGTERM through `nix`
/// - **Windows**: `taskkill /PID {pid} /T` (without `/F`)
///
/// A process that is already gone is not an error.
pub fn request_termination(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        request_termination_unix(pid)
    }

    #[cfg(windows)]
    {
        request_termination_windows(pid)
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(ConverterError::Other(format!(
            "Cannot terminate process {pid} on this platform"
        )))
    }
}

#[cfg(unix)]
fn request_termination_unix(pid: u32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .ok_or_else(|| ConverterError::Other(format!("Invalid process id {pid}")))?;

    debug!("Sending SIGTERM to process {}", pid);
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => {
            debug!("Process {} is not running", pid);
            Ok(())
        }
        Err(e) => Err(ConverterError::Other(format!(
            "Failed to send SIGTERM to {pid}: {e}"
        ))),
    }
}

#[cfg(windows)]
fn request_termination_windows(pid: u32) -> Result<()> {
    use std::process::Command;

    debug!("Requesting termination of process {} with taskkill", pid);
    let output = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T"])
        .output()
        .map_err(|e| ConverterError::Other(format!("Failed to run taskkill: {e}")))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if output.status.success() || stderr.contains("not found") || stderr.contains("not running") {
        Ok(())
    } else {
        Err(ConverterError::Other(format!(
            "taskkill failed for {pid}: {}",
            stderr.trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_invalid_pid_is_rejected() {
        assert!(request_termination(0).is_err());
        assert!(request_termination(4_000_000_000).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_sleeping_child_receives_sigterm() {
        use std::os::unix::process::ExitStatusExt;

        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();

        request_termination(child.id()).unwrap();
        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(nix::sys::signal::Signal::SIGTERM as i32));
    }
}
