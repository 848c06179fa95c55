//! Host GPU information shown on the settings page.
//!
//! Queried through `nvidia-smi`; hosts without it report CPU only.

use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

/// GPU summary of the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub cuda_available: bool,
    pub gpu_name: Option<String>,
    /// Total memory of the first GPU in bytes.
    pub gpu_memory_bytes: Option<u64>,
}

impl SystemInfo {
    /// Query `nvidia-smi`. Never fails; errors yield the CPU-only info.
    pub async fn query() -> Self {
        let output = Command::new("nvidia-smi")
            .args([
                "--query-gpu=name,memory.total",
                "--format=csv,noheader,nounits",
            ])
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                Self::parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                debug!(
                    "nvidia-smi returned non-zero: {}",
                    String::from_utf8_lossy(&output.stderr)
                );
                Self::default()
            }
            Err(e) => {
                debug!("Failed to run nvidia-smi: {}", e);
                Self::default()
            }
        }
    }

    /// Parse the first line of `name, memory.total` CSV output (MiB).
    pub fn parse_nvidia_smi(stdout: &str) -> Self {
        let Some(line) = stdout.lines().map(str::trim).find(|l| !l.is_empty()) else {
            return Self::default();
        };
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        let Some(name) = parts.first().filter(|n| !n.is_empty()) else {
            debug!("Unexpected nvidia-smi output format: {}", line);
            return Self::default();
        };

        Self {
            cuda_available: true,
            gpu_name: Some(name.to_string()),
            gpu_memory_bytes: parts
                .get(1)
                .and_then(|mb| mb.parse::<u64>().ok())
                .map(|mb| mb * 1024 * 1024),
        }
    }

    /// Multi-line text for the settings page.
    pub fn summary(&self) -> String {
        if !self.cuda_available {
            return "CUDA not available, CPU only".to_string();
        }
        let mut lines = vec![format!(
            "GPU: {}",
            self.gpu_name.as_deref().unwrap_or("unknown")
        )];
        if let Some(bytes) = self.gpu_memory_bytes {
            lines.push(format!("VRAM: {} GB", bytes / (1024 * 1024 * 1024)));
        }
        lines.push("CUDA available".to_string());
        lines.join("\n")
    }
}
