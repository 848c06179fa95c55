//! Types describing one conversion job.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::catalog::Modality;
use crate::config::AppConfig;
use crate::toolkit::DeviceCapabilities;
use crate::{ConverterError, Result};

/// Device preference chosen by the user.
///
/// Only `cpu` and `cuda` pin the model; `gpu` (the default) and `auto` leave
/// placement to the model library. `cuda` is not offered in the picker but is
/// honored when it comes from a settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Auto,
    #[default]
    Gpu,
    Cuda,
    Cpu,
}

impl Device {
    /// Choices offered by the front-ends.
    pub const ALL: [Device; 3] = [Device::Auto, Device::Gpu, Device::Cpu];

    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Auto => "auto",
            Device::Gpu => "gpu",
            Device::Cuda => "cuda",
            Device::Cpu => "cpu",
        }
    }

    /// Placement directive handed to the model library.
    pub fn device_map(&self) -> DeviceMap {
        match self {
            Device::Auto | Device::Gpu => DeviceMap::Auto,
            Device::Cuda => DeviceMap::Cuda,
            Device::Cpu => DeviceMap::Cpu,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Some(Device::Auto),
            "gpu" => Some(Device::Gpu),
            "cuda" => Some(Device::Cuda),
            "cpu" => Some(Device::Cpu),
            _ => None,
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device placement directive understood by the model library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMap {
    Auto,
    Cuda,
    Cpu,
}

impl DeviceMap {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceMap::Auto => "auto",
            DeviceMap::Cuda => "cuda",
            DeviceMap::Cpu => "cpu",
        }
    }
}

/// 4-bit quantization data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantType {
    #[default]
    Nf4,
    Fp4,
}

impl QuantType {
    pub const ALL: [QuantType; 2] = [QuantType::Nf4, QuantType::Fp4];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuantType::Nf4 => "nf4",
            QuantType::Fp4 => "fp4",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "nf4" | "nf4 (bnb4)" => Some(QuantType::Nf4),
            "fp4" => Some(QuantType::Fp4),
            _ => None,
        }
    }
}

impl std::fmt::Display for QuantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Precision used for computation on quantized weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDtype {
    Bfloat16,
    Float16,
}

impl ComputeDtype {
    /// bfloat16 when the GPU supports it and the job is not pinned to the CPU.
    pub fn select(capabilities: &DeviceCapabilities, device_map: DeviceMap) -> Self {
        if capabilities.cuda_available
            && capabilities.bf16_supported
            && device_map != DeviceMap::Cpu
        {
            ComputeDtype::Bfloat16
        } else {
            ComputeDtype::Float16
        }
    }
}

/// bitsandbytes 4-bit configuration passed through to the model library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizationConfig {
    pub load_in_4bit: bool,
    pub double_quant: bool,
    pub quant_type: QuantType,
    pub compute_dtype: ComputeDtype,
}

impl QuantizationConfig {
    /// 4-bit loading with double quantization enabled.
    pub fn bnb4(quant_type: QuantType, compute_dtype: ComputeDtype) -> Self {
        Self {
            load_in_4bit: true,
            double_quant: true,
            quant_type,
            compute_dtype,
        }
    }
}

/// User-selected options for one run. Built fresh per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    /// Repository id (`org/name`) or model URL.
    pub source: String,
    /// Directory under which `<repo>-bnb4` is created.
    pub output_root: PathBuf,
    pub modality: Modality,
    pub safe_serialization: bool,
    pub context_length: u32,
    pub device: Device,
    #[serde(default)]
    pub quant_type: QuantType,
}

impl JobConfig {
    /// Reject configurations that must not start a worker.
    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(ConverterError::MissingSource);
        }
        if self.context_length == 0 {
            return Err(ConverterError::Validation {
                field: "context_length".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Identifier handed to the model library.
    ///
    /// `https://huggingface.co/<org>/<name>/...` is reduced to `<org>/<name>`;
    /// any other source is passed through without trailing slashes.
    pub fn repo_id(&self) -> String {
        let trimmed = self.source.trim().trim_end_matches('/');
        if let Ok(url) = Url::parse(trimmed) {
            let is_hub = matches!(url.scheme(), "http" | "https")
                && url
                    .host_str()
                    .is_some_and(|host| host == "huggingface.co" || host.ends_with(".huggingface.co"));
            if is_hub {
                let segments: Vec<&str> = url
                    .path_segments()
                    .map(|parts| parts.filter(|p| !p.is_empty()).collect())
                    .unwrap_or_default();
                if segments.len() >= 2 {
                    return format!("{}/{}", segments[0], segments[1]);
                }
            }
        }
        trimmed.to_string()
    }

    /// Last path segment of the source, used to name the output directory.
    pub fn repo_name(&self) -> String {
        let repo_id = self.repo_id();
        repo_id
            .rsplit('/')
            .next()
            .unwrap_or(repo_id.as_str())
            .to_string()
    }

    /// `<output_root>/<repo_name>-bnb4`.
    pub fn output_dir(&self) -> PathBuf {
        self.output_root.join(format!(
            "{}-{}",
            self.repo_name(),
            AppConfig::OUTPUT_DIR_SUFFIX
        ))
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }
}
