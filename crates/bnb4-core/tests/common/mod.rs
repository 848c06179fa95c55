//! In-process toolkit fakes shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bnb4_core::job::{DeviceMap, JobSupervisor, Reporter, WorkerMessage};
use bnb4_core::toolkit::{
    DeviceCapabilities, LoadModelRequest, LoaderKind, ModelToolkit, SavedArtifacts, ToolkitError,
    ToolkitErrorKind, ToolkitFactory, ToolkitResult,
};
use bnb4_core::{Device, JobConfig, Modality, QuantType};
use tokio::sync::Notify;

/// What the fake does at each call.
#[derive(Clone, Default)]
pub struct Script {
    /// Every `load_model` call fails with this error.
    pub load_error: Option<ToolkitErrorKind>,
    /// Only the image-text loader fails.
    pub vision_loader_fails: bool,
    pub image_processor_error: Option<ToolkitErrorKind>,
    /// `load_tokenizer` waits for this before returning.
    pub tokenizer_gate: Option<Arc<Notify>>,
    /// `load_model` never returns.
    pub hang_in_load: bool,
    /// The factory fails as if the Python environment were missing.
    pub spawn_fails: bool,
    /// Printed by the model library right after the toolkit starts.
    pub library_output: Vec<String>,
}

/// Calls observed by every toolkit spawned from one factory.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn push(&self, call: String) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub struct FakeFactory {
    pub script: Script,
    pub calls: CallLog,
    pub requests: Arc<Mutex<Vec<LoadModelRequest>>>,
    pub spawned: AtomicUsize,
}

impl FakeFactory {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: CallLog::default(),
            requests: Arc::new(Mutex::new(Vec::new())),
            spawned: AtomicUsize::new(0),
        })
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolkitFactory for FakeFactory {
    async fn spawn(&self, reporter: &Reporter) -> bnb4_core::Result<Box<dyn ModelToolkit>> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        if self.script.spawn_fails {
            return Err(bnb4_core::ConverterError::EnvironmentNotReady {
                message: "no interpreter".to_string(),
            });
        }
        for line in &self.script.library_output {
            reporter.relay(line.clone());
        }
        Ok(Box::new(FakeToolkit {
            script: self.script.clone(),
            calls: self.calls.clone(),
            requests: self.requests.clone(),
            tokenizer_loaded: false,
        }))
    }
}

struct FakeToolkit {
    script: Script,
    calls: CallLog,
    requests: Arc<Mutex<Vec<LoadModelRequest>>>,
    tokenizer_loaded: bool,
}

fn loader_name(loader: LoaderKind) -> &'static str {
    match loader {
        LoaderKind::ImageTextToText => "image_text_to_text",
        LoaderKind::CausalLm => "causal_lm",
    }
}

#[async_trait]
impl ModelToolkit for FakeToolkit {
    async fn capabilities(&mut self) -> ToolkitResult<DeviceCapabilities> {
        self.calls.push("capabilities".to_string());
        Ok(DeviceCapabilities {
            cuda_available: true,
            bf16_supported: true,
            gpu_name: Some("Fake GPU".to_string()),
            gpu_memory_bytes: Some(24 * 1024 * 1024 * 1024),
        })
    }

    async fn load_model(&mut self, request: &LoadModelRequest) -> ToolkitResult<()> {
        self.calls
            .push(format!("load_model:{}", loader_name(request.loader)));
        self.requests.lock().unwrap().push(request.clone());

        if self.script.hang_in_load {
            std::future::pending::<()>().await;
        }
        if let Some(kind) = self.script.load_error {
            return Err(ToolkitError {
                operation: "load_model".to_string(),
                kind,
                message: format!("{} is not a valid model identifier", request.source),
                traceback: Some("Traceback (most recent call last):\n  OSError".to_string()),
            });
        }
        if self.script.vision_loader_fails && request.loader == LoaderKind::ImageTextToText {
            return Err(ToolkitError::new(
                "load_model",
                ToolkitErrorKind::Failed,
                "Unrecognized configuration class",
            ));
        }
        Ok(())
    }

    async fn load_tokenizer(&mut self, source: &str, max_length: u32) -> ToolkitResult<()> {
        self.calls
            .push(format!("load_tokenizer:{source}:{max_length}"));
        if let Some(gate) = &self.script.tokenizer_gate {
            gate.notified().await;
        }
        self.tokenizer_loaded = true;
        Ok(())
    }

    async fn load_image_processor(&mut self, _source: &str) -> ToolkitResult<()> {
        self.calls.push("load_image_processor".to_string());
        match self.script.image_processor_error {
            Some(kind) => Err(ToolkitError::new(
                "load_image_processor",
                kind,
                "preprocessor_config.json missing",
            )),
            None => Ok(()),
        }
    }

    async fn release_memory(&mut self, device_map: DeviceMap) -> ToolkitResult<()> {
        self.calls
            .push(format!("release_memory:{}", device_map.as_str()));
        Ok(())
    }

    async fn save(&mut self, dir: &Path, safe_serialization: bool) -> ToolkitResult<SavedArtifacts> {
        self.calls.push(format!("save:{safe_serialization}"));
        let weights = if safe_serialization {
            "model.safetensors"
        } else {
            "pytorch_model.bin"
        };
        let mut files = vec!["config.json".to_string(), weights.to_string()];
        if self.tokenizer_loaded {
            files.push("tokenizer.json".to_string());
        }
        for file in &files {
            std::fs::write(dir.join(file), b"{}").map_err(|e| {
                ToolkitError::new("save", ToolkitErrorKind::Failed, e.to_string())
            })?;
        }
        files.sort();
        Ok(SavedArtifacts { files })
    }

    async fn shutdown(&mut self) {
        self.calls.push("shutdown".to_string());
    }
}

pub fn text_job(source: &str, output_root: &Path) -> JobConfig {
    JobConfig {
        source: source.to_string(),
        output_root: output_root.to_path_buf(),
        modality: Modality::Text,
        safe_serialization: true,
        context_length: 4096,
        device: Device::Gpu,
        quant_type: QuantType::Nf4,
    }
}

pub fn vision_job(source: &str, output_root: &Path) -> JobConfig {
    JobConfig {
        modality: Modality::Vision,
        ..text_job(source, output_root)
    }
}

/// Poll until `done`, failing after a few seconds.
pub async fn collect_until_done(supervisor: &JobSupervisor) -> Vec<WorkerMessage> {
    let mut messages = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let batch = supervisor.poll();
        let done = batch.iter().any(WorkerMessage::is_done);
        messages.extend(batch);
        if done {
            return messages;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job did not finish; got {messages:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until a progress message with `percent` arrives.
pub async fn collect_until_progress(supervisor: &JobSupervisor, percent: u8) -> Vec<WorkerMessage> {
    let mut messages = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let batch = supervisor.poll();
        let reached = batch
            .iter()
            .any(|m| matches!(m, WorkerMessage::Progress { percent: p, .. } if *p == percent));
        messages.extend(batch);
        if reached {
            return messages;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "progress {percent} never arrived; got {messages:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn logs(messages: &[WorkerMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            WorkerMessage::Log { text } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

pub fn max_progress(messages: &[WorkerMessage]) -> u8 {
    messages
        .iter()
        .filter_map(|m| match m {
            WorkerMessage::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .max()
        .unwrap_or(0)
}

pub fn output_dir(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{name}-bnb4"))
}
