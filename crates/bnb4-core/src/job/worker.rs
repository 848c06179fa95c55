//! The conversion sequence executed for one job.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};

use super::message::{Reporter, WorkerMessage, CANCELLED_MESSAGE};
use super::types::{ComputeDtype, Device, DeviceMap, JobConfig, QuantizationConfig};
use crate::catalog::Modality;
use crate::error::IoResultExt;
use crate::platform;
use crate::toolkit::{LoadModelRequest, LoaderKind, ModelToolkit, ToolkitFactory};
use crate::{ConverterError, Result};

/// Progress milestones of a conversion, in order.
pub mod stage {
    pub const INITIALIZING: (u8, &str) = (0, "Initializing");
    pub const LOADING_MODEL: (u8, &str) = (15, "Loading model");
    pub const LOADING_TOKENIZER: (u8, &str) = (40, "Loading tokenizer");
    pub const LOADING_IMAGE_PROCESSOR: (u8, &str) = (55, "Loading image processor");
    pub const FREEING_MEMORY: (u8, &str) = (70, "Freeing memory");
    pub const SAVING_MODEL: (u8, &str) = (85, "Saving model");
    pub const COMPLETED: (u8, &str) = (100, "Completed successfully");
}

/// Process id of the helper backing a running job, shared with the
/// supervisor so a hard stop can ask it to exit.
///
/// The worker clears the slot before it shuts the helper down, so a pid
/// that may already be reaped is never signalled.
#[derive(Debug, Clone, Default)]
pub struct ProcessSlot(Arc<Mutex<Option<u32>>>);

impl ProcessSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, pid: u32) {
        *self.0.lock().expect("process slot lock poisoned") = Some(pid);
    }

    pub fn pid(&self) -> Option<u32> {
        *self.0.lock().expect("process slot lock poisoned")
    }

    pub fn clear(&self) {
        *self.0.lock().expect("process slot lock poisoned") = None;
    }

    /// Send a termination request to the recorded helper.
    ///
    /// The lock is held while signalling so the worker cannot clear the
    /// slot in between. Returns whether a helper was recorded.
    pub fn request_termination(&self) -> Result<bool> {
        let pid = self.0.lock().expect("process slot lock poisoned");
        match *pid {
            Some(pid) => platform::request_termination(pid).map(|()| true),
            None => Ok(false),
        }
    }
}

/// Sends the completion marker when dropped.
///
/// Runs on normal return, on panic and when the task is aborted, so the
/// supervisor always sees `done`.
struct CompletionGuard {
    reporter: Reporter,
    outcome_reported: bool,
}

impl CompletionGuard {
    fn new(reporter: Reporter) -> Self {
        Self {
            reporter,
            outcome_reported: false,
        }
    }

    fn mark_reported(&mut self) {
        self.outcome_reported = true;
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.outcome_reported && self.reporter.is_cancelled() {
            self.reporter.send_unchecked(WorkerMessage::Log {
                text: CANCELLED_MESSAGE.to_string(),
            });
        }
        self.reporter.send_unchecked(WorkerMessage::Done);
    }
}

/// Run one conversion job to completion.
///
/// Never returns an error: the outcome is reported through `reporter`, and
/// the last message sent is always [`WorkerMessage::Done`].
pub async fn run_worker(
    job: JobConfig,
    factory: Arc<dyn ToolkitFactory>,
    reporter: Reporter,
    process: ProcessSlot,
) {
    let mut guard = CompletionGuard::new(reporter.clone());
    let mut toolkit: Option<Box<dyn ModelToolkit>> = None;

    let result = convert(&job, factory.as_ref(), &reporter, &process, &mut toolkit).await;

    match result {
        Ok(output_dir) => {
            info!("Conversion of {} finished: {}", job.repo_id(), output_dir.display());
        }
        Err(e) if e.is_cancelled() || reporter.is_cancelled() => {
            info!("Conversion of {} cancelled", job.repo_id());
            reporter.send_unchecked(WorkerMessage::Log {
                text: CANCELLED_MESSAGE.to_string(),
            });
        }
        Err(e) => {
            error!("Conversion of {} failed: {}", job.repo_id(), e);
            reporter.send_unchecked(WorkerMessage::Log {
                text: failure_text(&e),
            });
        }
    }
    guard.mark_reported();

    process.clear();
    if let Some(mut toolkit) = toolkit.take() {
        toolkit.shutdown().await;
    }

    drop(guard);
}

fn failure_text(err: &ConverterError) -> String {
    match err {
        ConverterError::Toolkit {
            traceback: Some(traceback),
            ..
        } if !traceback.trim().is_empty() => format!("Error: {err}\n{}", traceback.trim_end()),
        _ => format!("Error: {err}"),
    }
}

fn enter_stage(reporter: &Reporter, (percent, label): (u8, &str)) -> Result<()> {
    reporter.status(label)?;
    reporter.stage(percent, label)
}

async fn convert(
    job: &JobConfig,
    factory: &dyn ToolkitFactory,
    reporter: &Reporter,
    process: &ProcessSlot,
    slot: &mut Option<Box<dyn ModelToolkit>>,
) -> Result<PathBuf> {
    let repo_id = job.repo_id();

    enter_stage(reporter, stage::INITIALIZING)?;
    tokio::fs::create_dir_all(job.output_root())
        .await
        .with_path(job.output_root())?;
    reporter.log(format!("Starting conversion: {repo_id}"))?;

    let device_map = job.device.device_map();
    reporter.log(match job.device {
        Device::Cpu => "Forcing CPU usage",
        Device::Cuda => "Forcing GPU usage",
        Device::Auto | Device::Gpu => "Automatic device selection",
    })?;

    let toolkit = slot.insert(factory.spawn(reporter).await?);
    if let Some(pid) = toolkit.pid() {
        process.record(pid);
    }

    let capabilities = toolkit.capabilities().await?;
    if device_map == DeviceMap::Cuda && !capabilities.cuda_available {
        reporter.log("Warning: CUDA is not available on this system")?;
    }
    let compute_dtype = ComputeDtype::select(&capabilities, device_map);
    let quantization = (device_map != DeviceMap::Cpu)
        .then(|| QuantizationConfig::bnb4(job.quant_type, compute_dtype));
    debug!(
        "Device map {}, compute dtype {:?}, quantized: {}",
        device_map.as_str(),
        compute_dtype,
        quantization.is_some()
    );

    enter_stage(reporter, stage::LOADING_MODEL)?;
    reporter.log(format!("Loading model {repo_id}..."))?;
    let request = |loader| LoadModelRequest {
        source: repo_id.clone(),
        loader,
        quantization,
        device_map,
        dtype: (device_map == DeviceMap::Cpu).then_some(ComputeDtype::Float16),
        trust_remote_code: true,
    };
    match job.modality {
        Modality::Vision => {
            if let Err(e) = toolkit.load_model(&request(LoaderKind::ImageTextToText)).await {
                debug!("Image-text loader failed for {repo_id}, falling back to causal LM: {e}");
                reporter.token().check()?;
                toolkit.load_model(&request(LoaderKind::CausalLm)).await?;
            }
        }
        Modality::Text => toolkit.load_model(&request(LoaderKind::CausalLm)).await?,
    }

    enter_stage(reporter, stage::LOADING_TOKENIZER)?;
    toolkit.load_tokenizer(&repo_id, job.context_length).await?;
    reporter.log(format!("Tokenizer loaded (max length {})", job.context_length))?;

    if job.modality == Modality::Vision {
        enter_stage(reporter, stage::LOADING_IMAGE_PROCESSOR)?;
        match toolkit.load_image_processor(&repo_id).await {
            Ok(()) => reporter.log("Image processor loaded")?,
            Err(e) if e.is_not_found() => {
                info!("No image processor for {repo_id}: {}", e.message);
                reporter.log("Image processor not found (the model may be text-only)")?;
            }
            Err(e) => {
                warn!("Image processor for {repo_id} failed to load: {}", e.message);
                reporter.log(format!(
                    "Warning: could not load image processor: {}",
                    e.message
                ))?;
            }
        }
    }

    enter_stage(reporter, stage::FREEING_MEMORY)?;
    toolkit.release_memory(device_map).await?;

    enter_stage(reporter, stage::SAVING_MODEL)?;
    let output_dir = job.output_dir();
    tokio::fs::create_dir_all(&output_dir)
        .await
        .with_path(&output_dir)?;
    reporter.log(format!("Saving model to {}...", output_dir.display()))?;
    let artifacts = toolkit.save(&output_dir, job.safe_serialization).await?;
    debug!("Saved {} file(s) to {}", artifacts.files.len(), output_dir.display());

    reporter.log(format!("Model saved: {}", output_dir.display()))?;
    enter_stage(reporter, stage::COMPLETED)?;

    Ok(output_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stages_are_increasing() {
        let stages = [
            stage::INITIALIZING,
            stage::LOADING_MODEL,
            stage::LOADING_TOKENIZER,
            stage::LOADING_IMAGE_PROCESSOR,
            stage::FREEING_MEMORY,
            stage::SAVING_MODEL,
            stage::COMPLETED,
        ];
        assert!(stages.windows(2).all(|pair| pair[0].0 < pair[1].0));
        assert_eq!(stage::COMPLETED.0, 100);
    }

    #[test]
    fn test_failure_text_appends_traceback() {
        let err = ConverterError::Toolkit {
            operation: "load_model".into(),
            message: "404 Client Error".into(),
            traceback: Some("Traceback (most recent call last):\n  ...\n".into()),
        };
        assert_eq!(
            failure_text(&err),
            "Error: load_model failed: 404 Client Error\nTraceback (most recent call last):\n  ..."
        );
        assert_eq!(
            failure_text(&ConverterError::Other("boom".into())),
            "Error: boom"
        );
    }

    #[test]
    fn test_process_slot() {
        let slot = ProcessSlot::new();
        let shared = slot.clone();
        slot.record(4242);
        assert_eq!(shared.pid(), Some(4242));
        shared.clear();
        assert_eq!(slot.pid(), None);
        assert!(!slot.request_termination().unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_slot_sends_sigterm_without_reaping() {
        use std::os::unix::process::ExitStatusExt;

        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let slot = ProcessSlot::new();
        slot.record(child.id().unwrap());

        assert!(slot.request_termination().unwrap());

        // The owning Child still reaps the helper and sees the signal.
        let status = tokio::time::timeout(std::time::Duration::from_secs(10), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.signal(), Some(nix::sys::signal::Signal::SIGTERM as i32));
    }

    #[tokio::test]
    async fn test_guard_reports_cancellation_when_dropped_early() {
        let token = crate::cancel::CancellationToken::new();
        let (reporter, mut rx) = Reporter::channel(token.clone());
        token.cancel();

        drop(CompletionGuard::new(reporter));

        assert_eq!(
            rx.recv().await,
            Some(WorkerMessage::Log {
                text: CANCELLED_MESSAGE.to_string()
            })
        );
        assert_eq!(rx.recv().await, Some(WorkerMessage::Done));
    }
}
