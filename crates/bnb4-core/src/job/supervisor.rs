//! Job supervision: starts the worker, relays its messages and stops it.
//!
//! At most one job runs at a time. The supervisor owns the receiving half of
//! the job's channel; the UI drains it with [`JobSupervisor::poll`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::message::{Reporter, WorkerMessage};
use super::types::JobConfig;
use super::worker::{run_worker, ProcessSlot};
use crate::cancel::CancellationToken;
use crate::config::WorkerConfig;
use crate::toolkit::ToolkitFactory;
use crate::{ConverterError, Result};

/// Identifier of a started job (`job-<n>`).
pub type JobId = String;

/// Tunables for [`JobSupervisor`].
#[derive(Debug, Clone, Copy)]
pub struct SupervisorOptions {
    /// How long a cancelled worker may keep running before it is terminated.
    pub hard_stop_grace: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            hard_stop_grace: WorkerConfig::HARD_STOP_GRACE,
        }
    }
}

struct ActiveJob {
    id: JobId,
    token: CancellationToken,
    receiver: UnboundedReceiver<WorkerMessage>,
    task: JoinHandle<()>,
    process: ProcessSlot,
    hard_stop_scheduled: bool,
}

/// Owns the running job, if any.
pub struct JobSupervisor {
    factory: Arc<dyn ToolkitFactory>,
    options: SupervisorOptions,
    active: Mutex<Option<ActiveJob>>,
    id_counter: AtomicU64,
}

impl JobSupervisor {
    pub fn new(factory: Arc<dyn ToolkitFactory>, options: SupervisorOptions) -> Self {
        Self {
            factory,
            options,
            active: Mutex::new(None),
            id_counter: AtomicU64::new(0),
        }
    }

    /// Start a job. Must be called from within a tokio runtime.
    ///
    /// The configuration is validated first; an invalid one never spawns a
    /// worker.
    pub fn start(&self, job: JobConfig) -> Result<JobId> {
        job.validate()?;

        let mut active = self.active.lock().expect("active job lock poisoned");
        if let Some(running) = active.as_ref() {
            return Err(ConverterError::JobAlreadyRunning {
                job_id: running.id.clone(),
            });
        }

        let id = format!("job-{}", self.id_counter.fetch_add(1, Ordering::SeqCst) + 1);
        let token = CancellationToken::new();
        let (reporter, receiver) = Reporter::channel(token.clone());
        let process = ProcessSlot::new();

        info!("Starting {} for {}", id, job.repo_id());
        let task = tokio::spawn(run_worker(
            job,
            self.factory.clone(),
            reporter,
            process.clone(),
        ));

        *active = Some(ActiveJob {
            id: id.clone(),
            token,
            receiver,
            task,
            process,
            hard_stop_scheduled: false,
        });

        Ok(id)
    }

    /// Request cancellation of the running job.
    ///
    /// The worker stops at its next checkpoint. If it is still running once
    /// the grace period has passed, its helper process is asked to exit and
    /// the task is aborted shortly after, which kills the helper. Returns
    /// whether a job was running.
    pub fn cancel(&self) -> bool {
        let mut active = self.active.lock().expect("active job lock poisoned");
        let Some(job) = active.as_mut() else {
            return false;
        };

        job.token.cancel();
        if job.hard_stop_scheduled {
            return true;
        }
        job.hard_stop_scheduled = true;
        info!("Cancellation requested for {}", job.id);

        let abort = job.task.abort_handle();
        let process = job.process.clone();
        let grace = self.options.hard_stop_grace;
        let id = job.id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if abort.is_finished() {
                return;
            }
            warn!("{} did not stop within {:?}, terminating its helper", id, grace);
            let requested =
                tokio::task::spawn_blocking(move || process.request_termination()).await;
            match requested {
                Ok(Ok(true)) => {
                    tokio::time::sleep(WorkerConfig::TERMINATE_GRACE).await;
                    if abort.is_finished() {
                        debug!("{} stopped after its helper was terminated", id);
                        return;
                    }
                }
                Ok(Ok(false)) => debug!("{} has no helper process to terminate", id),
                Ok(Err(e)) => warn!("Failed to terminate helper of {}: {}", id, e),
                Err(e) => warn!("Terminate task for {} failed: {}", id, e),
            }
            // Dropping the toolkit kills the helper if it is still alive.
            abort.abort();
        });

        true
    }

    /// Drain pending worker messages without blocking.
    ///
    /// A `done` message ends the job; anything queued after it is discarded.
    /// A worker that vanished without `done` gets one synthesized.
    pub fn poll(&self) -> Vec<WorkerMessage> {
        let mut active = self.active.lock().expect("active job lock poisoned");
        let Some(job) = active.as_mut() else {
            return Vec::new();
        };

        let mut messages = Vec::new();
        let mut finished = false;
        loop {
            match job.receiver.try_recv() {
                Ok(message) => {
                    let done = message.is_done();
                    messages.push(message);
                    if done {
                        finished = true;
                        break;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!("{} closed its channel without completing", job.id);
                    messages.push(WorkerMessage::Done);
                    finished = true;
                    break;
                }
            }
        }

        if finished {
            debug!("{} finished", job.id);
            *active = None;
        }
        messages
    }

    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .expect("active job lock poisoned")
            .is_some()
    }

    pub fn active_job_id(&self) -> Option<JobId> {
        self.active
            .lock()
            .expect("active job lock poisoned")
            .as_ref()
            .map(|job| job.id.clone())
    }

    /// Cancel and abort the running job immediately, then wait for its task
    /// to unwind.
    pub async fn shutdown(&self) {
        let job = self.active.lock().expect("active job lock poisoned").take();
        let Some(job) = job else {
            return;
        };

        info!("Stopping {} for shutdown", job.id);
        job.token.cancel();
        job.task.abort();
        if let Err(e) = job.task.await {
            if !e.is_cancelled() {
                warn!("{} ended abnormally: {}", job.id, e);
            }
        }
    }
}

impl Drop for JobSupervisor {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(job) = active.take() {
                job.token.cancel();
                job.task.abort();
            }
        }
    }
}
