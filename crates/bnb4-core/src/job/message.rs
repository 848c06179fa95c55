//! Messages sent from a worker to its supervisor.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::Result;

/// Text logged when a job stops because the user asked it to.
pub const CANCELLED_MESSAGE: &str = "Operation cancelled by user";

/// One message on the worker → supervisor channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Log {
        text: String,
    },
    Progress {
        percent: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
    },
    Status {
        text: String,
    },
    /// Final message of every job, whatever its outcome.
    Done,
}

impl WorkerMessage {
    pub fn is_done(&self) -> bool {
        matches!(self, WorkerMessage::Done)
    }
}

/// Sending half of a job's message channel.
///
/// Every public send is a cancellation checkpoint: once the job's token is
/// cancelled, `log`, `progress` and `status` return
/// [`ConverterError::Cancelled`](crate::ConverterError::Cancelled) without
/// sending anything. Sends never block.
#[derive(Debug, Clone)]
pub struct Reporter {
    tx: UnboundedSender<WorkerMessage>,
    token: CancellationToken,
}

impl Reporter {
    pub fn new(tx: UnboundedSender<WorkerMessage>, token: CancellationToken) -> Self {
        Self { tx, token }
    }

    /// Create a reporter and the receiver it feeds.
    pub fn channel(token: CancellationToken) -> (Self, UnboundedReceiver<WorkerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx, token), rx)
    }

    pub fn log(&self, text: impl Into<String>) -> Result<()> {
        self.checked_send(WorkerMessage::Log { text: text.into() })
    }

    pub fn progress(&self, percent: u8) -> Result<()> {
        self.checked_send(WorkerMessage::Progress {
            percent: percent.min(100),
            stage: None,
        })
    }

    /// Progress milestone with a stage label.
    pub fn stage(&self, percent: u8, label: &str) -> Result<()> {
        self.checked_send(WorkerMessage::Progress {
            percent: percent.min(100),
            stage: Some(label.to_string()),
        })
    }

    pub fn status(&self, text: impl Into<String>) -> Result<()> {
        self.checked_send(WorkerMessage::Status { text: text.into() })
    }

    /// Forward a line printed by the model library as a log message.
    ///
    /// Not a checkpoint: the caller is a background reader, so after
    /// cancellation the line is dropped instead of raising an error.
    pub fn relay(&self, text: impl Into<String>) {
        if !self.token.is_cancelled() {
            self.send_unchecked(WorkerMessage::Log { text: text.into() });
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn checked_send(&self, message: WorkerMessage) -> Result<()> {
        self.token.check()?;
        self.send_unchecked(message);
        Ok(())
    }

    /// Send regardless of cancellation. Reserved for the final outcome log
    /// and the completion marker.
    pub(crate) fn send_unchecked(&self, message: WorkerMessage) {
        if self.tx.send(message).is_err() {
            debug!("Supervisor dropped the message channel");
        }
    }
}
