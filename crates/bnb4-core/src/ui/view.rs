//! Display state of the current (or last) job.

use std::collections::VecDeque;

use serde::Serialize;

use super::sink::timestamped;
use crate::config::UiConfig;
use crate::job::WorkerMessage;

/// Color class of the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Idle,
    Running,
    Success,
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusLine {
    pub text: String,
    pub tone: Tone,
}

impl StatusLine {
    fn new(text: impl Into<String>, tone: Tone) -> Self {
        Self {
            text: text.into(),
            tone,
        }
    }
}

/// How a finished job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub progress: u8,
    pub status: StatusLine,
    /// Timestamped log lines, oldest first, capped at `UiConfig::MAX_LOG_LINES`.
    pub log: VecDeque<String>,
    pub can_start: bool,
    pub cancel_requested: bool,
    pub outcome: Option<JobOutcome>,
}

impl Default for JobView {
    fn default() -> Self {
        Self {
            progress: 0,
            status: StatusLine::new("Ready", Tone::Idle),
            log: VecDeque::new(),
            can_start: true,
            cancel_requested: false,
            outcome: None,
        }
    }
}

impl JobView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for a freshly started job. The log is kept.
    pub fn begin(&mut self) {
        self.progress = 0;
        self.status = StatusLine::new("Starting conversion...", Tone::Running);
        self.can_start = false;
        self.cancel_requested = false;
        self.outcome = None;
    }

    pub fn mark_cancel_requested(&mut self) {
        if self.can_start {
            return;
        }
        self.cancel_requested = true;
        self.status = StatusLine::new("Stopping...", Tone::Warning);
    }

    /// Apply one worker message. Returns the raw text of a log message so the
    /// caller can forward it to a sink.
    pub fn apply(&mut self, message: &WorkerMessage) -> Option<String> {
        match message {
            WorkerMessage::Log { text } => {
                self.push_log(timestamped(text));
                return Some(text.clone());
            }
            WorkerMessage::Progress { percent, stage } => {
                self.progress = (*percent).min(100);
                if let Some(stage) = stage.as_deref().filter(|s| !s.is_empty()) {
                    if !self.cancel_requested {
                        self.status = StatusLine::new(format!("Running: {stage}"), Tone::Running);
                    }
                }
            }
            WorkerMessage::Status { text } => {
                if !self.cancel_requested {
                    self.status = StatusLine::new(text.clone(), Tone::Running);
                }
            }
            WorkerMessage::Done => self.finish(),
        }
        None
    }

    fn finish(&mut self) {
        self.can_start = true;
        let outcome = if self.progress >= 100 {
            JobOutcome::Completed
        } else if self.cancel_requested {
            JobOutcome::Cancelled
        } else {
            JobOutcome::Failed
        };
        self.status = match outcome {
            JobOutcome::Completed => {
                StatusLine::new("Conversion completed successfully!", Tone::Success)
            }
            JobOutcome::Cancelled => StatusLine::new("Operation cancelled by user", Tone::Warning),
            JobOutcome::Failed => StatusLine::new("Conversion failed, see the log", Tone::Error),
        };
        self.outcome = Some(outcome);
    }

    fn push_log(&mut self, line: String) {
        if self.log.len() >= UiConfig::MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back(line);
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    pub fn is_running(&self) -> bool {
        !self.can_start
    }
}
