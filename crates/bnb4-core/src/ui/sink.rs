//! Destinations for user-visible job text.

use std::sync::{Arc, Mutex};

use chrono::Local;
use tracing::info;

/// Receives user-visible log lines, one call per line.
pub trait LogSink: Send + Sync {
    fn write_line(&self, line: &str);
}

impl<S: LogSink + ?Sized> LogSink for Arc<S> {
    fn write_line(&self, line: &str) {
        (**self).write_line(line)
    }
}

/// `[HH:MM:SS] text` using local time.
pub fn timestamped(text: &str) -> String {
    format!("[{}] {}", Local::now().format("%H:%M:%S"), text)
}

/// Forwards lines to `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write_line(&self, line: &str) {
        info!(target: "bnb4::job", "{}", line);
    }
}

/// Collects lines in memory. Clones share the buffer.
#[derive(Debug, Clone, Default)]
pub struct BufferSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("buffer sink lock poisoned").clone()
    }

    pub fn clear(&self) {
        self.lines.lock().expect("buffer sink lock poisoned").clear();
    }
}

impl LogSink for BufferSink {
    fn write_line(&self, line: &str) {
        self.lines
            .lock()
            .expect("buffer sink lock poisoned")
            .push(line.to_string());
    }
}

/// Prefixes every line with the local time before passing it on.
#[derive(Debug, Clone)]
pub struct TimestampedSink<S> {
    inner: S,
}

impl<S: LogSink> TimestampedSink<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: LogSink> LogSink for TimestampedSink<S> {
    fn write_line(&self, line: &str) {
        self.inner.write_line(&timestamped(line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_sink_shares_lines() {
        let sink = BufferSink::new();
        let shared: Arc<dyn LogSink> = Arc::new(sink.clone());

        shared.write_line("one");
        shared.write_line("two");

        assert_eq!(sink.lines(), vec!["one", "two"]);
        sink.clear();
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn test_timestamped_sink() {
        let buffer = BufferSink::new();
        let sink = TimestampedSink::new(buffer.clone());
        sink.write_line("Model saved");

        let line = &buffer.lines()[0];
        assert!(line.starts_with('['));
        assert_eq!(&line[9..], "] Model saved");
        assert_eq!(line.as_bytes()[3], b':');
    }
}
