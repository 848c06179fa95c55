//! Log sink printing above the progress bar.

use bnb4_core::LogSink;
use indicatif::ProgressBar;

/// Prints each line above `bar` so the bar stays at the bottom.
#[derive(Clone)]
pub struct ProgressBarSink {
    bar: ProgressBar,
}

impl ProgressBarSink {
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl LogSink for ProgressBarSink {
    fn write_line(&self, line: &str) {
        self.bar.println(line);
    }
}
