//! Front-end independent UI state: form, job view, log sinks and the
//! controller tying them to the supervisor.

mod controller;
mod form;
mod sink;
mod view;

pub use controller::ConverterController;
pub use form::FormState;
pub use sink::{timestamped, BufferSink, LogSink, TimestampedSink, TracingSink};
pub use view::{JobOutcome, JobView, StatusLine, Tone};
