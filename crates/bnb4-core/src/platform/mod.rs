//! Platform abstraction layer.
//!
//! All `#[cfg]` blocks for OS-specific behavior live here:
//! - `paths` - interpreter locations inside virtual environments
//! - `process` - termination requests for helper processes

pub mod paths;
pub mod process;

pub use paths::{system_python, venv_python};
pub use process::request_termination;
