//! Conversion jobs: configuration, worker, messages and supervision.

mod message;
mod supervisor;
mod types;
mod worker;

pub use message::{Reporter, WorkerMessage, CANCELLED_MESSAGE};
pub use supervisor::{JobId, JobSupervisor, SupervisorOptions};
pub use types::{ComputeDtype, Device, DeviceMap, JobConfig, QuantType, QuantizationConfig};
pub use worker::{run_worker, stage, ProcessSlot};
