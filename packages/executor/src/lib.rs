// ABOUTME: Task lifecycle and execution engine for MECA edge compute
// ABOUTME: Drives Docker-backed tasks with SGX/GPU attachment, readiness polling, and the execute/attest protocol

pub mod docker;
pub mod error;
pub mod executor;
pub mod microvm;
pub mod resources;
pub mod task;
pub mod tracker;
pub mod types;

// Re-export commonly used types
pub use docker::{DockerTask, DockerTaskFactory, ATTESTATION_REQUEST};
pub use error::{ExecutorError, Result};
pub use executor::{ExecutorConfig, MecaExecutor};
pub use microvm::MicroVmTask;
pub use resources::{Allocation, ResourceManager};
pub use task::{Task, TaskFactory};
pub use tracker::{TaskTracker, TrackedTask};
pub use types::{EnclaveConfig, ResourceLimit, TaskConfig, TaskType};
