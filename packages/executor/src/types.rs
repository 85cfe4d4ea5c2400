// ABOUTME: Core type definitions for task execution
// ABOUTME: Defines resource descriptors, enclave settings, and task configuration

use serde::{Deserialize, Serialize};

use crate::error::{ExecutorError, Result};

/// Resource limits granted to a single task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimit {
    /// CPU cores (can be fractional, e.g., 0.5 for half a core)
    pub cpus: f64,
    /// Memory limit in KiB
    pub memory_kib: i64,
    /// Whether the task wants GPU devices attached
    #[serde(default)]
    pub use_gpu: bool,
}

impl Default for ResourceLimit {
    fn default() -> Self {
        Self {
            cpus: 1.0,
            memory_kib: 1024,
            use_gpu: false,
        }
    }
}

/// Host-side paths for SGX enclave execution
///
/// The container-internal mount points are fixed; only the host side varies
/// between machines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnclaveConfig {
    /// Host path of the SGX enclave device (e.g., /dev/sgx_enclave)
    pub device_path: String,
    /// Host path of the AESM daemon socket directory
    pub aesm_socket_path: String,
}

/// Backend selector for task execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// OS-level container
    Container,
    /// Micro-VM isolated container runtime (e.g., Kata)
    MicroVm,
}

impl Default for TaskType {
    fn default() -> Self {
        TaskType::Container
    }
}

/// Configuration for building one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Container image identifier (e.g., "docker.io/lib/foo:1.2")
    pub image_id: String,
    /// Backend used to isolate the task
    #[serde(default)]
    pub task_type: TaskType,
    /// Container runtime name; empty string selects the engine default
    #[serde(default)]
    pub runtime: String,
    /// Resource limits applied to the container
    pub resource: ResourceLimit,
    /// Whether the task runs inside an SGX enclave
    #[serde(default)]
    pub use_sgx: bool,
    /// SGX host paths; required when use_sgx is set
    #[serde(default)]
    pub sgx: Option<EnclaveConfig>,
}

impl TaskConfig {
    /// Check the configuration invariants before any engine call
    pub fn validate(&self) -> Result<()> {
        if self.image_id.is_empty() {
            return Err(ExecutorError::InvalidConfig(
                "image_id cannot be empty".to_string(),
            ));
        }
        if self.resource.cpus < 0.0 {
            return Err(ExecutorError::InvalidConfig(
                "cpus cannot be negative".to_string(),
            ));
        }
        if self.resource.memory_kib < 0 {
            return Err(ExecutorError::InvalidConfig(
                "memory_kib cannot be negative".to_string(),
            ));
        }
        if self.use_sgx && self.sgx.is_none() {
            return Err(ExecutorError::InvalidConfig(
                "use_sgx is set but no enclave paths are configured".to_string(),
            ));
        }
        Ok(())
    }
}
