// ABOUTME: Resource accounting for task admission
// ABOUTME: Tracks free CPU, memory, and GPU devices across all live tasks

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{ExecutorError, Result};
use crate::types::ResourceLimit;

/// Resources granted to one admitted task
///
/// Handed back to [`ResourceManager::release`] when the task is discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub cpus: f64,
    pub memory_kib: i64,
    /// GPU device indices granted to this task
    pub gpu_devices: Vec<u32>,
}

struct Inner {
    free_cpus: f64,
    free_memory_kib: i64,
    free_gpus: Vec<u32>,
}

/// Admission accounting shared by all tasks of one executor
///
/// The handle is safe for concurrent use; all bookkeeping sits behind one
/// async mutex.
pub struct ResourceManager {
    inner: Mutex<Inner>,
}

impl ResourceManager {
    pub fn new(cpus: f64, memory_kib: i64, gpu_devices: Vec<u32>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                free_cpus: cpus,
                free_memory_kib: memory_kib,
                free_gpus: gpu_devices,
            }),
        }
    }

    /// Reserve capacity for a task, or fail if the host cannot hold it
    ///
    /// A GPU task is granted one device from the free pool.
    pub async fn reserve(&self, limit: &ResourceLimit) -> Result<Allocation> {
        let mut inner = self.inner.lock().await;

        if limit.cpus > inner.free_cpus {
            return Err(ExecutorError::ResourcesExhausted { resource: "cpu" });
        }
        if limit.memory_kib > inner.free_memory_kib {
            return Err(ExecutorError::ResourcesExhausted { resource: "memory" });
        }

        let gpu_devices = if limit.use_gpu {
            match inner.free_gpus.pop() {
                Some(device) => vec![device],
                None => return Err(ExecutorError::ResourcesExhausted { resource: "gpu" }),
            }
        } else {
            Vec::new()
        };

        inner.free_cpus -= limit.cpus;
        inner.free_memory_kib -= limit.memory_kib;
        debug!(
            "reserved {} cpus, {} KiB, gpus {:?}; {} cpus and {} KiB remain free",
            limit.cpus, limit.memory_kib, gpu_devices, inner.free_cpus, inner.free_memory_kib
        );

        Ok(Allocation {
            cpus: limit.cpus,
            memory_kib: limit.memory_kib,
            gpu_devices,
        })
    }

    /// Return a task's capacity to the free pool
    pub async fn release(&self, allocation: &Allocation) {
        let mut inner = self.inner.lock().await;
        inner.free_cpus += allocation.cpus;
        inner.free_memory_kib += allocation.memory_kib;
        inner.free_gpus.extend(allocation.gpu_devices.iter().copied());
        debug!(
            "released {} cpus, {} KiB, gpus {:?}",
            allocation.cpus, allocation.memory_kib, allocation.gpu_devices
        );
    }
}
