// ABOUTME: Micro-VM task backend selected by configuration
// ABOUTME: Runs the container lifecycle under a micro-VM runtime such as Kata

use async_trait::async_trait;

use crate::docker::DockerTask;
use crate::error::Result;
use crate::task::Task;
use crate::types::ResourceLimit;

/// A task isolated by a micro-VM container runtime
///
/// The engine drives the same container control plane as [`DockerTask`], but
/// the configured micro-VM runtime gives each task a hardware-virtualized
/// boundary instead of a shared kernel. The wire protocol is unchanged.
pub struct MicroVmTask {
    inner: DockerTask,
}

impl MicroVmTask {
    pub(crate) fn new(inner: DockerTask) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Task for MicroVmTask {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn resource(&self) -> &ResourceLimit {
        self.inner.resource()
    }

    async fn init(
        &mut self,
        network_hint: &str,
        port_hint: u16,
        gpu_devices: &[u32],
    ) -> Result<()> {
        self.inner.init(network_hint, port_hint, gpu_devices).await
    }

    async fn execute(&self, input: &[u8]) -> Result<Vec<u8>> {
        self.inner.execute(input).await
    }

    async fn clean_up(&self) -> Result<()> {
        self.inner.clean_up().await
    }
}
