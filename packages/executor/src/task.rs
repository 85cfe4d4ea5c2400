// ABOUTME: Task trait and factory contract for execution backends
// ABOUTME: Defines the polymorphic lifecycle interface shared by container and micro-VM tasks

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ResourceLimit, TaskConfig};

/// One schedulable unit of isolated, network-reachable compute work
///
/// Lifecycle: built by a [`TaskFactory`] in an uninitialized state, made
/// executable by a single `init` call, serves any number of `execute` calls,
/// and is discarded after `clean_up`. The owning scheduler holds exactly one
/// task per active job and calls `clean_up` exactly once when done with it.
#[async_trait]
pub trait Task: Send + Sync {
    /// Identifier the task was built with
    fn id(&self) -> &str;

    /// Resource limits the task was built with
    fn resource(&self) -> &ResourceLimit;

    /// Attach the task to its network, create and start the backing sandbox,
    /// and wait until the in-sandbox server is ready to serve requests.
    ///
    /// `gpu_devices` lists the GPU indices granted by admission; it is only
    /// consulted when the resource descriptor requests GPU. Init blocks its
    /// caller for at most the readiness bound and is a single-shot operation:
    /// calling it twice on the same instance is not supported.
    async fn init(
        &mut self,
        network_hint: &str,
        port_hint: u16,
        gpu_devices: &[u32],
    ) -> Result<()>;

    /// Proxy `input` to the in-sandbox task server and return its response
    ///
    /// Safe to call concurrently; this layer does not serialize callers and
    /// performs no retries.
    async fn execute(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// Remove the backing sandbox along with any anonymous volumes
    ///
    /// Calling this on a task that never finished `init` is a no-op.
    async fn clean_up(&self) -> Result<()>;
}

/// Factory contract shared by all task backends
///
/// Building a container-backed task is pure construction and cannot fail;
/// the `Result` exists so backends with fallible construction fit the same
/// contract.
pub trait TaskFactory: Send + Sync {
    fn build(&self, task_id: &str, config: TaskConfig) -> Result<Box<dyn Task>>;
}
