// ABOUTME: Top-level executor facade tying factory, tracker, and resource accounting together
// ABOUTME: Admits tasks on first use, proxies execute calls under a deadline, and tears tasks down

use std::sync::Arc;
use std::time::Duration;

use bollard::Docker;
use serde::Deserialize;
use tracing::{info, warn};

use crate::docker::DockerTaskFactory;
use crate::error::{ExecutorError, Result};
use crate::resources::ResourceManager;
use crate::task::{Task, TaskFactory};
use crate::tracker::TaskTracker;
use crate::types::TaskConfig;

/// Host-level executor settings
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Deadline for a single execute call, in seconds
    pub timeout_secs: u64,
    /// CPU cores shareable across all tasks
    pub cpus: f64,
    /// Memory shareable across all tasks, in KiB
    pub memory_kib: i64,
    /// GPU device indices available for GPU tasks
    #[serde(default)]
    pub gpu_devices: Vec<u32>,
    /// Container runtime used for micro-VM tasks (e.g., kata)
    #[serde(default)]
    pub microvm_runtime: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            cpus: 2.0,
            memory_kib: 2 * 1024 * 1024,
            gpu_devices: Vec::new(),
            microvm_runtime: None,
        }
    }
}

/// Drives the full lifecycle of tasks on one host
///
/// The first execute for a task id admits it: the configuration is
/// validated, capacity reserved, the task built, initialized on the overlay
/// network, and tracked. Later calls reuse the live task. Admission for one
/// task id is expected to be driven by a single scheduler thread; execute
/// calls on an admitted task may be concurrent.
pub struct MecaExecutor {
    factory: Box<dyn TaskFactory>,
    tracker: TaskTracker,
    resources: ResourceManager,
    timeout: Duration,
}

impl MecaExecutor {
    /// Connect to the local Docker engine and build an executor around it
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        let docker = Docker::connect_with_defaults()?;
        let factory = DockerTaskFactory::new(docker, config.microvm_runtime.clone());
        Ok(Self::with_factory(config, Box::new(factory)))
    }

    /// Build an executor around an injected task factory
    pub fn with_factory(config: ExecutorConfig, factory: Box<dyn TaskFactory>) -> Self {
        Self {
            factory,
            tracker: TaskTracker::new(),
            resources: ResourceManager::new(config.cpus, config.memory_kib, config.gpu_devices),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Run `input` on the task registered under `task_id`, admitting it first
    /// if it is not yet live
    pub async fn execute(
        &self,
        task_id: &str,
        config: TaskConfig,
        input: &[u8],
    ) -> Result<Vec<u8>> {
        let task = match self.tracker.get(task_id).await {
            Some(task) => task,
            None => self.admit(task_id, config).await?,
        };

        match tokio::time::timeout(self.timeout, task.execute(input)).await {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::Timeout {
                seconds: self.timeout.as_secs(),
            }),
        }
    }

    /// Tear down the task registered under `task_id` and free its capacity
    pub async fn remove_task(&self, task_id: &str) -> Result<()> {
        let entry = self
            .tracker
            .remove(task_id)
            .await
            .ok_or_else(|| ExecutorError::TaskNotFound(task_id.to_string()))?;
        let result = entry.task.clean_up().await;
        self.resources.release(&entry.allocation).await;
        result
    }

    /// Tear down every live task
    ///
    /// Cleanup failures are logged and do not stop the teardown of the
    /// remaining tasks.
    pub async fn stop(&self) {
        for (task_id, entry) in self.tracker.drain().await {
            if let Err(e) = entry.task.clean_up().await {
                warn!("failed to clean up task {}: {}", task_id, e);
            }
            self.resources.release(&entry.allocation).await;
        }
        info!("executor stopped");
    }

    /// Number of live tasks
    pub async fn task_count(&self) -> usize {
        self.tracker.len().await
    }

    async fn admit(&self, task_id: &str, config: TaskConfig) -> Result<Arc<dyn Task>> {
        config.validate()?;
        let allocation = self.resources.reserve(&config.resource).await?;

        let mut task = match self.factory.build(task_id, config) {
            Ok(task) => task,
            Err(e) => {
                self.resources.release(&allocation).await;
                return Err(e);
            }
        };

        if let Err(e) = task.init("", 0, &allocation.gpu_devices).await {
            // A failed init leaves the task unusable; discard it, but the
            // container may still exist and must be removed.
            if let Err(cleanup_err) = task.clean_up().await {
                warn!(
                    "failed to clean up task {} after init error: {}",
                    task_id, cleanup_err
                );
            }
            self.resources.release(&allocation).await;
            return Err(e);
        }

        let task: Arc<dyn Task> = Arc::from(task);
        self.tracker.add(task_id, task.clone(), allocation).await;
        info!("admitted task {}", task_id);
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResourceLimit, TaskType};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubTask {
        id: String,
        resource: ResourceLimit,
        fail_init: bool,
        execute_delay: Option<Duration>,
        cleanups: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Task for StubTask {
        fn id(&self) -> &str {
            &self.id
        }

        fn resource(&self) -> &ResourceLimit {
            &self.resource
        }

        async fn init(&mut self, _network: &str, _port: u16, _gpus: &[u32]) -> Result<()> {
            if self.fail_init {
                Err(ExecutorError::StartTimeout)
            } else {
                Ok(())
            }
        }

        async fn execute(&self, input: &[u8]) -> Result<Vec<u8>> {
            if let Some(delay) = self.execute_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(input.to_vec())
        }

        async fn clean_up(&self) -> Result<()> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StubFactory {
        builds: AtomicUsize,
        fail_init: bool,
        execute_delay: Option<Duration>,
        cleanups: Arc<AtomicUsize>,
    }

    impl StubFactory {
        fn new() -> Self {
            Self {
                builds: AtomicUsize::new(0),
                fail_init: false,
                execute_delay: None,
                cleanups: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl TaskFactory for StubFactory {
        fn build(&self, task_id: &str, config: TaskConfig) -> Result<Box<dyn Task>> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StubTask {
                id: task_id.to_string(),
                resource: config.resource,
                fail_init: self.fail_init,
                execute_delay: self.execute_delay,
                cleanups: self.cleanups.clone(),
            }))
        }
    }

    fn task_config() -> TaskConfig {
        TaskConfig {
            image_id: "meca/echo:latest".to_string(),
            task_type: TaskType::Container,
            runtime: String::new(),
            resource: ResourceLimit {
                cpus: 1.0,
                memory_kib: 1024,
                use_gpu: false,
            },
            use_sgx: false,
            sgx: None,
        }
    }

    fn executor(factory: StubFactory) -> MecaExecutor {
        MecaExecutor::with_factory(
            ExecutorConfig {
                timeout_secs: 1,
                cpus: 2.0,
                memory_kib: 4096,
                gpu_devices: Vec::new(),
                microvm_runtime: None,
            },
            Box::new(factory),
        )
    }

    #[tokio::test]
    async fn test_execute_admits_once_and_reuses() {
        let executor = executor(StubFactory::new());

        let output = executor
            .execute("task_1", task_config(), b"first")
            .await
            .unwrap();
        assert_eq!(output, b"first");

        let output = executor
            .execute("task_1", task_config(), b"second")
            .await
            .unwrap();
        assert_eq!(output, b"second");
        assert_eq!(executor.task_count().await, 1);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_admission() {
        let executor = executor(StubFactory::new());
        let mut config = task_config();
        config.use_sgx = true;

        assert!(matches!(
            executor.execute("task_1", config, b"{}").await,
            Err(ExecutorError::InvalidConfig(_))
        ));
        assert_eq!(executor.task_count().await, 0);
    }

    #[tokio::test]
    async fn test_admission_respects_capacity() {
        let executor = executor(StubFactory::new());
        let mut config = task_config();
        config.resource.cpus = 2.0;

        executor
            .execute("task_1", config.clone(), b"{}")
            .await
            .unwrap();
        assert!(matches!(
            executor.execute("task_2", config.clone(), b"{}").await,
            Err(ExecutorError::ResourcesExhausted { resource: "cpu" })
        ));

        // Removing the first task frees its capacity.
        executor.remove_task("task_1").await.unwrap();
        executor.execute("task_2", config, b"{}").await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_init_releases_capacity_and_cleans_up() {
        let mut factory = StubFactory::new();
        factory.fail_init = true;
        let cleanups = factory.cleanups.clone();
        let executor = executor(factory);

        let mut config = task_config();
        config.resource.cpus = 2.0;
        assert!(matches!(
            executor.execute("task_1", config.clone(), b"{}").await,
            Err(ExecutorError::StartTimeout)
        ));
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(executor.task_count().await, 0);

        // The reservation was rolled back, so capacity-wise admission of a
        // same-sized task is still possible.
        assert!(matches!(
            executor.execute("task_2", config, b"{}").await,
            Err(ExecutorError::StartTimeout)
        ));
    }

    #[tokio::test]
    async fn test_execute_deadline() {
        let mut factory = StubFactory::new();
        factory.execute_delay = Some(Duration::from_secs(5));
        let executor = executor(factory);

        assert!(matches!(
            executor.execute("task_1", task_config(), b"{}").await,
            Err(ExecutorError::Timeout { seconds: 1 })
        ));
    }

    #[tokio::test]
    async fn test_stop_tears_down_all_tasks() {
        let factory = StubFactory::new();
        let cleanups = factory.cleanups.clone();
        let executor = executor(factory);

        executor
            .execute("task_1", task_config(), b"{}")
            .await
            .unwrap();
        executor
            .execute("task_2", task_config(), b"{}")
            .await
            .unwrap();

        executor.stop().await;
        assert_eq!(executor.task_count().await, 0);
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_executor_config_deserializes_with_defaults() {
        let config: ExecutorConfig = serde_json::from_str(
            r#"{ "timeout_secs": 30, "cpus": 4.0, "memory_kib": 8192 }"#,
        )
        .unwrap();
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.gpu_devices, Vec::<u32>::new());
        assert_eq!(config.microvm_runtime, None);
    }

    #[tokio::test]
    async fn test_remove_unknown_task() {
        let executor = executor(StubFactory::new());
        assert!(matches!(
            executor.remove_task("missing").await,
            Err(ExecutorError::TaskNotFound(_))
        ));
    }
}
