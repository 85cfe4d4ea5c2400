// ABOUTME: Registry of live tasks indexed by task id
// ABOUTME: Owns the task handles and their resource allocations until removal

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::resources::Allocation;
use crate::task::Task;

/// One live task together with the capacity it holds
#[derive(Clone)]
pub struct TrackedTask {
    pub task: Arc<dyn Task>,
    pub allocation: Allocation,
}

/// Live task registry
///
/// The owning executor keeps exactly one entry per active job; entries leave
/// the registry before their container is cleaned up.
#[derive(Default)]
pub struct TaskTracker {
    tasks: RwLock<HashMap<String, TrackedTask>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, task_id: &str, task: Arc<dyn Task>, allocation: Allocation) {
        self.tasks
            .write()
            .await
            .insert(task_id.to_string(), TrackedTask { task, allocation });
    }

    pub async fn get(&self, task_id: &str) -> Option<Arc<dyn Task>> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .map(|entry| entry.task.clone())
    }

    pub async fn remove(&self, task_id: &str) -> Option<TrackedTask> {
        self.tasks.write().await.remove(task_id)
    }

    /// Take every tracked task, leaving the registry empty
    pub async fn drain(&self) -> Vec<(String, TrackedTask)> {
        self.tasks.write().await.drain().collect()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::types::ResourceLimit;
    use async_trait::async_trait;

    /// Minimal in-memory backend standing in for a container task
    struct StubTask {
        id: String,
        resource: ResourceLimit,
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
            Ok(())
        }

        async fn execute(&self, input: &[u8]) -> Result<Vec<u8>> {
            Ok(input.to_vec())
        }

        async fn clean_up(&self) -> Result<()> {
            Ok(())
        }
    }

    fn stub(id: &str) -> Arc<dyn Task> {
        Arc::new(StubTask {
            id: id.to_string(),
            resource: ResourceLimit::default(),
        })
    }

    fn allocation() -> Allocation {
        Allocation {
            cpus: 1.0,
            memory_kib: 1024,
            gpu_devices: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_add_get_remove() {
        let tracker = TaskTracker::new();
        tracker.add("task_1", stub("task_1"), allocation()).await;

        let task = tracker.get("task_1").await.expect("tracked task");
        assert_eq!(task.id(), "task_1");

        let entry = tracker.remove("task_1").await.expect("tracked task");
        assert_eq!(entry.task.id(), "task_1");
        assert!(tracker.get("task_1").await.is_none());
    }

    #[tokio::test]
    async fn test_drain_empties_registry() {
        let tracker = TaskTracker::new();
        tracker.add("task_1", stub("task_1"), allocation()).await;
        tracker.add("task_2", stub("task_2"), allocation()).await;

        let drained = tracker.drain().await;
        assert_eq!(drained.len(), 2);
        assert!(tracker.is_empty().await);
    }
}
