//! Checkpoint store
//!
//! The core specifies keys and record shapes, not a storage engine:
//! tasks by identifier, plans by handle with their wave/task maps.
//! The in-memory implementation backs tests and single-process runs;
//! durable engines implement the same trait outside the core.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::{Feature, Task, WavePlan};

/// Error type for checkpoint operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store error: {0}")]
    Backend(String),
}

/// Persistent record of one plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRecord {
    /// Plan handle
    pub plan_id: String,

    /// The feature the plan was built from
    pub feature: Feature,

    /// Resolved wave structure
    pub waves: WavePlan,

    /// All task IDs in the plan
    pub task_ids: Vec<String>,
}

/// Narrow key-value interface for checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn put_task(&self, task: &Task) -> Result<(), StoreError>;
    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StoreError>;
    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError>;

    async fn put_plan(&self, record: &PlanRecord) -> Result<(), StoreError>;
    async fn get_plan(&self, plan_id: &str) -> Result<Option<PlanRecord>, StoreError>;
}

/// In-memory checkpoint store
#[derive(Default)]
pub struct MemoryCheckpointStore {
    tasks: Mutex<HashMap<String, Task>>,
    plans: Mutex<HashMap<String, PlanRecord>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put_task(&self, task: &Task) -> Result<(), StoreError> {
        self.tasks.lock().await.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.lock().await.get(task_id).cloned())
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.lock().await;
        let mut all: Vec<_> = tasks.values().cloned().collect();
        all.sort_by_key(|t| t.created_at);
        Ok(all)
    }

    async fn put_plan(&self, record: &PlanRecord) -> Result<(), StoreError> {
        self.plans.lock().await.insert(record.plan_id.clone(), record.clone());
        Ok(())
    }

    async fn get_plan(&self, plan_id: &str) -> Result<Option<PlanRecord>, StoreError> {
        Ok(self.plans.lock().await.get(plan_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Wave, WavePlan};

    #[tokio::test]
    async fn test_task_round_trip() {
        let store = MemoryCheckpointStore::new();
        let mut task = Task::with_id("task-1", "Sample");
        task.iteration = 3;

        store.put_task(&task).await.unwrap();
        let loaded = store.get_task("task-1").await.unwrap().unwrap();
        assert_eq!(loaded.iteration, 3);

        assert!(store.get_task("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_task_overwrites() {
        let store = MemoryCheckpointStore::new();
        let mut task = Task::with_id("task-1", "Sample");

        store.put_task(&task).await.unwrap();
        task.iteration = 7;
        store.put_task(&task).await.unwrap();

        assert_eq!(store.get_task("task-1").await.unwrap().unwrap().iteration, 7);
        assert_eq!(store.list_tasks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_plan_round_trip() {
        let store = MemoryCheckpointStore::new();
        let record = PlanRecord {
            plan_id: "plan-1".to_string(),
            feature: Feature::new("Greet", "Add greet"),
            waves: WavePlan::new(vec![Wave::new(vec!["task-1".to_string()])]),
            task_ids: vec!["task-1".to_string()],
        };

        store.put_plan(&record).await.unwrap();
        let loaded = store.get_plan("plan-1").await.unwrap().unwrap();
        assert_eq!(loaded.waves.task_count(), 1);
    }
}
