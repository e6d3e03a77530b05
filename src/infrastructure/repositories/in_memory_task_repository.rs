use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::domain::repositories::{StoreError, StoreResult, TaskFilter, TaskRepository};
use crate::domain::task::{StatusUpdate, Task};

/// Volatile TaskRepository for tests and single-process development
///
/// Writes are atomic per record but do not survive a restart.
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &Task) -> StoreResult<()> {
        let mut tasks = self.tasks.write();
        if tasks.contains_key(&task.id()) {
            return Err(StoreError::DuplicateId(task.id()));
        }
        tasks.insert(task.id(), task.clone());
        Ok(())
    }

    async fn update_status(&self, id: Uuid, update: &StatusUpdate) -> StoreResult<()> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let from = task.status();
        task.apply(update)
            .map_err(|_| StoreError::InvalidTransition {
                id,
                from,
                to: update.status,
            })
    }

    async fn update_progress(&self, id: Uuid, value: f64) -> StoreResult<()> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        task.record_progress(value);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Task> {
        self.tasks
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .values()
            .filter(|t| filter.status.map_or(true, |s| t.status() == s))
            .cloned()
            .collect();

        tasks.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        Ok(tasks)
    }
}
