use async_trait::async_trait;
use uuid::Uuid;

use super::store_error::StoreResult;
use crate::domain::task::{StatusUpdate, Task, TaskStatus};

/// Listing filter for tasks, newest first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub limit: Option<usize>,
}

impl TaskFilter {
    /// Matches every task
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches tasks in `status`
    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            limit: None,
        }
    }

    /// Caps the number of returned tasks
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Repository trait for the Task aggregate
///
/// Every write must be durable before the call returns: the task manager's
/// wait and cancel logic depends on terminal state never being lost.
/// Implementations must be safe for concurrent writers on different tasks;
/// the manager serializes writes per task.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a new task record
    ///
    /// Fails with `StoreError::DuplicateId` if the id is already taken.
    async fn create(&self, task: &Task) -> StoreResult<()>;

    /// Atomically apply a status transition with its result, error and timestamps
    ///
    /// Fails with `StoreError::InvalidTransition` when the stored status
    /// cannot move to `update.status`.
    async fn update_status(&self, id: Uuid, update: &StatusUpdate) -> StoreResult<()>;

    /// Raise the progress of a running task, clamped to `[0, 100]`
    ///
    /// Lower values and updates to non-running tasks are ignored.
    async fn update_progress(&self, id: Uuid, value: f64) -> StoreResult<()>;

    /// Fetch the current record
    async fn get(&self, id: Uuid) -> StoreResult<Task>;

    /// List tasks, newest first
    async fn list(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>>;
}
