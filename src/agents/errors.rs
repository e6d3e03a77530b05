use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::repositories::StoreError;

/// Errors raised inside an agent body
///
/// The task manager records these as a Failed task; they never reach
/// callers of `submit`, `status` or `await_task`.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{0}")]
    ExecutionFailed(String),

    #[error("Invalid task configuration: {0}")]
    InvalidConfig(String),

    #[error("Task was cancelled")]
    Cancelled,

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Message delivery failed: {0}")]
    MessageDeliveryFailed(String),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Workflow '{workflow}' failed at step {step} ({step_name}): {reason}")]
    StepFailed {
        workflow: String,
        step: usize,
        step_name: String,
        reason: String,
        /// Outcomes of every step attempted so far, failing step included
        partial_results: Value,
    },

    #[error("Task manager error: {0}")]
    Manager(#[from] TaskManagerError),
}

impl AgentError {
    /// Structured context worth keeping next to the error text
    pub fn context(&self) -> Option<&Value> {
        match self {
            AgentError::StepFailed {
                partial_results, ..
            } => Some(partial_results),
            _ => None,
        }
    }

    /// Text recorded on the failed task
    pub fn describe(&self) -> String {
        match self.context() {
            Some(context) => format!("{}; partial results: {}", self, context),
            None => self.to_string(),
        }
    }
}

impl From<StoreError> for AgentError {
    fn from(err: StoreError) -> Self {
        AgentError::Manager(TaskManagerError::from(err))
    }
}

/// Errors surfaced by the task manager's caller-facing operations
#[derive(Debug, Error)]
pub enum TaskManagerError {
    #[error("Unknown agent kind: {0}")]
    UnknownAgent(String),

    #[error("Task not found: {0}")]
    NotFound(Uuid),

    #[error("Task dispatcher has stopped")]
    DispatcherStopped,

    /// Non-terminal task that this process does not run
    #[error("Task {0} is not run by this process")]
    NotOwned(Uuid),

    /// Persistence failures; fatal to the orchestration session
    #[error("Task store failure: {0}")]
    Store(StoreError),
}

impl From<StoreError> for TaskManagerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => TaskManagerError::NotFound(id),
            other => TaskManagerError::Store(other),
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
