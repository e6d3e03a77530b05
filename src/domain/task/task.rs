use super::value_objects::{AgentKind, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Task aggregate root
///
/// One durable unit of orchestrated work: which agent runs it, with what
/// configuration, and how far it has progressed through its lifecycle.
///
/// # Invariants
/// - `config` never changes after creation
/// - `progress` stays within `[0, 100]` and never decreases
/// - `result` is set iff status is Completed
/// - `error` is set iff status is Failed or TimedOut
/// - Status transitions follow [`TaskStatus::can_transition_to`]
///
/// # Example
/// ```
/// use agent_orchestrator::domain::task::{AgentKind, Task, TaskStatus};
/// use serde_json::json;
///
/// let task = Task::new(AgentKind::new("echo").unwrap(), json!({"text": "hi"}));
///
/// assert_eq!(task.status(), TaskStatus::Pending);
/// assert!(task.started_at().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    id: Uuid,
    agent_kind: AgentKind,
    status: TaskStatus,
    config: Value,
    progress: f64,
    result: Option<Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

/// Point-in-time copy of a task record as returned to callers
pub type TaskSnapshot = Task;

impl Task {
    /// Creates a new Pending task with a fresh id
    pub fn new(agent_kind: AgentKind, config: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_kind,
            status: TaskStatus::Pending,
            config,
            progress: 0.0,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Applies a status update, enforcing the state machine
    ///
    /// # Returns
    /// * `Ok(())` - The update was applied
    /// * `Err(String)` - The transition is not allowed from the current status
    pub fn apply(&mut self, update: &StatusUpdate) -> Result<(), String> {
        if !self.status.can_transition_to(update.status) {
            return Err(format!(
                "Cannot move task {} from {} to {}",
                self.id, self.status, update.status
            ));
        }

        self.status = update.status;
        self.result = update.result.clone();
        self.error = update.error.clone();
        if let Some(at) = update.started_at {
            self.started_at = Some(at);
        }
        if let Some(at) = update.completed_at {
            self.completed_at = Some(at);
        }
        if update.status == TaskStatus::Completed {
            self.progress = 100.0;
        }

        Ok(())
    }

    /// Raises progress to `value` (clamped) while the task is Running
    ///
    /// Returns whether the stored value changed.
    pub fn record_progress(&mut self, value: f64) -> bool {
        let Some(value) = clamp_progress(value) else {
            return false;
        };
        if self.status != TaskStatus::Running || value <= self.progress {
            return false;
        }
        self.progress = value;
        true
    }

    // ===== Getters =====

    /// Returns the task's ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the agent kind that executes this task
    pub fn agent_kind(&self) -> &AgentKind {
        &self.agent_kind
    }

    /// Returns the current status
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Returns the configuration passed to the agent
    pub fn config(&self) -> &Value {
        &self.config
    }

    /// Returns progress in `[0, 100]`
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Returns the result, set only when Completed
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Returns the error text, set only when Failed or TimedOut
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Returns the creation timestamp
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the task started running
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Returns when the task reached a terminal status
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Reconstructs a Task from persistence layer data
    ///
    /// Bypasses validation since the data was validated before it was stored.
    /// Only to be used by repository implementations.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persistence(
        id: Uuid,
        agent_kind: AgentKind,
        status: TaskStatus,
        config: Value,
        progress: f64,
        result: Option<Value>,
        error: Option<String>,
        created_at: DateTime<Utc>,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            agent_kind,
            status,
            config,
            progress,
            result,
            error,
            created_at,
            started_at,
            completed_at,
        }
    }
}

/// Clamps a progress value to `[0, 100]`; `None` for NaN
pub fn clamp_progress(value: f64) -> Option<f64> {
    if value.is_nan() {
        None
    } else {
        Some(value.clamp(0.0, 100.0))
    }
}

/// Atomic status change written to the task store
///
/// Built through the per-status constructors so that result and error
/// always match the target status.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    /// Pending -> Running
    pub fn running(at: DateTime<Utc>) -> Self {
        Self {
            status: TaskStatus::Running,
            result: None,
            error: None,
            started_at: Some(at),
            completed_at: None,
        }
    }

    /// Running -> Completed
    pub fn completed(result: Value, at: DateTime<Utc>) -> Self {
        Self::terminal(TaskStatus::Completed, Some(result), None, at)
    }

    /// Running -> Failed
    pub fn failed(error: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::terminal(TaskStatus::Failed, None, Some(non_empty(error.into())), at)
    }

    /// Running -> TimedOut
    pub fn timed_out(error: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::terminal(TaskStatus::TimedOut, None, Some(non_empty(error.into())), at)
    }

    /// Pending | Running -> Cancelled
    pub fn cancelled(at: DateTime<Utc>) -> Self {
        Self::terminal(TaskStatus::Cancelled, None, None, at)
    }

    fn terminal(
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            status,
            result,
            error,
            started_at: None,
            completed_at: Some(at),
        }
    }
}

fn non_empty(error: String) -> String {
    if error.trim().is_empty() {
        "task failed without an error description".to_string()
    } else {
        error
    }
}
