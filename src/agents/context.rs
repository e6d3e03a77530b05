use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::errors::{AgentError, AgentResult};
use super::manager::TaskManager;
use super::messages::MessagePort;
use crate::domain::message::Message;
use crate::domain::repositories::TaskRepository;
use crate::domain::task::task::clamp_progress;
use crate::domain::task::AgentKind;

/// Writes progress for one task, never moving it backwards
pub struct ProgressReporter {
    task_id: Uuid,
    store: Arc<dyn TaskRepository>,
    last: Mutex<f64>,
}

impl ProgressReporter {
    pub fn new(task_id: Uuid, store: Arc<dyn TaskRepository>) -> Self {
        Self {
            task_id,
            store,
            last: Mutex::new(0.0),
        }
    }

    /// Record `value` (clamped to `[0, 100]`); lower values are dropped
    pub async fn report(&self, value: f64) -> AgentResult<()> {
        let Some(value) = clamp_progress(value) else {
            return Ok(());
        };
        let last = *self.last.lock();
        if value <= last {
            return Ok(());
        }
        self.store.update_progress(self.task_id, value).await?;

        // Advanced only once the store has the value
        let mut stored = self.last.lock();
        if value > *stored {
            *stored = value;
        }
        Ok(())
    }

    /// Last value accepted by this reporter
    pub fn last(&self) -> f64 {
        *self.last.lock()
    }
}

/// Everything an agent body may use while it runs
///
/// Cancellation is cooperative: the token is signalled when the task is
/// cancelled or exceeds its runtime, and the body is expected to stop at its
/// next [`checkpoint`](Self::checkpoint).
#[derive(Clone)]
pub struct TaskContext {
    task_id: Uuid,
    agent_kind: AgentKind,
    progress: Arc<ProgressReporter>,
    messages: MessagePort,
    cancel: CancellationToken,
    manager: TaskManager,
}

impl TaskContext {
    pub(crate) fn new(
        task_id: Uuid,
        agent_kind: AgentKind,
        progress: Arc<ProgressReporter>,
        messages: MessagePort,
        cancel: CancellationToken,
        manager: TaskManager,
    ) -> Self {
        Self {
            task_id,
            agent_kind,
            progress,
            messages,
            cancel,
            manager,
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn agent_kind(&self) -> &AgentKind {
        &self.agent_kind
    }

    /// Report progress in `[0, 100]`
    pub async fn report_progress(&self, value: f64) -> AgentResult<()> {
        self.progress.report(value).await
    }

    /// Send a message from this agent to `to_agent`
    pub async fn send_message(&self, to_agent: &str, content: Value) -> AgentResult<Uuid> {
        self.messages.send(to_agent, content).await
    }

    /// Drain this agent's mailbox
    pub async fn receive_messages(&self) -> AgentResult<Vec<Message>> {
        self.messages.receive().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// `Err(AgentError::Cancelled)` once cancellation has been requested
    pub fn checkpoint(&self) -> AgentResult<()> {
        if self.cancel.is_cancelled() {
            Err(AgentError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Manager that runs this task, for agents that submit sub-tasks
    pub fn manager(&self) -> &TaskManager {
        &self.manager
    }
}
