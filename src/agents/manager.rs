//! Task manager: admission, execution and lifecycle of tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::context::{ProgressReporter, TaskContext};
use super::errors::{AgentResult, TaskManagerError};
use super::messages::MessagePort;
use super::registry::AgentRegistry;
use crate::domain::repositories::{
    MessageRepository, StoreError, TaskFilter, TaskRepository,
};
use crate::domain::task::{AgentKind, StatusUpdate, Task, TaskSnapshot, TaskStatus};

/// Store polling interval for tasks run by another process
const FOREIGN_POLL: Duration = Duration::from_millis(50);

/// Limits applied by the task manager
#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    /// Maximum number of simultaneously running tasks
    pub max_concurrent_tasks: usize,
    /// How long a cancelled body may keep running before it is aborted
    pub cancel_grace: Duration,
    /// Runtime after which a running task is timed out; `None` = unlimited
    pub max_runtime: Option<Duration>,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            cancel_grace: Duration::from_secs(2),
            max_runtime: None,
        }
    }
}

/// In-memory handle of a task that has not reached a terminal status yet
struct LiveTask {
    id: Uuid,
    agent_kind: AgentKind,
    config: Value,
    cancel: CancellationToken,
    cancel_requested: AtomicBool,
    /// Serializes transitions; mirrors the stored status
    status: tokio::sync::Mutex<TaskStatus>,
    terminal: watch::Sender<Option<TaskStatus>>,
}

impl LiveTask {
    fn new(task: &Task) -> Self {
        let (terminal, _) = watch::channel(None);
        Self {
            id: task.id(),
            agent_kind: task.agent_kind().clone(),
            config: task.config().clone(),
            cancel: CancellationToken::new(),
            cancel_requested: AtomicBool::new(false),
            status: tokio::sync::Mutex::new(task.status()),
            terminal,
        }
    }
}

struct ManagerInner {
    tasks: Arc<dyn TaskRepository>,
    messages: Arc<dyn MessageRepository>,
    registry: AgentRegistry,
    config: TaskManagerConfig,
    /// FIFO admission queue drained by the dispatcher
    queue: mpsc::UnboundedSender<Arc<LiveTask>>,
    /// Live handles keyed by task id; removed on the terminal transition
    live: Mutex<HashMap<Uuid, Arc<LiveTask>>>,
}

/// Accepts task submissions and drives them to a terminal status
///
/// At most `max_concurrent_tasks` bodies run at once. Pending tasks are
/// admitted strictly in submission order by a single dispatcher holding the
/// admission semaphore; each admitted task owns one permit until its
/// terminal record has been written, so a slot is released exactly once.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<ManagerInner>,
}

impl TaskManager {
    /// Creates a manager and starts its dispatcher
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        messages: Arc<dyn MessageRepository>,
        registry: AgentRegistry,
        config: TaskManagerConfig,
    ) -> Self {
        let (queue, pending) = mpsc::unbounded_channel();
        let admission = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));
        let inner = Arc::new(ManagerInner {
            tasks,
            messages,
            registry,
            config,
            queue,
            live: Mutex::new(HashMap::new()),
        });

        tokio::spawn(dispatch(Arc::downgrade(&inner), admission, pending));

        Self { inner }
    }

    /// Persists a Pending task and schedules it without waiting for it to run
    ///
    /// # Errors
    /// * `UnknownAgent` - `agent_kind` is not registered; nothing is persisted
    /// * `Store` - the record could not be written
    #[instrument(skip(self, config))]
    pub async fn submit(&self, agent_kind: &str, config: Value) -> Result<Uuid, TaskManagerError> {
        let kind = AgentKind::new(agent_kind)
            .ok()
            .filter(|kind| self.inner.registry.contains(kind))
            .ok_or_else(|| TaskManagerError::UnknownAgent(agent_kind.to_string()))?;

        let task = Task::new(kind, config);

        // Registered before the record is written; readers of the record
        // always find its handle
        let live = Arc::new(LiveTask::new(&task));
        self.inner.live.lock().insert(task.id(), Arc::clone(&live));
        if let Err(e) = self.inner.tasks.create(&task).await {
            self.inner.live.lock().remove(&task.id());
            return Err(e.into());
        }

        if self.inner.queue.send(Arc::clone(&live)).is_err() {
            error!(task_id = %task.id(), "dispatcher stopped; cancelling submitted task");
            self.transition_from(&live, Some(TaskStatus::Pending), StatusUpdate::cancelled(Utc::now()))
                .await?;
            return Err(TaskManagerError::DispatcherStopped);
        }

        info!(task_id = %task.id(), "task submitted");
        Ok(task.id())
    }

    /// Latest durable record of a task
    pub async fn status(&self, id: Uuid) -> Result<TaskSnapshot, TaskManagerError> {
        Ok(self.inner.tasks.get(id).await?)
    }

    /// Waits until the task is terminal, cancelling it if `timeout` elapses first
    ///
    /// Always returns a terminal snapshot; a failed task is reported through
    /// its status and error, not as `Err`. A non-terminal task owned by
    /// another process is watched in the store until `timeout`, then reported
    /// as `NotOwned`.
    #[instrument(skip(self))]
    pub async fn await_task(
        &self,
        id: Uuid,
        timeout: Duration,
    ) -> Result<TaskSnapshot, TaskManagerError> {
        let Some(live) = self.live(id) else {
            return self.watch_foreign(id, timeout).await;
        };

        let mut terminal = live.terminal.subscribe();
        let timed_out = tokio::time::timeout(timeout, terminal.wait_for(Option::is_some))
            .await
            .is_err();
        if timed_out {
            warn!(task_id = %id, timeout_ms = timeout.as_millis() as u64, "await timed out; cancelling task");
            self.cancel(id).await?;
            // Bounded by the cancellation grace period
            let _ = terminal.wait_for(Option::is_some).await;
        }

        self.settled_snapshot(id).await
    }

    /// Requests cancellation
    ///
    /// Pending tasks are cancelled at once. Running tasks are signalled and
    /// given `cancel_grace` to stop before they are aborted and recorded as
    /// Cancelled. Returns whether this call delivered the signal: `false`
    /// when the task is already terminal or was already signalled.
    ///
    /// # Errors
    /// * `NotOwned` - the task is live but run by another process
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid) -> Result<bool, TaskManagerError> {
        let Some(live) = self.live(id) else {
            let task = self.inner.tasks.get(id).await?;
            if task.status().is_terminal() {
                return Ok(false);
            }
            return Err(TaskManagerError::NotOwned(id));
        };

        let finished = live.terminal.borrow().is_some();
        if live.cancel_requested.swap(true, Ordering::SeqCst) || finished {
            return Ok(false);
        }

        live.cancel.cancel();
        info!(task_id = %id, "cancellation requested");

        // A pending task has no agent to acknowledge the signal
        self.transition_from(&live, Some(TaskStatus::Pending), StatusUpdate::cancelled(Utc::now()))
            .await?;

        Ok(true)
    }

    /// Tasks from the store, newest first
    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskSnapshot>, TaskManagerError> {
        Ok(self.inner.tasks.list(filter).await?)
    }

    /// Agent kinds accepted by `submit`
    pub fn registered_kinds(&self) -> Vec<AgentKind> {
        self.inner.registry.kinds()
    }

    /// Limits this manager was built with
    pub fn config(&self) -> &TaskManagerConfig {
        &self.inner.config
    }

    /// Number of submitted tasks that have not reached a terminal status
    pub fn in_flight(&self) -> usize {
        self.inner.live.lock().len()
    }

    /// Resolves records a previous process left non-terminal
    ///
    /// Pending records become Cancelled and Running records become Failed.
    /// Tasks owned by this manager are left alone. Returns how many records
    /// were resolved.
    #[instrument(skip(self))]
    pub async fn recover_interrupted(&self) -> Result<usize, TaskManagerError> {
        let mut recovered = 0;
        for status in [TaskStatus::Pending, TaskStatus::Running] {
            let stale = self.inner.tasks.list(&TaskFilter::with_status(status)).await?;
            for task in stale {
                if self.live(task.id()).is_none() && self.resolve_orphan(&task).await? {
                    recovered += 1;
                }
            }
        }
        if recovered > 0 {
            warn!(recovered, "resolved tasks interrupted by a previous shutdown");
        }
        Ok(recovered)
    }

    fn live(&self, id: Uuid) -> Option<Arc<LiveTask>> {
        self.inner.live.lock().get(&id).cloned()
    }

    /// Drives an admitted task; `permit` is held until its terminal write
    async fn run(&self, live: Arc<LiveTask>, permit: OwnedSemaphorePermit) {
        let id = live.id;
        match self
            .transition_from(&live, Some(TaskStatus::Pending), StatusUpdate::running(Utc::now()))
            .await
        {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                error!(task_id = %id, error = %e, "failed to mark task running");
                self.abandon(&live, TaskStatus::Running);
                return;
            }
        }
        info!(task_id = %id, agent_kind = %live.agent_kind, "task started");

        let update = if live.cancel.is_cancelled() {
            StatusUpdate::cancelled(Utc::now())
        } else {
            self.supervise(&live).await
        };
        let status = update.status;

        match self.transition_from(&live, Some(TaskStatus::Running), update).await {
            Ok(_) => {}
            Err(e) => {
                error!(task_id = %id, error = %e, "failed to persist terminal status");
                self.abandon(&live, status);
            }
        }

        drop(permit);
    }

    /// Runs the agent body and decides the terminal update
    async fn supervise(&self, live: &Arc<LiveTask>) -> StatusUpdate {
        let Some(agent) = self.inner.registry.get(&live.agent_kind) else {
            return StatusUpdate::failed(
                format!("No agent registered for kind {}", live.agent_kind),
                Utc::now(),
            );
        };

        let body_cancel = live.cancel.child_token();
        let ctx = TaskContext::new(
            live.id,
            live.agent_kind.clone(),
            Arc::new(ProgressReporter::new(live.id, Arc::clone(&self.inner.tasks))),
            MessagePort::new(live.agent_kind.as_str(), live.id, Arc::clone(&self.inner.messages)),
            body_cancel.clone(),
            self.clone(),
        );
        let config = live.config.clone();
        let mut body = tokio::spawn(async move { agent.execute(ctx, config).await });

        let max_runtime = self.inner.config.max_runtime;
        let expired = async move {
            match max_runtime {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            joined = &mut body => {
                if live.cancel.is_cancelled() {
                    // Output produced after a cancel request is void
                    StatusUpdate::cancelled(Utc::now())
                } else {
                    outcome_update(live.id, joined)
                }
            }
            _ = live.cancel.cancelled() => {
                warn!(task_id = %live.id, "waiting for cancelled agent to stop");
                self.wind_down(live.id, &mut body).await;
                StatusUpdate::cancelled(Utc::now())
            }
            _ = expired => {
                let limit = max_runtime.unwrap_or_default();
                warn!(task_id = %live.id, limit_ms = limit.as_millis() as u64, "task exceeded maximum runtime");
                body_cancel.cancel();
                self.wind_down(live.id, &mut body).await;
                StatusUpdate::timed_out(
                    format!("Task exceeded maximum runtime of {} ms", limit.as_millis()),
                    Utc::now(),
                )
            }
        }
    }

    /// Gives a signalled body the grace period, then aborts it
    async fn wind_down(&self, id: Uuid, body: &mut JoinHandle<AgentResult<Value>>) {
        let grace = self.inner.config.cancel_grace;
        if tokio::time::timeout(grace, &mut *body).await.is_err() {
            warn!(task_id = %id, grace_ms = grace.as_millis() as u64, "agent ignored cancellation; aborting");
            body.abort();
        }
    }

    /// Applies `update` if the task is in `expected` (or any status when
    /// `None`) and the state machine allows it. Returns whether it applied.
    async fn transition_from(
        &self,
        live: &LiveTask,
        expected: Option<TaskStatus>,
        update: StatusUpdate,
    ) -> Result<bool, StoreError> {
        let mut status = live.status.lock().await;
        if expected.is_some_and(|e| e != *status) || !status.can_transition_to(update.status) {
            return Ok(false);
        }

        self.inner.tasks.update_status(live.id, &update).await?;
        *status = update.status;

        if update.status.is_terminal() {
            match update.error.as_deref() {
                Some(error) => info!(task_id = %live.id, status = %update.status, error, "task finished"),
                None => info!(task_id = %live.id, status = %update.status, "task finished"),
            }
            self.retire(live, update.status);
        }
        Ok(true)
    }

    fn retire(&self, live: &LiveTask, status: TaskStatus) {
        self.inner.live.lock().remove(&live.id);
        live.terminal.send_replace(Some(status));
    }

    /// Releases waiters after a store failure left the record unresolved
    fn abandon(&self, live: &LiveTask, attempted: TaskStatus) {
        live.cancel.cancel();
        self.retire(live, attempted);
    }

    /// Forces a record left by a previous process into a terminal status
    async fn resolve_orphan(&self, task: &Task) -> Result<bool, StoreError> {
        let update = match task.status() {
            TaskStatus::Pending => StatusUpdate::cancelled(Utc::now()),
            TaskStatus::Running => StatusUpdate::failed(
                "Task was interrupted before reaching a terminal state",
                Utc::now(),
            ),
            _ => return Ok(false),
        };

        match self.inner.tasks.update_status(task.id(), &update).await {
            Ok(()) => {
                warn!(task_id = %task.id(), status = %update.status, "resolved orphaned task");
                Ok(true)
            }
            Err(StoreError::InvalidTransition { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Polls the store for a task this manager does not run
    async fn watch_foreign(
        &self,
        id: Uuid,
        timeout: Duration,
    ) -> Result<TaskSnapshot, TaskManagerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let task = self.inner.tasks.get(id).await?;
            if task.status().is_terminal() {
                return Ok(task);
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(task_id = %id, status = %task.status(), "await timed out on a task owned elsewhere");
                return Err(TaskManagerError::NotOwned(id));
            }
            tokio::time::sleep_until(deadline.min(tokio::time::Instant::now() + FOREIGN_POLL)).await;
        }
    }

    async fn settled_snapshot(&self, id: Uuid) -> Result<TaskSnapshot, TaskManagerError> {
        let task = self.inner.tasks.get(id).await?;
        if task.status().is_terminal() {
            Ok(task)
        } else {
            Err(TaskManagerError::Store(StoreError::Backend(format!(
                "Terminal status of task {} was not persisted",
                id
            ))))
        }
    }
}

/// Admits queued tasks in FIFO order as permits become available
///
/// Holds only a weak reference so the manager can be dropped; the loop ends
/// when the last `TaskManager` clone (and with it the queue sender) is gone.
async fn dispatch(
    manager: Weak<ManagerInner>,
    admission: Arc<Semaphore>,
    mut pending: mpsc::UnboundedReceiver<Arc<LiveTask>>,
) {
    while let Some(live) = pending.recv().await {
        let permit = tokio::select! {
            biased;
            _ = live.cancel.cancelled() => continue,
            permit = Arc::clone(&admission).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let Some(inner) = manager.upgrade() else {
            break;
        };
        let manager = TaskManager { inner };
        debug!(task_id = %live.id, "task admitted");
        tokio::spawn(async move { manager.run(live, permit).await });
    }
    debug!("task dispatcher stopped");
}

fn outcome_update(id: Uuid, joined: Result<AgentResult<Value>, JoinError>) -> StatusUpdate {
    match joined {
        Ok(Ok(result)) => StatusUpdate::completed(result, Utc::now()),
        Ok(Err(e)) => {
            debug!(task_id = %id, error = %e, "agent returned an error");
            StatusUpdate::failed(e.describe(), Utc::now())
        }
        Err(join_error) => StatusUpdate::failed(join_failure(join_error), Utc::now()),
    }
}

fn join_failure(err: JoinError) -> String {
    if !err.is_panic() {
        return "Agent execution was aborted".to_string();
    }
    let payload = err.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("Agent panicked: {}", detail)
}
