//! Task manager integration tests
//!
//! These tests drive the manager end to end against the in-memory stores:
//! - Admission order and the concurrency bound
//! - Cancellation, await timeouts and runtime limits
//! - Orchestrated workflows and their reports
//! - Message passing between agents

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use agent_orchestrator::agents::{
    builtin_registry, demo_catalog, leaf, Agent, AgentError, AgentRegistry, AgentResult,
    LeafAgent, OrchestratorAgent, TaskContext, TaskManager, TaskManagerConfig, TaskManagerError,
    WorkflowCatalog, WorkflowDefinition, WorkflowReport, WorkflowStep,
};
use agent_orchestrator::domain::repositories::{
    MessageRepository, StoreResult, TaskFilter, TaskRepository,
};
use agent_orchestrator::domain::task::{AgentKind, StatusUpdate, Task, TaskSnapshot, TaskStatus};
use agent_orchestrator::infrastructure::repositories::{
    InMemoryMessageRepository, InMemoryTaskRepository,
};

const WAIT: Duration = Duration::from_secs(5);

fn kind(name: &str) -> AgentKind {
    AgentKind::new(name).unwrap()
}

fn limits(max_concurrent_tasks: usize) -> TaskManagerConfig {
    TaskManagerConfig {
        max_concurrent_tasks,
        cancel_grace: Duration::from_millis(50),
        max_runtime: None,
    }
}

struct Harness {
    manager: TaskManager,
    tasks: Arc<InMemoryTaskRepository>,
    messages: Arc<InMemoryMessageRepository>,
}

fn harness(registry: AgentRegistry, config: TaskManagerConfig) -> Harness {
    let tasks = Arc::new(InMemoryTaskRepository::new());
    let messages = Arc::new(InMemoryMessageRepository::new());
    let manager = TaskManager::new(tasks.clone(), messages.clone(), registry, config);
    Harness {
        manager,
        tasks,
        messages,
    }
}

/// Registry with `sleep`, `echo` and the agents below
fn test_registry() -> AgentRegistry {
    AgentRegistry::new()
        .register(kind("sleep"), Arc::new(LeafAgent::new(leaf::sleep)))
        .register(kind("echo"), Arc::new(LeafAgent::new(leaf::echo)))
        .register(kind("boom"), Arc::new(LeafAgent::new(boom)))
        .register(kind("stuck"), Arc::new(LeafAgent::new(stuck)))
        .register(kind("patient"), Arc::new(LeafAgent::new(patient)))
        .register(kind("panics"), Arc::new(LeafAgent::new(panics)))
}

async fn boom(_ctx: TaskContext, _config: Value) -> AgentResult<Value> {
    Err(AgentError::ExecutionFailed("capability raised".to_string()))
}

/// Never returns and ignores cancellation
async fn stuck(_ctx: TaskContext, _config: Value) -> AgentResult<Value> {
    std::future::pending::<()>().await;
    Ok(Value::Null)
}

/// Waits for cancellation, then stops
async fn patient(ctx: TaskContext, _config: Value) -> AgentResult<Value> {
    ctx.cancelled().await;
    Err(AgentError::Cancelled)
}

async fn panics(_ctx: TaskContext, _config: Value) -> AgentResult<Value> {
    panic!("capability exploded");
}

/// Records start order and the highest number of bodies running at once
#[derive(Default)]
struct Tally {
    active: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<Uuid>>,
}

#[async_trait]
impl Agent for Tally {
    async fn execute(&self, ctx: TaskContext, _config: Value) -> AgentResult<Value> {
        self.started.lock().push(ctx.task_id());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({ "task": ctx.task_id() }))
    }
}

async fn wait_for_status(manager: &TaskManager, id: Uuid, status: TaskStatus) -> TaskSnapshot {
    let deadline = Instant::now() + WAIT;
    loop {
        let task = manager.status(id).await.unwrap();
        if task.status() == status {
            return task;
        }
        assert!(
            Instant::now() < deadline,
            "task {} stuck in {} waiting for {}",
            id,
            task.status(),
            status
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn test_second_task_waits_for_free_slot() {
    let h = harness(test_registry(), limits(1));

    let first = h.manager.submit("sleep", json!({"sleepMs": 50})).await.unwrap();
    let second = h.manager.submit("sleep", json!({"sleepMs": 50})).await.unwrap();

    let deadline = Instant::now() + WAIT;
    loop {
        // Read the second task first: if it has left Pending, the first
        // must already be terminal when read afterwards.
        let later = h.manager.status(second).await.unwrap();
        let earlier = h.manager.status(first).await.unwrap();
        if later.status() != TaskStatus::Pending {
            assert!(earlier.status().is_terminal(), "second task started early");
            break;
        }
        assert!(Instant::now() < deadline, "second task never started");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let first = h.manager.await_task(first, WAIT).await.unwrap();
    let second = h.manager.await_task(second, WAIT).await.unwrap();
    assert_eq!(first.status(), TaskStatus::Completed);
    assert_eq!(second.status(), TaskStatus::Completed);
    assert!(second.started_at().unwrap() >= first.completed_at().unwrap());
}

#[tokio::test]
async fn test_back_to_back_tasks_complete_with_timestamps() {
    let h = harness(test_registry(), limits(5));

    let a = h.manager.submit("sleep", json!({"sleep_ms": 10})).await.unwrap();
    let b = h.manager.submit("echo", json!({"hello": "world"})).await.unwrap();

    for id in [a, b] {
        let task = h.manager.await_task(id, WAIT).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.progress(), 100.0);
        assert!(task.error().is_none());
        let started = task.started_at().expect("started_at set");
        let completed = task.completed_at().expect("completed_at set");
        assert!(completed >= started);
    }

    let echoed = h.manager.status(b).await.unwrap();
    assert_eq!(echoed.result(), Some(&json!({"hello": "world"})));
    assert_eq!(h.tasks.get(b).await.unwrap(), echoed);
}

#[tokio::test]
async fn test_await_timeout_cancels_stuck_task() {
    let h = harness(test_registry(), limits(2));
    let id = h.manager.submit("stuck", json!({})).await.unwrap();
    wait_for_status(&h.manager, id, TaskStatus::Running).await;

    let started = Instant::now();
    let task = h
        .manager
        .await_task(id, Duration::from_millis(10))
        .await
        .unwrap();

    assert!(matches!(
        task.status(),
        TaskStatus::Cancelled | TaskStatus::TimedOut
    ));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(task.result().is_none());
    assert_eq!(h.manager.in_flight(), 0);
}

#[tokio::test]
async fn test_concurrency_bound_is_never_exceeded() {
    let tally = Arc::new(Tally::default());
    let registry = AgentRegistry::new().register(kind("tally"), tally.clone());
    let h = harness(registry, limits(2));

    let mut ids = Vec::new();
    for _ in 0..6 {
        ids.push(h.manager.submit("tally", json!({})).await.unwrap());
    }
    for id in &ids {
        let task = h.manager.await_task(*id, WAIT).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);
    }

    assert!(tally.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(tally.started.lock().len(), 6);
}

#[tokio::test]
async fn test_tasks_are_admitted_in_submission_order() {
    let tally = Arc::new(Tally::default());
    let registry = AgentRegistry::new().register(kind("tally"), tally.clone());
    let h = harness(registry, limits(1));

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(h.manager.submit("tally", json!({})).await.unwrap());
    }
    for id in &ids {
        h.manager.await_task(*id, WAIT).await.unwrap();
    }

    assert_eq!(*tally.started.lock(), ids);
}

#[tokio::test]
async fn test_unknown_agent_is_rejected_without_a_record() {
    let h = harness(test_registry(), limits(2));

    let err = h.manager.submit("nonexistent", json!({})).await.unwrap_err();
    assert!(matches!(err, TaskManagerError::UnknownAgent(ref k) if k == "nonexistent"));

    let err = h.manager.submit("not a kind", json!({})).await.unwrap_err();
    assert!(matches!(err, TaskManagerError::UnknownAgent(_)));

    let all = h.manager.list(&TaskFilter::all()).await.unwrap();
    assert!(all.is_empty());
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let h = harness(test_registry(), limits(2));
    let missing = Uuid::new_v4();

    assert!(matches!(
        h.manager.status(missing).await,
        Err(TaskManagerError::NotFound(id)) if id == missing
    ));
    assert!(matches!(
        h.manager.await_task(missing, Duration::from_millis(10)).await,
        Err(TaskManagerError::NotFound(_))
    ));
    assert!(matches!(
        h.manager.cancel(missing).await,
        Err(TaskManagerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_failed_agent_records_error() {
    let h = harness(test_registry(), limits(2));
    let id = h.manager.submit("boom", json!({})).await.unwrap();

    let task = h.manager.await_task(id, WAIT).await.unwrap();

    assert_eq!(task.status(), TaskStatus::Failed);
    assert_eq!(task.error(), Some("capability raised"));
    assert!(task.result().is_none());
    assert!(task.completed_at().is_some());
}

#[tokio::test]
async fn test_invalid_config_fails_task() {
    let h = harness(test_registry(), limits(2));
    let id = h.manager.submit("sleep", json!({"sleep_ms": "soon"})).await.unwrap();

    let task = h.manager.await_task(id, WAIT).await.unwrap();

    assert_eq!(task.status(), TaskStatus::Failed);
    assert!(task.error().unwrap().contains("Invalid task configuration"));
}

#[tokio::test]
async fn test_panicking_agent_fails_and_frees_slot() {
    let h = harness(test_registry(), limits(1));
    let crashed = h.manager.submit("panics", json!({})).await.unwrap();
    let next = h.manager.submit("echo", json!(1)).await.unwrap();

    let task = h.manager.await_task(crashed, WAIT).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Failed);
    assert!(task.error().unwrap().contains("capability exploded"));

    let task = h.manager.await_task(next, WAIT).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Completed);
}

#[tokio::test]
async fn test_terminal_snapshot_is_stable() {
    let h = harness(test_registry(), limits(2));
    let id = h.manager.submit("echo", json!({"n": 1})).await.unwrap();

    let awaited = h.manager.await_task(id, WAIT).await.unwrap();
    let again = h.manager.status(id).await.unwrap();
    let awaited_again = h.manager.await_task(id, Duration::from_millis(1)).await.unwrap();

    assert_eq!(awaited, again);
    assert_eq!(awaited, awaited_again);
}

#[tokio::test]
async fn test_cancel_running_task() {
    let h = harness(test_registry(), limits(2));
    let id = h.manager.submit("sleep", json!({"sleep_ms": 10_000})).await.unwrap();
    wait_for_status(&h.manager, id, TaskStatus::Running).await;

    assert!(h.manager.cancel(id).await.unwrap());
    assert!(!h.manager.cancel(id).await.unwrap());

    let task = h.manager.await_task(id, WAIT).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Cancelled);
    assert!(task.result().is_none());
    assert!(task.error().is_none());
    assert!(task.started_at().is_some());

    // Terminal tasks ignore further cancellation
    assert!(!h.manager.cancel(id).await.unwrap());
}

#[tokio::test]
async fn test_cancel_pending_task_never_runs() {
    let h = harness(test_registry(), limits(1));
    let blocker = h.manager.submit("patient", json!({})).await.unwrap();
    wait_for_status(&h.manager, blocker, TaskStatus::Running).await;
    let queued = h.manager.submit("echo", json!({})).await.unwrap();

    assert!(h.manager.cancel(queued).await.unwrap());
    let task = h.manager.status(queued).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Cancelled);
    assert!(task.started_at().is_none());

    assert!(h.manager.cancel(blocker).await.unwrap());
    let task = h.manager.await_task(blocker, WAIT).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Cancelled);

    // The freed slot goes to later work
    let after = h.manager.submit("echo", json!({})).await.unwrap();
    let task = h.manager.await_task(after, WAIT).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Completed);
}

#[tokio::test]
async fn test_cancel_aborts_body_that_ignores_signal() {
    let h = harness(test_registry(), limits(1));
    let id = h.manager.submit("stuck", json!({})).await.unwrap();
    wait_for_status(&h.manager, id, TaskStatus::Running).await;

    assert!(h.manager.cancel(id).await.unwrap());

    let task = h.manager.await_task(id, WAIT).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Cancelled);
}

#[tokio::test]
async fn test_max_runtime_times_out_task() {
    let config = TaskManagerConfig {
        max_runtime: Some(Duration::from_millis(30)),
        ..limits(2)
    };
    let h = harness(test_registry(), config);
    let id = h.manager.submit("patient", json!({})).await.unwrap();

    let task = h.manager.await_task(id, WAIT).await.unwrap();

    assert_eq!(task.status(), TaskStatus::TimedOut);
    assert!(task.error().unwrap().contains("maximum runtime"));
    assert!(task.result().is_none());
}

#[tokio::test]
async fn test_orchestrator_stops_at_failing_step() {
    let catalog = WorkflowCatalog::new().with(WorkflowDefinition {
        name: "ingest".to_string(),
        steps: vec![
            WorkflowStep::new("fetch", kind("echo"), json!({"items": [1, 2]})),
            WorkflowStep::new("parse", kind("boom"), json!({})),
            WorkflowStep::new("store", kind("echo"), json!({})),
        ],
    });
    let registry = test_registry().register(
        kind("orchestrator"),
        Arc::new(OrchestratorAgent::new(catalog, WAIT)),
    );
    let h = harness(registry, limits(2));

    let id = h
        .manager
        .submit("orchestrator", json!({"workflow": "ingest"}))
        .await
        .unwrap();
    let task = h.manager.await_task(id, WAIT).await.unwrap();

    assert_eq!(task.status(), TaskStatus::Failed);
    let error = task.error().unwrap();
    assert!(error.contains("step 2"), "unexpected error: {}", error);
    assert!(error.contains("partial results"));

    let reports = h.messages.receive("workflow-reports").await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].from_agent(), "orchestrator");
    assert_eq!(reports[0].task_id(), Some(id));

    let report: WorkflowReport = serde_json::from_value(reports[0].content().clone()).unwrap();
    assert!(!report.succeeded);
    assert_eq!(report.results.len(), 2);
    let completed = report
        .results
        .iter()
        .filter(|r| r.status == TaskStatus::Completed)
        .count();
    assert_eq!(completed, 1);
    assert_eq!(report.results[1].status, TaskStatus::Failed);

    // The third step never ran
    let all = h.manager.list(&TaskFilter::all()).await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn test_orchestrator_runs_demo_workflow() {
    let registry = builtin_registry(demo_catalog(), WAIT);
    let h = harness(registry, limits(4));

    let id = h
        .manager
        .submit(
            "orchestrator",
            json!({"workflow": "demo", "params": {"source": "test"}, "report_to": "inbox"}),
        )
        .await
        .unwrap();
    let task = h.manager.await_task(id, WAIT).await.unwrap();

    assert_eq!(task.status(), TaskStatus::Completed);
    assert_eq!(task.progress(), 100.0);
    let result = task.result().unwrap();
    assert_eq!(result["workflow"], "demo");
    assert_eq!(result["summary"]["steps"], 3);
    assert_eq!(result["results"].as_array().unwrap().len(), 3);

    // Each step sees the previous step's result
    assert_eq!(result["results"][2]["result"]["previous"]["slept_ms"], 100);

    assert_eq!(h.messages.pending_for("inbox"), 1);
    assert_eq!(h.messages.pending_for("workflow-reports"), 0);
}

#[tokio::test]
async fn test_orchestrator_unknown_workflow_fails() {
    let h = harness(builtin_registry(demo_catalog(), WAIT), limits(2));

    let id = h
        .manager
        .submit("orchestrator", json!({"workflow": "missing"}))
        .await
        .unwrap();
    let task = h.manager.await_task(id, WAIT).await.unwrap();

    assert_eq!(task.status(), TaskStatus::Failed);
    assert!(task.error().unwrap().contains("Workflow not found: missing"));
}

#[tokio::test]
async fn test_cancel_orchestrator_cancels_running_step() {
    let catalog = WorkflowCatalog::new().with(WorkflowDefinition {
        name: "slow".to_string(),
        steps: vec![WorkflowStep::new(
            "wait",
            kind("sleep"),
            json!({"sleep_ms": 10_000}),
        )],
    });
    let registry = test_registry().register(
        kind("orchestrator"),
        Arc::new(OrchestratorAgent::new(catalog, WAIT)),
    );
    let h = harness(registry, limits(2));

    let id = h
        .manager
        .submit("orchestrator", json!({"workflow": "slow"}))
        .await
        .unwrap();

    let deadline = Instant::now() + WAIT;
    let step = loop {
        let running = h
            .manager
            .list(&TaskFilter::with_status(TaskStatus::Running))
            .await
            .unwrap();
        if let Some(step) = running.iter().find(|t| t.agent_kind().as_str() == "sleep") {
            break step.id();
        }
        assert!(Instant::now() < deadline, "workflow step never started");
        tokio::time::sleep(Duration::from_millis(2)).await;
    };

    assert!(h.manager.cancel(id).await.unwrap());

    let task = h.manager.await_task(id, WAIT).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Cancelled);
    let step = h.manager.await_task(step, WAIT).await.unwrap();
    assert_eq!(step.status(), TaskStatus::Cancelled);
}

/// Sends two messages to `reader`
struct Writer;

#[async_trait]
impl Agent for Writer {
    async fn execute(&self, ctx: TaskContext, _config: Value) -> AgentResult<Value> {
        ctx.send_message("reader", json!("m1")).await?;
        ctx.send_message("reader", json!("m2")).await?;
        Ok(Value::Null)
    }
}

/// Returns the contents of its mailbox
struct Reader;

#[async_trait]
impl Agent for Reader {
    async fn execute(&self, ctx: TaskContext, _config: Value) -> AgentResult<Value> {
        let messages = ctx.receive_messages().await?;
        Ok(Value::Array(
            messages.iter().map(|m| m.content().clone()).collect(),
        ))
    }
}

#[tokio::test]
async fn test_agents_exchange_messages_in_order() {
    let registry = AgentRegistry::new()
        .register(kind("writer"), Arc::new(Writer))
        .register(kind("reader"), Arc::new(Reader));
    let h = harness(registry, limits(2));

    let writer = h.manager.submit("writer", json!({})).await.unwrap();
    let written = h.manager.await_task(writer, WAIT).await.unwrap();
    assert_eq!(written.status(), TaskStatus::Completed);
    assert_eq!(written.result(), Some(&Value::Null));
    assert_eq!(h.messages.pending_for("reader"), 2);

    let reader = h.manager.submit("reader", json!({})).await.unwrap();
    let read = h.manager.await_task(reader, WAIT).await.unwrap();
    assert_eq!(read.result(), Some(&json!(["m1", "m2"])));

    // Consumed messages are not delivered twice
    assert!(h.messages.receive("reader").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recover_interrupted_resolves_stale_records() {
    let tasks = Arc::new(InMemoryTaskRepository::new());
    let pending = Task::new(kind("echo"), json!({}));
    let running = Task::new(kind("echo"), json!({}));
    let done = Task::new(kind("echo"), json!({}));
    for task in [&pending, &running, &done] {
        tasks.create(task).await.unwrap();
    }
    for id in [running.id(), done.id()] {
        tasks
            .update_status(id, &StatusUpdate::running(Utc::now()))
            .await
            .unwrap();
    }
    tasks
        .update_status(done.id(), &StatusUpdate::completed(json!(1), Utc::now()))
        .await
        .unwrap();

    let manager = TaskManager::new(
        tasks.clone(),
        Arc::new(InMemoryMessageRepository::new()),
        test_registry(),
        limits(2),
    );

    assert_eq!(manager.recover_interrupted().await.unwrap(), 2);
    assert_eq!(
        manager.status(pending.id()).await.unwrap().status(),
        TaskStatus::Cancelled
    );
    let running = manager.status(running.id()).await.unwrap();
    assert_eq!(running.status(), TaskStatus::Failed);
    assert!(running.error().unwrap().contains("interrupted"));
    assert_eq!(
        manager.status(done.id()).await.unwrap().status(),
        TaskStatus::Completed
    );

    // Nothing left to resolve
    assert_eq!(manager.recover_interrupted().await.unwrap(), 0);
}

/// Task store whose `create` returns only some time after the record is visible
struct SlowCreate {
    inner: InMemoryTaskRepository,
    delay: Duration,
}

#[async_trait]
impl TaskRepository for SlowCreate {
    async fn create(&self, task: &Task) -> StoreResult<()> {
        self.inner.create(task).await?;
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn update_status(&self, id: Uuid, update: &StatusUpdate) -> StoreResult<()> {
        self.inner.update_status(id, update).await
    }

    async fn update_progress(&self, id: Uuid, value: f64) -> StoreResult<()> {
        self.inner.update_progress(id, value).await
    }

    async fn get(&self, id: Uuid) -> StoreResult<Task> {
        self.inner.get(id).await
    }

    async fn list(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        self.inner.list(filter).await
    }
}

#[tokio::test]
async fn test_await_during_submit_lets_task_run() {
    let tasks = Arc::new(SlowCreate {
        inner: InMemoryTaskRepository::new(),
        delay: Duration::from_millis(50),
    });
    let manager = TaskManager::new(
        tasks.clone(),
        Arc::new(InMemoryMessageRepository::new()),
        test_registry(),
        limits(2),
    );

    let submitting = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.submit("echo", json!({"n": 7})).await })
    };

    // Pick the task up while `submit` is still waiting on the store
    let deadline = Instant::now() + WAIT;
    let id = loop {
        let pending = manager.list(&TaskFilter::with_status(TaskStatus::Pending)).await.unwrap();
        if let Some(task) = pending.first() {
            break task.id();
        }
        assert!(Instant::now() < deadline, "submitted task never became visible");
        tokio::time::sleep(Duration::from_millis(1)).await;
    };

    let task = manager.await_task(id, WAIT).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Completed);
    assert_eq!(task.result(), Some(&json!({"n": 7})));
    assert_eq!(submitting.await.unwrap().unwrap(), id);
}

#[tokio::test]
async fn test_task_owned_elsewhere_is_left_alone() {
    let h = harness(test_registry(), limits(2));

    // Running record written by another process sharing the store
    let foreign = Task::new(kind("echo"), json!({}));
    h.tasks.create(&foreign).await.unwrap();
    h.tasks
        .update_status(foreign.id(), &StatusUpdate::running(Utc::now()))
        .await
        .unwrap();

    let started = Instant::now();
    let err = h
        .manager
        .await_task(foreign.id(), Duration::from_millis(30))
        .await
        .unwrap_err();
    assert!(matches!(err, TaskManagerError::NotOwned(id) if id == foreign.id()));
    assert!(started.elapsed() >= Duration::from_millis(30));

    assert!(matches!(
        h.manager.cancel(foreign.id()).await,
        Err(TaskManagerError::NotOwned(_))
    ));
    assert_eq!(
        h.manager.status(foreign.id()).await.unwrap().status(),
        TaskStatus::Running
    );

    // Once the owner finishes it, awaiting returns the terminal record
    h.tasks
        .update_status(foreign.id(), &StatusUpdate::completed(json!("done"), Utc::now()))
        .await
        .unwrap();
    let task = h.manager.await_task(foreign.id(), WAIT).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Completed);
}

fn orchestrated(catalog: WorkflowCatalog, step_timeout: Duration) -> Harness {
    let registry = test_registry().register(
        kind("orchestrator"),
        Arc::new(OrchestratorAgent::new(catalog, step_timeout)),
    );
    harness(registry, limits(2))
}

async fn run_workflow(h: &Harness, config: Value) -> TaskSnapshot {
    let id = h.manager.submit("orchestrator", config).await.unwrap();
    h.manager.await_task(id, WAIT).await.unwrap()
}

async fn only_report(h: &Harness) -> WorkflowReport {
    let reports = h.messages.receive("workflow-reports").await.unwrap();
    assert_eq!(reports.len(), 1);
    serde_json::from_value(reports[0].content().clone()).unwrap()
}

#[tokio::test]
async fn test_orchestrator_unregistered_step_keeps_partial_results() {
    let catalog = WorkflowCatalog::new().with(WorkflowDefinition {
        name: "ingest".to_string(),
        steps: vec![
            WorkflowStep::new("fetch", kind("echo"), json!({"items": [1]})),
            WorkflowStep::new("parse", kind("missing"), json!({})),
            WorkflowStep::new("store", kind("echo"), json!({})),
        ],
    });
    let h = orchestrated(catalog, WAIT);

    let task = run_workflow(&h, json!({"workflow": "ingest"})).await;

    assert_eq!(task.status(), TaskStatus::Failed);
    let error = task.error().unwrap();
    assert!(error.contains("step 2 (parse)"), "unexpected error: {}", error);
    assert!(error.contains("Unknown agent kind: missing"));
    assert!(error.contains("partial results"));

    let report = only_report(&h).await;
    assert!(!report.succeeded);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].name, "fetch");
    assert_eq!(report.results[0].status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_step_timeout_cancels_stuck_step() {
    let catalog = WorkflowCatalog::new().with(WorkflowDefinition {
        name: "hang".to_string(),
        steps: vec![
            WorkflowStep::new("fetch", kind("echo"), json!({})),
            WorkflowStep::new("wait", kind("stuck"), json!({})),
            WorkflowStep::new("store", kind("echo"), json!({})),
        ],
    });
    let h = orchestrated(catalog, WAIT);

    let started = Instant::now();
    let task = run_workflow(&h, json!({"workflow": "hang", "step_timeout_ms": 20})).await;

    assert_eq!(task.status(), TaskStatus::Failed);
    assert!(task.error().unwrap().contains("step 2 (wait)"));
    assert!(started.elapsed() < Duration::from_secs(2));

    let report = only_report(&h).await;
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[1].status, TaskStatus::Cancelled);
    let sub_task = h.manager.status(report.results[1].task_id).await.unwrap();
    assert_eq!(sub_task.status(), TaskStatus::Cancelled);
}

#[tokio::test]
async fn test_step_timeout_precedence() {
    let slow = || WorkflowStep::new("nap", kind("sleep"), json!({"sleep_ms": 150}));
    let catalog = WorkflowCatalog::new()
        .with(WorkflowDefinition {
            name: "step_short".to_string(),
            steps: vec![WorkflowStep {
                timeout_ms: Some(20),
                ..slow()
            }],
        })
        .with(WorkflowDefinition {
            name: "step_long".to_string(),
            steps: vec![WorkflowStep {
                timeout_ms: Some(5_000),
                ..slow()
            }],
        })
        .with(WorkflowDefinition {
            name: "plain".to_string(),
            steps: vec![slow()],
        });
    // Default per-step timeout is shorter than the step itself
    let h = orchestrated(catalog, Duration::from_millis(20));

    // Step setting beats the task config
    let task = run_workflow(&h, json!({"workflow": "step_short", "step_timeout_ms": 5_000})).await;
    assert_eq!(task.status(), TaskStatus::Failed);
    let task = run_workflow(&h, json!({"workflow": "step_long", "step_timeout_ms": 20})).await;
    assert_eq!(task.status(), TaskStatus::Completed);

    // Task config beats the default
    let task = run_workflow(&h, json!({"workflow": "plain", "step_timeout_ms": 5_000})).await;
    assert_eq!(task.status(), TaskStatus::Completed);

    // Default applies when neither is set
    let task = run_workflow(&h, json!({"workflow": "plain"})).await;
    assert_eq!(task.status(), TaskStatus::Failed);
    assert!(task.error().unwrap().contains("step 1 (nap)"));
}
