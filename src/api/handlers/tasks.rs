use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agents::TaskManager;
use crate::api::errors::ApiError;
use crate::domain::repositories::TaskFilter;
use crate::domain::task::{Task, TaskStatus};

/// Upper bound on a single await request
const MAX_AWAIT: Duration = Duration::from_secs(300);
const DEFAULT_LIST_LIMIT: usize = 50;

/// Request body for submitting a task
#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub agent_kind: String,
    #[serde(default)]
    pub config: Value,
}

/// Response from task submission
#[derive(Debug, Serialize)]
pub struct SubmitTaskResponse {
    pub task_id: Uuid,
}

/// Request body for awaiting a task
#[derive(Debug, Deserialize)]
pub struct AwaitTaskRequest {
    pub timeout_ms: u64,
}

/// Response from a cancel request
#[derive(Debug, Serialize)]
pub struct CancelTaskResponse {
    pub cancelled: bool,
}

/// Query string for listing tasks
#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

/// Task snapshot as returned over HTTP
#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub id: Uuid,
    pub agent_kind: String,
    pub status: TaskStatus,
    pub config: Value,
    pub progress: f64,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Task> for TaskResponse {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id(),
            agent_kind: task.agent_kind().to_string(),
            status: task.status(),
            config: task.config().clone(),
            progress: task.progress(),
            result: task.result().cloned(),
            error: task.error().map(str::to_string),
            created_at: task.created_at(),
            started_at: task.started_at(),
            completed_at: task.completed_at(),
        }
    }
}

/// Submit a task
///
/// POST /api/tasks
pub async fn submit_task(
    State(manager): State<TaskManager>,
    Json(req): Json<SubmitTaskRequest>,
) -> Result<(StatusCode, Json<SubmitTaskResponse>), ApiError> {
    let task_id = manager.submit(&req.agent_kind, req.config).await?;

    Ok((StatusCode::ACCEPTED, Json(SubmitTaskResponse { task_id })))
}

/// Get the current state of a task
///
/// GET /api/tasks/:id
pub async fn get_task(
    State(manager): State<TaskManager>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = manager.status(id).await?;

    Ok(Json(TaskResponse::from(&task)))
}

/// List tasks, newest first
///
/// GET /api/tasks?status=running&limit=20
pub async fn list_tasks(
    State(manager): State<TaskManager>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<TaskResponse>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()
        .map_err(ApiError::bad_request)?;
    let filter = TaskFilter {
        status,
        limit: Some(query.limit.unwrap_or(DEFAULT_LIST_LIMIT)),
    };

    let tasks = manager.list(&filter).await?;

    Ok(Json(tasks.iter().map(TaskResponse::from).collect()))
}

/// Block until a task is terminal or the timeout elapses
///
/// POST /api/tasks/:id/await
pub async fn await_task(
    State(manager): State<TaskManager>,
    Path(id): Path<Uuid>,
    Json(req): Json<AwaitTaskRequest>,
) -> Result<Json<TaskResponse>, ApiError> {
    let timeout = Duration::from_millis(req.timeout_ms).min(MAX_AWAIT);
    let task = manager.await_task(id, timeout).await?;

    Ok(Json(TaskResponse::from(&task)))
}

/// Request cancellation of a task
///
/// POST /api/tasks/:id/cancel
pub async fn cancel_task(
    State(manager): State<TaskManager>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelTaskResponse>, ApiError> {
    let cancelled = manager.cancel(id).await?;

    Ok(Json(CancelTaskResponse { cancelled }))
}

/// List registered agent kinds
///
/// GET /api/agents
pub async fn list_agents(State(manager): State<TaskManager>) -> Json<Vec<String>> {
    Json(
        manager
            .registered_kinds()
            .into_iter()
            .map(String::from)
            .collect(),
    )
}

/// Health check endpoint
///
/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}
