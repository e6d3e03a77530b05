use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::repositories::{StoreError, StoreResult, TaskFilter, TaskRepository};
use crate::domain::task::task::clamp_progress;
use crate::domain::task::{AgentKind, StatusUpdate, Task, TaskStatus};

const TASK_COLUMNS: &str = r#"
    id, agent_kind, status, config, progress, result, error,
    created_at, started_at, completed_at
"#;

/// PostgreSQL implementation of TaskRepository
///
/// Every statement runs in autocommit mode, so a write is durable once the
/// call returns. Status transitions are guarded in SQL by the set of
/// statuses they may leave from.
pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    /// Creates a new PostgresTaskRepository
    ///
    /// # Arguments
    /// * `pool` - SQLx connection pool for PostgreSQL
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    agent_kind: String,
    status: String,
    config: Value,
    progress: f64,
    result: Option<Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(r: TaskRow) -> Result<Self, Self::Error> {
        let agent_kind = AgentKind::new(r.agent_kind).map_err(StoreError::InvalidRecord)?;
        let status = r
            .status
            .parse::<TaskStatus>()
            .map_err(StoreError::InvalidRecord)?;

        Ok(Task::from_persistence(
            r.id,
            agent_kind,
            status,
            r.config,
            r.progress,
            r.result,
            r.error,
            r.created_at,
            r.started_at,
            r.completed_at,
        ))
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn create(&self, task: &Task) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, agent_kind, status, config, progress, result, error,
                created_at, started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(task.id())
        .bind(task.agent_kind().as_str())
        .bind(task.status().as_str())
        .bind(task.config().clone())
        .bind(task.progress())
        .bind(task.result().cloned())
        .bind(task.error())
        .bind(task.created_at())
        .bind(task.started_at())
        .bind(task.completed_at())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::DuplicateId(task.id())
            }
            other => backend("Failed to create task", other),
        })?;

        Ok(())
    }

    async fn update_status(&self, id: Uuid, update: &StatusUpdate) -> StoreResult<()> {
        let allowed_from: Vec<String> = TaskStatus::predecessors(update.status)
            .into_iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                status = $2,
                result = $3,
                error = $4,
                started_at = COALESCE($5, started_at),
                completed_at = COALESCE($6, completed_at),
                progress = CASE WHEN $2 = 'completed' THEN 100 ELSE progress END
            WHERE id = $1 AND status = ANY($7)
            "#,
        )
        .bind(id)
        .bind(update.status.as_str())
        .bind(update.result.clone())
        .bind(update.error.as_deref())
        .bind(update.started_at)
        .bind(update.completed_at)
        .bind(allowed_from)
        .execute(&self.pool)
        .await
        .map_err(|e| backend("Failed to update task status", e))?;

        if result.rows_affected() == 0 {
            // Either the task is missing or it sits in a status we may not leave
            let current = self.get(id).await?;
            return Err(StoreError::InvalidTransition {
                id,
                from: current.status(),
                to: update.status,
            });
        }

        Ok(())
    }

    async fn update_progress(&self, id: Uuid, value: f64) -> StoreResult<()> {
        let Some(value) = clamp_progress(value) else {
            return Ok(());
        };

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET progress = GREATEST(progress, $2)
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| backend("Failed to update task progress", e))?;

        if result.rows_affected() == 0 {
            // Surface NotFound; a non-running task is silently ignored
            self.get(id).await?;
        }

        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Task> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("Failed to find task by id", e))?;

        row.ok_or(StoreError::NotFound(id))?.try_into()
    }

    async fn list(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM tasks
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX)))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend("Failed to list tasks", e))?;

        rows.into_iter().map(Task::try_from).collect()
    }
}

fn backend(context: &str, err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("{}: {}", context, err))
}
