use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::message::Message;
use crate::domain::repositories::{MessageRepository, StoreError, StoreResult};

/// PostgreSQL implementation of MessageRepository
///
/// Creation order is tracked by the `seq` column, so messages created within
/// the same clock tick still come back in send order.
pub struct PostgresMessageRepository {
    pool: PgPool,
}

impl PostgresMessageRepository {
    /// Creates a new PostgresMessageRepository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    seq: i64,
    id: Uuid,
    from_agent: String,
    to_agent: String,
    task_id: Option<Uuid>,
    content: Value,
    created_at: DateTime<Utc>,
    consumed: bool,
}

impl From<MessageRow> for Message {
    fn from(r: MessageRow) -> Self {
        Message::from_persistence(
            r.id,
            r.from_agent,
            r.to_agent,
            r.task_id,
            r.content,
            r.created_at,
            r.consumed,
        )
    }
}

#[async_trait]
impl MessageRepository for PostgresMessageRepository {
    async fn send(
        &self,
        from_agent: &str,
        to_agent: &str,
        content: Value,
        task_id: Option<Uuid>,
    ) -> StoreResult<Uuid> {
        let message = Message::new(from_agent, to_agent, content, task_id)
            .map_err(StoreError::InvalidRecord)?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, from_agent, to_agent, task_id, content, created_at, consumed)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE)
            "#,
        )
        .bind(message.id())
        .bind(message.from_agent())
        .bind(message.to_agent())
        .bind(message.task_id())
        .bind(message.content().clone())
        .bind(message.created_at())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(format!("Failed to send message: {}", e)))?;

        Ok(message.id())
    }

    async fn receive(&self, agent: &str) -> StoreResult<Vec<Message>> {
        // One statement: selection and consumption commit together
        let mut rows = sqlx::query_as::<_, MessageRow>(
            r#"
            UPDATE messages
            SET consumed = TRUE
            WHERE to_agent = $1 AND consumed = FALSE
            RETURNING seq, id, from_agent, to_agent, task_id, content, created_at, consumed
            "#,
        )
        .bind(agent)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(format!("Failed to receive messages: {}", e)))?;

        // RETURNING carries no ordering guarantee
        rows.sort_by_key(|r| r.seq);

        Ok(rows.into_iter().map(Message::from).collect())
    }
}
