use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::store_error::StoreResult;
use crate::domain::message::Message;

/// Repository trait for per-agent mailboxes
///
/// One consumer per agent name is the supported usage. Concurrent `receive`
/// calls for the same name are not supported: each message is still handed
/// out at most once, but which caller gets which message is unspecified.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Append an unconsumed message and return its id
    async fn send(
        &self,
        from_agent: &str,
        to_agent: &str,
        content: Value,
        task_id: Option<Uuid>,
    ) -> StoreResult<Uuid>;

    /// Take every unconsumed message addressed to `agent`, oldest first,
    /// marking them consumed in the same operation
    async fn receive(&self, agent: &str) -> StoreResult<Vec<Message>>;
}
