use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::message::Message;
use crate::domain::repositories::{MessageRepository, StoreError, StoreResult};

/// Volatile MessageRepository for tests and single-process development
///
/// Messages are kept in send order; `receive` takes the lock once, so
/// selection and consumption happen together.
#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: Mutex<Vec<Message>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages still waiting for `agent`
    pub fn pending_for(&self, agent: &str) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.to_agent() == agent && !m.consumed())
            .count()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn send(
        &self,
        from_agent: &str,
        to_agent: &str,
        content: Value,
        task_id: Option<Uuid>,
    ) -> StoreResult<Uuid> {
        let message = Message::new(from_agent, to_agent, content, task_id)
            .map_err(StoreError::InvalidRecord)?;
        let id = message.id();
        self.messages.lock().push(message);
        Ok(id)
    }

    async fn receive(&self, agent: &str) -> StoreResult<Vec<Message>> {
        let mut messages = self.messages.lock();
        let delivered = messages
            .iter_mut()
            .filter(|m| m.to_agent() == agent && !m.consumed())
            .map(|m| {
                m.mark_consumed();
                m.clone()
            })
            .collect();
        Ok(delivered)
    }
}
