// Agent message passing
//
// Mailbox access handed to a running agent: it sends under its own name
// and receives only what is addressed to that name.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use super::errors::{AgentError, AgentResult};
use crate::domain::message::Message;
use crate::domain::repositories::MessageRepository;

/// Message port bound to one agent name and one task
#[derive(Clone)]
pub struct MessagePort {
    agent: String,
    task_id: Uuid,
    store: Arc<dyn MessageRepository>,
}

impl MessagePort {
    pub fn new(agent: impl Into<String>, task_id: Uuid, store: Arc<dyn MessageRepository>) -> Self {
        Self {
            agent: agent.into(),
            task_id,
            store,
        }
    }

    /// Name this port sends as and receives for
    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Send `content` to `to_agent`, correlated with the current task
    pub async fn send(&self, to_agent: &str, content: Value) -> AgentResult<Uuid> {
        self.store
            .send(&self.agent, to_agent, content, Some(self.task_id))
            .await
            .map_err(|e| AgentError::MessageDeliveryFailed(e.to_string()))
    }

    /// Take every unconsumed message addressed to this agent, oldest first
    pub async fn receive(&self) -> AgentResult<Vec<Message>> {
        self.store
            .receive(&self.agent)
            .await
            .map_err(|e| AgentError::MessageDeliveryFailed(e.to_string()))
    }
}
