use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Point-to-point message between two named agents
///
/// Agents are addressed by name, not by task id: agent names are durable
/// identities while tasks are transient.
///
/// # Invariants
/// - Sender and recipient names are non-empty
/// - `consumed` never reverts to false once set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: Uuid,
    from_agent: String,
    to_agent: String,
    task_id: Option<Uuid>,
    content: Value,
    created_at: DateTime<Utc>,
    consumed: bool,
}

impl Message {
    /// Creates a new unconsumed message
    ///
    /// # Example
    /// ```
    /// use agent_orchestrator::domain::message::Message;
    /// use serde_json::json;
    ///
    /// let msg = Message::new("fetch", "enrich", json!({"video": 7}), None).unwrap();
    /// assert!(!msg.consumed());
    /// assert!(Message::new("", "enrich", json!(null), None).is_err());
    /// ```
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        content: Value,
        task_id: Option<Uuid>,
    ) -> Result<Self, String> {
        let from_agent = from_agent.into();
        let to_agent = to_agent.into();
        if from_agent.trim().is_empty() {
            return Err("Sender agent name cannot be empty".to_string());
        }
        if to_agent.trim().is_empty() {
            return Err("Recipient agent name cannot be empty".to_string());
        }

        Ok(Self {
            id: Uuid::new_v4(),
            from_agent,
            to_agent,
            task_id,
            content,
            created_at: Utc::now(),
            consumed: false,
        })
    }

    /// Marks the message as delivered to its recipient
    pub fn mark_consumed(&mut self) {
        self.consumed = true;
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn from_agent(&self) -> &str {
        &self.from_agent
    }

    pub fn to_agent(&self) -> &str {
        &self.to_agent
    }

    pub fn task_id(&self) -> Option<Uuid> {
        self.task_id
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn consumed(&self) -> bool {
        self.consumed
    }

    /// Reconstructs a Message from persistence layer data
    pub fn from_persistence(
        id: Uuid,
        from_agent: String,
        to_agent: String,
        task_id: Option<Uuid>,
        content: Value,
        created_at: DateTime<Utc>,
        consumed: bool,
    ) -> Self {
        Self {
            id,
            from_agent,
            to_agent,
            task_id,
            content,
            created_at,
            consumed,
        }
    }
}
