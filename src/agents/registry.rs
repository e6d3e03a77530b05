use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::context::TaskContext;
use super::errors::AgentResult;
use crate::domain::task::AgentKind;

/// A named executor of task bodies
///
/// Implementations must cooperate with cancellation: when the work splits
/// into steps, check [`TaskContext::checkpoint`] between them. A body that
/// ignores the signal is aborted by the manager once the grace period runs
/// out, and whatever it produces afterwards is discarded.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Run the task body to completion
    async fn execute(&self, ctx: TaskContext, config: Value) -> AgentResult<Value>;
}

/// Static mapping from agent kind to implementation
///
/// Built once before the task manager and never changed afterwards.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<AgentKind, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `agent` under `kind`, replacing any previous registration
    pub fn register(mut self, kind: AgentKind, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(kind, agent);
        self
    }

    /// Looks up an agent by kind
    pub fn get(&self, kind: &AgentKind) -> Option<Arc<dyn Agent>> {
        self.agents.get(kind).cloned()
    }

    /// Whether `kind` has a registered agent
    pub fn contains(&self, kind: &AgentKind) -> bool {
        self.agents.contains_key(kind)
    }

    /// Registered kinds in name order
    pub fn kinds(&self) -> Vec<AgentKind> {
        self.agents.keys().cloned().collect()
    }
}
