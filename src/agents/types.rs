use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::task::{AgentKind, TaskSnapshot, TaskStatus};

/// One step of a workflow: which agent runs it and its base configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    pub agent_kind: AgentKind,
    #[serde(default = "empty_object")]
    pub config_template: Value,
    /// Overrides the orchestrator's per-step timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, agent_kind: AgentKind, config_template: Value) -> Self {
        Self {
            name: name.into(),
            agent_kind,
            config_template,
            timeout_ms: None,
        }
    }

    /// Builds the sub-task config for this step
    ///
    /// Template keys win; `params` fill in keys the template leaves unset;
    /// `previous` carries the prior step's result when there is one.
    pub fn render_config(&self, params: &Value, previous: Option<&Value>) -> Value {
        let mut config = match &self.config_template {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => return other.clone(),
        };

        if let Value::Object(params) = params {
            for (key, value) in params {
                config.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        if let Some(previous) = previous {
            config.insert("previous".to_string(), previous.clone());
        }

        Value::Object(config)
    }
}

/// Ordered list of steps executed by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub steps: Vec<WorkflowStep>,
}

/// Named workflows known to the orchestrator
#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    workflows: BTreeMap<String, WorkflowDefinition>,
}

impl WorkflowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a workflow
    pub fn with(mut self, workflow: WorkflowDefinition) -> Self {
        self.workflows.insert(workflow.name.clone(), workflow);
        self
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.workflows.get(name)
    }

    pub fn workflows(&self) -> impl Iterator<Item = &WorkflowDefinition> {
        self.workflows.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.workflows.keys().map(String::as_str).collect()
    }

    /// Parses a JSON array of workflow definitions
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let workflows: Vec<WorkflowDefinition> = serde_json::from_str(json)?;
        Ok(workflows.into_iter().fold(Self::new(), Self::with))
    }

    /// Loads a JSON array of workflow definitions from `path`
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        Self::from_json(&raw).map_err(|e| format!("Invalid workflows in {}: {}", path.display(), e))
    }
}

/// Outcome of one workflow step, taken from the sub-task's terminal snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: usize,
    pub name: String,
    pub agent_kind: AgentKind,
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn from_snapshot(step: usize, name: &str, snapshot: &TaskSnapshot) -> Self {
        Self {
            step,
            name: name.to_string(),
            agent_kind: snapshot.agent_kind().clone(),
            task_id: snapshot.id(),
            status: snapshot.status(),
            result: snapshot.result().cloned(),
            error: snapshot.error().map(str::to_string),
        }
    }

    /// Items this step produced: array length, length of an `items` array,
    /// or 1 for any other non-null result
    pub fn items_produced(&self) -> usize {
        match &self.result {
            None | Some(Value::Null) => 0,
            Some(Value::Array(items)) => items.len(),
            Some(Value::Object(map)) => match map.get("items") {
                Some(Value::Array(items)) => items.len(),
                _ => 1,
            },
            Some(_) => 1,
        }
    }
}

/// Aggregate figures for a finished workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub steps: usize,
    pub items_produced: usize,
    pub elapsed_ms: u64,
}

/// Report sent by the orchestrator when a workflow ends, successfully or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub workflow: String,
    pub succeeded: bool,
    pub results: Vec<StepOutcome>,
    pub summary: WorkflowSummary,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}
