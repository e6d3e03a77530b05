// Agent system modules
//
// Agents execute task bodies; the task manager admits, runs and records
// them; the orchestrator composes agents into workflows.

pub mod context;
pub mod errors;
pub mod leaf;
pub mod manager;
pub mod messages;
pub mod orchestrator;
pub mod registry;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::warn;

// Re-export main types
pub use context::TaskContext;
pub use errors::{AgentError, AgentResult, TaskManagerError};
pub use leaf::LeafAgent;
pub use manager::{TaskManager, TaskManagerConfig};
pub use orchestrator::OrchestratorAgent;
pub use registry::{Agent, AgentRegistry};
pub use types::{StepOutcome, WorkflowCatalog, WorkflowDefinition, WorkflowReport, WorkflowStep};

use crate::domain::task::AgentKind;

/// Kind under which the orchestrator is registered
pub const ORCHESTRATOR_KIND: &str = "orchestrator";

/// Registry with the built-in agents: `echo`, `sleep` and the orchestrator
///
/// Workflow steps naming an agent kind outside the registry are logged;
/// running such a workflow fails at that step.
pub fn builtin_registry(catalog: WorkflowCatalog, step_timeout: Duration) -> AgentRegistry {
    let orchestrator = builtin_kind(ORCHESTRATOR_KIND);
    let registry = AgentRegistry::new()
        .register(builtin_kind("echo"), Arc::new(LeafAgent::new(leaf::echo)))
        .register(builtin_kind("sleep"), Arc::new(LeafAgent::new(leaf::sleep)));

    for (workflow, step) in unregistered_steps(&catalog, &registry, &orchestrator) {
        warn!(workflow, step, "workflow step names an unregistered agent kind");
    }

    registry.register(
        orchestrator,
        Arc::new(OrchestratorAgent::new(catalog, step_timeout)),
    )
}

/// `(workflow, step)` names of steps whose agent kind is neither registered
/// nor `also_known`
pub fn unregistered_steps<'a>(
    catalog: &'a WorkflowCatalog,
    registry: &AgentRegistry,
    also_known: &AgentKind,
) -> Vec<(&'a str, &'a str)> {
    catalog
        .workflows()
        .flat_map(|workflow| {
            workflow
                .steps
                .iter()
                .map(move |step| (workflow, step))
        })
        .filter(|(_, step)| &step.agent_kind != also_known && !registry.contains(&step.agent_kind))
        .map(|(workflow, step)| (workflow.name.as_str(), step.name.as_str()))
        .collect()
}

/// Catalog used when no workflow file is configured
pub fn demo_catalog() -> WorkflowCatalog {
    WorkflowCatalog::new().with(WorkflowDefinition {
        name: "demo".to_string(),
        steps: vec![
            WorkflowStep::new("fetch", builtin_kind("echo"), json!({"items": []})),
            WorkflowStep::new("enrich", builtin_kind("sleep"), json!({"sleep_ms": 100})),
            WorkflowStep::new("analyze", builtin_kind("echo"), json!({})),
        ],
    })
}

fn builtin_kind(name: &'static str) -> AgentKind {
    // Built-in names are valid by construction
    AgentKind::new(name).unwrap_or_else(|e| unreachable!("{e}"))
}
