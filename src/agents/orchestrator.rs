use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::context::TaskContext;
use super::errors::{AgentError, AgentResult};
use super::registry::Agent;
use super::types::{
    StepOutcome, WorkflowCatalog, WorkflowDefinition, WorkflowReport, WorkflowStep,
    WorkflowSummary,
};
use crate::domain::task::{TaskSnapshot, TaskStatus};

/// Mailbox that receives workflow reports unless the task names another
pub const DEFAULT_REPORT_MAILBOX: &str = "workflow-reports";

#[derive(Debug, Deserialize)]
struct OrchestratorConfig {
    workflow: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    step_timeout_ms: Option<u64>,
    #[serde(default)]
    report_to: Option<String>,
}

/// Agent that runs a named workflow as a sequence of sub-tasks
///
/// Each step is submitted to the same task manager and awaited with a
/// bounded timeout. The first step that does not complete stops the
/// workflow. Sub-task records carry no link back to the orchestrator task;
/// the link lives in the returned outcomes and in the report message, whose
/// `task_id` is the orchestrator's own.
///
/// The orchestrator occupies an admission slot while its sub-tasks need
/// another, so the manager's concurrency bound must be at least 2.
pub struct OrchestratorAgent {
    catalog: WorkflowCatalog,
    step_timeout: Duration,
}

impl OrchestratorAgent {
    pub fn new(catalog: WorkflowCatalog, step_timeout: Duration) -> Self {
        Self {
            catalog,
            step_timeout,
        }
    }

    pub fn catalog(&self) -> &WorkflowCatalog {
        &self.catalog
    }

    async fn run_step(
        &self,
        ctx: &TaskContext,
        step: &WorkflowStep,
        config: Value,
        timeout: Duration,
    ) -> AgentResult<TaskSnapshot> {
        let manager = ctx.manager();
        let task_id = manager.submit(step.agent_kind.as_str(), config).await?;

        tokio::select! {
            snapshot = manager.await_task(task_id, timeout) => Ok(snapshot?),
            _ = ctx.cancelled() => {
                manager.cancel(task_id).await?;
                Err(AgentError::Cancelled)
            }
        }
    }

    fn report(
        workflow: &WorkflowDefinition,
        succeeded: bool,
        results: Vec<StepOutcome>,
        started: Instant,
    ) -> WorkflowReport {
        let summary = WorkflowSummary {
            steps: results.len(),
            items_produced: results.iter().map(StepOutcome::items_produced).sum(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        WorkflowReport {
            workflow: workflow.name.clone(),
            succeeded,
            results,
            summary,
        }
    }

    /// Reports the failed workflow and builds the error that stops it
    ///
    /// `results` holds every step attempted so far; a step whose sub-task
    /// could not be submitted has no outcome of its own.
    async fn fail_at(
        ctx: &TaskContext,
        report_to: &str,
        workflow: &WorkflowDefinition,
        (number, step): (usize, &WorkflowStep),
        reason: String,
        results: Vec<StepOutcome>,
        started: Instant,
    ) -> AgentError {
        let report = Self::report(workflow, false, results, started);
        if let Err(e) = Self::deliver(ctx, report_to, &report).await {
            warn!(task_id = %ctx.task_id(), error = %e, "failed to deliver workflow report");
        }

        match serde_json::to_value(&report.results) {
            Ok(partial_results) => AgentError::StepFailed {
                workflow: workflow.name.clone(),
                step: number,
                step_name: step.name.clone(),
                reason,
                partial_results,
            },
            Err(e) => e.into(),
        }
    }

    async fn deliver(ctx: &TaskContext, to: &str, report: &WorkflowReport) -> AgentResult<()> {
        ctx.send_message(to, serde_json::to_value(report)?).await?;
        Ok(())
    }
}

#[async_trait]
impl Agent for OrchestratorAgent {
    async fn execute(&self, ctx: TaskContext, config: Value) -> AgentResult<Value> {
        let config: OrchestratorConfig =
            serde_json::from_value(config).map_err(|e| AgentError::InvalidConfig(e.to_string()))?;
        let workflow = self
            .catalog
            .get(&config.workflow)
            .ok_or_else(|| AgentError::WorkflowNotFound(config.workflow.clone()))?;
        let report_to = config
            .report_to
            .as_deref()
            .unwrap_or(DEFAULT_REPORT_MAILBOX);

        let started = Instant::now();
        let total = workflow.steps.len();
        let mut results: Vec<StepOutcome> = Vec::with_capacity(total);
        let mut previous: Option<Value> = None;

        info!(task_id = %ctx.task_id(), workflow = %workflow.name, steps = total, "workflow started");

        for (index, step) in workflow.steps.iter().enumerate() {
            ctx.checkpoint()?;

            let number = index + 1;
            let timeout = step
                .timeout_ms
                .or(config.step_timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(self.step_timeout);
            let sub_config = step.render_config(&config.params, previous.as_ref());

            let snapshot = match self.run_step(&ctx, step, sub_config, timeout).await {
                Ok(snapshot) => snapshot,
                Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
                Err(e) => {
                    warn!(task_id = %ctx.task_id(), step = number, error = %e, "workflow step could not run");
                    return Err(Self::fail_at(
                        &ctx,
                        report_to,
                        workflow,
                        (number, step),
                        e.to_string(),
                        results,
                        started,
                    )
                    .await);
                }
            };
            let outcome = StepOutcome::from_snapshot(number, &step.name, &snapshot);
            info!(
                task_id = %ctx.task_id(),
                step = number,
                sub_task_id = %outcome.task_id,
                status = %outcome.status,
                "workflow step finished"
            );

            if outcome.status != TaskStatus::Completed {
                let reason = match &outcome.error {
                    Some(error) => format!("{}: {}", outcome.status, error),
                    None => outcome.status.to_string(),
                };
                results.push(outcome);
                return Err(Self::fail_at(
                    &ctx,
                    report_to,
                    workflow,
                    (number, step),
                    reason,
                    results,
                    started,
                )
                .await);
            }

            previous = outcome.result.clone();
            results.push(outcome);
            ctx.report_progress(number as f64 * 100.0 / total as f64)
                .await?;
        }

        let report = Self::report(workflow, true, results, started);
        Self::deliver(&ctx, report_to, &report).await?;

        Ok(json!({
            "workflow": report.workflow,
            "results": report.results,
            "summary": report.summary,
        }))
    }
}
