use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::context::TaskContext;
use super::errors::{AgentError, AgentResult};
use super::registry::Agent;

/// Agent wrapping an injected capability
///
/// The capability is any async function of the task context and config;
/// the work it does (fetching, storing, parsing) lives outside this crate.
pub struct LeafAgent<F> {
    capability: F,
}

impl<F, Fut> LeafAgent<F>
where
    F: Fn(TaskContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = AgentResult<Value>> + Send,
{
    pub fn new(capability: F) -> Self {
        Self { capability }
    }
}

#[async_trait]
impl<F, Fut> Agent for LeafAgent<F>
where
    F: Fn(TaskContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = AgentResult<Value>> + Send,
{
    async fn execute(&self, ctx: TaskContext, config: Value) -> AgentResult<Value> {
        (self.capability)(ctx, config).await
    }
}

/// Returns its configuration unchanged
pub async fn echo(_ctx: TaskContext, config: Value) -> AgentResult<Value> {
    Ok(config)
}

#[derive(Debug, Deserialize)]
struct SleepConfig {
    #[serde(alias = "sleepMs")]
    sleep_ms: u64,
}

/// Sleeps for `sleep_ms`, reporting progress and stopping on cancellation
pub async fn sleep(ctx: TaskContext, config: Value) -> AgentResult<Value> {
    let SleepConfig { sleep_ms } =
        serde_json::from_value(config).map_err(|e| AgentError::InvalidConfig(e.to_string()))?;

    const SLICES: u64 = 10;
    let slice = Duration::from_millis(sleep_ms) / SLICES as u32;
    for done in 1..=SLICES {
        tokio::select! {
            _ = tokio::time::sleep(slice) => {}
            _ = ctx.cancelled() => return Err(AgentError::Cancelled),
        }
        ctx.report_progress((done * 100 / SLICES) as f64).await?;
    }

    Ok(json!({ "slept_ms": sleep_ms }))
}
