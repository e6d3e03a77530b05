use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::agents::TaskManagerConfig;

/// Errors raised while reading configuration from the environment
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Process configuration, read from environment variables
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// PostgreSQL URL; in-memory stores are used when unset
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub bind_addr: SocketAddr,
    pub max_concurrent_tasks: usize,
    pub cancel_grace: Duration,
    pub task_max_runtime: Option<Duration>,
    pub step_timeout: Duration,
    /// JSON file of workflow definitions for the orchestrator
    pub workflows_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 5,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            max_concurrent_tasks: 4,
            cancel_grace: Duration::from_millis(2000),
            task_max_runtime: None,
            step_timeout: Duration::from_secs(300),
            workflows_path: None,
        }
    }
}

impl AppConfig {
    /// Reads configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads configuration through `lookup`, falling back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let max_concurrent_tasks: usize =
            parse(&get, "MAX_CONCURRENT_TASKS")?.unwrap_or(defaults.max_concurrent_tasks);
        if max_concurrent_tasks == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_CONCURRENT_TASKS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            database_url: get("DATABASE_URL"),
            db_max_connections: parse(&get, "DB_MAX_CONNECTIONS")?
                .unwrap_or(defaults.db_max_connections),
            bind_addr: parse(&get, "BIND_ADDR")?.unwrap_or(defaults.bind_addr),
            max_concurrent_tasks,
            cancel_grace: parse(&get, "CANCEL_GRACE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.cancel_grace),
            task_max_runtime: parse(&get, "TASK_MAX_RUNTIME_SECS")?.map(Duration::from_secs),
            step_timeout: parse(&get, "STEP_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.step_timeout),
            workflows_path: get("WORKFLOWS_PATH").map(PathBuf::from),
        })
    }

    /// Limits handed to the task manager
    pub fn task_manager(&self) -> TaskManagerConfig {
        TaskManagerConfig {
            max_concurrent_tasks: self.max_concurrent_tasks,
            cancel_grace: self.cancel_grace,
            max_runtime: self.task_max_runtime,
        }
    }
}

fn parse<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(name)
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
                name,
                reason: e.to_string(),
                value,
            })
        })
        .transpose()
}
