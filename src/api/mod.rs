// API layer module (adapters for controllers)
// Follows Hexagonal Architecture - API is an adapter

pub mod errors;
pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};

use crate::agents::TaskManager;
use handlers::tasks;

/// Routes of the task API, with the manager as shared state
pub fn router(manager: TaskManager) -> Router {
    Router::new()
        .route("/health", get(tasks::health_check))
        .route("/api/agents", get(tasks::list_agents))
        .route("/api/tasks", post(tasks::submit_task).get(tasks::list_tasks))
        .route("/api/tasks/:id", get(tasks::get_task))
        .route("/api/tasks/:id/await", post(tasks::await_task))
        .route("/api/tasks/:id/cancel", post(tasks::cancel_task))
        .with_state(manager)
}
