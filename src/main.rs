use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use agent_orchestrator::agents::{builtin_registry, demo_catalog, TaskManager, WorkflowCatalog};
use agent_orchestrator::api;
use agent_orchestrator::config::AppConfig;
use agent_orchestrator::domain::repositories::{MessageRepository, TaskRepository};
use agent_orchestrator::infrastructure::database;
use agent_orchestrator::infrastructure::repositories::{
    InMemoryMessageRepository, InMemoryTaskRepository, PostgresMessageRepository,
    PostgresTaskRepository,
};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env().expect("Invalid configuration");

    // Stores
    let tasks: Arc<dyn TaskRepository>;
    let messages: Arc<dyn MessageRepository>;
    match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = database::connect(database_url, config.db_max_connections)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connected successfully");
            tasks = Arc::new(PostgresTaskRepository::new(pool.clone()));
            messages = Arc::new(PostgresMessageRepository::new(pool));
        }
        None => {
            tracing::warn!("DATABASE_URL not set, tasks and messages will not survive a restart");
            tasks = Arc::new(InMemoryTaskRepository::new());
            messages = Arc::new(InMemoryMessageRepository::new());
        }
    }

    // Agents
    let catalog = match &config.workflows_path {
        Some(path) => WorkflowCatalog::from_json_file(path).expect("Failed to load workflows"),
        None => demo_catalog(),
    };
    tracing::info!(workflows = ?catalog.names(), "workflow catalog loaded");
    if config.max_concurrent_tasks < 2 {
        tracing::warn!(
            max_concurrent_tasks = config.max_concurrent_tasks,
            "orchestrator workflows need at least 2 task slots to make progress"
        );
    }

    let manager = TaskManager::new(
        tasks,
        messages,
        builtin_registry(catalog, config.step_timeout),
        config.task_manager(),
    );
    manager
        .recover_interrupted()
        .await
        .expect("Failed to recover interrupted tasks");

    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = api::router(manager)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    tracing::info!("Server listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app).await.expect("Server failed");
}
