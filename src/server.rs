/// Server setup and initialization
///
/// Wires together all components: tenant storage, checkpoint and audit stores,
/// collaborator clients, the workflow engine and HTTP routes.

use crate::{
    api::{create_run_routes, AppState},
    config::Config,
    ports::{
        http::{HttpActionPort, HttpClassifier, HttpCollaborator, HttpMemoryStore, HttpReasoning},
        Collaborators,
    },
    runtime::WorkflowEngine,
    tenant::TenantDatabaseManager,
    workflow::{audit::SqliteAuditStore, catalog::IntentCatalog, storage::SqliteCheckpointStore},
};
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Create the main Axum application with all routes
///
/// Opens the run catalog eagerly so a bad data directory fails at startup
/// instead of on the first request.
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("📁 Ensuring data directory exists: {}", config.database.data_dir);
    std::fs::create_dir_all(&config.database.data_dir)
        .with_context(|| format!("Failed to create data directory '{}'", config.database.data_dir))?;

    tracing::info!("🏗️ Initializing tenant database manager");
    let databases = Arc::new(TenantDatabaseManager::new(config.database.data_dir.clone()));
    databases
        .get_catalog_pool()
        .await
        .context("Failed to open run catalog")?;

    let catalog = match &config.workflow.intent_catalog_path {
        Some(path) => {
            tracing::info!("📚 Loading intent catalog from {}", path);
            IntentCatalog::from_json_file(path)?
        }
        None => IntentCatalog::builtin(),
    };
    tracing::info!("📚 Intent catalog ready with {} intent(s)", catalog.len());

    tracing::info!("🔌 Connecting collaborator clients");
    let collaborators = http_collaborators(&config)?;

    tracing::info!("🚀 Initializing workflow engine");
    let engine = WorkflowEngine::new(
        Arc::new(catalog),
        collaborators,
        Arc::new(SqliteCheckpointStore::new(databases.clone())),
        Arc::new(SqliteAuditStore::new(databases)),
        config.workflow.engine_config(),
    )?;

    tracing::info!("✅ Application initialized successfully");
    Ok(build_router(Arc::new(engine)))
}

/// Router over an already constructed engine
pub fn build_router(engine: Arc<WorkflowEngine>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(create_run_routes().with_state(AppState { engine }))
}

fn http_collaborators(config: &Config) -> Result<Collaborators> {
    let settings = &config.collaborators;
    let timeout = Duration::from_secs(settings.timeout_secs);
    let client = |url: &str| {
        HttpCollaborator::new(url, timeout).with_context(|| format!("Failed to build client for {}", url))
    };

    Ok(Collaborators {
        classifier: Arc::new(HttpClassifier(client(&settings.classifier_url)?)),
        reasoning: Arc::new(HttpReasoning(client(&settings.reasoning_url)?)),
        actions: Arc::new(HttpActionPort(client(&settings.action_url)?)),
        memory: Arc::new(HttpMemoryStore(client(&settings.memory_url)?)),
    })
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting resqflow server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}
