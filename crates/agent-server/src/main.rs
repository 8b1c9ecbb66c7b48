//! Agent HTTP Server
//!
//! Axum-based server exposing the orchestration loop, the tool registry and
//! the session store over a REST API.
//!
//! Sessions and the query tools use MongoDB when `MONGODB_URI` is set and an
//! in-memory store with a small traffic dataset otherwise.

mod config;
mod handlers;
mod routes;
mod state;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{MemorySessionStore, Orchestrator, SessionStore};
use agent_store::{MongoDocumentSource, MongoSessionStore, SESSIONS_COLLECTION};
use agent_tools::{tools::RemoteToolClient, DocumentSource, MemoryDocumentSource};

use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;

    // Initialize LLM provider
    let provider = agent_runtime::build_provider(&config.backend)?;
    match provider.health_check().await {
        Ok(true) => tracing::info!(backend = provider.name(), model = %config.model, "✓ Backend reachable"),
        Ok(false) | Err(_) => {
            tracing::warn!(backend = provider.name(), "⚠ Backend not reachable - chat requests will fail until it is");
        }
    }

    // Storage
    let (sessions, documents): (Arc<dyn SessionStore>, Arc<dyn DocumentSource>) = match &config.mongo {
        Some(mongo) => {
            let db = mongo.connect().await?;
            let store = MongoSessionStore::new(&db);
            if let Err(err) = store.ensure_indexes().await {
                tracing::warn!(error = %err, "⚠ Could not create session indexes");
            }
            let source = MongoDocumentSource::new(db).hiding(SESSIONS_COLLECTION);
            (Arc::new(store), Arc::new(source))
        }
        None => {
            tracing::warn!("⚠ MONGODB_URI not set - using in-memory sessions and the demo dataset");
            (Arc::new(MemorySessionStore::new()), Arc::new(MemoryDocumentSource::demo()))
        }
    };

    // Tools proxied from a peer server
    let remote = match &config.remote_tools_url {
        Some(url) => {
            let client = RemoteToolClient::new(url.as_str(), config.tool_timeout)?;
            match client.discover().await {
                Ok(tools) => tools,
                Err(err) => {
                    tracing::warn!(url = %url, error = %err, "⚠ Remote tool discovery failed - continuing without them");
                    Vec::new()
                }
            }
        }
        None => Vec::new(),
    };

    let registry = agent_tools::build_registry(Some(documents.clone()), remote)?;
    tracing::info!("Registered {} tools:", registry.len());
    for name in registry.names() {
        tracing::info!("  • {}", name);
    }

    let orchestrator = Orchestrator::builder()
        .provider(provider)
        .tools(Arc::new(registry))
        .tool_timeout(config.tool_timeout)
        .session_store(sessions)
        .store_retry(config.store_retry.clone())
        .backend_retry(config.backend_retry.clone())
        .backend_timeout(config.backend_timeout)
        .system_prompt(config.system_prompt.clone())
        .model(config.model.clone())
        .max_iterations(config.max_iterations)
        .build()?;

    let app = routes::router(AppState::new(orchestrator, Some(documents)));

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 agent server running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("Endpoints:");
    for (method, path, what) in routes::ENDPOINTS {
        tracing::info!("  {:<6} {:<22} - {}", method, path, what);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
