//! agentloop HTTP Server
//!
//! Axum-based server exposing the agent over a REST API and a WebSocket
//! stream, plus endpoints to inspect and delete stored sessions.

mod config;
mod handlers;
mod state;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::handlers::{
    chat_handler, chat_stream_handler, delete_session, get_session, health_check, list_models,
    list_sessions, list_tools,
};
use crate::state::AppState;

/// All routes with CORS and request tracing
fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & info
        .route("/health", get(health_check))
        .route("/api/models", get(list_models))
        .route("/api/tools", get(list_tools))
        // Agent API
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/stream", get(chat_stream_handler))
        // Sessions
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{id}", get(get_session).delete(delete_session))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment before reading RUST_LOG
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    let state = AppState::from_config(&config).await?;

    // Verify the model backend
    let provider = state.agent.provider();
    match provider.health_check().await {
        Ok(true) => {
            tracing::info!("✓ Connected to {} (model {})", state.provider, config.provider.model);
            if let Ok(models) = provider.list_models().await {
                for model in models {
                    tracing::info!("  Model: {}", model.id);
                }
            }
        }
        Ok(false) | Err(_) => {
            tracing::warn!("⚠ {} not available - turns will fail until it is", state.provider);
            tracing::warn!("  Check LLM_PROVIDER and its connection settings");
        }
    }

    tracing::info!("Registered {} tools:", state.agent.tools().len());
    for name in state.agent.tools().names() {
        tracing::info!("  • {}", name);
    }
    tracing::info!("Round-trip cap: {}", config.max_round_trips);

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 agentloop server running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET    /health             - Health check");
    tracing::info!("  GET    /api/models         - List available models");
    tracing::info!("  GET    /api/tools          - List registered tools");
    tracing::info!("  POST   /api/chat           - Run one turn");
    tracing::info!("  GET    /api/chat/stream    - WebSocket streaming");
    tracing::info!("  GET    /api/sessions       - List sessions");
    tracing::info!("  GET    /api/sessions/{{id}}  - Session history");
    tracing::info!("  DELETE /api/sessions/{{id}}  - Delete session");
    tracing::info!("");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
