//! agentry HTTP Server
//!
//! Axum-based server exposing the AI service surface: chat and text
//! completions, SSE token streaming and autonomous agent runs backed by the
//! agentry-core execution loop.

mod config;
mod handlers;
mod presets;
mod state;

use std::sync::Arc;

use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agentry_core::ModelProvider;
use agentry_runtime::OpenAiProvider;

use crate::config::ServerConfig;
use crate::handlers::{
    agent_run_handler, chat_handler, chat_stream_handler, completion_handler,
    completion_stream_handler, health_check,
};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let config = Arc::new(ServerConfig::from_env()?);

    // Initialize LLM provider
    let provider: Arc<dyn ModelProvider> = Arc::new(OpenAiProvider::from_env()?);

    match provider.health_check().await {
        Ok(true) => tracing::info!("✓ Model provider reachable"),
        Ok(false) | Err(_) => {
            tracing::warn!("⚠ Model provider not reachable - requests will fail");
            tracing::warn!("  Check OPENAI_API_KEY and OPENAI_BASE_URL");
        }
    }

    tracing::info!(model = %config.model, "Default model configured");
    if config.api_key.is_none() {
        tracing::warn!("⚠ AGENT_API_KEY not set - header format enforced, key not compared");
    }

    // Build application state
    let state = AppState {
        provider,
        config: config.clone(),
    };

    // CORS configuration
    let cors = build_cors(&config.cors_origins)?;

    // Build router
    let app = Router::new()
        // Health & info
        .route("/health", get(health_check))
        // Completion API
        .route("/api/v1/chat", post(chat_handler))
        .route("/api/v1/chat/stream", post(chat_stream_handler))
        .route("/api/v1/completions", post(completion_handler))
        .route("/api/v1/completions/stream", post(completion_stream_handler))
        // Agent API
        .route("/api/v1/agent/run", post(agent_run_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 agentry server running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                     - Health check");
    tracing::info!("  POST /api/v1/chat                - Chat completion");
    tracing::info!("  POST /api/v1/chat/stream         - SSE chat stream");
    tracing::info!("  POST /api/v1/completions         - Text completion");
    tracing::info!("  POST /api/v1/completions/stream  - SSE completion stream");
    tracing::info!("  POST /api/v1/agent/run           - Autonomous agent run");
    tracing::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the CORS layer from configured origins; `*` allows any origin
fn build_cors(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return Ok(cors.allow_origin(Any));
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .map(|o| HeaderValue::from_str(o))
        .collect::<Result<_, _>>()?;
    Ok(cors.allow_origin(parsed))
}
