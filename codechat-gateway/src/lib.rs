//! CodeChat Gateway - Stateful chat proxy in front of an LLM backend.
//!
//! This crate provides:
//! - Bounded per-session conversation history
//! - Code-request detection and prompt augmentation
//! - Code extraction and per-session artifact files
//! - Full-response and token-streamed chat over HTTP
//!
//! ## Architecture
//!
//! ```text
//! Client → routes → ChatOrchestrator (history → intent → provider) → Ollama
//!                          ↓                        ↓
//!                   ArtifactStore          StreamRelay (SSE)
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod artifact;
pub mod error;
pub mod extract;
pub mod intent;
pub mod language;
pub mod orchestrator;
pub mod provider;
pub mod relay;
pub mod routes;
pub mod session;

pub use artifact::{ArtifactStore, CodeArtifact};
pub use error::GatewayError;
pub use orchestrator::{ChatInput, ChatOrchestrator, ChatOutcome};
pub use provider::{ChatRequest, ChatResponse, OllamaProvider, Provider, ProviderError};
pub use relay::{RelayEvent, StreamRelay};
pub use routes::AppState;
pub use session::{ConversationStore, MemoryConversationStore};

use axum::Router;
use codechat_common::config::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

/// Assemble application state from configuration.
pub fn build_state(config: &Config) -> AppState {
    let provider: Arc<dyn Provider> = Arc::new(OllamaProvider::from_config(&config.llm.ollama));
    let store: Arc<dyn ConversationStore> =
        Arc::new(MemoryConversationStore::new(config.server.history_limit));
    let artifacts = Arc::new(ArtifactStore::new(config.artifact_dir()));

    AppState::new(ChatOrchestrator::new(
        store,
        provider,
        artifacts,
        config.llm.ollama.default_model.clone(),
    ))
}

/// Build the gateway router with all routes and middleware.
pub fn build_router(config: &Config) -> Router {
    build_router_with_state(build_state(config), config.server.max_body_bytes)
}

/// Build the router around prepared state.
pub fn build_router_with_state(state: AppState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::build_routes(state)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(cors)
}

/// Start the gateway server.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from((
        config.bind_address().parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    let router = build_router(config);

    tracing::info!(
        backend = %config.llm.ollama.base_url,
        model = %config.llm.ollama.default_model,
        artifact_dir = %config.artifact_dir().display(),
        "Starting CodeChat gateway on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
