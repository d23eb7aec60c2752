//! ============================================================================
//! Relay Server - HTTP and WebSocket surface over the orchestrator
//! ============================================================================
//! Routes:
//! - POST /chat        request/response exchange
//! - GET  /, GET /ws   WebSocket channel with streamed tokens
//! - GET  /health      liveness plus vector store reachability
//! ============================================================================

mod http;
mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use relay_core::Orchestrator;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared handler state; cloned per request
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(http::chat))
        .route("/health", get(http::health))
        .route("/", get(ws::upgrade))
        .route("/ws", get(ws::upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until ctrl-c
pub async fn serve(bind_addr: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    info!("HTTP + WebSocket relay listening on http://{}", bind_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Relay server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down relay server");
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use relay_core::testing::{InMemoryIndex, KeywordEmbedder, ScriptedModel, TEST_DIM};
    use relay_core::{MemoryStore, RecallSettings};

    pub(crate) struct Harness {
        pub state: AppState,
        pub index: Arc<InMemoryIndex>,
        pub embedder: Arc<KeywordEmbedder>,
        pub model: Arc<ScriptedModel>,
    }

    pub(crate) fn harness(model: ScriptedModel) -> Harness {
        let index = Arc::new(InMemoryIndex::existing());
        let embedder = Arc::new(KeywordEmbedder::new());
        let model = Arc::new(model);
        let memory = Arc::new(MemoryStore::new(
            index.clone(),
            embedder.clone(),
            TEST_DIM as u64,
        ));
        let orchestrator = Orchestrator::new(
            memory,
            model.clone(),
            "You are a test assistant.",
            RecallSettings::default(),
        );
        Harness {
            state: AppState::new(Arc::new(orchestrator)),
            index,
            embedder,
            model,
        }
    }
}
