//! HTTP API for Roundtable.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /api/v1/agents` - Responding agents (key, name, role, avatar)
//! - `POST /api/v1/chat` - Run one orchestration pass
//! - `POST /api/v1/chat/stream` - Same pass as Server-Sent Events
//!
//! # Architecture
//!
//! ```text
//! Client (web chat, curl, ...)
//!    │
//!    ▼
//! ┌─────────────────┐
//! │   API Gateway   │ ◄── This crate
//! │     (Axum)      │
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │   Coordinator   │  approval interception, routing, turns
//! └─────────────────┘
//! ```

pub mod routes;
pub mod state;

use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use state::AppState;

/// CORS layer: permissive unless an explicit origin list is given.
fn cors_layer(origins: Option<Vec<String>>) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    match origins {
        Some(origins) if !origins.iter().any(|o| o == "*") => {
            let allowed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!(origin = %origin, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            base.allow_origin(AllowOrigin::list(allowed))
        }
        _ => base.allow_origin(Any),
    }
}

/// Create the API router with all routes configured.
pub fn create_router(state: Arc<AppState>, cors_origins: Option<Vec<String>>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/v1/agents", get(routes::list_agents))
        .route("/api/v1/chat", post(routes::chat))
        .route("/api/v1/chat/stream", post(routes::chat_stream))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

/// Start the API server on the given address.
pub async fn serve(
    state: Arc<AppState>,
    addr: SocketAddr,
    cors_origins: Option<Vec<String>>,
) -> anyhow::Result<()> {
    let router = create_router(state, cors_origins);

    info!(%addr, "Starting Roundtable API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
