//! Callbridge server library logic.
//!
//! Browsers reach the server over a signaling websocket; each connection
//! becomes a [`session::SessionBridge`] paired with its own
//! [`backend_link::BackendLink`] to the call-processing backend.

pub mod backend_link;
pub mod backoff;
pub mod config;
pub mod registry;
pub mod session;
pub mod setup;
pub mod translator;

use axum::{
    routing::{get, post},
    Extension, Json, Router,
};
use callbridge_db::DbPool;
use callbridge_voice::LlmConnector;
use config::Config;
use registry::SessionRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Loaded server configuration.
    pub config: Arc<Config>,
    /// Live sessions, one per `{api_key}/{robot_id}` slot.
    pub registry: SessionRegistry,
    /// Builds the LLM client for each new session.
    pub llm_connector: Arc<dyn LlmConnector>,
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/webrtc/init", post(setup::init_handler))
        .route("/webrtc/setup", get(setup::setup_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
