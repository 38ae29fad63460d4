//! Session setup endpoints: credential check and the signaling upgrade.

use crate::backend_link::{BackendLink, LinkSettings};
use crate::registry::SessionRegistry;
use crate::session::{SessionBridge, WebSender};
use crate::AppState;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, Extension, Query,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use callbridge_db::{load_session_profile, verify_and_load_session_profile, ProfileError};
use callbridge_types::SessionProfile;
use callbridge_voice::VoiceAgentPipeline;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("unknown api key")]
    UnknownKey,
    #[error("unknown robot")]
    UnknownRobot,
    #[error("api secret does not match")]
    SecretMismatch,
    #[error("internal server error: {0}")]
    Internal(String),
}

impl From<ProfileError> for SetupError {
    fn from(error: ProfileError) -> Self {
        match error {
            ProfileError::KeyNotFound => SetupError::UnknownKey,
            ProfileError::RobotNotFound => SetupError::UnknownRobot,
            ProfileError::SecretMismatch => SetupError::SecretMismatch,
            ProfileError::Database(e) => SetupError::Internal(format!("database error: {e}")),
        }
    }
}

impl IntoResponse for SetupError {
    fn into_response(self) -> Response {
        let status = match self {
            SetupError::BadRequest(_) | SetupError::UnknownKey | SetupError::UnknownRobot => {
                StatusCode::BAD_REQUEST
            }
            SetupError::SecretMismatch => StatusCode::UNAUTHORIZED,
            SetupError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(serde_json::json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct InitRequest {
    pub api_key: String,
    pub api_secret: String,
    pub robot_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InitResponse {
    pub code: u16,
    pub message: String,
    pub slot: String,
}

/// Query parameters for the signaling upgrade.
#[derive(Debug, Deserialize)]
pub struct SetupParams {
    pub api_key: Option<String>,
    pub robot_id: Option<String>,
}

/// Runs a profile lookup on the blocking pool.
async fn lookup_profile<F>(state: &Arc<AppState>, lookup: F) -> Result<SessionProfile, SetupError>
where
    F: FnOnce(&rusqlite::Connection) -> Result<SessionProfile, ProfileError> + Send + 'static,
{
    let pool = state.pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|e| SetupError::Internal(format!("db connection failed: {e}")))?;
        lookup(&conn).map_err(SetupError::from)
    })
    .await
    .map_err(|e| SetupError::Internal(format!("task join error: {e}")))?
}

/// Handler for `POST /api/webrtc/init`.
pub async fn init_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<InitRequest>,
) -> Result<Json<InitResponse>, SetupError> {
    if payload.api_key.is_empty() {
        return Err(SetupError::BadRequest("api_key is required".to_string()));
    }

    let model = state.config.llm.model.clone();
    let InitRequest {
        api_key,
        api_secret,
        robot_id,
    } = payload;
    let slot = SessionRegistry::slot_key(&api_key, robot_id);

    lookup_profile(&state, move |conn| {
        verify_and_load_session_profile(conn, &api_key, &api_secret, robot_id, &model)
    })
    .await?;

    tracing::info!(slot = %slot, "credentials verified");
    Ok(Json(InitResponse {
        code: 200,
        message: "initialized".to_string(),
        slot,
    }))
}

/// Handler for `GET /webrtc/setup`.
///
/// The profile lookup and LLM client creation happen before the upgrade, so
/// a bad credential gets a plain HTTP error and never creates a session.
pub async fn setup_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    Query(params): Query<SetupParams>,
) -> Result<Response, SetupError> {
    let api_key = params
        .api_key
        .filter(|k| !k.is_empty())
        .ok_or_else(|| SetupError::BadRequest("api_key is required".to_string()))?;
    let robot_id: i64 = params
        .robot_id
        .as_deref()
        .ok_or_else(|| SetupError::BadRequest("robot_id is required".to_string()))?
        .parse()
        .map_err(|_| SetupError::BadRequest("robot_id must be an integer".to_string()))?;

    let model = state.config.llm.model.clone();
    let key = api_key.clone();
    let profile = match lookup_profile(&state, move |conn| {
        load_session_profile(conn, &key, robot_id, &model)
    })
    .await
    {
        Ok(profile) => profile,
        Err(e) => {
            tracing::warn!(remote_addr = %addr, robot_id, error = %e, "session setup rejected");
            return Err(e);
        }
    };

    let llm = state
        .llm_connector
        .connect(&profile.llm)
        .map_err(|e| SetupError::BadRequest(format!("llm is not configured: {e}")))?;
    let pipeline = VoiceAgentPipeline::new(llm, profile.llm.model.clone(), state.config.pipeline.clone());

    let slot = SessionRegistry::slot_key(&api_key, robot_id);
    tracing::info!(remote_addr = %addr, slot = %slot, "upgrading signaling connection");

    Ok(ws
        .on_upgrade(move |socket| serve_session(socket, state, slot, profile, pipeline))
        .into_response())
}

async fn serve_session(
    socket: WebSocket,
    state: Arc<AppState>,
    slot: String,
    profile: SessionProfile,
    pipeline: VoiceAgentPipeline,
) {
    let (sink, stream) = socket.split();
    let web = WebSender::spawn(sink);

    let backend = &state.config.backend;
    let (link, link_events) = BackendLink::new(LinkSettings {
        url: backend.call_url(),
        connect_timeout: backend.connect_timeout(),
        retry: backend.retry.clone(),
    });

    let bridge = SessionBridge::new(slot.clone(), profile, web, link);
    let session_id = bridge.id();
    state.registry.replace(bridge.clone()).await;

    bridge
        .run(
            stream,
            link_events,
            pipeline,
            state.config.pipeline.turn_queue_depth,
        )
        .await;

    state.registry.remove(&slot, session_id).await;
    tracing::info!(session_id = %session_id, slot = %slot, "session ended");
}
