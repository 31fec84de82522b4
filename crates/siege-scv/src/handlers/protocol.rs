//! Core protocol endpoints.

use axum::body::Bytes;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use siege_catalog::ShardCatalog;

use crate::auth::CoreToken;
use crate::error::ScvError;
use crate::handlers::optional_json;
use crate::protocol::{CheckpointRequest, StopRequest};
use crate::state::ScvState;

/// `PUT /core/frame` response.
#[derive(Debug, Serialize)]
pub struct FrameResponse {
    /// False when the body repeated the previous frame.
    pub accepted: bool,
}

/// `PUT /core/checkpoint` response.
#[derive(Debug, Serialize)]
pub struct CheckpointResponse {
    /// Committed frames after the checkpoint.
    pub frames: i64,
}

/// `POST /core/heartbeat` response.
#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    /// New lease expiry, seconds since the epoch.
    pub expiry: f64,
}

/// `GET /core/start`
pub async fn start<C: ShardCatalog + 'static>(
    State(state): State<ScvState<C>>,
    CoreToken(token): CoreToken,
) -> Result<impl IntoResponse, ScvError> {
    let reply = state.service.core_start(&token).await?;
    Ok(Json(reply))
}

/// `PUT /core/frame`
pub async fn frame<C: ShardCatalog + 'static>(
    State(state): State<ScvState<C>>,
    CoreToken(token): CoreToken,
    body: Bytes,
) -> Result<impl IntoResponse, ScvError> {
    let accepted = state.service.core_frame(&token, &body).await?;
    Ok(Json(FrameResponse { accepted }))
}

/// `PUT /core/checkpoint`
pub async fn checkpoint<C: ShardCatalog + 'static>(
    State(state): State<ScvState<C>>,
    CoreToken(token): CoreToken,
    body: Bytes,
) -> Result<impl IntoResponse, ScvError> {
    let request: CheckpointRequest = optional_json(&body)?;
    let frames = state.service.core_checkpoint(&token, &request).await?;
    Ok(Json(CheckpointResponse { frames }))
}

/// `PUT /core/stop`
pub async fn stop<C: ShardCatalog + 'static>(
    State(state): State<ScvState<C>>,
    CoreToken(token): CoreToken,
    body: Bytes,
) -> Result<impl IntoResponse, ScvError> {
    let request: StopRequest = optional_json(&body)?;
    state.service.core_stop(&token, &request).await?;
    Ok(Json(serde_json::json!({})))
}

/// `POST /core/heartbeat`
pub async fn heartbeat<C: ShardCatalog + 'static>(
    State(state): State<ScvState<C>>,
    CoreToken(token): CoreToken,
) -> Result<impl IntoResponse, ScvError> {
    let expiry = state.service.core_heartbeat(&token).await?;
    Ok(Json(HeartbeatResponse { expiry }))
}
