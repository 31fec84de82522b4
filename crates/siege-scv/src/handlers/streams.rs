//! Manager stream endpoints.

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use siege_catalog::ShardCatalog;
use siege_core::{StreamId, TargetId};

use crate::auth::ManagerAuth;
use crate::error::ScvError;
use crate::handlers::{stream_id, target_id, JsonBody};
use crate::state::ScvState;

// =============================================================================
// Request/Response Types
// =============================================================================

/// `POST /streams` body.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateStreamRequest {
    /// Target the stream belongs to.
    pub target_id: TargetId,
    /// Seed files, base64 encoded.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

/// `POST /streams` response.
#[derive(Debug, Serialize)]
pub struct CreateStreamResponse {
    /// Id of the new stream.
    pub stream_id: StreamId,
}

/// `PUT /streams/replace/:id` body.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplaceRequest {
    /// Seed files to overwrite, base64 encoded.
    pub files: BTreeMap<String, String>,
}

/// `GET /targets/streams/:target_id` response.
#[derive(Debug, Serialize)]
pub struct TargetStreamsResponse {
    /// Stream ids held by this SCV.
    pub streams: Vec<String>,
}

fn ack() -> Json<serde_json::Value> {
    Json(serde_json::json!({}))
}

// =============================================================================
// Handlers
// =============================================================================

/// `POST /streams`
pub async fn create<C: ShardCatalog + 'static>(
    State(state): State<ScvState<C>>,
    ManagerAuth(manager): ManagerAuth,
    JsonBody(request): JsonBody<CreateStreamRequest>,
) -> Result<impl IntoResponse, ScvError> {
    let stream_id = state
        .service
        .create_stream(&manager, &request.target_id, &request.files)
        .await?;
    Ok(Json(CreateStreamResponse { stream_id }))
}

/// `PUT /streams/start/:id`
pub async fn start<C: ShardCatalog + 'static>(
    State(state): State<ScvState<C>>,
    ManagerAuth(manager): ManagerAuth,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ScvError> {
    state.service.start_stream(&manager, &stream_id(&id)?).await?;
    Ok(ack())
}

/// `PUT /streams/stop/:id`
pub async fn stop<C: ShardCatalog + 'static>(
    State(state): State<ScvState<C>>,
    ManagerAuth(manager): ManagerAuth,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ScvError> {
    state.service.stop_stream(&manager, &stream_id(&id)?).await?;
    Ok(ack())
}

/// `PUT /streams/delete/:id`
pub async fn delete<C: ShardCatalog + 'static>(
    State(state): State<ScvState<C>>,
    ManagerAuth(manager): ManagerAuth,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ScvError> {
    state.service.delete_stream(&manager, &stream_id(&id)?).await?;
    Ok(ack())
}

/// `GET /streams/info/:id`
pub async fn info<C: ShardCatalog + 'static>(
    State(state): State<ScvState<C>>,
    _manager: ManagerAuth,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ScvError> {
    Ok(Json(state.service.stream_info(&stream_id(&id)?)?))
}

/// `GET /targets/streams/:target_id`
pub async fn for_target<C: ShardCatalog + 'static>(
    State(state): State<ScvState<C>>,
    _manager: ManagerAuth,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ScvError> {
    let streams = state.service.target_streams(&target_id(&id)?)?;
    Ok(Json(TargetStreamsResponse { streams }))
}

/// `GET /streams/sync/:id`
pub async fn sync<C: ShardCatalog + 'static>(
    State(state): State<ScvState<C>>,
    _manager: ManagerAuth,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ScvError> {
    Ok(Json(state.service.sync(&stream_id(&id)?).await?))
}

/// `GET /streams/download/:id/:filename`
pub async fn download<C: ShardCatalog + 'static>(
    State(state): State<ScvState<C>>,
    _manager: ManagerAuth,
    Path((id, filename)): Path<(String, String)>,
) -> Result<impl IntoResponse, ScvError> {
    let data = state.service.download(&stream_id(&id)?, &filename).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], data))
}

/// `PUT /streams/upload/:id/:filename`
pub async fn upload<C: ShardCatalog + 'static>(
    State(state): State<ScvState<C>>,
    ManagerAuth(manager): ManagerAuth,
    Path((id, filename)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ScvError> {
    let content_md5 = headers.get("content-md5").and_then(|v| v.to_str().ok());
    state
        .service
        .upload(&manager, &stream_id(&id)?, &filename, &body, content_md5)
        .await?;
    Ok(ack())
}

/// `PUT /streams/replace/:id`
pub async fn replace<C: ShardCatalog + 'static>(
    State(state): State<ScvState<C>>,
    ManagerAuth(manager): ManagerAuth,
    Path(id): Path<String>,
    JsonBody(request): JsonBody<ReplaceRequest>,
) -> Result<impl IntoResponse, ScvError> {
    state
        .service
        .replace(&manager, &stream_id(&id)?, &request.files)
        .await?;
    Ok(ack())
}
