//! Target catalog endpoints.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use siege_catalog::Catalog;
use siege_core::TargetId;

use crate::auth::ManagerAuth;
use crate::error::ApiError;
use crate::handlers::{ack, target_id, JsonBody};
use crate::scv_client::ScvClient;
use crate::state::CcState;
use crate::targets::{CreateTarget, TargetStream, UpdateTarget};

/// `GET /targets` query.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Restrict to one owner.
    #[serde(default)]
    pub manager: Option<String>,
}

/// `GET /targets` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct TargetsResponse {
    /// Target ids.
    pub targets: Vec<TargetId>,
}

/// `POST /targets` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTargetResponse {
    /// The new target's id.
    pub target_id: TargetId,
}

/// `GET /targets/streams/:id` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct StreamsResponse {
    /// Streams across every shard.
    pub streams: Vec<TargetStream>,
}

/// `GET /targets`
pub async fn list<C: Catalog + 'static, S: ScvClient + 'static>(
    State(state): State<CcState<C, S>>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let targets = state.cc.list_targets(query.manager.as_deref()).await?;
    Ok(Json(TargetsResponse { targets }))
}

/// `POST /targets`
pub async fn create<C: Catalog + 'static, S: ScvClient + 'static>(
    State(state): State<CcState<C, S>>,
    ManagerAuth(manager): ManagerAuth,
    JsonBody(request): JsonBody<CreateTarget>,
) -> Result<impl IntoResponse, ApiError> {
    let target = state.cc.create_target(&manager, request).await?;
    Ok(Json(CreateTargetResponse { target_id: target.id }))
}

/// `GET /targets/info/:id`
pub async fn info<C: Catalog + 'static, S: ScvClient + 'static>(
    State(state): State<CcState<C, S>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.cc.target(&target_id(&id)?).await?))
}

/// `PUT /targets/update/:id`
pub async fn update<C: Catalog + 'static, S: ScvClient + 'static>(
    State(state): State<CcState<C, S>>,
    ManagerAuth(manager): ManagerAuth,
    Path(id): Path<String>,
    JsonBody(request): JsonBody<UpdateTarget>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .cc
        .update_target(&manager, &target_id(&id)?, request)
        .await?;
    Ok(ack())
}

/// `PUT /targets/delete/:id`
pub async fn delete<C: Catalog + 'static, S: ScvClient + 'static>(
    State(state): State<CcState<C, S>>,
    ManagerAuth(manager): ManagerAuth,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.cc.delete_target(&manager, &target_id(&id)?).await?;
    Ok(ack())
}

/// `GET /targets/streams/:id`
pub async fn streams<C: Catalog + 'static, S: ScvClient + 'static>(
    State(state): State<CcState<C, S>>,
    _manager: ManagerAuth,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let streams = state.cc.target_streams(&target_id(&id)?).await?;
    Ok(Json(StreamsResponse { streams }))
}
