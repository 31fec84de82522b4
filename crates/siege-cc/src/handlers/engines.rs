//! Engine keys. Admin only.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use siege_catalog::Catalog;

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::handlers::{ack, JsonBody};
use crate::scv_client::ScvClient;
use crate::state::CcState;

/// `POST /engines/keys` body.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateKeyRequest {
    /// Engine tag the key stands for.
    pub engine: String,
    /// Free text.
    #[serde(default)]
    pub description: String,
}

/// `POST /engines/keys` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateKeyResponse {
    /// The new key.
    pub key: String,
}

/// `POST /engines/keys`
pub async fn create<C: Catalog + 'static, S: ScvClient + 'static>(
    State(state): State<CcState<C, S>>,
    _admin: AdminAuth,
    JsonBody(request): JsonBody<CreateKeyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let key = state
        .cc
        .create_engine_key(&request.engine, &request.description)
        .await?;
    Ok(Json(CreateKeyResponse { key: key.id }))
}

/// `GET /engines/keys`
pub async fn list<C: Catalog + 'static, S: ScvClient + 'static>(
    State(state): State<CcState<C, S>>,
    _admin: AdminAuth,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.cc.list_engine_keys().await?))
}

/// `PUT /engines/keys/delete/:id`
pub async fn delete<C: Catalog + 'static, S: ScvClient + 'static>(
    State(state): State<CcState<C, S>>,
    _admin: AdminAuth,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.cc.delete_engine_key(&id).await?;
    Ok(ack())
}
