//! Manager accounts.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use siege_catalog::Catalog;
use siege_core::Role;

use crate::auth::{AdminAuth, ManagerAuth};
use crate::error::ApiError;
use crate::handlers::{ack, JsonBody};
use crate::scv_client::ScvClient;
use crate::state::CcState;

/// `POST /managers` body.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateManagerRequest {
    /// Login email.
    pub email: String,
    /// Initial password.
    pub password: String,
    /// Role, `manager` by default.
    #[serde(default)]
    pub role: Role,
    /// Assignment weight, 1 by default.
    #[serde(default)]
    pub weight: Option<f64>,
}

/// `POST /managers/auth` body.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    /// Login email.
    pub email: String,
    /// Password.
    pub password: String,
}

/// Bearer token returned by a login.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Bearer token.
    pub token: String,
}

/// `GET /users/verify` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    /// Login email.
    pub email: String,
    /// Role.
    pub role: Role,
    /// Assignment weight.
    pub weight: f64,
}

/// `PUT /managers/weight/:email` body.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeightRequest {
    /// New weight; negative values become zero.
    pub weight: f64,
}

/// `POST /managers`
pub async fn create<C: Catalog + 'static, S: ScvClient + 'static>(
    State(state): State<CcState<C, S>>,
    AdminAuth(admin): AdminAuth,
    JsonBody(request): JsonBody<CreateManagerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .cc
        .create_manager(
            &request.email,
            &request.password,
            request.role,
            request.weight.unwrap_or(1.0),
        )
        .await?;
    tracing::debug!(by = %admin.email, email = %request.email, "Manager added");
    Ok(ack())
}

/// `POST /managers/auth`
pub async fn login<C: Catalog + 'static, S: ScvClient + 'static>(
    State(state): State<CcState<C, S>>,
    JsonBody(request): JsonBody<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let token = state.cc.login_manager(&request.email, &request.password).await?;
    Ok(Json(TokenResponse { token }))
}

/// `GET /users/verify`
pub async fn verify(ManagerAuth(manager): ManagerAuth) -> impl IntoResponse {
    Json(VerifyResponse {
        email: manager.email,
        role: manager.role,
        weight: manager.weight,
    })
}

/// `PUT /managers/weight/:email`
pub async fn set_weight<C: Catalog + 'static, S: ScvClient + 'static>(
    State(state): State<CcState<C, S>>,
    _admin: AdminAuth,
    Path(email): Path<String>,
    JsonBody(request): JsonBody<WeightRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let manager = state.cc.set_manager_weight(&email, request.weight).await?;
    Ok(Json(VerifyResponse {
        email: manager.email,
        role: manager.role,
        weight: manager.weight,
    }))
}
