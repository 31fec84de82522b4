//! Donor accounts.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use siege_catalog::Catalog;

use crate::error::ApiError;
use crate::handlers::managers::TokenResponse;
use crate::handlers::{ack, JsonBody};
use crate::scv_client::ScvClient;
use crate::state::CcState;

/// `POST /donors` body.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateDonorRequest {
    /// Username.
    pub username: String,
    /// Contact email.
    #[serde(default)]
    pub email: String,
    /// Password.
    pub password: String,
}

/// `POST /donors/auth` body.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DonorLoginRequest {
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
}

/// `POST /donors`
pub async fn create<C: Catalog + 'static, S: ScvClient + 'static>(
    State(state): State<CcState<C, S>>,
    JsonBody(request): JsonBody<CreateDonorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .cc
        .create_donor(&request.username, &request.email, &request.password)
        .await?;
    Ok(ack())
}

/// `POST /donors/auth`
pub async fn login<C: Catalog + 'static, S: ScvClient + 'static>(
    State(state): State<CcState<C, S>>,
    JsonBody(request): JsonBody<DonorLoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let token = state.cc.login_donor(&request.username, &request.password).await?;
    Ok(Json(TokenResponse { token }))
}
