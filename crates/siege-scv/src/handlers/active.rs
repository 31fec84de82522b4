//! Lease endpoints: activation by the command center and the active-stream
//! listing.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use siege_catalog::ShardCatalog;
use siege_core::TargetId;

use crate::auth::CommandCenter;
use crate::error::ScvError;
use crate::handlers::JsonBody;
use crate::state::ScvState;

/// `POST /streams/activate` body.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivateRequest {
    /// Target to take a stream from.
    pub target_id: TargetId,
    /// Engine tag of the requesting core.
    pub engine: String,
    /// Donor to credit.
    #[serde(default)]
    pub user: Option<String>,
}

/// `POST /streams/activate` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActivateResponse {
    /// Bearer token for the core.
    pub token: String,
}

/// `POST /streams/activate`
pub async fn activate<C: ShardCatalog + 'static>(
    State(state): State<ScvState<C>>,
    _cc: CommandCenter,
    JsonBody(request): JsonBody<ActivateRequest>,
) -> Result<impl IntoResponse, ScvError> {
    let token = state.service.activate(
        &request.target_id,
        &request.engine,
        request.user.as_deref(),
    )?;
    Ok(Json(ActivateResponse {
        token: token.as_str().to_string(),
    }))
}

/// `GET /active_streams`
pub async fn list<C: ShardCatalog + 'static>(
    State(state): State<ScvState<C>>,
) -> Result<impl IntoResponse, ScvError> {
    Ok(Json(state.service.active_streams()?))
}
