//! `POST /core/assign`

use axum::body::Bytes;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use siege_catalog::Catalog;

use crate::assign::AssignRequest;
use crate::auth::EngineKeyHeader;
use crate::error::ApiError;
use crate::handlers::optional_json;
use crate::scv_client::ScvClient;
use crate::state::CcState;

/// `POST /core/assign`. The body may be empty.
pub async fn assign<C: Catalog + 'static, S: ScvClient + 'static>(
    State(state): State<CcState<C, S>>,
    EngineKeyHeader(key): EngineKeyHeader,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: AssignRequest = optional_json(&body)?;
    Ok(Json(state.cc.assign(&key, &request).await?))
}
