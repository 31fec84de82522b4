//! `GET /scvs/status`

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use siege_catalog::Catalog;

use crate::scv_client::ScvClient;
use crate::state::CcState;

/// `GET /scvs/status`: host and reachability of every registered SCV.
pub async fn status<C: Catalog + 'static, S: ScvClient + 'static>(
    State(state): State<CcState<C, S>>,
) -> impl IntoResponse {
    Json(state.cc.scv_status())
}
