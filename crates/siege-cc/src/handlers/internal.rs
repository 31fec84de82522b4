//! Internal catalog endpoint.
//!
//! SCVs reach the catalog through `POST /internal/catalog`, authenticated
//! with the cluster secret. Each request is one `ShardCatalogCall`.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use siege_catalog::{Catalog, ShardCatalogCall};

use crate::auth::ClusterAuth;
use crate::error::ApiError;
use crate::handlers::JsonBody;
use crate::scv_client::ScvClient;
use crate::state::CcState;

/// `POST /internal/catalog`
pub async fn catalog<C: Catalog + 'static, S: ScvClient + 'static>(
    State(state): State<CcState<C, S>>,
    _cluster: ClusterAuth,
    JsonBody(call): JsonBody<ShardCatalogCall>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.cc.internal_catalog(call).await?))
}
