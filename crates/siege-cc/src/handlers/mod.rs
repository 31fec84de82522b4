//! HTTP request handlers.

pub mod assign;
pub mod donors;
pub mod engines;
pub mod health;
pub mod internal;
pub mod managers;
pub mod scvs;
pub mod targets;

use async_trait::async_trait;
use axum::extract::{FromRequest, Request};
use axum::Json;
use serde::de::DeserializeOwned;
use siege_core::TargetId;

use crate::error::{ApiError, Result};

/// JSON body whose rejection uses the error envelope.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
        }
    }
}

/// Parse a JSON body that may be empty.
pub(crate) fn optional_json<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("bad body: {e}")))
}

pub(crate) fn target_id(raw: &str) -> Result<TargetId> {
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("bad target id {raw:?}: {e}")))
}

/// Empty success body.
pub(crate) fn ack() -> Json<serde_json::Value> {
    Json(serde_json::json!({}))
}
