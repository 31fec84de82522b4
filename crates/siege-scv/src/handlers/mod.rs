//! HTTP request handlers.

pub mod active;
pub mod health;
pub mod protocol;
pub mod streams;

use async_trait::async_trait;
use axum::extract::{FromRequest, Request};
use axum::Json;
use serde::de::DeserializeOwned;
use siege_core::{StreamId, TargetId};

use crate::error::{Result, ScvError};

/// JSON body whose rejection uses the error envelope.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ScvError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ScvError::BadRequest(rejection.body_text())),
        }
    }
}

/// Parse a JSON body that may be empty.
pub(crate) fn optional_json<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ScvError::BadRequest(format!("bad body: {e}")))
}

pub(crate) fn stream_id(raw: &str) -> Result<StreamId> {
    raw.parse()
        .map_err(|e| ScvError::BadRequest(format!("bad stream id {raw:?}: {e}")))
}

pub(crate) fn target_id(raw: &str) -> Result<TargetId> {
    raw.parse()
        .map_err(|e| ScvError::BadRequest(format!("bad target id {raw:?}: {e}")))
}
