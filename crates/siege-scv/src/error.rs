//! SCV error type and its HTTP mapping.
//!
//! Every non-2xx response carries the envelope `{"error": "<message>"}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use siege_auth::AuthError;
use siege_catalog::CatalogError;
use siege_core::{CoreError, IdError};
use siege_store::StoreError;

/// A result type using `ScvError`.
pub type Result<T> = std::result::Result<T, ScvError>;

/// Errors produced by the SCV.
#[derive(Debug, Error)]
pub enum ScvError {
    /// No credential was presented.
    #[error("missing authorization")]
    AuthMissing,

    /// The credential does not grant access.
    #[error("bad authorization: {0}")]
    AuthBad(String),

    /// The request is malformed or not allowed in the current state.
    #[error("{0}")]
    BadRequest(String),

    /// The referenced object does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The object already exists.
    #[error("{0} already exists")]
    Conflict(String),

    /// The stream lock could not be taken before the deadline.
    #[error("stream {0} is busy")]
    StreamBusy(String),

    /// Nothing could be handed out.
    #[error("{0}")]
    Unavailable(String),

    /// The stream index failed.
    #[error("index error: {0}")]
    Store(#[from] StoreError),

    /// The catalog failed.
    #[error("catalog error: {0}")]
    Catalog(CatalogError),

    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl ScvError {
    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthMissing | Self::AuthBad(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_)
            | Self::NotFound(_)
            | Self::Conflict(_)
            | Self::StreamBusy(_)
            | Self::Unavailable(_) => StatusCode::BAD_REQUEST,
            Self::Store(_) | Self::Catalog(_) | Self::Io(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns `true` if retrying the request may succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::StreamBusy(_) | Self::Unavailable(_) => true,
            Self::Catalog(e) => e.is_retriable(),
            _ => false,
        }
    }

    pub(crate) fn stream_not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("stream {id}"))
    }
}

impl IntoResponse for ScvError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ScvError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingHeader => Self::AuthMissing,
            AuthError::BadToken | AuthError::Forbidden | AuthError::BadPassword => {
                Self::AuthBad(err.to_string())
            }
            AuthError::MalformedHash => Self::Internal(err.to_string()),
        }
    }
}

impl From<CatalogError> for ScvError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(what) => Self::NotFound(what),
            CatalogError::Conflict(what) => Self::Conflict(what),
            other => Self::Catalog(other),
        }
    }
}

impl From<CoreError> for ScvError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::StreamNotFound(id) => Self::stream_not_found(id),
            CoreError::TargetNotFound(id) => Self::NotFound(format!("target {id}")),
            CoreError::InvalidId(e) => Self::BadRequest(e.to_string()),
            CoreError::InvalidValue(msg) => Self::BadRequest(msg),
        }
    }
}

impl From<IdError> for ScvError {
    fn from(err: IdError) -> Self {
        Self::BadRequest(err.to_string())
    }
}
