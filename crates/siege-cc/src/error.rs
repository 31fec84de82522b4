//! API error types and responses.
//!
//! Every non-2xx response carries `{"error": "<message>"}`. Client mistakes
//! are reported as 400, credential problems as 401.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use siege_auth::AuthError;
use siege_catalog::CatalogError;
use siege_core::{CoreError, IdError};

/// A result type using `ApiError`.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors produced by the command center.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No credential was presented.
    #[error("missing authorization")]
    AuthMissing,

    /// The credential does not grant access.
    #[error("bad authorization: {0}")]
    AuthBad(String),

    /// Invalid request body or parameters.
    #[error("{0}")]
    BadRequest(String),

    /// The referenced object does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The object already exists.
    #[error("{0} already exists")]
    Conflict(String),

    /// No shard could serve the request.
    #[error("{0}")]
    Unavailable(String),

    /// Catalog failure.
    #[error("catalog error: {0}")]
    Catalog(CatalogError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl ApiError {
    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthMissing | Self::AuthBad(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) | Self::NotFound(_) | Self::Conflict(_) | Self::Unavailable(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Catalog(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` if retrying the request may succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Catalog(e) => e.is_retriable(),
            _ => false,
        }
    }

    /// The caller is authenticated but lacks the admin role.
    pub(crate) fn admin_only() -> Self {
        Self::AuthBad(AuthError::Forbidden.to_string())
    }
}

impl IntoResponse for ApiError {
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

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingHeader => Self::AuthMissing,
            AuthError::BadToken | AuthError::Forbidden | AuthError::BadPassword => {
                Self::AuthBad(err.to_string())
            }
            AuthError::MalformedHash => {
                tracing::error!(error = %err, "Stored password hash is unreadable");
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(what) => Self::NotFound(what),
            CatalogError::Conflict(what) => Self::Conflict(what),
            other => Self::Catalog(other),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::StreamNotFound(id) => Self::NotFound(format!("stream {id}")),
            CoreError::TargetNotFound(id) => Self::NotFound(format!("target {id}")),
            CoreError::InvalidId(e) => Self::BadRequest(e.to_string()),
            CoreError::InvalidValue(msg) => Self::BadRequest(msg),
        }
    }
}

impl From<IdError> for ApiError {
    fn from(err: IdError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(ApiError::AuthMissing.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::admin_only().status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Unavailable("no streams available".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn catalog_errors_map_by_kind() {
        let err = ApiError::from(CatalogError::Conflict("manager a@b.org".into()));
        assert_eq!(err.to_string(), "manager a@b.org already exists");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        let err = ApiError::from(CatalogError::Database("io".into()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.is_retriable());
    }

    #[test]
    fn bad_password_is_unauthorized() {
        assert_eq!(
            ApiError::from(AuthError::BadPassword).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }
}
