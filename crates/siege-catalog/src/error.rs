//! Error types for the catalog.

use thiserror::Error;

/// A result type using `CatalogError`.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Errors that can occur during catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The referenced record does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A record with the same identity already exists.
    #[error("{0} already exists")]
    Conflict(String),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The remote catalog rejected the call.
    #[error("remote catalog error: {0}")]
    Remote(String),

    /// The remote catalog could not be reached.
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

impl CatalogError {
    /// Returns `true` if the same call may succeed when retried.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Database(_))
    }

    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) | Self::Conflict(_) => 400,
            Self::Remote(_) | Self::Unavailable(_) => 502,
            Self::Database(_) | Self::Serialization(_) => 500,
        }
    }
}
