//! Error types for the entity store.

use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during entity store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The entity instance does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity name.
        entity: String,
        /// Instance id.
        id: String,
    },

    /// `create` was called for an id that already exists.
    #[error("{entity} {id} already exists")]
    AlreadyExists {
        /// Entity name.
        entity: String,
        /// Instance id.
        id: String,
    },

    /// A unique index already maps the value to a different id.
    #[error("unique index conflict: {0}")]
    Conflict(String),

    /// The call does not match the declared schema (unknown entity, unknown
    /// field, wrong field type, bad relation declaration).
    #[error("schema violation: {0}")]
    Schema(String),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub(crate) fn not_found(entity: &str, id: &str) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    /// Whether this error is a programmer error rather than a runtime condition.
    #[must_use]
    pub const fn is_schema(&self) -> bool {
        matches!(self, Self::Schema(_))
    }
}
