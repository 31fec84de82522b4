//! Common error types for siege.
//!
//! This module provides shared error types that are used across multiple crates.

use crate::ids::{StreamId, TargetId};
use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur throughout the siege system.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A stream with the specified ID was not found.
    #[error("stream not found: {0}")]
    StreamNotFound(StreamId),

    /// A target with the specified ID was not found.
    #[error("target not found: {0}")]
    TargetNotFound(TargetId),

    /// An invalid identifier was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),

    /// An unknown enum value was provided.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}
