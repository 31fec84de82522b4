//! Core types and utilities for siege.
//!
//! This crate provides the foundational types shared by the Command Center
//! and the Stream Compute & Validation servers:
//!
//! - **Identifiers**: Strongly-typed IDs for streams, targets and bearer tokens
//! - **Enums**: Target stages, manager roles and stream status
//! - **Clock**: Wall-clock seconds used as scores in leases and locks
//! - **Error types**: Common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use siege_core::{BearerToken, StreamId, TargetId};
//!
//! let stream_id = StreamId::generate("scv-alpha");
//! assert_eq!(stream_id.scv(), "scv-alpha");
//!
//! let parsed: StreamId = stream_id.to_string().parse().unwrap();
//! assert_eq!(parsed, stream_id);
//!
//! let target_id = TargetId::generate();
//! let token = BearerToken::generate();
//! assert_eq!(token.as_str().len(), 64);
//! # let _ = target_id;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod error;
pub mod ids;
pub mod types;

pub use clock::now_secs;
pub use error::{CoreError, Result};
pub use ids::{validate_scv_name, BearerToken, IdError, StreamId, TargetId};
pub use types::{Role, Stage, StreamStatus};
