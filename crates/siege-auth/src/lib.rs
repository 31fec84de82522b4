//! Authentication primitives for siege.
//!
//! Managers and donors log in with a password and receive an opaque bearer
//! token; cores receive a bearer token from an SCV at activation; the command
//! center talks to SCVs with a shared password. This crate holds the pieces
//! those flows share:
//!
//! - [`hash_password`] / [`verify_password`]: salted blake3 password hashes
//! - [`secrets_match`]: comparison for shared passwords
//! - [`bearer_token`] / [`credential`]: `Authorization` header parsing
//!
//! # Example
//!
//! ```
//! use siege_auth::{hash_password, verify_password};
//!
//! let stored = hash_password("correct horse");
//! assert!(verify_password("correct horse", &stored).unwrap());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod header;
pub mod password;

pub use error::{AuthError, Result};
pub use header::{bearer_token, credential};
pub use password::{hash_password, secrets_match, verify_password};
