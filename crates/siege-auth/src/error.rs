//! Authentication error types.

use thiserror::Error;

/// A result type using `AuthError`.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors that can occur during authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No `Authorization` header was sent.
    #[error("missing authorization header")]
    MissingHeader,

    /// The token is malformed or maps to no identity.
    #[error("bad token")]
    BadToken,

    /// The identity exists but lacks the required role.
    #[error("insufficient privileges")]
    Forbidden,

    /// Login with a wrong password or unknown account.
    #[error("bad username or password")]
    BadPassword,

    /// A stored password hash could not be parsed.
    #[error("malformed password hash")]
    MalformedHash,
}

impl AuthError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::MissingHeader | Self::BadToken | Self::Forbidden | Self::BadPassword => 401,
            Self::MalformedHash => 500,
        }
    }
}
