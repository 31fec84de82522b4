//! `Authorization` header parsing.

use siege_core::BearerToken;

use crate::error::{AuthError, Result};

/// Extract the credential from an `Authorization` header value.
///
/// Both the bare form (`Authorization: <token>`) and the `Bearer <token>`
/// form are accepted.
///
/// # Errors
///
/// Returns `AuthError::MissingHeader` when the header is absent or empty.
pub fn credential(header: Option<&str>) -> Result<&str> {
    let value = header.map(str::trim).ok_or(AuthError::MissingHeader)?;
    let value = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .unwrap_or(value)
        .trim();
    if value.is_empty() {
        return Err(AuthError::MissingHeader);
    }
    Ok(value)
}

/// Extract and parse a bearer token.
///
/// # Errors
///
/// Returns `AuthError::MissingHeader` when absent and `AuthError::BadToken`
/// when the value is not a well-formed token.
pub fn bearer_token(header: Option<&str>) -> Result<BearerToken> {
    let raw = credential(header)?;
    BearerToken::parse(raw).map_err(|_| AuthError::BadToken)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bare_and_prefixed() {
        let token = BearerToken::generate();
        let bare = token.as_str().to_string();
        let prefixed = format!("Bearer {bare}");
        assert_eq!(bearer_token(Some(&bare)).unwrap(), token);
        assert_eq!(bearer_token(Some(&prefixed)).unwrap(), token);
    }

    #[test]
    fn missing_and_bad() {
        assert_eq!(bearer_token(None), Err(AuthError::MissingHeader));
        assert_eq!(bearer_token(Some("  ")), Err(AuthError::MissingHeader));
        assert_eq!(bearer_token(Some("Bearer ")), Err(AuthError::MissingHeader));
        assert_eq!(bearer_token(Some("nothex")), Err(AuthError::BadToken));
    }

    #[test]
    fn credential_passes_secrets_through() {
        assert_eq!(credential(Some("s3cret")).unwrap(), "s3cret");
    }
}
