//! Salted password hashing.
//!
//! Hashes are stored as `blake3$<salt-hex>$<digest-hex>`, where the digest is
//! the keyed blake3 derivation of the password under a random 16-byte salt.

use crate::error::{AuthError, Result};

const SCHEME: &str = "blake3";
const CONTEXT: &str = "siege 2024 password hashing";

fn digest(salt: &[u8], password: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new_derive_key(CONTEXT);
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize()
}

/// Hash a password with a fresh random salt.
#[must_use]
pub fn hash_password(password: &str) -> String {
    let salt = uuid::Uuid::new_v4();
    let hash = digest(salt.as_bytes(), password);
    format!("{SCHEME}${}${}", hex::encode(salt.as_bytes()), hash.to_hex())
}

/// Check a password against a stored hash.
///
/// # Errors
///
/// Returns `AuthError::MalformedHash` if `stored` is not a hash produced by
/// [`hash_password`].
pub fn verify_password(password: &str, stored: &str) -> Result<bool> {
    let mut parts = stored.split('$');
    let (Some(SCHEME), Some(salt), Some(expected), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::MalformedHash);
    };
    let salt = hex::decode(salt).map_err(|_| AuthError::MalformedHash)?;
    let expected = blake3::Hash::from_hex(expected).map_err(|_| AuthError::MalformedHash)?;
    // `blake3::Hash` equality is constant time.
    Ok(digest(&salt, password) == expected)
}

/// Compare two shared secrets without leaking the position of the first
/// differing byte.
#[must_use]
pub fn secrets_match(given: &str, expected: &str) -> bool {
    blake3::hash(given.as_bytes()) == blake3::hash(expected.as_bytes())
}
