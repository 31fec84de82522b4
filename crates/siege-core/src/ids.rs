//! Core identifier types for siege.
//!
//! Streams are owned by exactly one shard, so a stream identifier embeds the
//! name of the SCV that created it. Targets are plain UUIDs. Bearer tokens are
//! opaque 32-byte values rendered as hex.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a stream: `"<uuid>:<scv-name>"`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamId {
    uuid: uuid::Uuid,
    scv: String,
}

impl StreamId {
    /// Generate a new stream ID owned by the given shard.
    ///
    /// # Panics
    ///
    /// Panics if `scv` is not a valid shard name. Shard names come from
    /// configuration and are validated at startup with [`validate_scv_name`].
    #[must_use]
    pub fn generate(scv: &str) -> Self {
        assert!(validate_scv_name(scv).is_ok(), "invalid scv name: {scv}");
        Self {
            uuid: uuid::Uuid::new_v4(),
            scv: scv.to_string(),
        }
    }

    /// Build a stream ID from its parts.
    ///
    /// # Errors
    ///
    /// Returns an error if the shard name is invalid.
    pub fn from_parts(uuid: uuid::Uuid, scv: &str) -> Result<Self, IdError> {
        validate_scv_name(scv)?;
        Ok(Self {
            uuid,
            scv: scv.to_string(),
        })
    }

    /// Return the UUID half of the identifier.
    #[must_use]
    pub const fn uuid(&self) -> &uuid::Uuid {
        &self.uuid
    }

    /// Return the name of the shard that owns this stream.
    #[must_use]
    pub fn scv(&self) -> &str {
        &self.scv
    }
}

impl FromStr for StreamId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (uuid, scv) = s.split_once(':').ok_or(IdError::MissingShard)?;
        let uuid = uuid::Uuid::parse_str(uuid).map_err(|_| IdError::InvalidUuid)?;
        Self::from_parts(uuid, scv)
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({}:{})", self.uuid, self.scv)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uuid, self.scv)
    }
}

impl TryFrom<String> for StreamId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StreamId> for String {
    fn from(id: StreamId) -> Self {
        id.to_string()
    }
}

/// Identifier of a target (a simulation work definition).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetId(uuid::Uuid);

impl TargetId {
    /// Create a `TargetId` from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a new random `TargetId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Return the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl FromStr for TargetId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
        Ok(Self(uuid))
    }
}

impl fmt::Debug for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetId({})", self.0)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for TargetId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TargetId> for String {
    fn from(id: TargetId) -> Self {
        id.0.to_string()
    }
}

/// An opaque bearer token, 32 random bytes rendered as 64 hex characters.
///
/// Tokens are handed to managers, donors and cores. They carry no structure;
/// the server maps them back to an identity through an index lookup.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BearerToken(String);

impl BearerToken {
    /// Generate a fresh random token using blake3 over two v4 UUIDs.
    #[must_use]
    pub fn generate() -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(uuid::Uuid::new_v4().as_bytes());
        hasher.update(uuid::Uuid::new_v4().as_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }

    /// Parse a token from its hex representation.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not 64 hex characters.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let bytes = hex::decode(s).map_err(|_| IdError::InvalidHex)?;
        if bytes.len() != 32 {
            return Err(IdError::InvalidLength {
                expected: 32,
                got: bytes.len(),
            });
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Return the hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only a short prefix is ever printed.
        write!(f, "BearerToken({}..)", &self.0[..8.min(self.0.len())])
    }
}

impl fmt::Display for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for BearerToken {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BearerToken> for String {
    fn from(token: BearerToken) -> Self {
        token.0
    }
}

/// Validate a shard name.
///
/// Shard names appear inside stream IDs, catalog collection names and URLs,
/// so they are restricted to ASCII alphanumerics, `-`, `_` and `.`.
///
/// # Errors
///
/// Returns `IdError::InvalidShardName` if the name is empty, too long, or
/// contains other characters.
pub fn validate_scv_name(name: &str) -> Result<(), IdError> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(IdError::InvalidShardName(name.to_string()))
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input string contains invalid hexadecimal characters.
    #[error("invalid hex encoding")]
    InvalidHex,

    /// The input has an incorrect length.
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// The expected number of bytes.
        expected: usize,
        /// The actual number of bytes.
        got: usize,
    },

    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,

    /// A stream ID without the `:<scv>` suffix.
    #[error("stream id is missing the shard suffix")]
    MissingShard,

    /// The shard name contains forbidden characters.
    #[error("invalid shard name: {0}")]
    InvalidShardName(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_roundtrip() {
        let id = StreamId::generate("scv-1");
        let parsed: StreamId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(parsed.scv(), "scv-1");
    }

    #[test]
    fn stream_id_requires_shard() {
        let uuid = uuid::Uuid::new_v4().to_string();
        assert_eq!(uuid.parse::<StreamId>(), Err(IdError::MissingShard));
        assert_eq!(
            format!("{uuid}:").parse::<StreamId>(),
            Err(IdError::InvalidShardName(String::new()))
        );
        assert_eq!(
            format!("{uuid}:../etc").parse::<StreamId>(),
            Err(IdError::InvalidShardName("../etc".into()))
        );
    }

    #[test]
    fn stream_id_rejects_bad_uuid() {
        assert_eq!("nope:scv".parse::<StreamId>(), Err(IdError::InvalidUuid));
    }

    #[test]
    fn stream_id_serde_json() {
        let id = StreamId::generate("alpha");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: StreamId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn target_id_serde_json() {
        let id = TargetId::generate();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: TargetId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn tokens_are_unique_hex() {
        let a = BearerToken::generate();
        let b = BearerToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(BearerToken::parse(a.as_str()).unwrap(), a);
    }

    #[test]
    fn token_parse_errors() {
        assert_eq!(BearerToken::parse("zz"), Err(IdError::InvalidHex));
        assert!(matches!(
            BearerToken::parse("deadbeef"),
            Err(IdError::InvalidLength { expected: 32, got: 4 })
        ));
    }

    #[test]
    fn token_debug_is_truncated() {
        let token = BearerToken::generate();
        let debug = format!("{token:?}");
        assert!(!debug.contains(token.as_str()));
    }

    #[test]
    fn scv_names() {
        assert!(validate_scv_name("scv-01.eu_west").is_ok());
        assert!(validate_scv_name("").is_err());
        assert!(validate_scv_name("a/b").is_err());
        assert!(validate_scv_name("a:b").is_err());
    }
}
