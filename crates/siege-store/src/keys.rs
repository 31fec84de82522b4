//! Key encoding for the entity store.
//!
//! Every key starts with a one-byte tag naming the key family, followed by
//! NUL-separated components. Components are validated by the caller to never
//! contain NUL, so every family supports exact prefix scans.
//!
//! | Tag | Layout | Value |
//! |---|---|---|
//! | `e` | `e entity id` | empty (existence marker) |
//! | `h` | `h entity id field` | CBOR [`Value`](crate::Value) |
//! | `s` | `s entity id field member` | empty |
//! | `z` | `z entity id field member` | score, 8 bytes big-endian `f64` bits |
//! | `o` | `o entity id field <sortable score> member` | empty |
//! | `u` | `u entity field value` | id of the owner |
//! | `m` | `m entity field value id` | empty |

/// Existence markers.
pub const TAG_EXISTS: u8 = b'e';
/// Hash fields.
pub const TAG_HASH: u8 = b'h';
/// Plain set members.
pub const TAG_SET: u8 = b's';
/// Sorted-set member to score.
pub const TAG_ZSCORE: u8 = b'z';
/// Sorted-set score order.
pub const TAG_ZORDER: u8 = b'o';
/// Unique lookups.
pub const TAG_UNIQUE: u8 = b'u';
/// Multi-valued lookups.
pub const TAG_MULTI: u8 = b'm';

const SEP: u8 = 0;

fn build(tag: u8, parts: &[&str]) -> Vec<u8> {
    let len = 1 + parts.iter().map(|p| p.len() + 1).sum::<usize>();
    let mut key = Vec::with_capacity(len);
    key.push(tag);
    for part in parts {
        key.push(SEP);
        key.extend_from_slice(part.as_bytes());
    }
    key
}

fn prefix(tag: u8, parts: &[&str]) -> Vec<u8> {
    let mut key = build(tag, parts);
    key.push(SEP);
    key
}

/// Whether a key component is safe to embed.
#[must_use]
pub fn is_valid_component(s: &str) -> bool {
    !s.is_empty() && !s.as_bytes().contains(&SEP)
}

/// `e entity id`
#[must_use]
pub fn exists_key(entity: &str, id: &str) -> Vec<u8> {
    build(TAG_EXISTS, &[entity, id])
}

/// Prefix over every instance of an entity.
#[must_use]
pub fn exists_prefix(entity: &str) -> Vec<u8> {
    prefix(TAG_EXISTS, &[entity])
}

/// `h entity id field`
#[must_use]
pub fn hash_key(entity: &str, id: &str, field: &str) -> Vec<u8> {
    build(TAG_HASH, &[entity, id, field])
}

/// `s entity id field member`
#[must_use]
pub fn set_key(entity: &str, id: &str, field: &str, member: &str) -> Vec<u8> {
    build(TAG_SET, &[entity, id, field, member])
}

/// Prefix over the members of one set field.
#[must_use]
pub fn set_prefix(entity: &str, id: &str, field: &str) -> Vec<u8> {
    prefix(TAG_SET, &[entity, id, field])
}

/// `z entity id field member`
#[must_use]
pub fn zscore_key(entity: &str, id: &str, field: &str, member: &str) -> Vec<u8> {
    build(TAG_ZSCORE, &[entity, id, field, member])
}

/// Prefix over the member scores of one sorted-set field.
#[must_use]
pub fn zscore_prefix(entity: &str, id: &str, field: &str) -> Vec<u8> {
    prefix(TAG_ZSCORE, &[entity, id, field])
}

/// `o entity id field <score> member`
#[must_use]
pub fn zorder_key(entity: &str, id: &str, field: &str, score: f64, member: &str) -> Vec<u8> {
    let mut key = zorder_prefix(entity, id, field);
    key.extend_from_slice(&sortable_score(score));
    key.extend_from_slice(member.as_bytes());
    key
}

/// Prefix over one sorted-set field in score order.
#[must_use]
pub fn zorder_prefix(entity: &str, id: &str, field: &str) -> Vec<u8> {
    prefix(TAG_ZORDER, &[entity, id, field])
}

/// Split a `zorder` key suffix (after the prefix) into score and member.
#[must_use]
pub fn split_zorder_suffix(suffix: &[u8]) -> Option<(f64, String)> {
    if suffix.len() < 8 {
        return None;
    }
    let (score, member) = suffix.split_at(8);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(score);
    let member = String::from_utf8(member.to_vec()).ok()?;
    Some((score_from_sortable(bytes), member))
}

/// `u entity field value`
#[must_use]
pub fn unique_key(entity: &str, field: &str, value: &str) -> Vec<u8> {
    build(TAG_UNIQUE, &[entity, field, value])
}

/// `m entity field value id`
#[must_use]
pub fn multi_key(entity: &str, field: &str, value: &str, id: &str) -> Vec<u8> {
    build(TAG_MULTI, &[entity, field, value, id])
}

/// Prefix over the ids sharing one indexed value.
#[must_use]
pub fn multi_prefix(entity: &str, field: &str, value: &str) -> Vec<u8> {
    prefix(TAG_MULTI, &[entity, field, value])
}

/// Encode an `f64` so that byte order matches numeric order.
#[must_use]
pub fn sortable_score(score: f64) -> [u8; 8] {
    let bits = score.to_bits();
    let bits = if bits >> 63 == 1 {
        !bits
    } else {
        bits | (1 << 63)
    };
    bits.to_be_bytes()
}

/// Inverse of [`sortable_score`].
#[must_use]
pub fn score_from_sortable(bytes: [u8; 8]) -> f64 {
    let bits = u64::from_be_bytes(bytes);
    let bits = if bits >> 63 == 1 {
        bits & !(1 << 63)
    } else {
        !bits
    };
    f64::from_bits(bits)
}

/// Return the trailing component of a key after `prefix`, as UTF-8.
#[must_use]
pub fn suffix_str(key: &[u8], prefix: &[u8]) -> Option<String> {
    key.strip_prefix(prefix)
        .and_then(|rest| String::from_utf8(rest.to_vec()).ok())
}
