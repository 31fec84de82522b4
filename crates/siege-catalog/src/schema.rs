//! Column families of the catalog database.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Managers, keyed by email.
    pub const MANAGERS: &str = "managers";

    /// Index: manager token to email.
    pub const MANAGERS_BY_TOKEN: &str = "managers_by_token";

    /// Donors, keyed by username.
    pub const DONORS: &str = "donors";

    /// Index: donor token to username.
    pub const DONORS_BY_TOKEN: &str = "donors_by_token";

    /// Engine keys, keyed by key.
    pub const ENGINE_KEYS: &str = "engine_keys";

    /// Targets, keyed by target id.
    pub const TARGETS: &str = "targets";

    /// Index: targets by owner, keyed by `owner || 0 || target_id`.
    pub const TARGETS_BY_OWNER: &str = "targets_by_owner";

    /// SCV registry, keyed by name.
    pub const SCVS: &str = "scvs";

    /// Per-shard stream index, keyed by `scv || 0 || stream_id`.
    pub const STREAMS: &str = "streams";

    /// Index: stream rows by target, keyed by `target_id || 0 || scv || 0 || stream_id`.
    pub const STREAMS_BY_TARGET: &str = "streams_by_target";

    /// Stats fragments, keyed by `end_time || uuid`.
    pub const FRAGMENTS: &str = "fragments";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::MANAGERS,
        cf::MANAGERS_BY_TOKEN,
        cf::DONORS,
        cf::DONORS_BY_TOKEN,
        cf::ENGINE_KEYS,
        cf::TARGETS,
        cf::TARGETS_BY_OWNER,
        cf::SCVS,
        cf::STREAMS,
        cf::STREAMS_BY_TARGET,
        cf::FRAGMENTS,
    ]
}

/// Join key parts with a NUL separator.
#[must_use]
pub fn compound_key(parts: &[&str]) -> Vec<u8> {
    parts.join("\0").into_bytes()
}

/// Prefix of every compound key starting with `parts`.
#[must_use]
pub fn compound_prefix(parts: &[&str]) -> Vec<u8> {
    let mut key = compound_key(parts);
    key.push(0);
    key
}
