//! Wall-clock helpers.
//!
//! Leases, locks and heartbeats are scored with fractional unix seconds so they
//! can live in ordered sets next to each other.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as fractional seconds since the unix epoch.
#[must_use]
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
