//! Stream lifecycle state machine.
//!
//! ```text
//!   create                 activate
//!  ───────▶ ┌────────┐ ──────────────▶ ┌────────┐
//!           │ Queued │                 │ Active │──┐ heartbeat,
//!           └────────┘ ◀────────────── └────────┘◀─┘ frame, checkpoint
//!             ▲   │     core stop,          │
//!     manager │   │     lease expiry        │ manager stop
//!       start │   │ manager stop            ▼
//!             │   └──────────────────▶ ┌─────────┐
//!             └─────────────────────── │ Stopped │
//!                                      └─────────┘
//!   Queued | Stopped ── manager delete ──▶ Deleted
//! ```
//!
//! Deleting an active stream deactivates it first.

use std::fmt;

use siege_core::{StreamId, StreamStatus};

use crate::error::{Result, ScvError};

/// Where a stream is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Enabled and waiting in its target queue.
    Queued,
    /// Leased to a core.
    Active,
    /// Disabled by a manager.
    Stopped,
    /// Removed.
    Deleted,
}

impl StreamState {
    /// Derive the state from the stream status and lease presence.
    #[must_use]
    pub const fn of(status: StreamStatus, leased: bool) -> Self {
        match (status, leased) {
            (_, true) => Self::Active,
            (StreamStatus::Ok, false) => Self::Queued,
            (StreamStatus::Stopped, false) => Self::Stopped,
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Stopped => "stopped",
            Self::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// Validates a state transition and returns the target state if valid.
///
/// # Errors
///
/// Returns `ScvError::BadRequest` if the transition is not allowed.
pub fn validate_transition(id: &StreamId, from: StreamState, to: StreamState) -> Result<StreamState> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(ScvError::BadRequest(format!(
            "stream {id} cannot go from {from} to {to}"
        )))
    }
}

/// Check if a state transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: StreamState, to: StreamState) -> bool {
    use StreamState::{Active, Deleted, Queued, Stopped};

    matches!(
        (from, to),
        (Queued, Active | Stopped | Deleted)
            | (Active, Active | Queued | Stopped)
            | (Stopped, Queued | Deleted)
    )
}
