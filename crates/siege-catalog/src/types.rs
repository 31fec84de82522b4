//! Catalog record types.

use serde::{Deserialize, Serialize};
use siege_core::{Role, Stage, StreamId, StreamStatus, TargetId};

/// Free-form target options.
pub type Options = serde_json::Map<String, serde_json::Value>;

/// A manager account (`users.managers`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manager {
    /// Email, the manager's identity.
    pub email: String,
    /// Salted password hash.
    pub password_hash: String,
    /// Current bearer token, rotated on every login.
    pub token: Option<String>,
    /// Role.
    pub role: Role,
    /// Relative weight in assignment, at least zero.
    pub weight: f64,
}

/// A donor account (`community.donors`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Donor {
    /// Username, the donor's identity.
    pub username: String,
    /// Contact email.
    pub email: String,
    /// Salted password hash.
    pub password_hash: String,
    /// Current bearer token.
    pub token: Option<String>,
}

/// An engine key (`engines.keys`). The id doubles as the credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineKey {
    /// The key itself.
    pub id: String,
    /// Engine tag the key resolves to.
    pub engine: String,
    /// Free text.
    pub description: String,
    /// Creation time, seconds since the epoch.
    pub creation_date: f64,
}

/// A target (`data.targets`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Identity.
    pub id: TargetId,
    /// Owning manager's email.
    pub owner: String,
    /// Creation time, seconds since the epoch.
    pub creation_date: f64,
    /// Engine tags this target runs on.
    pub engines: Vec<String>,
    /// Visibility stage.
    pub stage: Stage,
    /// Free-form options passed to cores.
    pub options: Options,
    /// Relative weight among the owner's targets, at least zero.
    pub weight: f64,
    /// Names of SCVs holding at least one stream of this target.
    pub shards: Vec<String>,
}

/// An SCV registry row (`servers.scvs`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScvRecord {
    /// SCV name.
    pub name: String,
    /// Externally reachable host (`host[:port]`).
    pub host: String,
    /// Shared password for CC to SCV requests.
    pub password: String,
}

/// A row of the per-shard stream index (`streams.<scv>`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEntry {
    /// Stream id.
    pub stream_id: StreamId,
    /// Target the stream belongs to.
    pub target_id: TargetId,
    /// Enabled or disabled.
    pub status: StreamStatus,
}

/// A completed unit of work (`stats.fragments`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// Engine tag the core ran.
    pub engine: String,
    /// Donor credited, if any.
    pub user: Option<String>,
    /// Activation time.
    pub start_time: f64,
    /// Deactivation time.
    pub end_time: f64,
    /// Frames committed during the session.
    pub frames: i64,
    /// Stream worked on.
    pub stream: StreamId,
}
