//! Persistent catalog for siege.
//!
//! The catalog is the system of record for managers, donors, engine keys,
//! targets, the SCV registry, the per-shard stream index and the stats
//! fragments. The command center owns the database ([`RocksCatalog`]); SCVs
//! reach the subset they need through [`RemoteCatalog`], which forwards
//! [`ShardCatalogCall`]s to the command center's internal endpoint.
//!
//! # Architecture
//!
//! ```text
//!   SCV                                   CC
//!  +----------------+   POST /internal   +------------------+
//!  | RemoteCatalog  |------------------->| dispatch(call)   |
//!  | (ShardCatalog) |    /catalog        |       |          |
//!  +----------------+                    | RocksCatalog     |
//!                                        | (Catalog)        |
//!                                        +------------------+
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod remote;
pub mod rocks;
pub mod schema;
pub mod types;
pub mod wire;

pub use error::{CatalogError, Result};
pub use remote::RemoteCatalog;
pub use rocks::RocksCatalog;
pub use types::{Donor, EngineKey, Fragment, Manager, Options, ScvRecord, StreamEntry, Target};
pub use wire::{dispatch, CatalogReply, ShardCatalogCall};

use async_trait::async_trait;
use siege_core::{StreamId, TargetId};

/// The part of the catalog an SCV uses.
#[async_trait]
pub trait ShardCatalog: Send + Sync {
    /// Insert or replace an SCV registry row.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be written.
    async fn register_scv(&self, scv: &ScvRecord) -> Result<()>;

    /// Fetch a target.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    async fn get_target(&self, id: &TargetId) -> Result<Option<Target>>;

    /// Resolve a manager from their current bearer token.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    async fn manager_by_token(&self, token: &str) -> Result<Option<Manager>>;

    /// Add an SCV to a target's shard set (idempotent).
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if the target does not exist.
    async fn add_target_shard(&self, id: &TargetId, scv: &str) -> Result<()>;

    /// Remove an SCV from a target's shard set (idempotent).
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be written.
    async fn remove_target_shard(&self, id: &TargetId, scv: &str) -> Result<()>;

    /// Insert or replace a row of the stream index of `scv`.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be written.
    async fn upsert_stream_entry(&self, scv: &str, entry: &StreamEntry) -> Result<()>;

    /// Remove a row of the stream index of `scv`.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be written.
    async fn delete_stream_entry(&self, scv: &str, stream_id: &StreamId) -> Result<()>;

    /// Append a stats fragment.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be written.
    async fn insert_fragment(&self, fragment: &Fragment) -> Result<()>;
}

/// The full catalog, as used by the command center.
#[async_trait]
pub trait Catalog: ShardCatalog {
    // =========================================================================
    // Managers
    // =========================================================================

    /// Insert a new manager.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Conflict` if the email is taken.
    async fn insert_manager(&self, manager: &Manager) -> Result<()>;

    /// Fetch a manager by email.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    async fn get_manager(&self, email: &str) -> Result<Option<Manager>>;

    /// Replace an existing manager, keeping the token index consistent.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if the manager does not exist.
    async fn update_manager(&self, manager: &Manager) -> Result<()>;

    /// All managers.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    async fn list_managers(&self) -> Result<Vec<Manager>>;

    // =========================================================================
    // Donors
    // =========================================================================

    /// Insert a new donor.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Conflict` if the username is taken.
    async fn insert_donor(&self, donor: &Donor) -> Result<()>;

    /// Fetch a donor by username.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    async fn get_donor(&self, username: &str) -> Result<Option<Donor>>;

    /// Replace an existing donor, keeping the token index consistent.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if the donor does not exist.
    async fn update_donor(&self, donor: &Donor) -> Result<()>;

    /// Resolve a donor from their current bearer token.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    async fn donor_by_token(&self, token: &str) -> Result<Option<Donor>>;

    // =========================================================================
    // Engine keys
    // =========================================================================

    /// Insert an engine key.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Conflict` if the key exists.
    async fn insert_engine_key(&self, key: &EngineKey) -> Result<()>;

    /// Fetch an engine key.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    async fn get_engine_key(&self, id: &str) -> Result<Option<EngineKey>>;

    /// All engine keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    async fn list_engine_keys(&self) -> Result<Vec<EngineKey>>;

    /// Remove an engine key.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if the key does not exist.
    async fn delete_engine_key(&self, id: &str) -> Result<()>;

    // =========================================================================
    // Targets
    // =========================================================================

    /// Insert a new target.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Conflict` if the id exists.
    async fn insert_target(&self, target: &Target) -> Result<()>;

    /// Replace an existing target.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if the target does not exist.
    async fn update_target(&self, target: &Target) -> Result<()>;

    /// Remove a target.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if the target does not exist.
    async fn delete_target(&self, id: &TargetId) -> Result<()>;

    /// All targets, optionally restricted to one owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    async fn list_targets(&self, owner: Option<&str>) -> Result<Vec<Target>>;

    // =========================================================================
    // SCVs, stream index, stats
    // =========================================================================

    /// Fetch an SCV registry row.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    async fn get_scv(&self, name: &str) -> Result<Option<ScvRecord>>;

    /// All SCV registry rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    async fn list_scvs(&self) -> Result<Vec<ScvRecord>>;

    /// The stream index of one SCV.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    async fn list_stream_entries(&self, scv: &str) -> Result<Vec<StreamEntry>>;

    /// Every stream index row of a target, across SCVs, as `(scv, entry)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    async fn target_stream_entries(&self, id: &TargetId) -> Result<Vec<(String, StreamEntry)>>;

    /// All stats fragments, ordered by end time.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    async fn list_fragments(&self) -> Result<Vec<Fragment>>;
}
