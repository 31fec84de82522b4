//! Stream lifecycle operations.
//!
//! [`ScvService`] ties the stream index, the lock manager, the on-disk
//! store and the catalog together. Every mutation of a stream happens while
//! holding that stream's lock. The core protocol and the background sweeps
//! live in their own modules as further `impl` blocks on the same type.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use siege_catalog::{Fragment, Manager, ShardCatalog, StreamEntry, Target};
use siege_core::{now_secs, BearerToken, Role, StreamId, StreamStatus, TargetId};
use siege_store::{EntityStore, Txn};

use crate::config::ScvConfig;
use crate::disk::{self, StreamFiles, SyncListing};
use crate::error::{Result, ScvError};
use crate::index::{
    self, active, load_active, require_stream, scv, stream, target, ActiveRecord, StreamRecord,
    ACTIVE, SCV, SELF, STREAM, TARGET,
};
use crate::lifecycle::{validate_transition, StreamState};
use crate::lock::{LockGuard, LockManager};
use crate::stats;

/// What happens to a stream when its lease ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Back into the target queue, scored by committed frames.
    Requeue,
    /// Marked STOPPED and left out of the queue.
    Stop,
    /// Left out of the queue; the caller is about to delete the stream.
    Discard,
}

/// `GET /streams/info/:id`.
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    #[serde(flatten)]
    pub stream: StreamRecord,
    pub active: Option<ActiveRecord>,
}

/// `GET /streams/sync/:id`.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReply {
    pub frames: i64,
    #[serde(flatten)]
    pub listing: SyncListing,
}

/// The SCV: stream index, locks, files and the catalog.
pub struct ScvService<C: ShardCatalog> {
    config: ScvConfig,
    index: Arc<EntityStore>,
    locks: LockManager,
    files: StreamFiles,
    catalog: Arc<C>,
}

impl<C: ShardCatalog + 'static> ScvService<C> {
    /// Assemble a service.
    #[must_use]
    pub fn new(config: ScvConfig, index: EntityStore, files: StreamFiles, catalog: Arc<C>) -> Self {
        let index = Arc::new(index);
        Self {
            config,
            locks: LockManager::new(Arc::clone(&index)),
            index,
            files,
            catalog,
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ScvConfig {
        &self.config
    }

    /// The lock manager.
    #[must_use]
    pub const fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// The on-disk stream store.
    #[must_use]
    pub const fn files(&self) -> &StreamFiles {
        &self.files
    }

    /// The catalog.
    #[must_use]
    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// This shard's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Run `f` as one index transaction.
    pub(crate) fn txn<T>(&self, f: impl FnOnce(&mut Txn<'_>) -> Result<T>) -> Result<T> {
        self.index.transact(f)
    }

    pub(crate) async fn lock(&self, id: &StreamId) -> Result<LockGuard> {
        self.locks
            .start_lock(&id.to_string(), self.config.lock_deadline())
            .await
    }

    /// Upsert this SCV's registry row.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be reached.
    pub async fn register(&self) -> Result<()> {
        let record = siege_catalog::ScvRecord {
            name: self.config.name.clone(),
            host: self.config.external_host.clone(),
            password: self.config.password.clone(),
        };
        self.catalog.register_scv(&record).await?;
        tracing::info!(scv = %record.name, host = %record.host, "Registered with catalog");
        Ok(())
    }

    // =========================================================================
    // Manager operations
    // =========================================================================

    /// Create a stream of `target_id` with the given base64 seed files and
    /// queue it with score 0.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown target, `AuthBad` if the manager
    /// does not own it, `BadRequest` for bad files, or a catalog error (in
    /// which case nothing is left behind).
    pub async fn create_stream(
        &self,
        manager: &Manager,
        target_id: &TargetId,
        files: &BTreeMap<String, String>,
    ) -> Result<StreamId> {
        let target = self.owned_target(manager, target_id).await?;
        let seeds = disk::decode_seeds(files)?;
        let id = StreamId::generate(&self.config.name);
        let _guard = self.lock(&id).await?;

        self.files.create(&id, &seeds).await?;
        let key = id.to_string();
        let tkey = target_id.to_string();
        let now = now_secs();
        let indexed = self.txn(|tx| {
            tx.ensure(TARGET, &tkey)?;
            tx.create(STREAM, &key)?;
            tx.hset(STREAM, &key, stream::FRAMES, 0_i64)?;
            tx.hset(STREAM, &key, stream::STATUS, StreamStatus::Ok.as_str())?;
            tx.hset(STREAM, &key, stream::ERROR_COUNT, 0_i64)?;
            tx.hset(STREAM, &key, stream::CREATION_DATE, now)?;
            tx.hset(STREAM, &key, stream::TARGET, tkey.as_str())?;
            tx.zadd(TARGET, &tkey, target::QUEUE, &key, 0.0)?;
            Ok(())
        });
        if let Err(e) = indexed {
            self.remove_files_quietly(&id).await;
            return Err(e);
        }

        if let Err(e) = self.publish_stream(&target, &id).await {
            tracing::warn!(stream_id = %id, error = %e, "Catalog rejected new stream, rolling back");
            self.txn(|tx| remove_from_index(tx, &id, target_id))?;
            self.remove_files_quietly(&id).await;
            return Err(e);
        }

        tracing::info!(stream_id = %id, target_id = %target_id, "Stream created");
        Ok(id)
    }

    async fn publish_stream(&self, target: &Target, id: &StreamId) -> Result<()> {
        self.publish_status(id, &target.id, StreamStatus::Ok).await?;
        if !target.shards.iter().any(|s| s == &self.config.name) {
            self.catalog
                .add_target_shard(&target.id, &self.config.name)
                .await?;
        }
        Ok(())
    }

    async fn publish_status(&self, id: &StreamId, target_id: &TargetId, status: StreamStatus) -> Result<()> {
        let entry = StreamEntry {
            stream_id: id.clone(),
            target_id: *target_id,
            status,
        };
        self.catalog
            .upsert_stream_entry(&self.config.name, &entry)
            .await?;
        Ok(())
    }

    /// Re-enable a stopped stream. Starting an enabled stream is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `AuthBad` or `StreamBusy`.
    pub async fn start_stream(&self, manager: &Manager, id: &StreamId) -> Result<()> {
        let _guard = self.lock(id).await?;
        let (record, leased) = self.txn(|tx| Ok((require_stream(tx, id)?, is_leased(tx, id)?)))?;
        self.owned_target(manager, &record.target_id).await?;

        let from = StreamState::of(record.status, leased);
        if from != StreamState::Stopped {
            return Ok(());
        }
        validate_transition(id, from, StreamState::Queued)?;
        let (key, tkey) = (id.to_string(), record.target_id.to_string());
        self.txn(|tx| {
            tx.hset(STREAM, &key, stream::STATUS, StreamStatus::Ok.as_str())?;
            tx.ensure(TARGET, &tkey)?;
            tx.zadd(TARGET, &tkey, target::QUEUE, &key, queue_score(record.frames))?;
            Ok(())
        })?;
        self.publish_status(id, &record.target_id, StreamStatus::Ok).await?;
        tracing::info!(stream_id = %id, "Stream started");
        Ok(())
    }

    /// Disable a stream, ending its lease if it has one.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `AuthBad` or `StreamBusy`.
    pub async fn stop_stream(&self, manager: &Manager, id: &StreamId) -> Result<()> {
        let _guard = self.lock(id).await?;
        let (record, leased) = self.txn(|tx| Ok((require_stream(tx, id)?, is_leased(tx, id)?)))?;
        self.owned_target(manager, &record.target_id).await?;

        let from = StreamState::of(record.status, leased);
        match from {
            StreamState::Stopped | StreamState::Deleted => return Ok(()),
            StreamState::Active => {
                validate_transition(id, from, StreamState::Stopped)?;
                self.deactivate(id, Disposition::Stop).await?;
            }
            StreamState::Queued => {
                validate_transition(id, from, StreamState::Stopped)?;
                let (key, tkey) = (id.to_string(), record.target_id.to_string());
                self.txn(|tx| {
                    tx.zrem(TARGET, &tkey, target::QUEUE, &key)?;
                    tx.hset(STREAM, &key, stream::STATUS, StreamStatus::Stopped.as_str())?;
                    Ok(())
                })?;
            }
        }
        self.publish_status(id, &record.target_id, StreamStatus::Stopped)
            .await?;
        tracing::info!(stream_id = %id, "Stream stopped");
        Ok(())
    }

    /// Delete a stream and its files. The last stream of a target on this
    /// SCV also takes the SCV out of the target's shard set.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `AuthBad` or `StreamBusy`.
    pub async fn delete_stream(&self, manager: &Manager, id: &StreamId) -> Result<()> {
        let _guard = self.lock(id).await?;
        let (record, leased) = self.txn(|tx| Ok((require_stream(tx, id)?, is_leased(tx, id)?)))?;
        self.owned_target(manager, &record.target_id).await?;

        if leased {
            self.deactivate(id, Disposition::Discard).await?;
        }
        let status = self.txn(|tx| require_stream(tx, id))?.status;
        validate_transition(id, StreamState::of(status, false), StreamState::Deleted)?;

        let target_emptied = self.txn(|tx| remove_from_index(tx, id, &record.target_id))?;
        self.files.remove(id).await?;
        self.catalog
            .delete_stream_entry(&self.config.name, id)
            .await?;
        if target_emptied {
            self.catalog
                .remove_target_shard(&record.target_id, &self.config.name)
                .await?;
            tracing::info!(target_id = %record.target_id, "Last stream of target removed from shard");
        }
        tracing::info!(stream_id = %id, "Stream deleted");
        Ok(())
    }

    /// Stream row plus its lease, if any.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown stream.
    pub fn stream_info(&self, id: &StreamId) -> Result<StreamInfo> {
        self.txn(|tx| {
            Ok(StreamInfo {
                stream: require_stream(tx, id)?,
                active: load_active(tx, id)?,
            })
        })
    }

    /// Ids of every stream of a target held by this SCV.
    ///
    /// # Errors
    ///
    /// Returns an error if the index fails.
    pub fn target_streams(&self, target_id: &TargetId) -> Result<Vec<String>> {
        let tkey = target_id.to_string();
        self.txn(|tx| Ok(tx.smembers(TARGET, &tkey, target::STREAMS)?))
    }

    /// Committed layout of a stream.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown stream.
    pub async fn sync(&self, id: &StreamId) -> Result<SyncReply> {
        let record = self.txn(|tx| require_stream(tx, id))?;
        let listing = self.files.sync_listing(id).await?;
        Ok(SyncReply {
            frames: record.frames,
            listing,
        })
    }

    /// Contents of a seed file or a concatenated frame file.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown stream or file, `BadRequest` for an
    /// unsafe name.
    pub async fn download(&self, id: &StreamId, name: &str) -> Result<Vec<u8>> {
        self.txn(|tx| require_stream(tx, id))?;
        self.files
            .download(id, name)
            .await?
            .ok_or_else(|| ScvError::NotFound(format!("file {name}")))
    }

    /// Store raw bytes as a seed file of a stopped stream, after checking
    /// them against the hex MD5 in `content_md5`.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if the stream is not stopped, the checksum is
    /// missing or wrong, or the name is unsafe.
    pub async fn upload(
        &self,
        manager: &Manager,
        id: &StreamId,
        name: &str,
        body: &[u8],
        content_md5: Option<&str>,
    ) -> Result<()> {
        let expected = content_md5
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ScvError::BadRequest("missing Content-MD5".to_string()))?;
        let actual = md5_hex(body);
        if !expected.eq_ignore_ascii_case(&actual) {
            return Err(ScvError::BadRequest("Content-MD5 mismatch".to_string()));
        }
        let name = disk::checked_name(name)?;

        let _guard = self.lock(id).await?;
        self.require_stopped(manager, id).await?;
        let mut seeds = disk::FileMap::new();
        seeds.insert(name.to_string(), body.to_vec());
        self.files.write_seeds(id, &seeds).await?;
        tracing::info!(stream_id = %id, file = name, bytes = body.len(), "Seed file uploaded");
        Ok(())
    }

    /// Overwrite seed files of a stopped stream with base64 payloads.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if the stream is not stopped or a payload is bad.
    pub async fn replace(&self, manager: &Manager, id: &StreamId, files: &BTreeMap<String, String>) -> Result<()> {
        let seeds = disk::decode_seeds(files)?;
        let _guard = self.lock(id).await?;
        self.require_stopped(manager, id).await?;
        self.files.write_seeds(id, &seeds).await?;
        tracing::info!(stream_id = %id, files = seeds.len(), "Seed files replaced");
        Ok(())
    }

    async fn require_stopped(&self, manager: &Manager, id: &StreamId) -> Result<()> {
        let (record, leased) = self.txn(|tx| Ok((require_stream(tx, id)?, is_leased(tx, id)?)))?;
        self.owned_target(manager, &record.target_id).await?;
        if StreamState::of(record.status, leased) != StreamState::Stopped {
            return Err(ScvError::BadRequest(format!("stream {id} must be stopped")));
        }
        Ok(())
    }

    /// Active leases grouped by target id.
    ///
    /// # Errors
    ///
    /// Returns an error if the index fails.
    pub fn active_streams(&self) -> Result<BTreeMap<String, Vec<ActiveRecord>>> {
        self.txn(|tx| {
            let mut out: BTreeMap<String, Vec<ActiveRecord>> = BTreeMap::new();
            for key in tx.members(ACTIVE)? {
                let Ok(id) = key.parse::<StreamId>() else {
                    continue;
                };
                let Some(record) = load_active(tx, &id)? else {
                    continue;
                };
                let target = tx
                    .hget_str(STREAM, &key, stream::TARGET)?
                    .unwrap_or_default();
                out.entry(target).or_default().push(record);
            }
            Ok(out)
        })
    }

    async fn owned_target(&self, manager: &Manager, target_id: &TargetId) -> Result<Target> {
        let target = self
            .catalog
            .get_target(target_id)
            .await?
            .ok_or_else(|| ScvError::NotFound(format!("target {target_id}")))?;
        authorize(manager, &target)?;
        Ok(target)
    }

    async fn remove_files_quietly(&self, id: &StreamId) {
        if let Err(e) = self.files.remove(id).await {
            tracing::error!(stream_id = %id, error = %e, "Failed to remove stream files");
        }
    }

    // =========================================================================
    // Leases
    // =========================================================================

    /// Lease the highest-scored unlocked stream of `target_id` to a core.
    ///
    /// Popping the stream from the queue, creating its lease, binding the
    /// token and arming the heartbeat are one index transaction.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if no stream of the target is queued here.
    pub fn activate(&self, target_id: &TargetId, engine: &str, user: Option<&str>) -> Result<BearerToken> {
        let tkey = target_id.to_string();
        let token = BearerToken::generate();
        let now = now_secs();
        let expiry = now + self.config.heartbeat_increment();

        let id = self.txn(|tx| {
            if !tx.exists(TARGET, &tkey)? {
                return Err(no_streams());
            }
            let mut chosen = None;
            for (member, _) in tx.zrevrange(TARGET, &tkey, target::QUEUE)? {
                if tx.zscore(SCV, SELF, scv::LOCKS, &member)?.is_none() {
                    chosen = Some(member);
                    break;
                }
            }
            let key = chosen.ok_or_else(no_streams)?;
            tx.zrem(TARGET, &tkey, target::QUEUE, &key)?;
            tx.create(ACTIVE, &key)?;
            tx.hset(ACTIVE, &key, active::BUFFER_FRAMES, 0_i64)?;
            tx.hset(ACTIVE, &key, active::TOTAL_FRAMES, 0_i64)?;
            tx.hset(ACTIVE, &key, active::AUTH_TOKEN, token.as_str())?;
            tx.hset(ACTIVE, &key, active::START_TIME, now)?;
            tx.hset(ACTIVE, &key, active::ENGINE, engine)?;
            if let Some(user) = user {
                tx.hset(ACTIVE, &key, active::DONOR, user)?;
            }
            tx.zadd(SCV, SELF, scv::HEARTBEATS, &key, expiry)?;
            Ok(key)
        })?;

        tracing::info!(stream_id = %id, target_id = %target_id, engine, "Stream activated");
        Ok(token)
    }

    /// End the lease of a stream. The caller must hold the stream's lock.
    /// Returns whether the stream had a lease.
    ///
    /// The buffer is discarded, the lease and its heartbeat removed and the
    /// stream placed according to `disposition`. A stats fragment for the
    /// session is delivered in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if the index or filesystem fails.
    pub async fn deactivate(&self, id: &StreamId, disposition: Disposition) -> Result<bool> {
        self.files.discard_buffer(id).await?;
        let key = id.to_string();
        let ended = self.txn(|tx| {
            tx.zrem(SCV, SELF, scv::HEARTBEATS, &key)?;
            let Some(lease) = load_active(tx, id)? else {
                return Ok(None);
            };
            tx.delete(ACTIVE, &key)?;
            if let Some(record) = index::load_stream(tx, id)? {
                match disposition {
                    Disposition::Requeue if record.status == StreamStatus::Ok => {
                        let tkey = record.target_id.to_string();
                        tx.ensure(TARGET, &tkey)?;
                        tx.zadd(TARGET, &tkey, target::QUEUE, &key, queue_score(record.frames))?;
                    }
                    Disposition::Stop => {
                        tx.hset(STREAM, &key, stream::STATUS, StreamStatus::Stopped.as_str())?;
                    }
                    Disposition::Requeue | Disposition::Discard => {}
                }
            }
            Ok(Some(lease))
        })?;

        let Some(lease) = ended else {
            return Ok(false);
        };
        tracing::info!(
            stream_id = %id,
            frames = lease.total_frames,
            ?disposition,
            "Stream deactivated"
        );
        let fragment = Fragment {
            engine: lease.engine,
            user: lease.donor,
            start_time: lease.start_time,
            end_time: now_secs(),
            frames: lease.total_frames,
            stream: id.clone(),
        };
        stats::spawn_fragment(Arc::clone(&self.catalog), fragment);
        Ok(true)
    }
}

/// Whether the manager may mutate streams of `target`.
///
/// # Errors
///
/// Returns `AuthBad` unless the manager owns the target or is an admin.
pub fn authorize(manager: &Manager, target: &Target) -> Result<()> {
    if manager.role == Role::Admin || manager.email == target.owner {
        Ok(())
    } else {
        Err(ScvError::AuthBad(format!(
            "{} does not own target {}",
            manager.email, target.id
        )))
    }
}

/// Hex MD5 of a payload.
#[must_use]
pub fn md5_hex(data: &[u8]) -> String {
    use md5::{Digest, Md5};
    hex::encode(Md5::digest(data))
}

/// Queue score for a stream with `frames` committed frames.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn queue_score(frames: i64) -> f64 {
    frames as f64
}

fn no_streams() -> ScvError {
    ScvError::Unavailable("no streams available".to_string())
}

fn is_leased(tx: &Txn<'_>, id: &StreamId) -> Result<bool> {
    Ok(tx.exists(ACTIVE, &id.to_string())?)
}

/// Drop a stream from the index. Returns whether its target has no streams
/// left here (the target row is then dropped too).
fn remove_from_index(tx: &mut Txn<'_>, id: &StreamId, target_id: &TargetId) -> Result<bool> {
    let (key, tkey) = (id.to_string(), target_id.to_string());
    tx.zrem(TARGET, &tkey, target::QUEUE, &key)?;
    if tx.exists(STREAM, &key)? {
        tx.delete(STREAM, &key)?;
    }
    if tx.exists(TARGET, &tkey)? && tx.scard(TARGET, &tkey, target::STREAMS)? == 0 {
        tx.delete(TARGET, &tkey)?;
        return Ok(true);
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(email: &str, role: Role) -> Manager {
        Manager {
            email: email.into(),
            password_hash: String::new(),
            token: None,
            role,
            weight: 1.0,
        }
    }

    fn target(owner: &str) -> Target {
        Target {
            id: TargetId::generate(),
            owner: owner.into(),
            creation_date: 0.0,
            engines: vec!["openmm".into()],
            stage: siege_core::Stage::Public,
            options: siege_catalog::Options::new(),
            weight: 1.0,
            shards: Vec::new(),
        }
    }

    #[test]
    fn owners_and_admins_are_authorized() {
        let t = target("alice@example.com");
        assert!(authorize(&manager("alice@example.com", Role::Manager), &t).is_ok());
        assert!(authorize(&manager("root@example.com", Role::Admin), &t).is_ok());
        let err = authorize(&manager("bob@example.com", Role::Manager), &t).unwrap_err();
        assert!(matches!(err, ScvError::AuthBad(_)));
    }

    #[test]
    fn md5_is_hex() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
