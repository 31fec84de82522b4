//! Background maintenance: heartbeat expiry, abandoned-lock recovery and
//! startup reconciliation of the index with the disk.

use std::time::Duration;

use siege_catalog::ShardCatalog;
use siege_core::{now_secs, StreamId};
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::index::{self, scv, stream, target, ACTIVE, SCV, SELF, STREAM, TARGET};
use crate::service::{queue_score, Disposition, ScvService};

impl<C: ShardCatalog + 'static> ScvService<C> {
    /// Deactivate every stream whose lease expired at or before `now`.
    /// Streams whose lock is held are left for the next pass. Returns the
    /// number of streams requeued.
    ///
    /// # Errors
    ///
    /// Returns an error if the index fails.
    pub async fn sweep_heartbeats(&self, now: f64) -> Result<usize> {
        let expired = self.txn(|tx| {
            Ok(tx.zrange_by_score(SCV, SELF, scv::HEARTBEATS, f64::NEG_INFINITY, now)?)
        })?;
        let mut requeued = 0;
        for (key, _) in expired {
            let Ok(id) = key.parse::<StreamId>() else {
                tracing::warn!(entry = %key, "Dropping malformed heartbeat");
                self.txn(|tx| Ok(tx.zrem(SCV, SELF, scv::HEARTBEATS, &key)?))?;
                continue;
            };
            let Some(_guard) = self.locks().try_lock(&key)? else {
                continue;
            };
            let still_expired = self
                .txn(|tx| Ok(tx.zscore(SCV, SELF, scv::HEARTBEATS, &key)?))?
                .is_some_and(|expiry| expiry <= now);
            if still_expired && self.deactivate(&id, Disposition::Requeue).await? {
                tracing::info!(stream_id = %id, "Lease expired");
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    /// Recover streams whose lock was taken more than the configured maximum
    /// age before `now`. Returns the number of locks released.
    ///
    /// A lock on an unknown stream means a creation died half way, so the
    /// stream directory is removed. A known stream is deactivated and
    /// requeued, which also drops its buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the index fails.
    #[allow(clippy::cast_precision_loss)]
    pub async fn scruffy(&self, now: f64) -> Result<usize> {
        let cutoff = now - self.config().scruffy_max_age_seconds as f64;
        let stale = self.locks().held_since(cutoff)?;
        for (resource, acquired) in &stale {
            tracing::error!(
                critical = true,
                resource = %resource,
                age = now - acquired,
                "Recovering abandoned lock"
            );
            if let Ok(id) = resource.parse::<StreamId>() {
                if let Err(e) = self.recover_stream(&id).await {
                    tracing::error!(critical = true, stream_id = %id, error = %e, "Stream recovery failed");
                }
            }
            self.locks().release(resource)?;
        }
        Ok(stale.len())
    }

    /// Put a stream whose mutation was cut short back into a consistent
    /// state. The caller must hold the stream's lock.
    pub(crate) async fn recover_stream(&self, id: &StreamId) -> Result<()> {
        let key = id.to_string();
        if !self.txn(|tx| Ok(tx.exists(STREAM, &key)?))? {
            if id.scv() == self.name() {
                self.files().remove(id).await?;
            }
            return Ok(());
        }
        self.reconcile_frames(id).await?;
        if !self.deactivate(id, Disposition::Requeue).await? {
            self.files().discard_buffer(id).await?;
        }
        Ok(())
    }

    /// Make the committed frame count follow the largest frameset on disk.
    /// Returns whether the index was corrected.
    async fn reconcile_frames(&self, id: &StreamId) -> Result<bool> {
        let Some(record) = self.txn(|tx| index::load_stream(tx, id))? else {
            return Ok(false);
        };
        let on_disk = self.files().largest_frameset(id).await?;
        if on_disk == record.frames {
            return Ok(false);
        }
        tracing::warn!(
            stream_id = %id,
            indexed = record.frames,
            on_disk,
            "Correcting committed frame count"
        );
        let key = id.to_string();
        let tkey = record.target_id.to_string();
        self.txn(|tx| {
            tx.hset(STREAM, &key, stream::FRAMES, on_disk)?;
            if tx.zscore(TARGET, &tkey, target::QUEUE, &key)?.is_some() {
                tx.zadd(TARGET, &tkey, target::QUEUE, &key, queue_score(on_disk))?;
            }
            Ok(())
        })?;
        Ok(true)
    }

    /// Reconcile the index with the disk after a restart: the committed
    /// frame count follows the largest frameset directory, and buffers of
    /// streams without a lease are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the index or filesystem fails.
    pub async fn recover(&self) -> Result<()> {
        let keys = self.txn(|tx| Ok(tx.members(STREAM)?))?;
        let mut corrected = 0_usize;
        for key in &keys {
            let Ok(id) = key.parse::<StreamId>() else {
                continue;
            };
            if self.reconcile_frames(&id).await? {
                corrected += 1;
            }
            let leased = self.txn(|tx| Ok(tx.exists(ACTIVE, key)?))?;
            if !leased && self.files().has_buffer(&id).await {
                tracing::warn!(stream_id = %id, "Dropping stale frame buffer");
                self.files().discard_buffer(&id).await?;
            }
        }
        tracing::info!(streams = keys.len(), corrected, "Stream index recovered");
        Ok(())
    }

    /// Run the heartbeat sweep and the scruffy sweep forever.
    pub async fn run_sweepers(&self) {
        tokio::join!(self.run_heartbeat_sweeper(), self.run_scruffy());
    }

    async fn run_heartbeat_sweeper(&self) {
        let mut ticker = tokio::time::interval(Duration::from_millis(
            self.config().heartbeat_sweep_millis,
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_heartbeats(now_secs()).await {
                tracing::error!(critical = true, error = %e, "Heartbeat sweep failed");
            }
        }
    }

    async fn run_scruffy(&self) {
        let mut ticker = tokio::time::interval(Duration::from_millis(
            self.config().scruffy_period_millis,
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.scruffy(now_secs()).await {
                tracing::error!(critical = true, error = %e, "Scruffy sweep failed");
            }
        }
    }
}
