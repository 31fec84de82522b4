//! Per-resource exclusive leases.
//!
//! A resource is locked iff it is a member of the `locks` sorted set of the
//! index singleton; its score is the wall-clock time of acquisition. Test and
//! set happen in one index transaction, so every worker sharing the index
//! sees the same lock state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use siege_core::now_secs;
use siege_store::{EntityStore, StoreError};

use crate::error::{Result, ScvError};
use crate::index::{scv, SCV, SELF};

const BACKOFF_START: Duration = Duration::from_millis(2);
const BACKOFF_MAX: Duration = Duration::from_millis(20);

/// Lock manager over the stream index.
#[derive(Clone)]
pub struct LockManager {
    index: Arc<EntityStore>,
}

impl LockManager {
    /// Create a lock manager over `index`.
    #[must_use]
    pub const fn new(index: Arc<EntityStore>) -> Self {
        Self { index }
    }

    /// Take the lock if it is free. Returns `false` if it is held.
    ///
    /// # Errors
    ///
    /// Returns an error if the index fails.
    pub fn acquire(&self, resource: &str, now: f64) -> Result<bool> {
        Ok(self.index.transact::<_, StoreError, _>(|tx| {
            if tx.zscore(SCV, SELF, scv::LOCKS, resource)?.is_some() {
                return Ok(false);
            }
            tx.zadd(SCV, SELF, scv::LOCKS, resource, now)?;
            Ok(true)
        })?)
    }

    /// Drop the lock unconditionally.
    ///
    /// # Errors
    ///
    /// Returns an error if the index fails.
    pub fn release(&self, resource: &str) -> Result<()> {
        self.index
            .transact::<_, StoreError, _>(|tx| tx.zrem(SCV, SELF, scv::LOCKS, resource).map(|_| ()))?;
        Ok(())
    }

    /// Drop the lock only if it is still the one taken at `acquired`.
    /// Returns whether it was released.
    ///
    /// # Errors
    ///
    /// Returns an error if the index fails.
    #[allow(clippy::float_cmp)]
    pub fn release_held(&self, resource: &str, acquired: f64) -> Result<bool> {
        Ok(self.index.transact::<_, StoreError, _>(|tx| {
            if tx.zscore(SCV, SELF, scv::LOCKS, resource)? != Some(acquired) {
                return Ok(false);
            }
            tx.zrem(SCV, SELF, scv::LOCKS, resource)?;
            Ok(true)
        })?)
    }

    /// Whether the resource is currently locked.
    ///
    /// # Errors
    ///
    /// Returns an error if the index fails.
    pub fn is_locked(&self, resource: &str) -> Result<bool> {
        Ok(self
            .index
            .transact::<_, StoreError, _>(|tx| tx.zscore(SCV, SELF, scv::LOCKS, resource))?
            .is_some())
    }

    /// Locks acquired at or before `cutoff`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the index fails.
    pub fn held_since(&self, cutoff: f64) -> Result<Vec<(String, f64)>> {
        Ok(self.index.transact::<_, StoreError, _>(|tx| {
            tx.zrange_by_score(SCV, SELF, scv::LOCKS, f64::NEG_INFINITY, cutoff)
        })?)
    }

    /// Take the lock now or return `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index fails.
    pub fn try_lock(&self, resource: &str) -> Result<Option<LockGuard>> {
        let now = now_secs();
        if self.acquire(resource, now)? {
            Ok(Some(self.guard(resource, now)))
        } else {
            Ok(None)
        }
    }

    /// Retry [`acquire`](Self::acquire) with a short backoff until it
    /// succeeds or `deadline` has passed.
    ///
    /// # Errors
    ///
    /// Returns `ScvError::StreamBusy` if the lock stays held past the
    /// deadline.
    pub async fn start_lock(&self, resource: &str, deadline: Duration) -> Result<LockGuard> {
        let give_up = Instant::now() + deadline;
        let mut backoff = BACKOFF_START;
        loop {
            if let Some(guard) = self.try_lock(resource)? {
                return Ok(guard);
            }
            if Instant::now() >= give_up {
                tracing::debug!(resource, "Lock deadline passed");
                return Err(ScvError::StreamBusy(resource.to_string()));
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(BACKOFF_MAX);
        }
    }

    /// Wrap a lock taken at `acquired` so that it is released on drop.
    #[must_use]
    pub fn guard(&self, resource: &str, acquired: f64) -> LockGuard {
        LockGuard {
            locks: self.clone(),
            resource: resource.to_string(),
            acquired,
            dirty: false,
        }
    }
}

/// A held lock, released when dropped.
///
/// While marked dirty the guard leaves the lock in place on drop, so an
/// interrupted mutation is picked up by the abandoned-lock sweep.
pub struct LockGuard {
    locks: LockManager,
    resource: String,
    acquired: f64,
    dirty: bool,
}

impl LockGuard {
    /// The locked resource.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Whether a mutation is in flight.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark the start of a mutation that must not be left half done.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// The mutation finished or was rolled back.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.dirty {
            tracing::error!(
                critical = true,
                resource = %self.resource,
                "Mutation interrupted; keeping lock for recovery"
            );
            return;
        }
        match self.locks.release_held(&self.resource, self.acquired) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(resource = %self.resource, "Lock was taken over before release");
            }
            Err(e) => {
                tracing::error!(resource = %self.resource, error = %e, "Failed to release lock");
            }
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("resource", &self.resource)
            .field("acquired", &self.acquired)
            .field("dirty", &self.dirty)
            .finish()
    }
}
