//! Core protocol: start, frame, checkpoint, stop and heartbeat.
//!
//! Every call resolves the bearer token to a stream through the unique
//! `auth_token` lookup, takes the stream's lock and re-checks the token
//! before touching anything.

use std::collections::BTreeMap;
use std::future::Future;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use siege_catalog::{Options, ShardCatalog};
use siege_core::{now_secs, BearerToken, StreamId, TargetId};

use crate::disk;
use crate::error::{Result, ScvError};
use crate::index::{active, load_active, require_stream, scv, stream, ACTIVE, SCV, SELF, STREAM};
use crate::lock::LockGuard;
use crate::service::{md5_hex, Disposition, ScvService};

/// `PUT /core/frame` body.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrameRequest {
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub frames: Option<i64>,
}

/// `PUT /core/checkpoint` body.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointRequest {
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

/// `PUT /core/stop` body.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StopRequest {
    /// Base64 error message from the core.
    #[serde(default)]
    pub error: Option<String>,
}

/// `GET /core/start` reply.
#[derive(Debug, Serialize)]
pub struct StartReply {
    pub stream_id: StreamId,
    pub target_id: TargetId,
    pub options: Options,
    /// Base64 contents keyed by file name.
    pub files: BTreeMap<String, String>,
}

impl<C: ShardCatalog + 'static> ScvService<C> {
    /// Stream currently leased under `token`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the index fails.
    pub fn resolve_token(&self, token: &BearerToken) -> Result<Option<StreamId>> {
        let owner = self.txn(|tx| Ok(tx.lookup(ACTIVE, active::AUTH_TOKEN, token.as_str())?))?;
        owner.map(|key| key.parse::<StreamId>().map_err(ScvError::from)).transpose()
    }

    async fn session(&self, token: &BearerToken) -> Result<(StreamId, LockGuard)> {
        let id = self.resolve_token(token)?.ok_or_else(bad_token)?;
        let guard = self.lock(&id).await?;
        if self.resolve_token(token)?.as_ref() != Some(&id) {
            return Err(bad_token());
        }
        Ok((id, guard))
    }

    /// Files, ids and options a core needs to (re)start work.
    ///
    /// # Errors
    ///
    /// Returns `AuthBad` for an unknown token or `StreamBusy`.
    pub async fn core_start(&self, token: &BearerToken) -> Result<StartReply> {
        let (id, _guard) = self.session(token).await?;
        let record = self.txn(|tx| require_stream(tx, &id))?;
        let target = self
            .catalog()
            .get_target(&record.target_id)
            .await?
            .ok_or_else(|| ScvError::NotFound(format!("target {}", record.target_id)))?;
        let files = self.files().resume_files(&id, record.frames).await?;
        tracing::debug!(stream_id = %id, frames = record.frames, "Core started");
        Ok(StartReply {
            stream_id: id,
            target_id: record.target_id,
            options: target.options,
            files: disk::encode_files(files),
        })
    }

    /// Append a frame to the buffer. A body identical to the previous one is
    /// ignored. Returns whether the frame was accepted.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for a malformed body, `AuthBad` or `StreamBusy`.
    pub async fn core_frame(&self, token: &BearerToken, body: &[u8]) -> Result<bool> {
        let request: FrameRequest = serde_json::from_slice(body)
            .map_err(|e| ScvError::BadRequest(format!("bad frame body: {e}")))?;
        let count = request.frames.unwrap_or(1);
        if count < 1 {
            return Err(ScvError::BadRequest("frames must be at least 1".to_string()));
        }
        let hash = md5_hex(body);

        let (id, guard) = self.session(token).await?;
        let lease = self
            .txn(|tx| load_active(tx, &id))?
            .ok_or_else(bad_token)?;
        if lease.frame_hash.as_deref() == Some(hash.as_str()) {
            tracing::debug!(stream_id = %id, "Duplicate frame ignored");
            return Ok(false);
        }

        let decoded = disk::decode_payloads(&request.files)?;
        self.mutate(&id, guard, async {
            self.files().append_frame(&id, &decoded).await?;
            let key = id.to_string();
            self.txn(|tx| {
                tx.hincr(ACTIVE, &key, active::BUFFER_FRAMES, count)?;
                tx.hset(ACTIVE, &key, active::FRAME_HASH, hash.as_str())?;
                Ok(())
            })
        })
        .await?;
        Ok(true)
    }

    /// Commit buffered frames with a checkpoint. Returns the committed
    /// frame count. With an empty buffer nothing happens.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for bad payloads, `AuthBad` or `StreamBusy`.
    pub async fn core_checkpoint(&self, token: &BearerToken, request: &CheckpointRequest) -> Result<i64> {
        let (id, guard) = self.session(token).await?;
        let (record, lease) = self.txn(|tx| {
            let record = require_stream(tx, &id)?;
            let lease = load_active(tx, &id)?.ok_or_else(bad_token)?;
            Ok((record, lease))
        })?;
        let buffered = lease.buffer_frames;
        if buffered == 0 {
            return Ok(record.frames);
        }

        let committed = record.frames + buffered;
        let decoded = disk::decode_payloads(&request.files)?;
        self.mutate(&id, guard, async {
            self.files().commit(&id, &decoded, committed).await?;
            let key = id.to_string();
            self.txn(|tx| {
                tx.hset(STREAM, &key, stream::FRAMES, committed)?;
                tx.hincr(ACTIVE, &key, active::TOTAL_FRAMES, buffered)?;
                tx.hset(ACTIVE, &key, active::BUFFER_FRAMES, 0_i64)?;
                Ok(())
            })
        })
        .await?;
        tracing::info!(stream_id = %id, frames = committed, "Checkpoint committed");
        Ok(committed)
    }

    /// End the session; the stream goes back to its queue. An error report
    /// bumps the error count and lands in the stream's error log.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for a non-base64 error, `AuthBad` or
    /// `StreamBusy`.
    pub async fn core_stop(&self, token: &BearerToken, request: &StopRequest) -> Result<()> {
        let message = request
            .error
            .as_deref()
            .map(|e| {
                STANDARD
                    .decode(e.trim())
                    .map(|raw| String::from_utf8_lossy(&raw).into_owned())
                    .map_err(|e| ScvError::BadRequest(format!("bad error payload: {e}")))
            })
            .transpose()?;

        let (id, _guard) = self.session(token).await?;
        if let Some(message) = message {
            let key = id.to_string();
            let count = self.txn(|tx| Ok(tx.hincr(STREAM, &key, stream::ERROR_COUNT, 1)?))?;
            self.files().append_error(&id, &message).await?;
            tracing::warn!(stream_id = %id, error_count = count, "Core reported an error");
        }
        self.deactivate(&id, Disposition::Requeue).await?;
        Ok(())
    }

    /// Extend the lease. Returns the new expiry.
    ///
    /// # Errors
    ///
    /// Returns `AuthBad` or `StreamBusy`.
    pub async fn core_heartbeat(&self, token: &BearerToken) -> Result<f64> {
        let (id, _guard) = self.session(token).await?;
        let expiry = now_secs() + self.config().heartbeat_increment();
        let key = id.to_string();
        self.txn(|tx| Ok(tx.zadd(SCV, SELF, scv::HEARTBEATS, &key, expiry)?))?;
        Ok(expiry)
    }

    /// Run a mutation that spans the disk and the index under `guard`.
    ///
    /// The guard stays dirty until `work` finishes, so a dropped future
    /// leaves the lock for the abandoned-lock sweep. On error the stream is
    /// recovered in place: its buffer is dropped, its frame count follows
    /// the disk and it goes back to the queue.
    async fn mutate<T>(
        &self,
        id: &StreamId,
        mut guard: LockGuard,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        guard.mark_dirty();
        let outcome = work.await;
        match &outcome {
            Ok(_) => guard.mark_clean(),
            Err(e) => {
                tracing::error!(stream_id = %id, error = %e, "Stream mutation failed; ending lease");
                match self.recover_stream(id).await {
                    Ok(()) => guard.mark_clean(),
                    Err(inner) => tracing::error!(
                        critical = true,
                        stream_id = %id,
                        error = %inner,
                        "In-place recovery failed"
                    ),
                }
            }
        }
        outcome
    }
}

fn bad_token() -> ScvError {
    ScvError::AuthBad("unknown token".to_string())
}
