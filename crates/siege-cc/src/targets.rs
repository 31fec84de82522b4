//! Target catalog operations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use siege_catalog::{Catalog, Manager, Options, Target};
use siege_core::{now_secs, Role, Stage, StreamId, StreamStatus, TargetId};

use crate::error::{ApiError, Result};
use crate::scv_client::ScvClient;
use crate::service::{clamp_weight, CommandCenter};

/// Smallest accepted `steps_per_frame` option.
pub const MIN_STEPS_PER_FRAME: i64 = 50_000;

/// `POST /targets` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTarget {
    /// Engine tags the target runs on.
    pub engines: Vec<String>,
    /// Initial stage, private by default.
    #[serde(default)]
    pub stage: Stage,
    /// Relative weight among the owner's targets.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Options handed to cores.
    #[serde(default)]
    pub options: Options,
}

/// `PUT /targets/update/:id` body. Absent fields are left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateTarget {
    /// New stage.
    #[serde(default)]
    pub stage: Option<Stage>,
    /// New weight.
    #[serde(default)]
    pub weight: Option<f64>,
    /// New engine tags.
    #[serde(default)]
    pub engines: Option<Vec<String>>,
    /// Options to merge over the current ones.
    #[serde(default)]
    pub options: Option<Options>,
}

/// One stream of a target, as listed by the command center.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetStream {
    /// Stream id.
    pub stream_id: StreamId,
    /// SCV holding the stream.
    pub scv: String,
    /// Enabled or disabled.
    pub status: StreamStatus,
}

const fn default_weight() -> f64 {
    1.0
}

impl<C: Catalog, S: ScvClient> CommandCenter<C, S> {
    /// Create a target owned by `manager`.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for missing engines or bad options.
    pub async fn create_target(&self, manager: &Manager, request: CreateTarget) -> Result<Target> {
        let engines = clean_engines(request.engines)?;
        validate_options(&request.options)?;
        let target = Target {
            id: TargetId::generate(),
            owner: manager.email.clone(),
            creation_date: now_secs(),
            engines,
            stage: request.stage,
            options: request.options,
            weight: clamp_weight(request.weight),
            shards: Vec::new(),
        };
        self.catalog().insert_target(&target).await?;
        tracing::info!(target_id = %target.id, owner = %target.owner, stage = %target.stage, "Target created");
        Ok(target)
    }

    /// Fetch a target.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown target.
    pub async fn target(&self, id: &TargetId) -> Result<Target> {
        self.catalog()
            .get_target(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("target {id}")))
    }

    /// Ids of all targets, or of one owner's targets.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog fails.
    pub async fn list_targets(&self, owner: Option<&str>) -> Result<Vec<TargetId>> {
        let mut ids: Vec<TargetId> = self
            .catalog()
            .list_targets(owner)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Change stage, weight, engines or options of a target.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `AuthBad` if the manager is neither owner nor
    /// admin, or `BadRequest` for bad values.
    pub async fn update_target(
        &self,
        manager: &Manager,
        id: &TargetId,
        request: UpdateTarget,
    ) -> Result<Target> {
        let mut target = self.target(id).await?;
        authorize(manager, &target)?;

        if let Some(stage) = request.stage {
            target.stage = stage;
        }
        if let Some(weight) = request.weight {
            target.weight = clamp_weight(weight);
        }
        if let Some(engines) = request.engines {
            target.engines = clean_engines(engines)?;
        }
        if let Some(options) = request.options {
            let mut merged = target.options.clone();
            merged.extend(options);
            validate_options(&merged)?;
            target.options = merged;
        }
        self.catalog().update_target(&target).await?;
        tracing::info!(target_id = %id, stage = %target.stage, weight = target.weight, "Target updated");
        Ok(target)
    }

    /// Delete a target that no SCV holds streams of.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `AuthBad`, or `BadRequest` while shards remain.
    pub async fn delete_target(&self, manager: &Manager, id: &TargetId) -> Result<()> {
        let target = self.target(id).await?;
        authorize(manager, &target)?;
        if !target.shards.is_empty() {
            return Err(ApiError::BadRequest(format!(
                "target {id} still has streams on {}",
                target.shards.join(", ")
            )));
        }
        self.catalog().delete_target(id).await?;
        tracing::info!(target_id = %id, "Target deleted");
        Ok(())
    }

    /// Every stream of a target across all shards.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown target.
    pub async fn target_streams(&self, id: &TargetId) -> Result<Vec<TargetStream>> {
        self.target(id).await?;
        let mut streams: Vec<TargetStream> = self
            .catalog()
            .target_stream_entries(id)
            .await?
            .into_iter()
            .map(|(scv, entry)| TargetStream {
                stream_id: entry.stream_id,
                scv,
                status: entry.status,
            })
            .collect();
        streams.sort_by_key(|s| s.stream_id.to_string());
        Ok(streams)
    }
}

/// Owners and admins may change a target.
///
/// # Errors
///
/// Returns `AuthBad` otherwise.
pub fn authorize(manager: &Manager, target: &Target) -> Result<()> {
    if manager.role == Role::Admin || manager.email == target.owner {
        Ok(())
    } else {
        Err(ApiError::AuthBad(format!(
            "{} does not own target {}",
            manager.email, target.id
        )))
    }
}

fn clean_engines(engines: Vec<String>) -> Result<Vec<String>> {
    let mut out: Vec<String> = engines
        .into_iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect();
    out.sort();
    out.dedup();
    if out.is_empty() {
        return Err(ApiError::BadRequest("at least one engine is required".to_string()));
    }
    Ok(out)
}

/// Reject option sets the cores cannot run.
///
/// # Errors
///
/// Returns `BadRequest` when `steps_per_frame` is not an integer or is
/// below [`MIN_STEPS_PER_FRAME`].
pub fn validate_options(options: &Options) -> Result<()> {
    match options.get("steps_per_frame") {
        None => Ok(()),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(steps) if steps >= MIN_STEPS_PER_FRAME => Ok(()),
            Some(steps) => Err(ApiError::BadRequest(format!(
                "steps_per_frame must be at least {MIN_STEPS_PER_FRAME}, got {steps}"
            ))),
            None => Err(ApiError::BadRequest("steps_per_frame must be an integer".to_string())),
        },
        Some(_) => Err(ApiError::BadRequest("steps_per_frame must be an integer".to_string())),
    }
}
