//! Core assignment: choose a target for an engine, then a shard that will
//! lease one of its streams.
//!
//! Engine-only requests sample a manager with probability proportional to
//! the manager weight, then one of that manager's public targets with
//! probability proportional to the target weight. Shards are tried in random
//! order until one hands out a token.

use std::collections::{BTreeSet, HashMap};

use axum::http::Method;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use siege_catalog::{Catalog, ShardCatalog, Target};
use siege_core::{Stage, TargetId};

use crate::error::{ApiError, Result};
use crate::scv_client::ScvClient;
use crate::service::CommandCenter;

/// `POST /core/assign` body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssignRequest {
    /// Donor to credit for the work.
    #[serde(default)]
    pub donor_token: Option<String>,
    /// Ask for a specific target instead of the weighted pool.
    #[serde(default)]
    pub target_id: Option<TargetId>,
}

/// `POST /core/assign` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Bearer token for the SCV core protocol.
    pub token: String,
    /// `/core/start` URL on the chosen SCV.
    pub url: String,
}

fn no_streams() -> ApiError {
    ApiError::Unavailable("no streams available".to_string())
}

impl<C: Catalog, S: ScvClient> CommandCenter<C, S> {
    /// Hand a core a stream lease for the engine `engine_key` stands for.
    ///
    /// # Errors
    ///
    /// Returns `AuthBad` for an unknown engine key or donor token,
    /// `NotFound` for an unknown requested target, `BadRequest` if the
    /// requested target does not run the engine, and `Unavailable` when no
    /// shard could lease a stream.
    pub async fn assign(&self, engine_key: &str, request: &AssignRequest) -> Result<Assignment> {
        let engine = self.resolve_engine(engine_key).await?;
        let user = match &request.donor_token {
            Some(token) => Some(
                self.catalog()
                    .donor_by_token(token)
                    .await?
                    .ok_or_else(|| ApiError::AuthBad("unknown donor token".to_string()))?
                    .username,
            ),
            None => None,
        };

        let target = match request.target_id {
            Some(id) => self.requested_target(&id, &engine).await?,
            None => self.pick_target(&engine).await?,
        };
        let assignment = self.lease_on_shards(&target, &engine, user.as_deref()).await?;
        tracing::info!(
            target_id = %target.id,
            engine = %engine,
            url = %assignment.url,
            "Core assigned"
        );
        Ok(assignment)
    }

    async fn requested_target(&self, id: &TargetId, engine: &str) -> Result<Target> {
        let target = self
            .catalog()
            .get_target(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("target {id}")))?;
        if !target.engines.iter().any(|e| e == engine) {
            return Err(ApiError::BadRequest(format!(
                "target {id} does not run on engine {engine}"
            )));
        }
        if !target.stage.is_assignable() {
            return Err(ApiError::Unavailable(format!("target {id} is disabled")));
        }
        if !self.directory().has_shards(id) {
            return Err(no_streams());
        }
        Ok(target)
    }

    async fn pick_target(&self, engine: &str) -> Result<Target> {
        let candidates: Vec<Target> = self
            .catalog()
            .list_targets(None)
            .await?
            .into_iter()
            .filter(|t| {
                t.stage == Stage::Public
                    && t.engines.iter().any(|e| e == engine)
                    && self.directory().has_shards(&t.id)
            })
            .collect();

        let owners: BTreeSet<&str> = candidates.iter().map(|t| t.owner.as_str()).collect();
        let mut manager_weights = HashMap::new();
        for owner in owners {
            let weight = self
                .catalog()
                .get_manager(owner)
                .await?
                .map_or(0.0, |m| m.weight);
            manager_weights.insert(owner.to_string(), weight);
        }

        choose_target(&candidates, &manager_weights, &mut rand::thread_rng())
            .cloned()
            .ok_or_else(no_streams)
    }

    async fn lease_on_shards(
        &self,
        target: &Target,
        engine: &str,
        user: Option<&str>,
    ) -> Result<Assignment> {
        let mut shards = self.directory().shards(&target.id);
        shards.shuffle(&mut rand::thread_rng());
        let body = json!({
            "target_id": target.id,
            "engine": engine,
            "user": user,
        });

        for name in shards {
            let Some(scv) = self.directory().scv(&name) else {
                tracing::warn!(scv = %name, "Shard is not registered");
                continue;
            };
            if !self.directory().is_online(&name) {
                tracing::debug!(scv = %name, "Skipping disabled SCV");
                continue;
            }
            let reply = self
                .fetch(&scv, Method::POST, "/streams/activate", Some(&body))
                .await;
            if reply.is_success() {
                if let Some(token) = reply.body.get("token").and_then(Value::as_str) {
                    return Ok(Assignment {
                        token: token.to_string(),
                        url: format!("{}://{}/core/start", self.config().scv_scheme, scv.host),
                    });
                }
                tracing::warn!(scv = %name, "Activation reply carried no token");
            } else if !reply.is_failure() {
                tracing::info!(
                    scv = %name,
                    target_id = %target.id,
                    error = %reply.error_message(),
                    "Shard declined activation"
                );
            }
        }
        Err(no_streams())
    }
}

/// Pick a target: a manager by manager weight over the owners of candidates
/// with a positive weight, then one of that manager's candidates by target
/// weight. `None` when every weight involved is zero or there are no
/// candidates.
pub fn choose_target<'a, R: Rng + ?Sized>(
    candidates: &'a [Target],
    manager_weights: &HashMap<String, f64>,
    rng: &mut R,
) -> Option<&'a Target> {
    let live: Vec<&Target> = candidates
        .iter()
        .filter(|t| t.weight.is_finite() && t.weight > 0.0)
        .collect();
    let mut owners: Vec<&str> = live
        .iter()
        .map(|t| t.owner.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    owners.shuffle(rng);
    let weights: Vec<f64> = owners
        .iter()
        .map(|o| manager_weights.get(*o).copied().unwrap_or(0.0))
        .collect();
    let owner = owners[pick_weighted(&weights, rng)?];

    let mut mine: Vec<&Target> = live.iter().copied().filter(|t| t.owner == owner).collect();
    mine.shuffle(rng);
    let weights: Vec<f64> = mine.iter().map(|t| t.weight).collect();
    Some(mine[pick_weighted(&weights, rng)?])
}

/// Index drawn with probability proportional to its weight.
///
/// Uses the exclusive prefix sums of the weights and one uniform draw in
/// `(0, total]`. Non-positive and non-finite weights never win.
pub fn pick_weighted<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Option<usize> {
    let clamped: Vec<f64> = weights
        .iter()
        .map(|w| if w.is_finite() && *w > 0.0 { *w } else { 0.0 })
        .collect();
    let total: f64 = clamped.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return None;
    }
    let draw = total - rng.gen_range(0.0..total);

    let mut prefix = 0.0;
    for (i, w) in clamped.iter().enumerate() {
        if *w > 0.0 && draw <= prefix + w {
            return Some(i);
        }
        prefix += w;
    }
    // Rounding can leave the draw a hair above the last prefix sum.
    clamped.iter().rposition(|w| *w > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use siege_catalog::Options;

    fn target(owner: &str, weight: f64) -> Target {
        Target {
            id: TargetId::generate(),
            owner: owner.to_string(),
            creation_date: 0.0,
            engines: vec!["openmm".to_string()],
            stage: Stage::Public,
            options: Options::new(),
            weight,
            shards: Vec::new(),
        }
    }

    #[test]
    fn zero_weights_never_win() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(pick_weighted(&[], &mut rng), None);
        assert_eq!(pick_weighted(&[0.0, -3.0], &mut rng), None);
        for _ in 0..1000 {
            assert_eq!(pick_weighted(&[0.0, 2.0, 0.0, f64::NAN], &mut rng), Some(1));
        }
    }

    #[test]
    fn counts_follow_weights() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut counts = [0_u32; 3];
        for _ in 0..19_000 {
            counts[pick_weighted(&[1.0, 6.0, 12.0], &mut rng).unwrap()] += 1;
        }
        assert!(counts[0] < counts[1] && counts[1] < counts[2], "{counts:?}");
        assert!((700..1300).contains(&counts[0]), "{counts:?}");
    }

    #[test]
    fn manager_weight_comes_first() {
        let candidates = vec![target("heavy@x.org", 1.0), target("light@x.org", 100.0)];
        let weights = HashMap::from([
            ("heavy@x.org".to_string(), 1.0),
            ("light@x.org".to_string(), 0.0),
        ]);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let chosen = choose_target(&candidates, &weights, &mut rng).unwrap();
            assert_eq!(chosen.owner, "heavy@x.org");
        }
    }

    #[test]
    fn target_weights_within_one_manager() {
        let candidates = vec![
            target("m@x.org", 1.0),
            target("m@x.org", 6.0),
            target("m@x.org", 12.0),
        ];
        let weights = HashMap::from([("m@x.org".to_string(), 1.0)]);
        let mut rng = StdRng::seed_from_u64(3);
        let mut counts = HashMap::new();
        for _ in 0..5_000 {
            let chosen = choose_target(&candidates, &weights, &mut rng).unwrap();
            *counts.entry(chosen.id).or_insert(0_u32) += 1;
        }
        let c: Vec<u32> = candidates.iter().map(|t| counts[&t.id]).collect();
        assert!(c[0] < c[1] && c[1] < c[2], "{c:?}");
    }

    #[test]
    fn zero_weight_targets_do_not_block_other_managers() {
        let candidates = vec![target("idle@x.org", 0.0), target("busy@x.org", 1.0)];
        let weights = HashMap::from([
            ("idle@x.org".to_string(), 1.0),
            ("busy@x.org".to_string(), 1.0),
        ]);
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..1000 {
            let chosen = choose_target(&candidates, &weights, &mut rng).unwrap();
            assert_eq!(chosen.id, candidates[1].id);
        }
    }

    #[test]
    fn no_candidates() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(choose_target(&[], &HashMap::new(), &mut rng).is_none());
        let candidates = vec![target("m@x.org", 0.0)];
        let weights = HashMap::from([("m@x.org".to_string(), 1.0)]);
        assert!(choose_target(&candidates, &weights, &mut rng).is_none());
    }
}
