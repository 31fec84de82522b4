//! Command center service.
//!
//! [`CommandCenter`] ties the catalog, the shard directory and the SCV client
//! together. Account operations live here; targets, assignment and the
//! background monitors are in their own modules.

use std::sync::Arc;

use axum::http::Method;
use serde_json::Value;

use siege_auth::{hash_password, verify_password, AuthError};
use siege_catalog::{
    dispatch, Catalog, CatalogReply, Donor, EngineKey, Manager, ScvRecord, ShardCatalogCall,
};
use siege_core::{now_secs, BearerToken, Role, StreamStatus};

use crate::config::CcConfig;
use crate::directory::ShardDirectory;
use crate::error::{ApiError, Result};
use crate::scv_client::{ScvClient, ScvResponse};

/// The command center.
pub struct CommandCenter<C: Catalog, S: ScvClient> {
    config: CcConfig,
    catalog: Arc<C>,
    directory: ShardDirectory,
    scvs: Arc<S>,
}

impl<C: Catalog, S: ScvClient> CommandCenter<C, S> {
    /// Create a command center over a catalog and an SCV client.
    #[must_use]
    pub fn new(config: CcConfig, catalog: Arc<C>, scvs: Arc<S>) -> Self {
        let directory = ShardDirectory::new(config.max_fails);
        Self {
            config,
            catalog,
            directory,
            scvs,
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &CcConfig {
        &self.config
    }

    /// The catalog.
    #[must_use]
    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// The shard directory.
    #[must_use]
    pub const fn directory(&self) -> &ShardDirectory {
        &self.directory
    }

    /// Send a request to an SCV and update its fail count: 5xx and transport
    /// failures count, anything else resets.
    pub async fn fetch(
        &self,
        scv: &ScvRecord,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> ScvResponse {
        let reply = self.scvs.request(scv, method, path, body).await;
        if reply.is_failure() {
            let fail_count = self.directory.record_failure(&scv.name);
            tracing::warn!(
                scv = %scv.name,
                path,
                status = reply.status,
                fail_count,
                error = %reply.error_message(),
                "SCV request failed"
            );
        } else {
            self.directory.record_success(&scv.name);
        }
        reply
    }

    // =========================================================================
    // Managers
    // =========================================================================

    /// Insert the configured bootstrap admin if it does not exist yet.
    /// Returns `true` if an account was created.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog fails.
    pub async fn bootstrap_admin(&self) -> Result<bool> {
        let (Some(email), Some(password)) = (&self.config.admin_email, &self.config.admin_password)
        else {
            return Ok(false);
        };
        if self.catalog.get_manager(email).await?.is_some() {
            return Ok(false);
        }
        self.create_manager(email, password, Role::Admin, 1.0).await?;
        tracing::info!(email = %email, "Bootstrap admin created");
        Ok(true)
    }

    /// Create a manager account.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for an empty email or password and `Conflict` if
    /// the email is taken.
    pub async fn create_manager(
        &self,
        email: &str,
        password: &str,
        role: Role,
        weight: f64,
    ) -> Result<Manager> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(ApiError::BadRequest(format!("bad email {email:?}")));
        }
        if password.is_empty() {
            return Err(ApiError::BadRequest("empty password".to_string()));
        }
        let manager = Manager {
            email: email.to_string(),
            password_hash: hash_password(password),
            token: None,
            role,
            weight: clamp_weight(weight),
        };
        self.catalog.insert_manager(&manager).await?;
        tracing::info!(email = %manager.email, role = %manager.role.as_str(), "Manager created");
        Ok(manager)
    }

    /// Check a manager's password and rotate their bearer token.
    ///
    /// # Errors
    ///
    /// Returns `AuthBad` for an unknown email or a wrong password.
    pub async fn login_manager(&self, email: &str, password: &str) -> Result<String> {
        let mut manager = self
            .catalog
            .get_manager(email)
            .await?
            .ok_or(AuthError::BadPassword)?;
        if !verify_password(password, &manager.password_hash)? {
            return Err(AuthError::BadPassword.into());
        }
        let token = BearerToken::generate().as_str().to_string();
        manager.token = Some(token.clone());
        self.catalog.update_manager(&manager).await?;
        tracing::debug!(email = %email, "Manager logged in");
        Ok(token)
    }

    /// Resolve a manager from a bearer token.
    ///
    /// # Errors
    ///
    /// Returns `AuthBad` if no manager holds the token.
    pub async fn manager_by_token(&self, token: &str) -> Result<Manager> {
        self.catalog
            .manager_by_token(token)
            .await?
            .ok_or_else(|| ApiError::AuthBad("unknown manager token".to_string()))
    }

    /// Change a manager's assignment weight. Negative weights become zero.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown manager.
    pub async fn set_manager_weight(&self, email: &str, weight: f64) -> Result<Manager> {
        let mut manager = self
            .catalog
            .get_manager(email)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("manager {email}")))?;
        manager.weight = clamp_weight(weight);
        self.catalog.update_manager(&manager).await?;
        Ok(manager)
    }

    // =========================================================================
    // Donors
    // =========================================================================

    /// Register a donor.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for empty fields and `Conflict` if the username
    /// is taken.
    pub async fn create_donor(&self, username: &str, email: &str, password: &str) -> Result<()> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(ApiError::BadRequest(
                "username and password are required".to_string(),
            ));
        }
        let donor = Donor {
            username: username.to_string(),
            email: email.trim().to_string(),
            password_hash: hash_password(password),
            token: None,
        };
        self.catalog.insert_donor(&donor).await?;
        tracing::info!(username = %donor.username, "Donor registered");
        Ok(())
    }

    /// Check a donor's password and rotate their bearer token.
    ///
    /// # Errors
    ///
    /// Returns `AuthBad` for an unknown username or a wrong password.
    pub async fn login_donor(&self, username: &str, password: &str) -> Result<String> {
        let mut donor = self
            .catalog
            .get_donor(username)
            .await?
            .ok_or(AuthError::BadPassword)?;
        if !verify_password(password, &donor.password_hash)? {
            return Err(AuthError::BadPassword.into());
        }
        let token = BearerToken::generate().as_str().to_string();
        donor.token = Some(token.clone());
        self.catalog.update_donor(&donor).await?;
        Ok(token)
    }

    // =========================================================================
    // Engine keys
    // =========================================================================

    /// Mint an engine key.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for an empty engine tag.
    pub async fn create_engine_key(&self, engine: &str, description: &str) -> Result<EngineKey> {
        let engine = engine.trim();
        if engine.is_empty() {
            return Err(ApiError::BadRequest("engine is required".to_string()));
        }
        let key = EngineKey {
            id: BearerToken::generate().as_str().to_string(),
            engine: engine.to_string(),
            description: description.to_string(),
            creation_date: now_secs(),
        };
        self.catalog.insert_engine_key(&key).await?;
        tracing::info!(engine = %key.engine, "Engine key created");
        Ok(key)
    }

    /// All engine keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog fails.
    pub async fn list_engine_keys(&self) -> Result<Vec<EngineKey>> {
        Ok(self.catalog.list_engine_keys().await?)
    }

    /// Revoke an engine key.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown key.
    pub async fn delete_engine_key(&self, id: &str) -> Result<()> {
        self.catalog.delete_engine_key(id).await?;
        tracing::info!("Engine key revoked");
        Ok(())
    }

    /// Engine tag an engine key stands for.
    ///
    /// # Errors
    ///
    /// Returns `AuthBad` for an unknown key.
    pub async fn resolve_engine(&self, key: &str) -> Result<String> {
        self.catalog
            .get_engine_key(key)
            .await?
            .map(|k| k.engine)
            .ok_or_else(|| ApiError::AuthBad("unknown engine key".to_string()))
    }

    // =========================================================================
    // Internal catalog endpoint
    // =========================================================================

    /// Execute a catalog call on behalf of an SCV and mirror shard changes
    /// into the directory.
    ///
    /// # Errors
    ///
    /// Returns whatever the catalog returns.
    pub async fn internal_catalog(&self, call: ShardCatalogCall) -> Result<CatalogReply> {
        let op = call.name();
        let mirror = call.clone();
        let reply = dispatch(self.catalog.as_ref(), call).await?;
        match mirror {
            ShardCatalogCall::RegisterScv { scv } => {
                tracing::info!(scv = %scv.name, host = %scv.host, "SCV registered");
                self.directory.upsert_scv(scv);
            }
            ShardCatalogCall::UpsertStreamEntry { scv, entry } if entry.status == StreamStatus::Ok => {
                self.directory.add_shard(entry.target_id, &scv);
            }
            ShardCatalogCall::RemoveTargetShard { target_id, scv } => {
                self.directory.remove_shard(&target_id, &scv);
            }
            _ => {}
        }
        tracing::debug!(op, "Internal catalog call served");
        Ok(reply)
    }
}

/// Weights are never negative; NaN counts as zero.
pub(crate) fn clamp_weight(weight: f64) -> f64 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_are_clamped() {
        assert!((clamp_weight(2.5) - 2.5).abs() < f64::EPSILON);
        assert!(clamp_weight(-1.0).abs() < f64::EPSILON);
        assert!(clamp_weight(f64::NAN).abs() < f64::EPSILON);
        assert!(clamp_weight(f64::INFINITY).abs() < f64::EPSILON);
    }
}
