//! HTTP client for the command center's internal catalog endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use siege_core::{StreamId, TargetId};

use crate::error::{CatalogError, Result};
use crate::types::{Fragment, Manager, ScvRecord, StreamEntry, Target};
use crate::wire::{CatalogReply, ShardCatalogCall};
use crate::ShardCatalog;

/// Path of the internal catalog endpoint on the command center.
pub const CATALOG_PATH: &str = "/internal/catalog";

/// [`ShardCatalog`] that forwards every call to the command center.
#[derive(Debug, Clone)]
pub struct RemoteCatalog {
    client: reqwest::Client,
    base_url: String,
    secret: String,
}

/// Error response from the command center.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl RemoteCatalog {
    /// Create a client for the command center at `base_url`, authenticating
    /// with the cluster secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| CatalogError::Unavailable(format!("failed to create HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url, secret))
    }

    /// Create a client with a custom reqwest client.
    #[must_use]
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
        }
    }

    /// Get the base URL of the command center.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call(&self, call: ShardCatalogCall) -> Result<CatalogReply> {
        let op = call.name();
        let url = format!("{}{CATALOG_PATH}", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, &self.secret)
            .json(&call)
            .send()
            .await
            .map_err(|e| CatalogError::Unavailable(format!("catalog request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<CatalogReply>()
                .await
                .map_err(|e| CatalogError::Serialization(format!("failed to parse reply: {e}")));
        }

        let error = response
            .json::<ErrorResponse>()
            .await
            .map(|e| e.error)
            .unwrap_or_else(|_| format!("catalog returned status {status}"));
        tracing::warn!(op, status = %status, error = %error, "Remote catalog call failed");

        if status.is_server_error() {
            Err(CatalogError::Unavailable(error))
        } else {
            Err(CatalogError::Remote(error))
        }
    }
}

#[async_trait]
impl ShardCatalog for RemoteCatalog {
    async fn register_scv(&self, scv: &ScvRecord) -> Result<()> {
        self.call(ShardCatalogCall::RegisterScv { scv: scv.clone() })
            .await
            .map(drop)
    }

    async fn get_target(&self, id: &TargetId) -> Result<Option<Target>> {
        Ok(self
            .call(ShardCatalogCall::GetTarget { target_id: *id })
            .await?
            .target)
    }

    async fn manager_by_token(&self, token: &str) -> Result<Option<Manager>> {
        Ok(self
            .call(ShardCatalogCall::ManagerByToken {
                token: token.to_string(),
            })
            .await?
            .manager)
    }

    async fn add_target_shard(&self, id: &TargetId, scv: &str) -> Result<()> {
        self.call(ShardCatalogCall::AddTargetShard {
            target_id: *id,
            scv: scv.to_string(),
        })
        .await
        .map(drop)
    }

    async fn remove_target_shard(&self, id: &TargetId, scv: &str) -> Result<()> {
        self.call(ShardCatalogCall::RemoveTargetShard {
            target_id: *id,
            scv: scv.to_string(),
        })
        .await
        .map(drop)
    }

    async fn upsert_stream_entry(&self, scv: &str, entry: &StreamEntry) -> Result<()> {
        self.call(ShardCatalogCall::UpsertStreamEntry {
            scv: scv.to_string(),
            entry: entry.clone(),
        })
        .await
        .map(drop)
    }

    async fn delete_stream_entry(&self, scv: &str, stream_id: &StreamId) -> Result<()> {
        self.call(ShardCatalogCall::DeleteStreamEntry {
            scv: scv.to_string(),
            stream_id: stream_id.clone(),
        })
        .await
        .map(drop)
    }

    async fn insert_fragment(&self, fragment: &Fragment) -> Result<()> {
        self.call(ShardCatalogCall::InsertFragment {
            fragment: fragment.clone(),
        })
        .await
        .map(drop)
    }
}
