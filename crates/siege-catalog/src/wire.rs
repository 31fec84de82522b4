//! Wire protocol for remote shard catalog calls.
//!
//! Each [`ShardCatalog`] method maps to one variant of [`ShardCatalogCall`].
//! The command center answers with a [`CatalogReply`] produced by
//! [`dispatch`].

use serde::{Deserialize, Serialize};
use siege_core::{StreamId, TargetId};

use crate::error::Result;
use crate::types::{Fragment, Manager, ScvRecord, StreamEntry, Target};
use crate::ShardCatalog;

/// One remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ShardCatalogCall {
    /// [`ShardCatalog::register_scv`]
    RegisterScv {
        /// Registry row.
        scv: ScvRecord,
    },
    /// [`ShardCatalog::get_target`]
    GetTarget {
        /// Target id.
        target_id: TargetId,
    },
    /// [`ShardCatalog::manager_by_token`]
    ManagerByToken {
        /// Bearer token.
        token: String,
    },
    /// [`ShardCatalog::add_target_shard`]
    AddTargetShard {
        /// Target id.
        target_id: TargetId,
        /// SCV name.
        scv: String,
    },
    /// [`ShardCatalog::remove_target_shard`]
    RemoveTargetShard {
        /// Target id.
        target_id: TargetId,
        /// SCV name.
        scv: String,
    },
    /// [`ShardCatalog::upsert_stream_entry`]
    UpsertStreamEntry {
        /// SCV name.
        scv: String,
        /// Index row.
        entry: StreamEntry,
    },
    /// [`ShardCatalog::delete_stream_entry`]
    DeleteStreamEntry {
        /// SCV name.
        scv: String,
        /// Stream id.
        stream_id: StreamId,
    },
    /// [`ShardCatalog::insert_fragment`]
    InsertFragment {
        /// Stats fragment.
        fragment: Fragment,
    },
}

impl ShardCatalogCall {
    /// Short operation name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RegisterScv { .. } => "register_scv",
            Self::GetTarget { .. } => "get_target",
            Self::ManagerByToken { .. } => "manager_by_token",
            Self::AddTargetShard { .. } => "add_target_shard",
            Self::RemoveTargetShard { .. } => "remove_target_shard",
            Self::UpsertStreamEntry { .. } => "upsert_stream_entry",
            Self::DeleteStreamEntry { .. } => "delete_stream_entry",
            Self::InsertFragment { .. } => "insert_fragment",
        }
    }
}

/// Reply to a [`ShardCatalogCall`]. Fields not relevant to the call are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogReply {
    /// Result of `get_target`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
    /// Result of `manager_by_token`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager: Option<Manager>,
}

/// Execute a remote call against a local catalog.
///
/// # Errors
///
/// Returns whatever the underlying catalog returns.
pub async fn dispatch<C>(catalog: &C, call: ShardCatalogCall) -> Result<CatalogReply>
where
    C: ShardCatalog + ?Sized,
{
    let mut reply = CatalogReply::default();
    match call {
        ShardCatalogCall::RegisterScv { scv } => catalog.register_scv(&scv).await?,
        ShardCatalogCall::GetTarget { target_id } => {
            reply.target = catalog.get_target(&target_id).await?;
        }
        ShardCatalogCall::ManagerByToken { token } => {
            reply.manager = catalog.manager_by_token(&token).await?;
        }
        ShardCatalogCall::AddTargetShard { target_id, scv } => {
            catalog.add_target_shard(&target_id, &scv).await?;
        }
        ShardCatalogCall::RemoveTargetShard { target_id, scv } => {
            catalog.remove_target_shard(&target_id, &scv).await?;
        }
        ShardCatalogCall::UpsertStreamEntry { scv, entry } => {
            catalog.upsert_stream_entry(&scv, &entry).await?;
        }
        ShardCatalogCall::DeleteStreamEntry { scv, stream_id } => {
            catalog.delete_stream_entry(&scv, &stream_id).await?;
        }
        ShardCatalogCall::InsertFragment { fragment } => catalog.insert_fragment(&fragment).await?,
    }
    Ok(reply)
}
