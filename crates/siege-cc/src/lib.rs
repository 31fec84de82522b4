//! siege command center.
//!
//! The command center owns the catalog, keeps a directory of which SCVs hold
//! enabled streams of which target, and hands cores to shards.
//!
//! # Architecture
//!
//! ```text
//!   core ──POST /core/assign──▶ CC ──POST /streams/activate──▶ SCV
//!     ▲                          │                              │
//!     └────── {token, url} ◀─────┘◀──────── {token} ────────────┘
//!
//!   SCV ──POST /internal/catalog──▶ CC (RocksCatalog)
//! ```
//!
//! Assignment picks a manager by manager weight, then one of their public
//! targets by target weight, then tries that target's shards in random
//! order. SCVs failing with 5xx or transport errors accumulate a fail count
//! and drop out of assignment once it reaches `MAX_FAILS`.

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod assign;
pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod handlers;
pub mod monitor;
pub mod routes;
pub mod scv_client;
pub mod service;
pub mod state;
pub mod targets;

pub use assign::{AssignRequest, Assignment};
pub use config::CcConfig;
pub use directory::{ScvStatus, ShardDirectory};
pub use error::{ApiError, Result};
pub use routes::create_router;
pub use scv_client::{HttpScvClient, ScvClient, ScvResponse, TRANSPORT_FAILURE};
pub use service::CommandCenter;
pub use state::CcState;
