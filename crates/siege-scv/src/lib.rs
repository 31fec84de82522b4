//! Stream Compute & Validation (SCV) shard server for siege.
//!
//! An SCV owns a disjoint subset of streams: their index entries, target
//! queues, leases, heartbeats and locks, and their files on local disk. It
//! serves the manager stream API, lease activation for the command center and
//! the core protocol.
//!
//! # Architecture
//!
//! ```text
//!   cores ──/core/*──┐   managers ──/streams/*──┐   CC ──/streams/activate──┐
//!                    ▼                          ▼                           ▼
//!  ┌──────────────────────────────────────────────────────────────────────────┐
//!  │ Router + extractors (CoreToken, ManagerAuth, CommandCenter)              │
//!  ├──────────────────────────────────────────────────────────────────────────┤
//!  │ ScvService: lifecycle, core protocol, sweepers                           │
//!  │   LockManager ── index (EntityStore over RocksKv) ── StreamFiles (disk)  │
//!  └──────────────────────────────────────────────────────────────────────────┘
//!                    │ ShardCatalog (RemoteCatalog → CC /internal/catalog)
//!                    ▼
//!               catalog of record
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod config;
pub mod disk;
pub mod error;
pub mod handlers;
pub mod index;
pub mod lifecycle;
pub mod lock;
pub mod protocol;
pub mod routes;
pub mod service;
pub mod state;
pub mod stats;
pub mod sweeper;

pub use config::ScvConfig;
pub use disk::StreamFiles;
pub use error::{Result, ScvError};
pub use lock::{LockGuard, LockManager};
pub use routes::create_router;
pub use service::{Disposition, ScvService};
pub use state::ScvState;
