//! Typed entity store for siege.
//!
//! A small store of named entities with typed fields, secondary lookups and
//! bidirectional relations, layered over an ordered byte key/value backend.
//! SCVs use it (over `RocksDB`) for their stream index; the command center
//! uses it (in memory) for its shard directory.
//!
//! # Model
//!
//! ```text
//!   EntityDef (static)        Schema                 EntityStore
//!  +------------------+   +-----------------+   +---------------------+
//!  | name  "stream"   |-->| entities        |-->| transact(|tx| ...)  |
//!  | fields           |   | relate(a, b)    |   |   Txn overlay       |
//!  |  frames: Int     |   +-----------------+   |   -> Kv::write(ops) |
//!  |  target: Ref     |                         +----------+----------+
//!  +------------------+                                    |
//!                                              +-----------+-----------+
//!                                              |  MemoryKv  |  RocksKv  |
//!                                              +-----------------------+
//! ```
//!
//! Field kinds: int, float, bool, string, set, sorted set and references.
//! Scalar fields may carry a unique or multi lookup. A pair of reference
//! fields declared with [`Schema::relate`] is kept in sync on every write and
//! cleaned up on delete.
//!
//! # Example
//!
//! ```
//! use siege_store::{EntityDef, EntityStore, FieldDef, FieldType, MemoryKv, Schema, StoreError};
//!
//! static ENTITIES: &[EntityDef] = &[EntityDef {
//!     name: "job",
//!     fields: &[FieldDef::new("attempts", FieldType::Int)],
//! }];
//!
//! let store = EntityStore::new(MemoryKv::new(), Schema::new(ENTITIES).unwrap());
//! let attempts = store
//!     .transact(|tx| {
//!         tx.create("job", "j1")?;
//!         tx.hincr("job", "j1", "attempts", 1)
//!     })
//!     .unwrap();
//! assert_eq!(attempts, 1);
//! # Ok::<(), StoreError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod entity;
pub mod error;
pub mod keys;
pub mod kv;
pub mod rocks;
pub mod schema;
pub mod value;

pub use entity::{EntityStore, Txn};
pub use error::{Result, StoreError};
pub use kv::{Kv, KvOp, MemoryKv};
pub use rocks::RocksKv;
pub use schema::{EntityDef, FieldDef, FieldType, Index, Schema};
pub use value::Value;
