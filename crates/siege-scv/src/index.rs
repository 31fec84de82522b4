//! Stream index schema and typed accessors.
//!
//! The index holds every stream this SCV owns, the per-target priority
//! queues, the active-stream leases and two singleton sorted sets: heartbeat
//! expiries and held locks.

use std::collections::HashMap;

use serde::Serialize;
use siege_core::{StreamId, StreamStatus, TargetId};
use siege_store::{
    EntityDef, EntityStore, FieldDef, FieldType, Kv, Schema, StoreError, Txn, Value,
};

use crate::error::{Result, ScvError};

/// Stream entity.
pub const STREAM: &str = "stream";
/// Target entity (queue view only).
pub const TARGET: &str = "target";
/// Active-stream lease entity, keyed by stream id.
pub const ACTIVE: &str = "active_stream";
/// Singleton holding server-wide sorted sets.
pub const SCV: &str = "scv";
/// Id of the singleton.
pub const SELF: &str = "self";

/// Stream fields.
pub mod stream {
    pub const FRAMES: &str = "frames";
    pub const STATUS: &str = "status";
    pub const ERROR_COUNT: &str = "error_count";
    pub const CREATION_DATE: &str = "creation_date";
    pub const TARGET: &str = "target";
}

/// Target fields.
pub mod target {
    pub const STREAMS: &str = "streams";
    pub const QUEUE: &str = "queue";
}

/// Active-stream fields.
pub mod active {
    pub const BUFFER_FRAMES: &str = "buffer_frames";
    pub const TOTAL_FRAMES: &str = "total_frames";
    pub const AUTH_TOKEN: &str = "auth_token";
    pub const DONOR: &str = "donor";
    pub const START_TIME: &str = "start_time";
    pub const FRAME_HASH: &str = "frame_hash";
    pub const ENGINE: &str = "engine";
}

/// Singleton fields.
pub mod scv {
    pub const HEARTBEATS: &str = "heartbeats";
    pub const LOCKS: &str = "locks";
}

static ENTITIES: &[EntityDef] = &[
    EntityDef {
        name: STREAM,
        fields: &[
            FieldDef::new(stream::FRAMES, FieldType::Int),
            FieldDef::new(stream::STATUS, FieldType::Str),
            FieldDef::new(stream::ERROR_COUNT, FieldType::Int),
            FieldDef::new(stream::CREATION_DATE, FieldType::Float),
            FieldDef::new(
                stream::TARGET,
                FieldType::Ref {
                    entity: TARGET,
                    many: false,
                },
            ),
        ],
    },
    EntityDef {
        name: TARGET,
        fields: &[
            FieldDef::new(
                target::STREAMS,
                FieldType::Ref {
                    entity: STREAM,
                    many: true,
                },
            ),
            FieldDef::new(target::QUEUE, FieldType::SortedSet),
        ],
    },
    EntityDef {
        name: ACTIVE,
        fields: &[
            FieldDef::new(active::BUFFER_FRAMES, FieldType::Int),
            FieldDef::new(active::TOTAL_FRAMES, FieldType::Int),
            FieldDef::new(active::AUTH_TOKEN, FieldType::Str).unique(),
            FieldDef::new(active::DONOR, FieldType::Str),
            FieldDef::new(active::START_TIME, FieldType::Float),
            FieldDef::new(active::FRAME_HASH, FieldType::Str),
            FieldDef::new(active::ENGINE, FieldType::Str),
        ],
    },
    EntityDef {
        name: SCV,
        fields: &[
            FieldDef::new(scv::HEARTBEATS, FieldType::SortedSet),
            FieldDef::new(scv::LOCKS, FieldType::SortedSet),
        ],
    },
];

/// Build the stream index schema.
///
/// # Errors
///
/// Returns `StoreError::Schema` if the declarations are inconsistent.
pub fn schema() -> siege_store::Result<Schema> {
    Schema::new(ENTITIES)?.relate((STREAM, stream::TARGET), (TARGET, target::STREAMS))
}

/// Open the stream index over `kv`, creating the singleton if needed.
///
/// # Errors
///
/// Returns an error if the schema is invalid or the backend fails.
pub fn open(kv: impl Kv + 'static) -> siege_store::Result<EntityStore> {
    let store = EntityStore::new(kv, schema()?);
    store.transact::<_, StoreError, _>(|tx| tx.ensure(SCV, SELF).map(|_| ()))?;
    Ok(store)
}

/// A stream row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamRecord {
    pub stream_id: StreamId,
    pub target_id: TargetId,
    pub frames: i64,
    pub status: StreamStatus,
    pub error_count: i64,
    pub creation_date: f64,
}

/// An active-stream lease.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveRecord {
    pub stream_id: StreamId,
    pub buffer_frames: i64,
    pub total_frames: i64,
    #[serde(skip)]
    pub auth_token: String,
    pub donor: Option<String>,
    pub start_time: f64,
    pub engine: String,
    #[serde(skip)]
    pub frame_hash: Option<String>,
}

/// Load a stream row, or `None` if the stream is unknown.
///
/// # Errors
///
/// Returns an error if the index is corrupt or unreadable.
pub fn load_stream(tx: &Txn<'_>, id: &StreamId) -> Result<Option<StreamRecord>> {
    let key = id.to_string();
    if !tx.exists(STREAM, &key)? {
        return Ok(None);
    }
    let fields = tx.hgetall(STREAM, &key)?;
    let target_id = str_field(&fields, stream::TARGET)
        .ok_or_else(|| corrupt(&key, stream::TARGET))?
        .parse::<TargetId>()?;
    let status = str_field(&fields, stream::STATUS)
        .ok_or_else(|| corrupt(&key, stream::STATUS))?
        .parse::<StreamStatus>()?;
    Ok(Some(StreamRecord {
        stream_id: id.clone(),
        target_id,
        frames: int_field(&fields, stream::FRAMES),
        status,
        error_count: int_field(&fields, stream::ERROR_COUNT),
        creation_date: float_field(&fields, stream::CREATION_DATE),
    }))
}

/// Load a stream row, failing with `NotFound` if it is unknown.
///
/// # Errors
///
/// Returns `ScvError::NotFound` for an unknown stream.
pub fn require_stream(tx: &Txn<'_>, id: &StreamId) -> Result<StreamRecord> {
    load_stream(tx, id)?.ok_or_else(|| ScvError::stream_not_found(id))
}

/// Load an active-stream lease, or `None` if the stream is not active.
///
/// # Errors
///
/// Returns an error if the index is unreadable.
pub fn load_active(tx: &Txn<'_>, id: &StreamId) -> Result<Option<ActiveRecord>> {
    let key = id.to_string();
    if !tx.exists(ACTIVE, &key)? {
        return Ok(None);
    }
    let fields = tx.hgetall(ACTIVE, &key)?;
    Ok(Some(ActiveRecord {
        stream_id: id.clone(),
        buffer_frames: int_field(&fields, active::BUFFER_FRAMES),
        total_frames: int_field(&fields, active::TOTAL_FRAMES),
        auth_token: str_field(&fields, active::AUTH_TOKEN)
            .unwrap_or_default()
            .to_string(),
        donor: str_field(&fields, active::DONOR).map(str::to_string),
        start_time: float_field(&fields, active::START_TIME),
        engine: str_field(&fields, active::ENGINE)
            .unwrap_or_default()
            .to_string(),
        frame_hash: str_field(&fields, active::FRAME_HASH).map(str::to_string),
    }))
}

fn str_field<'a>(fields: &'a HashMap<&'static str, Value>, name: &str) -> Option<&'a str> {
    fields.get(name).and_then(Value::as_str)
}

fn int_field(fields: &HashMap<&'static str, Value>, name: &str) -> i64 {
    fields.get(name).and_then(Value::as_int).unwrap_or(0)
}

fn float_field(fields: &HashMap<&'static str, Value>, name: &str) -> f64 {
    fields.get(name).and_then(Value::as_float).unwrap_or(0.0)
}

fn corrupt(id: &str, field: &str) -> ScvError {
    ScvError::Internal(format!("stream {id} has no {field}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use siege_store::MemoryKv;

    fn store() -> EntityStore {
        open(MemoryKv::new()).unwrap()
    }

    #[test]
    fn schema_is_valid() {
        assert!(schema().is_ok());
    }

    #[test]
    fn stream_round_trip_through_index() {
        let store = store();
        let id = StreamId::generate("scv-a");
        let target = TargetId::generate();
        store
            .transact::<_, ScvError, _>(|tx| {
                tx.ensure(TARGET, &target.to_string())?;
                tx.create(STREAM, &id.to_string())?;
                tx.hset(STREAM, &id.to_string(), stream::FRAMES, 12_i64)?;
                tx.hset(STREAM, &id.to_string(), stream::STATUS, "OK")?;
                tx.hset(STREAM, &id.to_string(), stream::CREATION_DATE, 1.5)?;
                tx.hset(STREAM, &id.to_string(), stream::TARGET, target.to_string())?;
                Ok(())
            })
            .unwrap();

        let record = store
            .transact::<_, ScvError, _>(|tx| require_stream(tx, &id))
            .unwrap();
        assert_eq!(record.target_id, target);
        assert_eq!(record.frames, 12);
        assert_eq!(record.status, StreamStatus::Ok);
        assert_eq!(record.error_count, 0);

        let members = store
            .transact::<_, ScvError, _>(|tx| {
                Ok(tx.smembers(TARGET, &target.to_string(), target::STREAMS)?)
            })
            .unwrap();
        assert_eq!(members, vec![id.to_string()]);
    }

    #[test]
    fn missing_stream_is_not_found() {
        let store = store();
        let id = StreamId::generate("scv-a");
        let err = store
            .transact::<_, ScvError, _>(|tx| require_stream(tx, &id))
            .unwrap_err();
        assert!(matches!(err, ScvError::NotFound(_)));
        let active = store
            .transact::<_, ScvError, _>(|tx| load_active(tx, &id))
            .unwrap();
        assert!(active.is_none());
    }

    #[test]
    fn auth_tokens_are_unique() {
        let store = store();
        let a = StreamId::generate("scv-a");
        let b = StreamId::generate("scv-a");
        let result = store.transact::<_, ScvError, _>(|tx| {
            for id in [&a, &b] {
                tx.create(ACTIVE, &id.to_string())?;
                tx.hset(ACTIVE, &id.to_string(), active::AUTH_TOKEN, "same")?;
            }
            Ok(())
        });
        assert!(matches!(result, Err(ScvError::Store(StoreError::Conflict(_)))));
    }
}
