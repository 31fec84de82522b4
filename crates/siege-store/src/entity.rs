//! The entity store and its transaction handle.
//!
//! All mutations go through [`EntityStore::transact`]. A transaction reads
//! through an overlay of its own pending writes and commits them as one
//! atomic [`Kv::write`] when the closure returns `Ok`. On `Err` the overlay is
//! dropped and nothing reaches the backend. Transactions on one store are
//! serialized by a mutex, so each named multi-step operation behaves like a
//! single scripted command.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use parking_lot::Mutex;

use crate::error::{Result, StoreError};
use crate::keys;
use crate::kv::{Kv, KvOp};
use crate::schema::{End, FieldDef, FieldType, Index, Schema};
use crate::value::Value;

/// A typed entity store over a [`Kv`] backend.
pub struct EntityStore {
    kv: Box<dyn Kv>,
    schema: Schema,
    txn_lock: Mutex<()>,
}

impl EntityStore {
    /// Create a store over `kv` using `schema`.
    pub fn new(kv: impl Kv + 'static, schema: Schema) -> Self {
        Self {
            kv: Box::new(kv),
            schema,
            txn_lock: Mutex::new(()),
        }
    }

    /// The schema this store enforces.
    #[must_use]
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Run `f` as one atomic transaction.
    ///
    /// The closure's error type only needs to absorb [`StoreError`], so
    /// callers can abort a transaction with their own domain errors.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, or a backend error from the commit.
    pub fn transact<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Txn<'_>) -> std::result::Result<T, E>,
        E: From<StoreError>,
    {
        let _guard = self.txn_lock.lock();
        let mut tx = Txn {
            kv: self.kv.as_ref(),
            schema: &self.schema,
            overlay: BTreeMap::new(),
        };
        let out = f(&mut tx)?;
        let ops = tx.into_ops();
        if !ops.is_empty() {
            self.kv.write(ops)?;
        }
        Ok(out)
    }
}

/// A transaction in progress.
pub struct Txn<'a> {
    kv: &'a dyn Kv,
    schema: &'a Schema,
    overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Txn<'_> {
    // =========================================================================
    // Raw overlay access
    // =========================================================================

    fn raw_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.overlay.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => self.kv.get(key),
        }
    }

    fn raw_put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.overlay.insert(key, Some(value));
    }

    fn raw_del(&mut self, key: Vec<u8>) {
        self.overlay.insert(key, None);
    }

    fn raw_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.kv.scan_prefix(prefix)?.into_iter().collect();
        let pending = self
            .overlay
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix));
        for (key, value) in pending {
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    fn into_ops(self) -> Vec<KvOp> {
        self.overlay
            .into_iter()
            .map(|(key, value)| match value {
                Some(v) => KvOp::Put(key, v),
                None => KvOp::Delete(key),
            })
            .collect()
    }

    fn encode(value: &Value) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    fn decode(data: &[u8]) -> Result<Value> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    // =========================================================================
    // Validation helpers
    // =========================================================================

    fn check_component(what: &str, s: &str) -> Result<()> {
        if keys::is_valid_component(s) {
            Ok(())
        } else {
            Err(StoreError::Schema(format!("invalid {what} {s:?}")))
        }
    }

    fn require(&self, entity: &str, id: &str) -> Result<()> {
        if self.exists(entity, id)? {
            Ok(())
        } else {
            Err(StoreError::not_found(entity, id))
        }
    }

    fn field_of(&self, entity: &str, field: &str, expect: &[Kind]) -> Result<&'static FieldDef> {
        let def = self.schema.field(entity, field)?;
        let kind = Kind::of(def.ty);
        if expect.contains(&kind) {
            Ok(def)
        } else {
            Err(StoreError::Schema(format!(
                "{entity}.{field} is {:?}, not usable as {expect:?}",
                def.ty
            )))
        }
    }

    // =========================================================================
    // Instances
    // =========================================================================

    /// Create an instance.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the id is taken.
    pub fn create(&mut self, entity: &str, id: &str) -> Result<()> {
        self.schema.entity(entity)?;
        Self::check_component("id", id)?;
        if self.exists(entity, id)? {
            return Err(StoreError::AlreadyExists {
                entity: entity.to_string(),
                id: id.to_string(),
            });
        }
        self.raw_put(keys::exists_key(entity, id), Vec::new());
        Ok(())
    }

    /// Create an instance unless it already exists. Returns whether it was
    /// created.
    ///
    /// # Errors
    ///
    /// Returns an error on schema violations or backend failure.
    pub fn ensure(&mut self, entity: &str, id: &str) -> Result<bool> {
        if self.exists(entity, id)? {
            return Ok(false);
        }
        self.create(entity, id)?;
        Ok(true)
    }

    /// Whether an instance exists.
    ///
    /// # Errors
    ///
    /// Returns an error on schema violations or backend failure.
    pub fn exists(&self, entity: &str, id: &str) -> Result<bool> {
        self.schema.entity(entity)?;
        if !keys::is_valid_component(id) {
            return Ok(false);
        }
        Ok(self.raw_get(&keys::exists_key(entity, id))?.is_some())
    }

    /// Ids of every instance of `entity`, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error on schema violations or backend failure.
    pub fn members(&self, entity: &str) -> Result<Vec<String>> {
        self.schema.entity(entity)?;
        let prefix = keys::exists_prefix(entity);
        Ok(self
            .raw_scan(&prefix)?
            .into_iter()
            .filter_map(|(k, _)| keys::suffix_str(&k, &prefix))
            .collect())
    }

    /// Delete an instance with all its fields, collections and lookups, and
    /// remove it from the reverse side of every relation.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the instance does not exist.
    pub fn delete(&mut self, entity: &str, id: &str) -> Result<()> {
        let def = self.schema.entity(entity)?;
        self.require(entity, id)?;

        for field in def.fields {
            match field.ty {
                FieldType::Ref { many, .. } => {
                    let end = self.schema.ref_end(entity, field.name)?;
                    let inverse = self.schema.inverse_of(end)?;
                    for other in self.ref_values(end, id)? {
                        self.raw_unlink(inverse, &other, id)?;
                    }
                    if many {
                        self.clear_prefix(&keys::set_prefix(entity, id, field.name))?;
                    } else {
                        self.raw_hdel(entity, id, field)?;
                    }
                }
                FieldType::Int | FieldType::Float | FieldType::Bool | FieldType::Str => {
                    self.raw_hdel(entity, id, field)?;
                }
                FieldType::Set => {
                    self.clear_prefix(&keys::set_prefix(entity, id, field.name))?;
                }
                FieldType::SortedSet => {
                    self.clear_prefix(&keys::zscore_prefix(entity, id, field.name))?;
                    self.clear_prefix(&keys::zorder_prefix(entity, id, field.name))?;
                }
            }
        }
        self.raw_del(keys::exists_key(entity, id));
        Ok(())
    }

    fn clear_prefix(&mut self, prefix: &[u8]) -> Result<()> {
        for (key, _) in self.raw_scan(prefix)? {
            self.raw_del(key);
        }
        Ok(())
    }

    // =========================================================================
    // Hash fields
    // =========================================================================

    /// Set a scalar field. Writing a single reference field also updates the
    /// other side of its relation.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` for a missing instance (or missing
    /// referenced instance), `StoreError::Conflict` on a unique index clash,
    /// and `StoreError::Schema` for a wrong field or value type.
    pub fn hset(&mut self, entity: &str, id: &str, field: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let def = self.field_of(entity, field, &[Kind::Scalar, Kind::RefOne])?;
        self.require(entity, id)?;
        match def.ty {
            FieldType::Ref { .. } => {
                let other = match value {
                    Value::Str(other) => other,
                    other => {
                        return Err(StoreError::Schema(format!(
                            "{entity}.{field} takes a string id, got {}",
                            other.kind()
                        )))
                    }
                };
                let end = self.schema.ref_end(entity, field)?;
                self.connect(end, id, &other)
            }
            ty => {
                check_value_type(entity, field, ty, &value)?;
                self.raw_hset(entity, id, def, value)
            }
        }
    }

    /// Read a scalar field. Missing instance or unset field returns `None`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` for an undeclared or non-scalar field.
    pub fn hget(&self, entity: &str, id: &str, field: &str) -> Result<Option<Value>> {
        self.field_of(entity, field, &[Kind::Scalar, Kind::RefOne])?;
        if !keys::is_valid_component(id) {
            return Ok(None);
        }
        self.raw_get(&keys::hash_key(entity, id, field))?
            .map(|data| Self::decode(&data))
            .transpose()
    }

    /// Read an integer field, defaulting to `None` when unset.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` for an undeclared or non-scalar field.
    pub fn hget_int(&self, entity: &str, id: &str, field: &str) -> Result<Option<i64>> {
        Ok(self.hget(entity, id, field)?.and_then(|v| v.as_int()))
    }

    /// Read a float field.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` for an undeclared or non-scalar field.
    pub fn hget_float(&self, entity: &str, id: &str, field: &str) -> Result<Option<f64>> {
        Ok(self.hget(entity, id, field)?.and_then(|v| v.as_float()))
    }

    /// Read a string (or single reference) field.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` for an undeclared or non-scalar field.
    pub fn hget_str(&self, entity: &str, id: &str, field: &str) -> Result<Option<String>> {
        Ok(self.hget(entity, id, field)?.and_then(Value::into_string))
    }

    /// Clear a scalar field. Clearing a single reference unlinks both sides.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` for an undeclared or non-scalar field.
    pub fn hdel(&mut self, entity: &str, id: &str, field: &str) -> Result<()> {
        let def = self.field_of(entity, field, &[Kind::Scalar, Kind::RefOne])?;
        if let FieldType::Ref { .. } = def.ty {
            if let Some(other) = self.hget_str(entity, id, field)? {
                let end = self.schema.ref_end(entity, field)?;
                self.disconnect(end, id, &other)?;
            }
            return Ok(());
        }
        self.raw_hdel(entity, id, def)
    }

    /// Add `by` to an integer field (unset counts as zero) and return the new value.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` if the field is not an `Int`, and
    /// `StoreError::NotFound` for a missing instance.
    pub fn hincr(&mut self, entity: &str, id: &str, field: &str, by: i64) -> Result<i64> {
        let def = self.field_of(entity, field, &[Kind::Scalar])?;
        if def.ty != FieldType::Int {
            return Err(StoreError::Schema(format!("{entity}.{field} is not an int")));
        }
        self.require(entity, id)?;
        let next = self.hget_int(entity, id, field)?.unwrap_or(0) + by;
        self.raw_hset(entity, id, def, Value::Int(next))?;
        Ok(next)
    }

    /// Every scalar field currently set on an instance.
    ///
    /// # Errors
    ///
    /// Returns an error on schema violations or backend failure.
    pub fn hgetall(&self, entity: &str, id: &str) -> Result<HashMap<&'static str, Value>> {
        let def = self.schema.entity(entity)?;
        let mut out = HashMap::new();
        for field in def.fields.iter().filter(|f| f.ty.is_scalar()) {
            if let Some(value) = self.hget(entity, id, field.name)? {
                out.insert(field.name, value);
            }
        }
        Ok(out)
    }

    fn raw_hset(&mut self, entity: &str, id: &str, def: &FieldDef, value: Value) -> Result<()> {
        let key = keys::hash_key(entity, id, def.name);
        if def.index != Index::None {
            let old = self.raw_get(&key)?.map(|d| Self::decode(&d)).transpose()?;
            if old.as_ref() == Some(&value) {
                return Ok(());
            }
            let repr = value.index_repr();
            Self::check_component("indexed value", &repr)?;
            if def.index == Index::Unique {
                if let Some(owner) = self.lookup(entity, def.name, &repr)? {
                    if owner != id {
                        return Err(StoreError::Conflict(format!(
                            "{entity}.{} = {repr} is held by {owner}",
                            def.name
                        )));
                    }
                }
            }
            if let Some(old) = old {
                self.drop_index(entity, id, def, &old);
            }
            match def.index {
                Index::Unique => self.raw_put(
                    keys::unique_key(entity, def.name, &repr),
                    id.as_bytes().to_vec(),
                ),
                Index::Multi => {
                    self.raw_put(keys::multi_key(entity, def.name, &repr, id), Vec::new());
                }
                Index::None => {}
            }
        }
        let data = Self::encode(&value)?;
        self.raw_put(key, data);
        Ok(())
    }

    fn raw_hdel(&mut self, entity: &str, id: &str, def: &FieldDef) -> Result<()> {
        let key = keys::hash_key(entity, id, def.name);
        if def.index != Index::None {
            if let Some(old) = self.raw_get(&key)?.map(|d| Self::decode(&d)).transpose()? {
                self.drop_index(entity, id, def, &old);
            }
        }
        self.raw_del(key);
        Ok(())
    }

    fn drop_index(&mut self, entity: &str, id: &str, def: &FieldDef, old: &Value) {
        let repr = old.index_repr();
        match def.index {
            Index::Unique => self.raw_del(keys::unique_key(entity, def.name, &repr)),
            Index::Multi => self.raw_del(keys::multi_key(entity, def.name, &repr, id)),
            Index::None => {}
        }
    }

    // =========================================================================
    // Sets
    // =========================================================================

    /// Add a member to a set field. On a many-reference field the other side
    /// of the relation is updated too. Returns whether the member was new.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` for a missing instance and
    /// `StoreError::Schema` for a non-set field.
    pub fn sadd(&mut self, entity: &str, id: &str, field: &str, member: &str) -> Result<bool> {
        let def = self.field_of(entity, field, &[Kind::Set, Kind::RefMany])?;
        self.require(entity, id)?;
        Self::check_component("member", member)?;
        let existed = self.sismember(entity, id, field, member)?;
        if let FieldType::Ref { .. } = def.ty {
            let end = self.schema.ref_end(entity, field)?;
            self.connect(end, id, member)?;
        } else if !existed {
            self.raw_put(keys::set_key(entity, id, field, member), Vec::new());
        }
        Ok(!existed)
    }

    /// Remove a member from a set field. Returns whether it was present.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` for a non-set field.
    pub fn srem(&mut self, entity: &str, id: &str, field: &str, member: &str) -> Result<bool> {
        let def = self.field_of(entity, field, &[Kind::Set, Kind::RefMany])?;
        if !self.sismember(entity, id, field, member)? {
            return Ok(false);
        }
        if let FieldType::Ref { .. } = def.ty {
            let end = self.schema.ref_end(entity, field)?;
            self.disconnect(end, id, member)?;
        } else {
            self.raw_del(keys::set_key(entity, id, field, member));
        }
        Ok(true)
    }

    /// Whether `member` is in the set.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` for a non-set field.
    pub fn sismember(&self, entity: &str, id: &str, field: &str, member: &str) -> Result<bool> {
        self.field_of(entity, field, &[Kind::Set, Kind::RefMany])?;
        if !keys::is_valid_component(id) || !keys::is_valid_component(member) {
            return Ok(false);
        }
        Ok(self
            .raw_get(&keys::set_key(entity, id, field, member))?
            .is_some())
    }

    /// All members of a set field, in key order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` for a non-set field.
    pub fn smembers(&self, entity: &str, id: &str, field: &str) -> Result<Vec<String>> {
        self.field_of(entity, field, &[Kind::Set, Kind::RefMany])?;
        if !keys::is_valid_component(id) {
            return Ok(Vec::new());
        }
        let prefix = keys::set_prefix(entity, id, field);
        Ok(self
            .raw_scan(&prefix)?
            .into_iter()
            .filter_map(|(k, _)| keys::suffix_str(&k, &prefix))
            .collect())
    }

    /// Number of members in a set field.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` for a non-set field.
    pub fn scard(&self, entity: &str, id: &str, field: &str) -> Result<usize> {
        Ok(self.smembers(entity, id, field)?.len())
    }

    // =========================================================================
    // Sorted sets
    // =========================================================================

    /// Insert or rescore a member.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` for a missing instance and
    /// `StoreError::Schema` for a non-sorted-set field.
    pub fn zadd(&mut self, entity: &str, id: &str, field: &str, member: &str, score: f64) -> Result<()> {
        self.field_of(entity, field, &[Kind::Sorted])?;
        self.require(entity, id)?;
        Self::check_component("member", member)?;
        if let Some(old) = self.zscore(entity, id, field, member)? {
            self.raw_del(keys::zorder_key(entity, id, field, old, member));
        }
        self.raw_put(
            keys::zscore_key(entity, id, field, member),
            score.to_bits().to_be_bytes().to_vec(),
        );
        self.raw_put(keys::zorder_key(entity, id, field, score, member), Vec::new());
        Ok(())
    }

    /// Remove a member. Returns whether it was present.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` for a non-sorted-set field.
    pub fn zrem(&mut self, entity: &str, id: &str, field: &str, member: &str) -> Result<bool> {
        let Some(score) = self.zscore(entity, id, field, member)? else {
            return Ok(false);
        };
        self.raw_del(keys::zscore_key(entity, id, field, member));
        self.raw_del(keys::zorder_key(entity, id, field, score, member));
        Ok(true)
    }

    /// Score of a member, if present.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` for a non-sorted-set field.
    pub fn zscore(&self, entity: &str, id: &str, field: &str, member: &str) -> Result<Option<f64>> {
        self.field_of(entity, field, &[Kind::Sorted])?;
        if !keys::is_valid_component(id) || !keys::is_valid_component(member) {
            return Ok(None);
        }
        let Some(data) = self.raw_get(&keys::zscore_key(entity, id, field, member))? else {
            return Ok(None);
        };
        let bytes: [u8; 8] = data
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Serialization("bad score encoding".into()))?;
        Ok(Some(f64::from_bits(u64::from_be_bytes(bytes))))
    }

    /// All members in ascending score order (ties by member).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` for a non-sorted-set field.
    pub fn zrange(&self, entity: &str, id: &str, field: &str) -> Result<Vec<(String, f64)>> {
        self.field_of(entity, field, &[Kind::Sorted])?;
        if !keys::is_valid_component(id) {
            return Ok(Vec::new());
        }
        let prefix = keys::zorder_prefix(entity, id, field);
        Ok(self
            .raw_scan(&prefix)?
            .into_iter()
            .filter_map(|(k, _)| keys::split_zorder_suffix(&k[prefix.len()..]))
            .map(|(score, member)| (member, score))
            .collect())
    }

    /// Members with `min <= score <= max`, ascending.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` for a non-sorted-set field.
    pub fn zrange_by_score(
        &self,
        entity: &str,
        id: &str,
        field: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<(String, f64)>> {
        Ok(self
            .zrange(entity, id, field)?
            .into_iter()
            .filter(|(_, score)| *score >= min && *score <= max)
            .collect())
    }

    /// All members in descending score order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` for a non-sorted-set field.
    pub fn zrevrange(&self, entity: &str, id: &str, field: &str) -> Result<Vec<(String, f64)>> {
        let mut all = self.zrange(entity, id, field)?;
        all.reverse();
        Ok(all)
    }

    /// Remove and return the highest-scored member.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` for a non-sorted-set field.
    pub fn zpopmax(&mut self, entity: &str, id: &str, field: &str) -> Result<Option<(String, f64)>> {
        let Some((member, score)) = self.zrevrange(entity, id, field)?.into_iter().next() else {
            return Ok(None);
        };
        self.zrem(entity, id, field, &member)?;
        Ok(Some((member, score)))
    }

    /// Number of members.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` for a non-sorted-set field.
    pub fn zcard(&self, entity: &str, id: &str, field: &str) -> Result<usize> {
        Ok(self.zrange(entity, id, field)?.len())
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Resolve a uniquely indexed value to its owner id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` if the field has no unique index.
    pub fn lookup(&self, entity: &str, field: &str, value: &str) -> Result<Option<String>> {
        let def = self.schema.field(entity, field)?;
        if def.index != Index::Unique {
            return Err(StoreError::Schema(format!("{entity}.{field} has no unique index")));
        }
        if !keys::is_valid_component(value) {
            return Ok(None);
        }
        Ok(self
            .raw_get(&keys::unique_key(entity, field, value))?
            .and_then(|id| String::from_utf8(id).ok()))
    }

    /// Resolve a multi-indexed value to every id holding it.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` if the field has no multi index.
    pub fn lookup_all(&self, entity: &str, field: &str, value: &str) -> Result<Vec<String>> {
        let def = self.schema.field(entity, field)?;
        if def.index != Index::Multi {
            return Err(StoreError::Schema(format!("{entity}.{field} has no multi index")));
        }
        if !keys::is_valid_component(value) {
            return Ok(Vec::new());
        }
        let prefix = keys::multi_prefix(entity, field, value);
        Ok(self
            .raw_scan(&prefix)?
            .into_iter()
            .filter_map(|(k, _)| keys::suffix_str(&k, &prefix))
            .collect())
    }

    // =========================================================================
    // Relations
    // =========================================================================

    fn ref_values(&self, end: End, id: &str) -> Result<Vec<String>> {
        if end.many {
            self.smembers(end.entity, id, end.field)
        } else {
            Ok(self.hget_str(end.entity, id, end.field)?.into_iter().collect())
        }
    }

    /// Point one side at `other`. A single side that already pointed
    /// elsewhere is detached from its previous partner first.
    fn raw_link(&mut self, end: End, id: &str, other: &str) -> Result<()> {
        if end.many {
            self.raw_put(keys::set_key(end.entity, id, end.field, other), Vec::new());
            return Ok(());
        }
        if let Some(prev) = self.hget_str(end.entity, id, end.field)? {
            if prev == other {
                return Ok(());
            }
            let inverse = self.schema.inverse_of(end)?;
            self.raw_unlink(inverse, &prev, id)?;
        }
        let def = self.schema.field(end.entity, end.field)?;
        self.raw_hset(end.entity, id, def, Value::Str(other.to_string()))
    }

    fn raw_unlink(&mut self, end: End, id: &str, other: &str) -> Result<()> {
        if end.many {
            self.raw_del(keys::set_key(end.entity, id, end.field, other));
        } else if self.hget_str(end.entity, id, end.field)?.as_deref() == Some(other) {
            let def = self.schema.field(end.entity, end.field)?;
            self.raw_hdel(end.entity, id, def)?;
        }
        Ok(())
    }

    fn connect(&mut self, end: End, id: &str, other: &str) -> Result<()> {
        let inverse = self.schema.inverse_of(end)?;
        Self::check_component("reference", other)?;
        self.require(inverse.entity, other)?;
        self.raw_link(end, id, other)?;
        self.raw_link(inverse, other, id)
    }

    fn disconnect(&mut self, end: End, id: &str, other: &str) -> Result<()> {
        let inverse = self.schema.inverse_of(end)?;
        self.raw_unlink(end, id, other)?;
        self.raw_unlink(inverse, other, id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Scalar,
    RefOne,
    RefMany,
    Set,
    Sorted,
}

impl Kind {
    const fn of(ty: FieldType) -> Self {
        match ty {
            FieldType::Int | FieldType::Float | FieldType::Bool | FieldType::Str => Self::Scalar,
            FieldType::Ref { many: false, .. } => Self::RefOne,
            FieldType::Ref { many: true, .. } => Self::RefMany,
            FieldType::Set => Self::Set,
            FieldType::SortedSet => Self::Sorted,
        }
    }
}

fn check_value_type(entity: &str, field: &str, ty: FieldType, value: &Value) -> Result<()> {
    let ok = matches!(
        (ty, value),
        (FieldType::Int, Value::Int(_))
            | (FieldType::Float, Value::Float(_) | Value::Int(_))
            | (FieldType::Bool, Value::Bool(_))
            | (FieldType::Str, Value::Str(_))
    );
    if ok {
        Ok(())
    } else {
        Err(StoreError::Schema(format!(
            "{entity}.{field} is {ty:?}, got {}",
            value.kind()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::schema::EntityDef;

    static ENTITIES: &[EntityDef] = &[
        EntityDef {
            name: "stream",
            fields: &[
                FieldDef::new("frames", FieldType::Int),
                FieldDef::new("status", FieldType::Str).multi(),
                FieldDef::new("token", FieldType::Str).unique(),
                FieldDef::new(
                    "target",
                    FieldType::Ref {
                        entity: "target",
                        many: false,
                    },
                ),
                FieldDef::new("tags", FieldType::Set),
            ],
        },
        EntityDef {
            name: "target",
            fields: &[
                FieldDef::new(
                    "streams",
                    FieldType::Ref {
                        entity: "stream",
                        many: true,
                    },
                ),
                FieldDef::new("queue", FieldType::SortedSet),
                FieldDef::new(
                    "shards",
                    FieldType::Ref {
                        entity: "shard",
                        many: true,
                    },
                ),
            ],
        },
        EntityDef {
            name: "shard",
            fields: &[
                FieldDef::new(
                    "targets",
                    FieldType::Ref {
                        entity: "target",
                        many: true,
                    },
                ),
                FieldDef::new(
                    "partner",
                    FieldType::Ref {
                        entity: "shard",
                        many: false,
                    },
                ),
                FieldDef::new(
                    "peers",
                    FieldType::Ref {
                        entity: "shard",
                        many: true,
                    },
                ),
            ],
        },
    ];

    fn store() -> EntityStore {
        let schema = Schema::new(ENTITIES)
            .unwrap()
            .relate(("stream", "target"), ("target", "streams"))
            .unwrap()
            .relate(("target", "shards"), ("shard", "targets"))
            .unwrap()
            .relate(("shard", "partner"), ("shard", "partner"))
            .unwrap()
            .relate(("shard", "peers"), ("shard", "peers"))
            .unwrap();
        EntityStore::new(MemoryKv::new(), schema)
    }

    #[test]
    fn create_exists_delete() {
        let store = store();
        store
            .transact(|tx| {
                tx.create("stream", "s1")?;
                tx.hset("stream", "s1", "frames", 3i64)
            })
            .unwrap();

        store
            .transact(|tx| {
                assert!(tx.exists("stream", "s1")?);
                assert_eq!(tx.members("stream")?, vec!["s1".to_string()]);
                assert!(matches!(
                    tx.create("stream", "s1"),
                    Err(StoreError::AlreadyExists { .. })
                ));
                tx.delete("stream", "s1")?;
                assert!(!tx.exists("stream", "s1")?);
                assert_eq!(tx.hget("stream", "s1", "frames")?, None);
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn unknown_field_and_wrong_type_fail_loudly() {
        let store = store();
        let result: Result<()> = store.transact(|tx| {
            tx.create("stream", "s1")?;
            tx.hset("stream", "s1", "nope", 1i64)
        });
        assert!(result.unwrap_err().is_schema());

        let result: Result<()> = store.transact(|tx| {
            tx.create("stream", "s1")?;
            tx.hset("stream", "s1", "frames", "many")
        });
        assert!(result.unwrap_err().is_schema());
    }

    #[test]
    fn missing_id_reads_are_absent() {
        let store = store();
        store
            .transact(|tx| {
                assert_eq!(tx.hget("stream", "ghost", "frames")?, None);
                assert!(tx.smembers("stream", "ghost", "tags")?.is_empty());
                assert_eq!(tx.lookup("stream", "token", "abc")?, None);
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn failed_transaction_commits_nothing() {
        let store = store();
        let result: Result<()> = store.transact(|tx| {
            tx.create("stream", "s1")?;
            tx.hset("stream", "s1", "frames", 10i64)?;
            Err(StoreError::Conflict("abort".into()))
        });
        assert!(result.is_err());
        let exists = store.transact(|tx| tx.exists("stream", "s1")).unwrap();
        assert!(!exists);
    }

    #[test]
    fn hincr_counts_from_zero() {
        let store = store();
        let value = store
            .transact(|tx| {
                tx.create("stream", "s1")?;
                tx.hincr("stream", "s1", "frames", 5)?;
                tx.hincr("stream", "s1", "frames", 20)
            })
            .unwrap();
        assert_eq!(value, 25);
    }

    #[test]
    fn sets() {
        let store = store();
        store
            .transact(|tx| {
                tx.create("stream", "s1")?;
                assert!(tx.sadd("stream", "s1", "tags", "a")?);
                assert!(!tx.sadd("stream", "s1", "tags", "a")?);
                tx.sadd("stream", "s1", "tags", "b")?;
                assert_eq!(tx.scard("stream", "s1", "tags")?, 2);
                assert!(tx.srem("stream", "s1", "tags", "a")?);
                assert_eq!(tx.smembers("stream", "s1", "tags")?, vec!["b".to_string()]);
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn sorted_sets() {
        let store = store();
        store
            .transact(|tx| {
                tx.create("target", "t")?;
                tx.zadd("target", "t", "queue", "low", 1.0)?;
                tx.zadd("target", "t", "queue", "high", 30.0)?;
                tx.zadd("target", "t", "queue", "mid", 10.0)?;
                tx.zadd("target", "t", "queue", "low", 2.0)?;
                assert_eq!(tx.zcard("target", "t", "queue")?, 3);
                assert_eq!(tx.zscore("target", "t", "queue", "low")?, Some(2.0));

                let below: Vec<_> = tx
                    .zrange_by_score("target", "t", "queue", f64::NEG_INFINITY, 10.0)?
                    .into_iter()
                    .map(|(m, _)| m)
                    .collect();
                assert_eq!(below, vec!["low".to_string(), "mid".to_string()]);

                assert_eq!(
                    tx.zpopmax("target", "t", "queue")?,
                    Some(("high".to_string(), 30.0))
                );
                assert_eq!(tx.zcard("target", "t", "queue")?, 2);
                assert!(tx.zrem("target", "t", "queue", "mid")?);
                assert!(!tx.zrem("target", "t", "queue", "mid")?);
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn unique_lookup_and_conflict() {
        let store = store();
        store
            .transact(|tx| {
                tx.create("stream", "s1")?;
                tx.create("stream", "s2")?;
                tx.hset("stream", "s1", "token", "abc")?;
                assert_eq!(tx.lookup("stream", "token", "abc")?, Some("s1".to_string()));
                assert!(matches!(
                    tx.hset("stream", "s2", "token", "abc"),
                    Err(StoreError::Conflict(_))
                ));
                tx.hset("stream", "s1", "token", "def")?;
                assert_eq!(tx.lookup("stream", "token", "abc")?, None);
                tx.delete("stream", "s1")?;
                assert_eq!(tx.lookup("stream", "token", "def")?, None);
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn multi_lookup() {
        let store = store();
        store
            .transact(|tx| {
                for id in ["a", "b", "c"] {
                    tx.create("stream", id)?;
                    tx.hset("stream", id, "status", "OK")?;
                }
                tx.hset("stream", "b", "status", "STOPPED")?;
                assert_eq!(
                    tx.lookup_all("stream", "status", "OK")?,
                    vec!["a".to_string(), "c".to_string()]
                );
                assert!(tx.lookup("stream", "status", "OK").unwrap_err().is_schema());
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn one_to_many_relation_stays_in_sync() {
        let store = store();
        store
            .transact(|tx| {
                tx.create("target", "t1")?;
                tx.create("target", "t2")?;
                tx.create("stream", "s1")?;
                tx.create("stream", "s2")?;
                tx.hset("stream", "s1", "target", "t1")?;
                tx.sadd("target", "t1", "streams", "s2")?;

                assert_eq!(tx.hget_str("stream", "s2", "target")?, Some("t1".into()));
                assert_eq!(tx.scard("target", "t1", "streams")?, 2);

                // Re-pointing moves the stream between targets.
                tx.hset("stream", "s1", "target", "t2")?;
                assert_eq!(tx.smembers("target", "t1", "streams")?, vec!["s2".to_string()]);
                assert_eq!(tx.smembers("target", "t2", "streams")?, vec!["s1".to_string()]);

                tx.delete("stream", "s2")?;
                assert_eq!(tx.scard("target", "t1", "streams")?, 0);

                tx.delete("target", "t2")?;
                assert_eq!(tx.hget("stream", "s1", "target")?, None);
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn reference_to_missing_instance_fails() {
        let store = store();
        let result: Result<()> = store.transact(|tx| {
            tx.create("stream", "s1")?;
            tx.hset("stream", "s1", "target", "ghost")
        });
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn many_to_many_relation() {
        let store = store();
        store
            .transact(|tx| {
                tx.create("target", "t1")?;
                tx.create("target", "t2")?;
                tx.create("shard", "a")?;
                tx.create("shard", "b")?;
                tx.sadd("target", "t1", "shards", "a")?;
                tx.sadd("target", "t1", "shards", "b")?;
                tx.sadd("shard", "a", "targets", "t2")?;

                assert_eq!(tx.smembers("shard", "a", "targets")?, vec!["t1".to_string(), "t2".to_string()]);
                assert_eq!(tx.smembers("target", "t2", "shards")?, vec!["a".to_string()]);

                tx.srem("shard", "b", "targets", "t1")?;
                assert_eq!(tx.smembers("target", "t1", "shards")?, vec!["a".to_string()]);

                tx.delete("shard", "a")?;
                assert!(tx.smembers("target", "t1", "shards")?.is_empty());
                assert!(tx.smembers("target", "t2", "shards")?.is_empty());
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn one_to_one_self_relation_steals_partner() {
        let store = store();
        store
            .transact(|tx| {
                for id in ["a", "b", "c"] {
                    tx.create("shard", id)?;
                }
                tx.hset("shard", "a", "partner", "b")?;
                assert_eq!(tx.hget_str("shard", "b", "partner")?, Some("a".into()));

                tx.hset("shard", "c", "partner", "b")?;
                assert_eq!(tx.hget_str("shard", "b", "partner")?, Some("c".into()));
                assert_eq!(tx.hget_str("shard", "a", "partner")?, None);

                tx.hdel("shard", "c", "partner")?;
                assert_eq!(tx.hget_str("shard", "b", "partner")?, None);
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn symmetric_many_self_relation() {
        let store = store();
        store
            .transact(|tx| {
                tx.create("shard", "a")?;
                tx.create("shard", "b")?;
                tx.sadd("shard", "a", "peers", "b")?;
                assert!(tx.sismember("shard", "b", "peers", "a")?);
                tx.delete("shard", "b")?;
                assert!(tx.smembers("shard", "a", "peers")?.is_empty());
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn reads_see_pending_writes_and_commit_persists() {
        let store = store();
        store
            .transact(|tx| {
                tx.create("target", "t")?;
                tx.zadd("target", "t", "queue", "s", 4.0)?;
                assert_eq!(tx.zcard("target", "t", "queue")?, 1);
                tx.zrem("target", "t", "queue", "s")?;
                assert_eq!(tx.zcard("target", "t", "queue")?, 0);
                tx.zadd("target", "t", "queue", "s", 5.0)
            })
            .unwrap();
        let queue = store
            .transact(|tx| tx.zrange("target", "t", "queue"))
            .unwrap();
        assert_eq!(queue, vec![("s".to_string(), 5.0)]);
    }

    #[test]
    fn rocks_backend_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let open = || {
            let schema = Schema::new(ENTITIES)
                .unwrap()
                .relate(("stream", "target"), ("target", "streams"))
                .unwrap()
                .relate(("target", "shards"), ("shard", "targets"))
                .unwrap();
            EntityStore::new(crate::RocksKv::open(dir.path()).unwrap(), schema)
        };
        {
            let store = open();
            store
                .transact(|tx| {
                    tx.create("target", "t")?;
                    tx.create("stream", "s")?;
                    tx.hset("stream", "s", "target", "t")?;
                    tx.zadd("target", "t", "queue", "s", 7.0)
                })
                .unwrap();
        }
        let store = open();
        store
            .transact(|tx| {
                assert_eq!(tx.smembers("target", "t", "streams")?, vec!["s".to_string()]);
                assert_eq!(tx.zpopmax("target", "t", "queue")?, Some(("s".to_string(), 7.0)));
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }
}
