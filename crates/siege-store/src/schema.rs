//! Static entity declarations and the relation registry.
//!
//! Entities are declared once per process as `static` data and handed to the
//! store through a [`Schema`]. Relations pair two reference fields so that
//! writing either side keeps the other in sync.

use std::collections::HashMap;

use crate::error::{Result, StoreError};

/// Semantic type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Signed integer hash field.
    Int,
    /// Float hash field.
    Float,
    /// Boolean hash field.
    Bool,
    /// String hash field.
    Str,
    /// Set of strings.
    Set,
    /// Set of strings ordered by an `f64` score.
    SortedSet,
    /// Reference to instances of `entity`; `many` selects a set of references
    /// over a single one.
    Ref {
        /// Referenced entity name.
        entity: &'static str,
        /// Whether the field holds many references.
        many: bool,
    },
}

impl FieldType {
    /// Whether the field is stored as a single hash value.
    #[must_use]
    pub const fn is_scalar(self) -> bool {
        matches!(
            self,
            Self::Int | Self::Float | Self::Bool | Self::Str | Self::Ref { many: false, .. }
        )
    }
}

/// Secondary index on a scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
    /// Not indexed.
    None,
    /// Injective: a value maps to at most one id.
    Unique,
    /// A value maps to a set of ids.
    Multi,
}

/// A field declaration.
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    /// Field name.
    pub name: &'static str,
    /// Field type.
    pub ty: FieldType,
    /// Secondary index.
    pub index: Index,
}

impl FieldDef {
    /// An unindexed field.
    #[must_use]
    pub const fn new(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            index: Index::None,
        }
    }

    /// Declare a unique lookup on this field.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.index = Index::Unique;
        self
    }

    /// Declare a multi-valued lookup on this field.
    #[must_use]
    pub const fn multi(mut self) -> Self {
        self.index = Index::Multi;
        self
    }
}

/// An entity declaration: a name prefix and its fields.
#[derive(Debug)]
pub struct EntityDef {
    /// Entity name, used as the key prefix.
    pub name: &'static str,
    /// Declared fields.
    pub fields: &'static [FieldDef],
}

/// One side of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct End {
    pub entity: &'static str,
    pub field: &'static str,
    pub many: bool,
}

/// The registry of entities and relations for one store.
#[derive(Debug)]
pub struct Schema {
    entities: HashMap<&'static str, &'static EntityDef>,
    inverse: HashMap<(&'static str, &'static str), End>,
}

impl Schema {
    /// Build a schema from entity declarations.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` on duplicate entity or field names, or on
    /// a reference to an undeclared entity.
    pub fn new(entities: &'static [EntityDef]) -> Result<Self> {
        let mut map = HashMap::new();
        for def in entities {
            if map.insert(def.name, def).is_some() {
                return Err(StoreError::Schema(format!("duplicate entity {}", def.name)));
            }
            let mut seen = std::collections::HashSet::new();
            for field in def.fields {
                if !seen.insert(field.name) {
                    return Err(StoreError::Schema(format!(
                        "duplicate field {}.{}",
                        def.name, field.name
                    )));
                }
                if field.index != Index::None && !field.ty.is_scalar() {
                    return Err(StoreError::Schema(format!(
                        "{}.{} cannot be indexed",
                        def.name, field.name
                    )));
                }
            }
        }
        for def in entities {
            for field in def.fields {
                if let FieldType::Ref { entity, .. } = field.ty {
                    if !map.contains_key(entity) {
                        return Err(StoreError::Schema(format!(
                            "{}.{} references unknown entity {entity}",
                            def.name, field.name
                        )));
                    }
                }
            }
        }
        Ok(Self {
            entities: map,
            inverse: HashMap::new(),
        })
    }

    /// Declare that `a` and `b` are the two sides of one relation.
    ///
    /// Both must be reference fields pointing at each other's entity. The
    /// cardinality follows from the fields: single/single is 1-1,
    /// single/many is 1-N, many/many is N-N. `a == b` declares a symmetric
    /// self-relation.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` if the fields do not form a valid pair.
    pub fn relate(
        mut self,
        a: (&'static str, &'static str),
        b: (&'static str, &'static str),
    ) -> Result<Self> {
        let end_a = self.ref_end(a.0, a.1)?;
        let end_b = self.ref_end(b.0, b.1)?;
        let (target_a, target_b) = (self.ref_target(a)?, self.ref_target(b)?);
        if target_a != b.0 || target_b != a.0 {
            return Err(StoreError::Schema(format!(
                "{}.{} and {}.{} do not reference each other",
                a.0, a.1, b.0, b.1
            )));
        }
        if self.inverse.contains_key(&a) || self.inverse.contains_key(&b) {
            return Err(StoreError::Schema(format!(
                "{}.{} or {}.{} is already related",
                a.0, a.1, b.0, b.1
            )));
        }
        self.inverse.insert(a, end_b);
        self.inverse.insert(b, end_a);
        Ok(self)
    }

    /// Look up an entity declaration.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` for an undeclared entity.
    pub fn entity(&self, name: &str) -> Result<&'static EntityDef> {
        self.entities
            .get(name)
            .copied()
            .ok_or_else(|| StoreError::Schema(format!("unknown entity {name}")))
    }

    /// Look up a field declaration.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Schema` for an undeclared entity or field.
    pub fn field(&self, entity: &str, field: &str) -> Result<&'static FieldDef> {
        self.entity(entity)?
            .fields
            .iter()
            .find(|f| f.name == field)
            .ok_or_else(|| StoreError::Schema(format!("unknown field {entity}.{field}")))
    }

    pub(crate) fn ref_end(&self, entity: &str, field: &str) -> Result<End> {
        let def = self.entity(entity)?;
        let fd = self.field(entity, field)?;
        match fd.ty {
            FieldType::Ref { many, .. } => Ok(End {
                entity: def.name,
                field: fd.name,
                many,
            }),
            _ => Err(StoreError::Schema(format!(
                "{entity}.{field} is not a reference"
            ))),
        }
    }

    fn ref_target(&self, (entity, field): (&str, &str)) -> Result<&'static str> {
        match self.field(entity, field)?.ty {
            FieldType::Ref { entity, .. } => Ok(entity),
            _ => Err(StoreError::Schema(format!(
                "{entity}.{field} is not a reference"
            ))),
        }
    }

    pub(crate) fn inverse_of(&self, end: End) -> Result<End> {
        self.inverse
            .get(&(end.entity, end.field))
            .copied()
            .ok_or_else(|| {
                StoreError::Schema(format!("{}.{} has no relation", end.entity, end.field))
            })
    }
}
