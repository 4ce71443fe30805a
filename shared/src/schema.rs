//! Declared synchronized fields and snapshot projection
//!
//! Every entity type publishes a `'static` [`Schema`] naming the fields that
//! cross the network. Tables chain to a parent table, so a subtype sees its own
//! fields plus everything its parent declared. Only fields present in the
//! effective table are ever read into, or written from, a snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Primitive kinds a synchronized field may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Float,
    Int,
    Str,
    Bool,
}

/// A single synchronized value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Float(f32),
    Int(i64),
    Str(String),
    Bool(bool),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Float(_) => FieldKind::Float,
            FieldValue::Int(_) => FieldKind::Int,
            FieldValue::Str(_) => FieldKind::Str,
            FieldValue::Bool(_) => FieldKind::Bool,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Int(v) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<f32> for FieldValue {
    fn from(value: f32) -> Self {
        FieldValue::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

/// Field name to value, ordered so snapshots serialize deterministically
pub type FieldMap = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldDecl {
    pub const fn float(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Float,
        }
    }

    pub const fn int(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Int,
        }
    }

    pub const fn string(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Str,
        }
    }

    pub const fn boolean(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Bool,
        }
    }
}

/// Per-type table of declared synchronized fields
///
/// Tables are built in `const` context so each entity type can expose a
/// `static` table:
///
/// ```
/// use arcade_shared::schema::{FieldDecl, Schema};
///
/// static POSITIONED: Schema = Schema::new("Positioned", &[FieldDecl::float("x"), FieldDecl::float("y")]);
/// static FOOD: Schema = Schema::new("Food", &[FieldDecl::int("value")]).extends(&POSITIONED);
///
/// assert!(FOOD.declares("x"));
/// assert_eq!(FOOD.len(), 3);
/// ```
#[derive(Debug)]
pub struct Schema {
    pub name: &'static str,
    own: &'static [FieldDecl],
    parent: Option<&'static Schema>,
}

impl Schema {
    pub const fn new(name: &'static str, own: &'static [FieldDecl]) -> Self {
        Self {
            name,
            own,
            parent: None,
        }
    }

    pub const fn extends(self, parent: &'static Schema) -> Self {
        Self {
            name: self.name,
            own: self.own,
            parent: Some(parent),
        }
    }

    pub fn parent(&self) -> Option<&'static Schema> {
        self.parent
    }

    /// Looks a field up, own declarations shadowing inherited ones
    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.own
            .iter()
            .find(|decl| decl.name == name)
            .or_else(|| self.parent.and_then(|parent| parent.field(name)))
    }

    pub fn declares(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Effective table, parent fields first
    pub fn fields(&self) -> Vec<FieldDecl> {
        let mut fields = match self.parent {
            Some(parent) => parent.fields(),
            None => Vec::new(),
        };

        for decl in self.own {
            match fields.iter_mut().find(|existing| existing.name == decl.name) {
                Some(existing) => *existing = *decl,
                None => fields.push(*decl),
            }
        }

        fields
    }

    pub fn len(&self) -> usize {
        self.fields().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read/write access to an object's declared fields by name
pub trait Synced {
    fn schema(&self) -> &'static Schema;

    /// Current value of a declared field
    fn read_field(&self, name: &str) -> Option<FieldValue>;

    /// Stores a value; returns false when the field is unknown to the implementor
    fn write_field(&mut self, name: &str, value: FieldValue) -> bool;
}

/// Projects exactly the declared fields of `source`
pub fn project_fields<S: Synced + ?Sized>(source: &S) -> FieldMap {
    source
        .schema()
        .fields()
        .into_iter()
        .filter_map(|decl| {
            source
                .read_field(decl.name)
                .map(|value| (decl.name.to_string(), value))
        })
        .collect()
}

/// Writes every declared field present in `values` whose kind matches the
/// declaration; everything else is left untouched. Returns the number written.
pub fn apply_fields<S: Synced + ?Sized>(target: &mut S, values: &FieldMap) -> usize {
    let schema = target.schema();
    let mut written = 0;

    for (name, value) in values {
        let Some(decl) = schema.field(name) else {
            continue;
        };
        if decl.kind != value.kind() {
            continue;
        }
        if target.write_field(name, value.clone()) {
            written += 1;
        }
    }

    written
}

/// Identity plus declared fields of one entity, as sent over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: u32,
    pub schema: String,
    pub is_bot: bool,
    pub fields: FieldMap,
}

impl EntitySnapshot {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn float(&self, name: &str) -> Option<f32> {
        self.fields.get(name).and_then(FieldValue::as_f32)
    }
}
