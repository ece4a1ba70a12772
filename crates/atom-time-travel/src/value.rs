//! Host store values and the closed set of serialized tags captured in
//! snapshots.
//!
//! [`AtomValue`] models whatever the host store hands out, including
//! functions, symbols and shared references that may form cycles.
//! [`ValueSerializer`] turns it into a [`SerializedValue`], which is what
//! snapshots, diffs and restoration operate on. Serialization never fails:
//! cycles become [`SerializedValue::Circular`] and anything without a data
//! representation becomes [`SerializedValue::Unserializable`].

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A dynamic value owned by the host store
#[derive(Debug, Clone, Default)]
pub enum AtomValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Date(DateTime<Utc>),
    Array(Vec<AtomValue>),
    Object(BTreeMap<String, AtomValue>),
    Map(Vec<(AtomValue, AtomValue)>),
    Set(Vec<AtomValue>),
    Function(String),
    Symbol(String),
    /// Identity-bearing reference; may point back at an ancestor
    Shared(SharedValue),
}

/// Shared mutable reference to a value
#[derive(Clone, Default)]
pub struct SharedValue(Arc<RwLock<AtomValue>>);

impl SharedValue {
    pub fn new(value: AtomValue) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    pub fn get(&self) -> AtomValue {
        self.0.read().clone()
    }

    pub fn set(&self, value: AtomValue) {
        *self.0.write() = value;
    }

    pub fn ptr_eq(&self, other: &SharedValue) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedValue({:#x})", self.addr())
    }
}

/// Coarse type of a value, used to classify changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Undefined,
    Null,
    Bool,
    Number,
    String,
    Date,
    Array,
    Object,
    Map,
    Set,
    Function,
    Symbol,
}

impl AtomValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, AtomValue::Undefined)
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            AtomValue::Undefined => ValueKind::Undefined,
            AtomValue::Null => ValueKind::Null,
            AtomValue::Bool(_) => ValueKind::Bool,
            AtomValue::Number(_) => ValueKind::Number,
            AtomValue::String(_) => ValueKind::String,
            AtomValue::Date(_) => ValueKind::Date,
            AtomValue::Array(_) => ValueKind::Array,
            AtomValue::Object(_) => ValueKind::Object,
            AtomValue::Map(_) => ValueKind::Map,
            AtomValue::Set(_) => ValueKind::Set,
            AtomValue::Function(_) => ValueKind::Function,
            AtomValue::Symbol(_) => ValueKind::Symbol,
            AtomValue::Shared(shared) => shared.0.read_recursive().kind(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AtomValue::Number(n) => Some(*n),
            AtomValue::Shared(shared) => shared.0.read_recursive().as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AtomValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn object(entries: impl IntoIterator<Item = (impl Into<String>, AtomValue)>) -> Self {
        AtomValue::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Serialize with default limits
    pub fn serialize(&self) -> SerializedValue {
        ValueSerializer::default().serialize(self)
    }
}

impl From<f64> for AtomValue {
    fn from(value: f64) -> Self {
        AtomValue::Number(value)
    }
}

impl From<i64> for AtomValue {
    fn from(value: i64) -> Self {
        AtomValue::Number(value as f64)
    }
}

impl From<i32> for AtomValue {
    fn from(value: i32) -> Self {
        AtomValue::Number(f64::from(value))
    }
}

impl From<bool> for AtomValue {
    fn from(value: bool) -> Self {
        AtomValue::Bool(value)
    }
}

impl From<&str> for AtomValue {
    fn from(value: &str) -> Self {
        AtomValue::String(value.to_string())
    }
}

impl From<String> for AtomValue {
    fn from(value: String) -> Self {
        AtomValue::String(value)
    }
}

impl From<serde_json::Value> for AtomValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => AtomValue::Null,
            Value::Bool(b) => AtomValue::Bool(b),
            Value::Number(n) => AtomValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => AtomValue::String(s),
            Value::Array(items) => AtomValue::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                AtomValue::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// What kind of value a placeholder stands in for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpaqueKind {
    Function,
    Symbol,
    DepthLimit,
}

/// Serialized, immutable form of a value as stored in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SerializedValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Date(DateTime<Utc>),
    Array(Vec<SerializedValue>),
    Object(BTreeMap<String, SerializedValue>),
    Map(Vec<(SerializedValue, SerializedValue)>),
    Set(Vec<SerializedValue>),
    /// Reference back to an ancestor at `path`
    Circular { path: String },
    Unserializable { kind: OpaqueKind, description: String },
}

impl SerializedValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, SerializedValue::Undefined)
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(
            self,
            SerializedValue::Circular { .. } | SerializedValue::Unserializable { .. }
        )
    }

    /// True if this value or any nested value is a placeholder
    pub fn contains_placeholder(&self) -> bool {
        match self {
            SerializedValue::Circular { .. } | SerializedValue::Unserializable { .. } => true,
            SerializedValue::Array(items) | SerializedValue::Set(items) => {
                items.iter().any(SerializedValue::contains_placeholder)
            }
            SerializedValue::Object(map) => map.values().any(SerializedValue::contains_placeholder),
            SerializedValue::Map(entries) => entries
                .iter()
                .any(|(k, v)| k.contains_placeholder() || v.contains_placeholder()),
            _ => false,
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            SerializedValue::Undefined => ValueKind::Undefined,
            SerializedValue::Null => ValueKind::Null,
            SerializedValue::Bool(_) => ValueKind::Bool,
            SerializedValue::Number(_) => ValueKind::Number,
            SerializedValue::String(_) => ValueKind::String,
            SerializedValue::Date(_) => ValueKind::Date,
            SerializedValue::Array(_) => ValueKind::Array,
            SerializedValue::Object(_) | SerializedValue::Circular { .. } => ValueKind::Object,
            SerializedValue::Map(_) => ValueKind::Map,
            SerializedValue::Set(_) => ValueKind::Set,
            SerializedValue::Unserializable { kind, .. } => match kind {
                OpaqueKind::Symbol => ValueKind::Symbol,
                OpaqueKind::Function | OpaqueKind::DepthLimit => ValueKind::Function,
            },
        }
    }

    /// Rebuild a store value. Returns `None` if any part is a placeholder.
    ///
    /// Shared references come back as plain values; identity is not preserved.
    pub fn to_atom_value(&self) -> Option<AtomValue> {
        Some(match self {
            SerializedValue::Undefined => AtomValue::Undefined,
            SerializedValue::Null => AtomValue::Null,
            SerializedValue::Bool(b) => AtomValue::Bool(*b),
            SerializedValue::Number(n) => AtomValue::Number(*n),
            SerializedValue::String(s) => AtomValue::String(s.clone()),
            SerializedValue::Date(d) => AtomValue::Date(*d),
            SerializedValue::Array(items) => AtomValue::Array(
                items
                    .iter()
                    .map(SerializedValue::to_atom_value)
                    .collect::<Option<_>>()?,
            ),
            SerializedValue::Set(items) => AtomValue::Set(
                items
                    .iter()
                    .map(SerializedValue::to_atom_value)
                    .collect::<Option<_>>()?,
            ),
            SerializedValue::Object(map) => AtomValue::Object(
                map.iter()
                    .map(|(k, v)| v.to_atom_value().map(|v| (k.clone(), v)))
                    .collect::<Option<_>>()?,
            ),
            SerializedValue::Map(entries) => AtomValue::Map(
                entries
                    .iter()
                    .map(|(k, v)| Some((k.to_atom_value()?, v.to_atom_value()?)))
                    .collect::<Option<_>>()?,
            ),
            SerializedValue::Circular { .. } | SerializedValue::Unserializable { .. } => {
                return None;
            }
        })
    }

    /// Rough in-memory footprint in bytes
    pub fn approximate_size(&self) -> usize {
        let base = std::mem::size_of::<SerializedValue>();
        base + match self {
            SerializedValue::String(s) => s.len(),
            SerializedValue::Array(items) | SerializedValue::Set(items) => {
                items.iter().map(SerializedValue::approximate_size).sum()
            }
            SerializedValue::Object(map) => map
                .iter()
                .map(|(k, v)| k.len() + v.approximate_size())
                .sum(),
            SerializedValue::Map(entries) => entries
                .iter()
                .map(|(k, v)| k.approximate_size() + v.approximate_size())
                .sum(),
            SerializedValue::Circular { path } => path.len(),
            SerializedValue::Unserializable { description, .. } => description.len(),
            _ => 0,
        }
    }
}

/// Converts [`AtomValue`] graphs into [`SerializedValue`] trees
#[derive(Debug, Clone)]
pub struct ValueSerializer {
    max_depth: usize,
}

impl Default for ValueSerializer {
    fn default() -> Self {
        Self { max_depth: 64 }
    }
}

impl ValueSerializer {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn serialize(&self, value: &AtomValue) -> SerializedValue {
        let mut ancestors = Vec::new();
        self.walk(value, "$", 0, &mut ancestors)
    }

    fn walk(
        &self,
        value: &AtomValue,
        path: &str,
        depth: usize,
        ancestors: &mut Vec<(usize, String)>,
    ) -> SerializedValue {
        if depth > self.max_depth {
            return SerializedValue::Unserializable {
                kind: OpaqueKind::DepthLimit,
                description: format!("nesting deeper than {} at {}", self.max_depth, path),
            };
        }

        match value {
            AtomValue::Undefined => SerializedValue::Undefined,
            AtomValue::Null => SerializedValue::Null,
            AtomValue::Bool(b) => SerializedValue::Bool(*b),
            AtomValue::Number(n) => SerializedValue::Number(*n),
            AtomValue::String(s) => SerializedValue::String(s.clone()),
            AtomValue::Date(d) => SerializedValue::Date(*d),
            AtomValue::Function(name) => {
                let name = if name.is_empty() { "anonymous" } else { name };
                SerializedValue::Unserializable {
                    kind: OpaqueKind::Function,
                    description: format!("[Function: {name}]"),
                }
            }
            AtomValue::Symbol(description) => SerializedValue::Unserializable {
                kind: OpaqueKind::Symbol,
                description: format!("Symbol({description})"),
            },
            AtomValue::Array(items) => SerializedValue::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        self.walk(item, &format!("{path}[{i}]"), depth + 1, ancestors)
                    })
                    .collect(),
            ),
            AtomValue::Set(items) => SerializedValue::Set(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        self.walk(item, &format!("{path}{{{i}}}"), depth + 1, ancestors)
                    })
                    .collect(),
            ),
            AtomValue::Object(map) => SerializedValue::Object(
                map.iter()
                    .map(|(key, item)| {
                        let child = self.walk(item, &format!("{path}.{key}"), depth + 1, ancestors);
                        (key.clone(), child)
                    })
                    .collect(),
            ),
            AtomValue::Map(entries) => SerializedValue::Map(
                entries
                    .iter()
                    .enumerate()
                    .map(|(i, (k, v))| {
                        let key = self.walk(k, &format!("{path}<key {i}>"), depth + 1, ancestors);
                        let val = self.walk(v, &format!("{path}<{i}>"), depth + 1, ancestors);
                        (key, val)
                    })
                    .collect(),
            ),
            AtomValue::Shared(shared) => {
                let addr = shared.addr();
                if let Some((_, ancestor_path)) = ancestors.iter().find(|(a, _)| *a == addr) {
                    return SerializedValue::Circular {
                        path: ancestor_path.clone(),
                    };
                }
                ancestors.push((addr, path.to_string()));
                let inner = shared.0.read_recursive();
                let result = self.walk(&inner, path, depth, ancestors);
                drop(inner);
                ancestors.pop();
                result
            }
        }
    }
}
