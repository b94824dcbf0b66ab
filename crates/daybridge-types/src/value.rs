//! Value trees on both sides of the bridge.
//!
//! * [`Tagged`] / [`Document`] – the wire-side model: every field carries an
//!   explicit type tag and fixed-width numerics survive as distinct variants.
//! * [`HostValue`] / [`HostObject`] – the host-side dynamic model: numbers
//!   collapse to a single `f64`, byte blobs become buffers.
//!
//! Both object kinds are [`OrderedMap`]s so that field order survives a
//! round-trip across the boundary.

use std::collections::HashMap;
use std::fmt;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

// ────────────────────────────────────────────────────────────────────────────
// Ordered map
// ────────────────────────────────────────────────────────────────────────────

/// String-keyed map that iterates in insertion order.
///
/// Keys are unique: inserting an existing key replaces the value in place and
/// keeps the original position. Lookups go through a hash index, so building
/// a map of `n` fields is linear in `n`.
#[derive(Clone)]
pub struct OrderedMap<V> {
    entries: Vec<(String, V)>,
    index: HashMap<String, usize>,
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<V> OrderedMap<V> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    /// Insert `value` under `key`, returning the previous value if the key
    /// was already present.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<V>) -> Option<V> {
        let key = key.into();
        let value = value.into();
        match self.index.get(&key) {
            Some(&idx) => Some(std::mem::replace(&mut self.entries[idx].1, value)),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<V>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.index.get(key).map(|&idx| &self.entries[idx].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Remove `key`, shifting later entries down to keep their order.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let idx = self.index.remove(key)?;
        let (_, value) = self.entries.remove(idx);
        for (k, _) in &self.entries[idx..] {
            if let Some(slot) = self.index.get_mut(k) {
                *slot -= 1;
            }
        }
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

/// Equal when both hold the same pairs in the same order.
impl<V: PartialEq> PartialEq for OrderedMap<V> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<V: fmt::Debug> fmt::Debug for OrderedMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<V> FromIterator<(String, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut map = Self::with_capacity(iter.size_hint().0);
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<V> IntoIterator for OrderedMap<V> {
    type Item = (String, V);
    type IntoIter = std::vec::IntoIter<(String, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wire side
// ────────────────────────────────────────────────────────────────────────────

/// A wire-level document: the message unit carried by the transport.
pub type Document = OrderedMap<Tagged>;

/// A single tagged wire value.
#[derive(Debug, Clone, PartialEq)]
pub enum Tagged {
    Double(f64),
    Int32(i32),
    Int64(i64),
    Bool(bool),
    /// UTF-8 text; embedded NUL bytes are legal.
    Utf8(String),
    Binary(Vec<u8>),
    Array(Vec<Tagged>),
    Document(Document),
}

impl Tagged {
    /// Short name of the variant, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Tagged::Double(_) => "double",
            Tagged::Int32(_) => "int32",
            Tagged::Int64(_) => "int64",
            Tagged::Bool(_) => "bool",
            Tagged::Utf8(_) => "utf8",
            Tagged::Binary(_) => "binary",
            Tagged::Array(_) => "array",
            Tagged::Document(_) => "document",
        }
    }
}

impl From<f64> for Tagged {
    fn from(v: f64) -> Self {
        Tagged::Double(v)
    }
}

impl From<i32> for Tagged {
    fn from(v: i32) -> Self {
        Tagged::Int32(v)
    }
}

impl From<i64> for Tagged {
    fn from(v: i64) -> Self {
        Tagged::Int64(v)
    }
}

impl From<bool> for Tagged {
    fn from(v: bool) -> Self {
        Tagged::Bool(v)
    }
}

impl From<&str> for Tagged {
    fn from(v: &str) -> Self {
        Tagged::Utf8(v.to_string())
    }
}

impl From<String> for Tagged {
    fn from(v: String) -> Self {
        Tagged::Utf8(v)
    }
}

impl From<Vec<u8>> for Tagged {
    fn from(v: Vec<u8>) -> Self {
        Tagged::Binary(v)
    }
}

impl From<Vec<Tagged>> for Tagged {
    fn from(v: Vec<Tagged>) -> Self {
        Tagged::Array(v)
    }
}

impl From<Document> for Tagged {
    fn from(v: Document) -> Self {
        Tagged::Document(v)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Host side
// ────────────────────────────────────────────────────────────────────────────

/// A host-side object: ordered string keys to [`HostValue`]s.
pub type HostObject = OrderedMap<HostValue>;

/// The host environment's dynamic value model.
///
/// Numbers are always `f64`: the int32 / int64 / double distinction of the
/// wire format is not preserved on this side of the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Buffer(Vec<u8>),
    Array(Vec<HostValue>),
    Object(HostObject),
}

impl HostValue {
    /// Short name of the dynamic type, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Undefined => "undefined",
            HostValue::Null => "null",
            HostValue::Bool(_) => "boolean",
            HostValue::Number(_) => "number",
            HostValue::String(_) => "string",
            HostValue::Buffer(_) => "buffer",
            HostValue::Array(_) => "array",
            HostValue::Object(_) => "object",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            HostValue::Object(o) => Some(o),
            _ => None,
        }
    }
}

impl From<f64> for HostValue {
    fn from(v: f64) -> Self {
        HostValue::Number(v)
    }
}

impl From<bool> for HostValue {
    fn from(v: bool) -> Self {
        HostValue::Bool(v)
    }
}

impl From<&str> for HostValue {
    fn from(v: &str) -> Self {
        HostValue::String(v.to_string())
    }
}

impl From<String> for HostValue {
    fn from(v: String) -> Self {
        HostValue::String(v)
    }
}

impl From<Vec<HostValue>> for HostValue {
    fn from(v: Vec<HostValue>) -> Self {
        HostValue::Array(v)
    }
}

impl From<HostObject> for HostValue {
    fn from(v: HostObject) -> Self {
        HostValue::Object(v)
    }
}

/// JSON objects arrive in whatever order `serde_json::Map` iterates.
impl From<serde_json::Value> for HostValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => HostValue::Null,
            Value::Bool(b) => HostValue::Bool(b),
            Value::Number(n) => HostValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => HostValue::String(s),
            Value::Array(items) => HostValue::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => HostValue::Object(
                map.into_iter().map(|(k, v)| (k, HostValue::from(v))).collect(),
            ),
        }
    }
}

/// Largest magnitude at which every integer is exactly representable in `f64`.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

impl Serialize for HostValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            HostValue::Undefined | HostValue::Null => serializer.serialize_unit(),
            HostValue::Bool(b) => serializer.serialize_bool(*b),
            HostValue::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => {
                serializer.serialize_i64(*n as i64)
            }
            HostValue::Number(n) => serializer.serialize_f64(*n),
            HostValue::String(s) => serializer.serialize_str(s),
            HostValue::Buffer(bytes) => {
                let mut seq = serializer.serialize_seq(Some(bytes.len()))?;
                for b in bytes {
                    seq.serialize_element(b)?;
                }
                seq.end()
            }
            HostValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            HostValue::Object(obj) => obj.serialize(serializer),
        }
    }
}
