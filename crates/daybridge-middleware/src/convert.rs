//! Document ⇄ host value conversion.
//!
//! Both directions are pure and recursive. The inbound direction
//! ([`to_host_value`]) is total; the outbound direction ([`to_document`])
//! rejects host types that have no wire counterpart.
//!
//! # Numeric width
//!
//! Fixed width is **not** preserved across the boundary. `int32`, `int64` and
//! `double` all surface as [`HostValue::Number`]. On the way back a number is
//! encoded as:
//!
//! 1. `int32` when it is integral and fits in `i32`,
//! 2. otherwise `int64` when it is integral and fits in `i64`,
//! 3. otherwise `double`.
//!
//! So `Double(3.0)` comes back as `Int32(3)`, and `Int64` values beyond
//! 2^53 lose precision on the host side.

use bytes::Bytes;
use daybridge_types::{ConversionError, Document, HostObject, HostValue, Tagged};

use crate::codec;

/// 2^63 as `f64`: the first value past `i64::MAX`.
const I64_UPPER_BOUND: f64 = 9_223_372_036_854_775_808.0;

// ────────────────────────────────────────────────────────────────────────────
// Wire → host
// ────────────────────────────────────────────────────────────────────────────

/// Convert a document into a host object, preserving field order.
pub fn to_host_value(doc: &Document) -> HostValue {
    HostValue::Object(
        doc.iter()
            .map(|(key, value)| (key.to_string(), tagged_to_host(value)))
            .collect(),
    )
}

/// Convert a single tagged value.
pub fn tagged_to_host(value: &Tagged) -> HostValue {
    match value {
        Tagged::Double(v) => HostValue::Number(*v),
        Tagged::Int32(v) => HostValue::Number(f64::from(*v)),
        Tagged::Int64(v) => HostValue::Number(*v as f64),
        Tagged::Bool(v) => HostValue::Bool(*v),
        Tagged::Utf8(s) => HostValue::String(s.clone()),
        Tagged::Binary(data) => HostValue::Buffer(data.clone()),
        Tagged::Array(items) => HostValue::Array(items.iter().map(tagged_to_host).collect()),
        Tagged::Document(doc) => to_host_value(doc),
    }
}

/// Decode a wire payload straight into a host value.
pub fn decode_to_host(payload: &[u8]) -> Result<HostValue, ConversionError> {
    codec::decode(payload).map(|doc| to_host_value(&doc))
}

// ────────────────────────────────────────────────────────────────────────────
// Host → wire
// ────────────────────────────────────────────────────────────────────────────

/// Convert a host object into a document.
///
/// # Errors
///
/// * [`ConversionError::NotAnObject`] if `value` is not an object.
/// * [`ConversionError::UnsupportedHostType`] if any nested value is
///   `null` or `undefined`.
pub fn to_document(value: &HostValue) -> Result<Document, ConversionError> {
    match value {
        HostValue::Object(obj) => object_to_document(obj),
        other => Err(ConversionError::NotAnObject(other.type_name())),
    }
}

fn object_to_document(obj: &HostObject) -> Result<Document, ConversionError> {
    obj.iter()
        .map(|(key, value)| Ok((key.to_string(), to_tagged(value)?)))
        .collect()
}

/// Convert a single host value, following the string → bool → number →
/// object precedence.
pub fn to_tagged(value: &HostValue) -> Result<Tagged, ConversionError> {
    match value {
        HostValue::String(s) => Ok(Tagged::Utf8(s.clone())),
        HostValue::Bool(b) => Ok(Tagged::Bool(*b)),
        HostValue::Number(n) => Ok(number_to_tagged(*n)),
        HostValue::Object(obj) => Ok(Tagged::Document(object_to_document(obj)?)),
        HostValue::Array(items) => Ok(Tagged::Array(
            items.iter().map(to_tagged).collect::<Result<_, _>>()?,
        )),
        HostValue::Buffer(data) => Ok(Tagged::Binary(data.clone())),
        HostValue::Null | HostValue::Undefined => {
            Err(ConversionError::UnsupportedHostType(value.type_name()))
        }
    }
}

/// Pick the narrowest wire numeric for a host number.
pub fn number_to_tagged(n: f64) -> Tagged {
    if n.is_finite() && n.fract() == 0.0 {
        if n >= f64::from(i32::MIN) && n <= f64::from(i32::MAX) {
            return Tagged::Int32(n as i32);
        }
        if (-I64_UPPER_BOUND..I64_UPPER_BOUND).contains(&n) {
            return Tagged::Int64(n as i64);
        }
    }
    Tagged::Double(n)
}

/// Convert and serialise a host object in one step.
pub fn encode_from_host(value: &HostValue) -> Result<Bytes, ConversionError> {
    codec::encode(&to_document(value)?)
}
