//! `daybridge-types` – shared value models and error types.
//!
//! - [`value`] – wire-side [`Tagged`] / [`Document`] and host-side
//!   [`HostValue`] / [`HostObject`] trees.
//! - [`BridgeError`] / [`ConversionError`] – the error taxonomy used by every
//!   other crate in the workspace.

pub mod value;

pub use value::{Document, HostObject, HostValue, OrderedMap, Tagged};

use thiserror::Error;

/// Failure to move a single document across the wire/host boundary.
///
/// A conversion error aborts the whole document; no partial document or
/// partially converted host value is ever produced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("unsupported wire tag 0x{tag:02x} on field '{key}'")]
    UnsupportedTag { tag: u8, key: String },

    #[error("unsupported host value type '{0}'")]
    UnsupportedHostType(&'static str),

    #[error("expected a host object at the top level, got '{0}'")]
    NotAnObject(&'static str),

    #[error("document truncated: needed {needed} byte(s), {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("length mismatch: declared {declared} byte(s), available {available}")]
    LengthMismatch { declared: i64, available: usize },

    #[error("document is missing its terminating NUL")]
    MissingTerminator,

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(String),

    #[error("invalid bool byte 0x{0:02x}")]
    InvalidBool(u8),

    #[error("key {0:?} contains a NUL byte")]
    KeyContainsNul(String),

    #[error("document nesting exceeds {0} levels")]
    TooDeep(usize),

    #[error("array element {expected} carries key '{found}'")]
    InvalidArrayIndex { expected: usize, found: String },
}

/// Top-level error type for every bridge operation.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Wrong arity or argument type at the host boundary.
    #[error("Argument Error: {0}")]
    Argument(String),

    /// The underlying pub/sub engine reported a failure.
    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Conversion Error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Node is not running")]
    NotRunning,

    #[error("Relay is closed")]
    RelayClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_error_display() {
        let err = BridgeError::Argument("Wrong number of arguments".to_string());
        assert!(err.to_string().contains("Wrong number of arguments"));

        let err: BridgeError = ConversionError::UnsupportedTag {
            tag: 0x07,
            key: "oid".to_string(),
        }
        .into();
        assert!(err.to_string().contains("0x07"));
        assert!(err.to_string().contains("oid"));
    }
}
