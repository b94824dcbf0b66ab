//! Binary wire codec for [`Document`]s.
//!
//! The layout is the length-prefixed little-endian BSON subset understood by
//! the pub/sub engine:
//!
//! ```text
//! document := i32 total_len, element*, 0x00
//! element  := u8 tag, cstring key, value
//! ```
//!
//! | Tag | Value |
//! |---|---|
//! | `0x01` | double (`f64` LE) |
//! | `0x02` | UTF-8 string (`i32` length incl. NUL, bytes, `0x00`) |
//! | `0x03` | nested document |
//! | `0x04` | array (document keyed `"0"`, `"1"`, …) |
//! | `0x05` | binary (`i32` length, `u8` subtype, bytes) |
//! | `0x08` | bool (`0x00` / `0x01`) |
//! | `0x10` | int32 |
//! | `0x12` | int64 |
//!
//! Any other tag fails the decode with [`ConversionError::UnsupportedTag`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use daybridge_types::{ConversionError, Document, Tagged};

pub const TAG_DOUBLE: u8 = 0x01;
pub const TAG_UTF8: u8 = 0x02;
pub const TAG_DOCUMENT: u8 = 0x03;
pub const TAG_ARRAY: u8 = 0x04;
pub const TAG_BINARY: u8 = 0x05;
pub const TAG_BOOL: u8 = 0x08;
pub const TAG_INT32: u8 = 0x10;
pub const TAG_INT64: u8 = 0x12;

/// Binary subtype written for [`Tagged::Binary`] (generic).
const BINARY_SUBTYPE_GENERIC: u8 = 0x00;

/// Maximum nesting of documents/arrays accepted by [`decode`].
pub const MAX_NESTING_DEPTH: usize = 100;

// ────────────────────────────────────────────────────────────────────────────
// Encoding
// ────────────────────────────────────────────────────────────────────────────

/// Serialise `doc` into its wire representation.
///
/// # Errors
///
/// Returns [`ConversionError::KeyContainsNul`] when a key cannot be written
/// as a C string.
pub fn encode(doc: &Document) -> Result<Bytes, ConversionError> {
    let mut out = BytesMut::new();
    write_document(&mut out, doc.iter())?;
    Ok(out.freeze())
}

fn write_document<'a, K: AsRef<str>>(
    out: &mut BytesMut,
    fields: impl IntoIterator<Item = (K, &'a Tagged)>,
) -> Result<(), ConversionError> {
    let start = out.len();
    out.put_i32_le(0);
    for (key, value) in fields {
        write_element(out, key.as_ref(), value)?;
    }
    out.put_u8(0);
    let total = len_i32(out.len() - start)?;
    out[start..start + 4].copy_from_slice(&total.to_le_bytes());
    Ok(())
}

fn write_element(out: &mut BytesMut, key: &str, value: &Tagged) -> Result<(), ConversionError> {
    let tag = match value {
        Tagged::Double(_) => TAG_DOUBLE,
        Tagged::Utf8(_) => TAG_UTF8,
        Tagged::Document(_) => TAG_DOCUMENT,
        Tagged::Array(_) => TAG_ARRAY,
        Tagged::Binary(_) => TAG_BINARY,
        Tagged::Bool(_) => TAG_BOOL,
        Tagged::Int32(_) => TAG_INT32,
        Tagged::Int64(_) => TAG_INT64,
    };
    out.put_u8(tag);
    write_cstring(out, key)?;

    match value {
        Tagged::Double(v) => out.put_f64_le(*v),
        Tagged::Int32(v) => out.put_i32_le(*v),
        Tagged::Int64(v) => out.put_i64_le(*v),
        Tagged::Bool(v) => out.put_u8(u8::from(*v)),
        Tagged::Utf8(s) => {
            out.put_i32_le(len_i32(s.len() + 1)?);
            out.put_slice(s.as_bytes());
            out.put_u8(0);
        }
        Tagged::Binary(data) => {
            out.put_i32_le(len_i32(data.len())?);
            out.put_u8(BINARY_SUBTYPE_GENERIC);
            out.put_slice(data);
        }
        Tagged::Document(doc) => write_document(out, doc.iter())?,
        Tagged::Array(items) => write_document(
            out,
            items.iter().enumerate().map(|(i, v)| (i.to_string(), v)),
        )?,
    }
    Ok(())
}

fn write_cstring(out: &mut BytesMut, key: &str) -> Result<(), ConversionError> {
    if key.as_bytes().contains(&0) {
        return Err(ConversionError::KeyContainsNul(key.to_string()));
    }
    out.put_slice(key.as_bytes());
    out.put_u8(0);
    Ok(())
}

fn len_i32(len: usize) -> Result<i32, ConversionError> {
    i32::try_from(len).map_err(|_| ConversionError::LengthMismatch {
        declared: len as i64,
        available: i32::MAX as usize,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Decoding
// ────────────────────────────────────────────────────────────────────────────

/// Parse a wire document.
///
/// The buffer must contain exactly one document. Every field must carry a
/// supported tag; the first unsupported one aborts the whole decode.
pub fn decode(input: &[u8]) -> Result<Document, ConversionError> {
    let mut buf = input;
    let doc = read_document(&mut buf, 0)?;
    if buf.has_remaining() {
        return Err(ConversionError::LengthMismatch {
            declared: (input.len() - buf.remaining()) as i64,
            available: input.len(),
        });
    }
    Ok(doc)
}

fn read_document(buf: &mut &[u8], depth: usize) -> Result<Document, ConversionError> {
    let fields = read_fields(buf, depth)?;
    let mut doc = Document::with_capacity(fields.len());
    for (key, value) in fields {
        doc.insert(key, value);
    }
    Ok(doc)
}

/// Arrays are documents keyed `"0"`, `"1"`, … in order; anything else is
/// rejected so no element can be lost to a duplicate key.
fn read_array(buf: &mut &[u8], depth: usize) -> Result<Vec<Tagged>, ConversionError> {
    read_fields(buf, depth)?
        .into_iter()
        .enumerate()
        .map(|(expected, (key, value))| {
            if key == expected.to_string() {
                Ok(value)
            } else {
                Err(ConversionError::InvalidArrayIndex { expected, found: key })
            }
        })
        .collect()
}

fn read_fields(buf: &mut &[u8], depth: usize) -> Result<Vec<(String, Tagged)>, ConversionError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(ConversionError::TooDeep(MAX_NESTING_DEPTH));
    }
    let declared = i64::from(read_i32(buf)?);
    // Header (4) plus terminator (1) is the smallest legal document.
    if declared < 5 || (declared - 4) as usize > buf.remaining() {
        return Err(ConversionError::LengthMismatch {
            declared,
            available: buf.remaining() + 4,
        });
    }
    let data: &[u8] = *buf;
    let (body, rest) = data.split_at((declared - 4) as usize);
    *buf = rest;

    let Some((&0, mut elements)) = body.split_last() else {
        return Err(ConversionError::MissingTerminator);
    };

    let mut fields = Vec::new();
    while elements.has_remaining() {
        let tag = elements.get_u8();
        let key = read_cstring(&mut elements)?;
        let value = read_value(tag, &key, &mut elements, depth)?;
        fields.push((key, value));
    }
    Ok(fields)
}

fn read_value(
    tag: u8,
    key: &str,
    buf: &mut &[u8],
    depth: usize,
) -> Result<Tagged, ConversionError> {
    let value = match tag {
        TAG_DOUBLE => {
            need(buf, 8)?;
            Tagged::Double(buf.get_f64_le())
        }
        TAG_UTF8 => {
            let len = read_i32(buf)?;
            if len < 1 {
                return Err(ConversionError::LengthMismatch {
                    declared: i64::from(len),
                    available: buf.remaining(),
                });
            }
            let len = len as usize;
            need(buf, len)?;
            let data: &[u8] = *buf;
            let (raw, rest) = data.split_at(len);
            *buf = rest;
            let Some((&0, text)) = raw.split_last() else {
                return Err(ConversionError::MissingTerminator);
            };
            let text = std::str::from_utf8(text)
                .map_err(|_| ConversionError::InvalidUtf8(format!("value of '{key}'")))?;
            Tagged::Utf8(text.to_string())
        }
        TAG_DOCUMENT => Tagged::Document(read_document(buf, depth + 1)?),
        TAG_ARRAY => Tagged::Array(read_array(buf, depth + 1)?),
        TAG_BINARY => {
            let len = read_i32(buf)?;
            if len < 0 {
                return Err(ConversionError::LengthMismatch {
                    declared: i64::from(len),
                    available: buf.remaining(),
                });
            }
            let len = len as usize;
            need(buf, len + 1)?;
            let _subtype = buf.get_u8();
            let data = buf[..len].to_vec();
            buf.advance(len);
            Tagged::Binary(data)
        }
        TAG_BOOL => {
            need(buf, 1)?;
            match buf.get_u8() {
                0 => Tagged::Bool(false),
                1 => Tagged::Bool(true),
                other => return Err(ConversionError::InvalidBool(other)),
            }
        }
        TAG_INT32 => Tagged::Int32(read_i32(buf)?),
        TAG_INT64 => {
            need(buf, 8)?;
            Tagged::Int64(buf.get_i64_le())
        }
        other => {
            return Err(ConversionError::UnsupportedTag {
                tag: other,
                key: key.to_string(),
            });
        }
    };
    Ok(value)
}

fn read_cstring(buf: &mut &[u8]) -> Result<String, ConversionError> {
    let Some(end) = buf.iter().position(|&b| b == 0) else {
        return Err(ConversionError::MissingTerminator);
    };
    let key = std::str::from_utf8(&buf[..end])
        .map_err(|_| ConversionError::InvalidUtf8("field key".to_string()))?
        .to_string();
    buf.advance(end + 1);
    Ok(key)
}

fn read_i32(buf: &mut &[u8]) -> Result<i32, ConversionError> {
    need(buf, 4)?;
    Ok(buf.get_i32_le())
}

fn need(buf: &&[u8], needed: usize) -> Result<(), ConversionError> {
    if buf.remaining() < needed {
        return Err(ConversionError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        Document::new()
            .with("temp", 21.5)
            .with("unit", "C")
            .with("count", 7i32)
            .with("ts", 1_700_000_000_000i64)
            .with("ok", true)
            .with("blob", vec![0u8, 1, 2, 255])
            .with(
                "nested",
                Document::new().with("inner", Tagged::Array(vec![1i32.into(), "two".into()])),
            )
    }

    /// Wrap raw element bytes in a length header and terminator.
    fn frame(elements: &[u8]) -> Vec<u8> {
        let mut raw = ((elements.len() + 5) as i32).to_le_bytes().to_vec();
        raw.extend_from_slice(elements);
        raw.push(0);
        raw
    }

    #[test]
    fn encode_then_decode_preserves_document() {
        let doc = sample();
        let wire = encode(&doc).expect("encode");
        assert_eq!(decode(&wire).expect("decode"), doc);
    }

    #[test]
    fn empty_document_is_five_bytes() {
        let wire = encode(&Document::new()).unwrap();
        assert_eq!(&wire[..], &[5, 0, 0, 0, 0]);
    }

    #[test]
    fn known_layout_for_int32_field() {
        let wire = encode(&Document::new().with("x", 3i32)).unwrap();
        assert_eq!(
            &wire[..],
            &[12, 0, 0, 0, TAG_INT32, b'x', 0, 3, 0, 0, 0, 0]
        );
    }

    #[test]
    fn strings_keep_embedded_nul() {
        let doc = Document::new().with("s", "a\0b");
        let back = decode(&encode(&doc).unwrap()).unwrap();
        assert_eq!(back.get("s"), Some(&Tagged::Utf8("a\0b".to_string())));
    }

    #[test]
    fn unsupported_tag_fails_the_whole_document() {
        // { "ok": true, "oid": <tag 0x07> }
        let mut raw = vec![0u8; 4];
        raw.extend_from_slice(&[TAG_BOOL, b'o', b'k', 0, 1]);
        raw.extend_from_slice(&[0x07, b'o', b'i', b'd', 0]);
        raw.extend_from_slice(&[0u8; 12]);
        raw.push(0);
        let len = raw.len() as i32;
        raw[..4].copy_from_slice(&len.to_le_bytes());

        let err = decode(&raw).unwrap_err();
        assert_eq!(
            err,
            ConversionError::UnsupportedTag {
                tag: 0x07,
                key: "oid".to_string()
            }
        );
    }

    #[test]
    fn truncated_input_is_rejected() {
        let wire = encode(&sample()).unwrap();
        assert!(decode(&wire[..wire.len() - 3]).is_err());
        assert!(matches!(
            decode(&[1, 0]),
            Err(ConversionError::Truncated { needed: 4, .. })
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut wire = encode(&sample()).unwrap().to_vec();
        wire.push(0);
        assert!(matches!(
            decode(&wire),
            Err(ConversionError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn invalid_bool_byte_is_rejected() {
        let mut wire = encode(&Document::new().with("b", true)).unwrap().to_vec();
        // header(4) + tag(1) + "b\0"(2) → value byte at offset 7
        wire[7] = 2;
        assert_eq!(decode(&wire), Err(ConversionError::InvalidBool(2)));
    }

    #[test]
    fn nul_in_key_cannot_be_encoded() {
        let doc = Document::new().with("bad\0key", 1i32);
        assert!(matches!(
            encode(&doc),
            Err(ConversionError::KeyContainsNul(_))
        ));
    }

    #[test]
    fn excessive_nesting_is_rejected() {
        let mut doc = Document::new();
        for _ in 0..=MAX_NESTING_DEPTH + 1 {
            doc = Document::new().with("d", doc);
        }
        let wire = encode(&doc).unwrap();
        assert_eq!(
            decode(&wire),
            Err(ConversionError::TooDeep(MAX_NESTING_DEPTH))
        );
    }

    #[test]
    fn invalid_utf8_in_value_is_rejected() {
        let raw = frame(&[TAG_UTF8, b's', 0, 2, 0, 0, 0, 0xFF, 0]);
        assert_eq!(
            decode(&raw),
            Err(ConversionError::InvalidUtf8("value of 's'".to_string()))
        );
    }

    #[test]
    fn invalid_utf8_in_key_is_rejected() {
        let raw = frame(&[TAG_INT32, 0xFF, 0, 1, 0, 0, 0]);
        assert_eq!(
            decode(&raw),
            Err(ConversionError::InvalidUtf8("field key".to_string()))
        );
    }

    #[test]
    fn document_without_trailing_nul_is_rejected() {
        assert_eq!(
            decode(&[5, 0, 0, 0, 1]),
            Err(ConversionError::MissingTerminator)
        );
    }

    #[test]
    fn string_without_trailing_nul_is_rejected() {
        let raw = frame(&[TAG_UTF8, b's', 0, 2, 0, 0, 0, b'a', b'b']);
        assert_eq!(decode(&raw), Err(ConversionError::MissingTerminator));
    }

    #[test]
    fn key_without_nul_is_rejected() {
        assert_eq!(
            decode(&frame(&[TAG_INT32, b'k'])),
            Err(ConversionError::MissingTerminator)
        );
    }

    #[test]
    fn zero_string_length_is_rejected() {
        let raw = frame(&[TAG_UTF8, b's', 0, 0, 0, 0, 0]);
        assert!(matches!(
            decode(&raw),
            Err(ConversionError::LengthMismatch { declared: 0, .. })
        ));
    }

    #[test]
    fn negative_binary_length_is_rejected() {
        let raw = frame(&[TAG_BINARY, b'b', 0, 0xFF, 0xFF, 0xFF, 0xFF, 0]);
        assert!(matches!(
            decode(&raw),
            Err(ConversionError::LengthMismatch { declared: -1, .. })
        ));
    }

    #[test]
    fn duplicate_document_keys_keep_first_position_and_last_value() {
        let raw = frame(&[
            TAG_INT32, b'a', 0, 1, 0, 0, 0,
            TAG_BOOL, b'b', 0, 1,
            TAG_INT32, b'a', 0, 2, 0, 0, 0,
        ]);
        let doc = decode(&raw).unwrap();
        assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(doc.get("a"), Some(&Tagged::Int32(2)));
    }

    #[test]
    fn array_with_repeated_index_is_rejected() {
        let inner = frame(&[
            TAG_INT32, b'0', 0, 1, 0, 0, 0,
            TAG_INT32, b'0', 0, 2, 0, 0, 0,
        ]);
        let mut elements = vec![TAG_ARRAY, b'a', 0];
        elements.extend_from_slice(&inner);
        assert_eq!(
            decode(&frame(&elements)),
            Err(ConversionError::InvalidArrayIndex {
                expected: 1,
                found: "0".to_string()
            })
        );
    }

    #[test]
    fn array_with_non_numeric_key_is_rejected() {
        let inner = frame(&[TAG_INT32, b'x', 0, 1, 0, 0, 0]);
        let mut elements = vec![TAG_ARRAY, b'a', 0];
        elements.extend_from_slice(&inner);
        assert_eq!(
            decode(&frame(&elements)),
            Err(ConversionError::InvalidArrayIndex {
                expected: 0,
                found: "x".to_string()
            })
        );
    }

    #[test]
    fn wide_document_decodes_in_linear_time() {
        const FIELDS: i32 = 50_000;
        let doc: Document = (0..FIELDS).map(|i| (format!("k{i}"), Tagged::Int32(i))).collect();
        let wire = encode(&doc).unwrap();

        let started = std::time::Instant::now();
        let back = decode(&wire).unwrap();
        let elapsed = started.elapsed();

        assert_eq!(back.len(), FIELDS as usize);
        assert_eq!(back.get("k49999"), Some(&Tagged::Int32(49_999)));
        assert!(
            elapsed < std::time::Duration::from_secs(5),
            "decoding {FIELDS} fields took {elapsed:?}"
        );
    }
}
