//! Canonical CBOR through `ciborium`.
//!
//! Values are first lowered to a [`ciborium::Value`] tree, normalized, then
//! written. Normalization sorts every map by the encoded bytes of its keys
//! (shorter keys first, then bytewise) and rejects floats, so the output
//! only depends on the logical content of the value.

use crate::error::{CodecError, CodecResult};
use ciborium::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cmp::Ordering;

/// Encodes `value` to canonical CBOR bytes.
///
/// # Errors
///
/// Returns `FloatForbidden` if the value contains a float, or
/// `EncodingFailed` if serialization fails.
pub fn to_canonical_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let tree = Value::serialized(value).map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    let tree = canonicalize(tree)?;

    let mut out = Vec::new();
    ciborium::ser::into_writer(&tree, &mut out)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(out)
}

/// Decodes CBOR bytes into `T`.
///
/// # Errors
///
/// Returns `DecodingFailed` for malformed input or a shape mismatch, and
/// `FloatForbidden` if the input carries a float.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    let tree: Value = ciborium::de::from_reader(bytes)
        .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    reject_floats(&tree)?;
    tree.deserialized()
        .map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Normalizes a value tree: maps sorted by encoded key, floats rejected.
///
/// # Errors
///
/// Returns `FloatForbidden` if the tree contains a float.
pub fn canonicalize(value: Value) -> CodecResult<Value> {
    match value {
        Value::Float(_) => Err(CodecError::FloatForbidden),
        Value::Array(items) => Ok(Value::Array(
            items
                .into_iter()
                .map(canonicalize)
                .collect::<CodecResult<_>>()?,
        )),
        Value::Map(entries) => {
            let mut keyed = entries
                .into_iter()
                .map(|(k, v)| {
                    let k = canonicalize(k)?;
                    let v = canonicalize(v)?;
                    let mut encoded = Vec::new();
                    ciborium::ser::into_writer(&k, &mut encoded)
                        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
                    Ok((encoded, k, v))
                })
                .collect::<CodecResult<Vec<_>>>()?;
            keyed.sort_by(|a, b| key_order(&a.0, &b.0));
            Ok(Value::Map(keyed.into_iter().map(|(_, k, v)| (k, v)).collect()))
        }
        Value::Tag(tag, inner) => Ok(Value::Tag(tag, Box::new(canonicalize(*inner)?))),
        other => Ok(other),
    }
}

fn key_order(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn reject_floats(value: &Value) -> CodecResult<()> {
    match value {
        Value::Float(_) => Err(CodecError::FloatForbidden),
        Value::Array(items) => items.iter().try_for_each(reject_floats),
        Value::Map(entries) => entries.iter().try_for_each(|(k, v)| {
            reject_floats(k)?;
            reject_floats(v)
        }),
        Value::Tag(_, inner) => reject_floats(inner),
        _ => Ok(()),
    }
}
