//! # Canonical JSON
//!
//! Every hash over a JSON payload is computed over the canonical form:
//! UTF-8, object keys sorted lexicographically at every nesting level, no
//! insignificant whitespace. Two validators that disagree on key order
//! would otherwise disagree on every payload hash — canonicalization is
//! what makes `payload_hash` a consensus-grade commitment rather than a
//! serializer implementation detail.

use serde_json::{Map, Value};

use super::hash::sha256;

/// Serialize a JSON value to its canonical byte form.
///
/// Objects are rewritten with keys in sorted order (recursively); arrays
/// keep their order — array order is semantically significant in
/// blueprint payloads. The output uses `serde_json`'s compact encoding,
/// which emits no whitespace.
pub fn canonical_json(value: &Value) -> Vec<u8> {
    let canonical = sort_keys(value);
    // Serialization of an already-valid Value cannot fail.
    serde_json::to_vec(&canonical).unwrap_or_default()
}

/// SHA-256 over the canonical byte form of a JSON payload.
pub fn payload_hash(value: &Value) -> [u8; 32] {
    sha256(&canonical_json(value))
}

/// Payload hash as the lowercase hex string carried on a transaction.
pub fn payload_hash_hex(value: &Value) -> String {
    hex::encode(payload_hash(value))
}

/// Rebuild a value with all object keys in sorted order.
///
/// Rebuilding makes the ordering explicit rather than relying on which
/// map backing `serde_json` was compiled with (`preserve_order` flips it
/// to insertion-ordered).
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}
