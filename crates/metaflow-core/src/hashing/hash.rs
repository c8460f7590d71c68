//! BLAKE3-backed hash helpers over canonical JSON.

use crate::hashing::to_canonical_json;
use blake3::Hasher;
use serde_json::Value;

pub fn hash_str(input: &str) -> String {
    let mut h = Hasher::new();
    h.update(input.as_bytes());
    h.finalize().to_hex().to_string()
}

pub fn hash_value(v: &Value) -> String {
    let canonical = to_canonical_json(v);
    hash_str(&canonical)
}
