//! Thin facade re-exporting the engine's shared error taxonomy and
//! canonical-hashing helpers for consumers of the root binary; the real
//! implementations live in `metaflow-core`.

pub use metaflow_core::errors::{EngineError, ValidationDetail};
pub use metaflow_core::hashing::{hash_str, hash_value, to_canonical_json};
