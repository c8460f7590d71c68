//! Canonical JSON + hashing, used by the webhook payload idempotency-key
//! determinism test (§8: "buildWebhookPayload is idempotent given fixed
//! inputs except timestamp/idempotency_key") and by the diff helper that
//! computes webhook `changes`.

pub mod canonical_json;
pub mod hash;

pub use canonical_json::to_canonical_json;
pub use hash::{hash_str, hash_value};
