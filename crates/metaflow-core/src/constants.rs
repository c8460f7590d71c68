//! Engine-wide constants shared across the rule engine, state-machine
//! engine and write pipeline.

/// Logical engine version, reported alongside `INTERNAL_ERROR`
/// diagnostics.
pub const ENGINE_VERSION: &str = "1.0";

/// §4.6 step 8 / §4.7 `dispatch`: outbound HTTP timeout.
pub const WEBHOOK_TIMEOUT_SECS: u64 = 30;

/// §4.8: retry scheduler tick interval and per-tick row cap.
pub const RETRY_SCHEDULER_TICK_SECS: u64 = 30;
pub const RETRY_SCHEDULER_BATCH_SIZE: i64 = 50;

/// §4.10: timeout scheduler tick interval.
pub const TIMEOUT_SCHEDULER_TICK_SECS: u64 = 60;

/// §4.7 `response_body` truncation.
pub const MAX_RESPONSE_BODY_BYTES: usize = metaflow_domain::MAX_RESPONSE_BODY_BYTES;
