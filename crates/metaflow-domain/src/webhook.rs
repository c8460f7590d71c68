use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use metaflow_expr::CompiledExpr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rule::Hook;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookDescriptor {
    pub id: String,
    pub entity: String,
    pub hook: Hook,
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub condition: Option<String>,
    pub retry_policy: RetryPolicy,
    #[serde(skip)]
    compiled_condition: OnceLock<Result<CompiledExpr, metaflow_expr::CompileError>>,
}

impl WebhookDescriptor {
    pub fn compiled_condition(&self) -> Option<Result<&CompiledExpr, &metaflow_expr::CompileError>> {
        let src = self.condition.as_deref()?;
        Some(
            self.compiled_condition
                .get_or_init(|| CompiledExpr::compile(src))
                .as_ref(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Retrying,
    Failed,
}

/// Persisted `_webhook_logs` row (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookLogRow {
    pub id: Uuid,
    pub webhook_id: String,
    pub entity: String,
    pub hook: Hook,
    pub url: String,
    pub method: HttpMethod,
    pub request_headers: serde_json::Value,
    pub request_body: String,
    pub response_status: Option<i32>,
    /// Truncated to <= 64 KiB by the dispatcher before this row is built.
    pub response_body: Option<String>,
    pub status: DeliveryStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub idempotency_key: String,
    pub updated_at: DateTime<Utc>,
}

pub const MAX_RESPONSE_BODY_BYTES: usize = 64 * 1024;
