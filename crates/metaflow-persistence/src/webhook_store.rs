//! Postgres implementation of `metaflow_webhooks::WebhookLogStore` against
//! the `_webhook_logs` table (§6).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metaflow_domain::{DeliveryStatus, Hook, HttpMethod, WebhookLogRow};
use metaflow_webhooks::{WebhookLogStore, WebhooksError};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::PersistenceError;

pub struct PgWebhookLogStore {
    pool: PgPool,
}

impl PgWebhookLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn hook_text(hook: Hook) -> &'static str {
    match hook {
        Hook::BeforeWrite => "before_write",
        Hook::AfterWrite => "after_write",
        Hook::BeforeDelete => "before_delete",
        Hook::AfterDelete => "after_delete",
    }
}

fn hook_from_text(text: &str) -> Result<Hook, WebhooksError> {
    match text {
        "before_write" => Ok(Hook::BeforeWrite),
        "after_write" => Ok(Hook::AfterWrite),
        "before_delete" => Ok(Hook::BeforeDelete),
        "after_delete" => Ok(Hook::AfterDelete),
        other => Err(WebhooksError::LogStore(format!("unknown hook: {other}"))),
    }
}

fn method_text(method: HttpMethod) -> &'static str {
    match method {
        HttpMethod::Get => "GET",
        HttpMethod::Post => "POST",
        HttpMethod::Put => "PUT",
        HttpMethod::Patch => "PATCH",
        HttpMethod::Delete => "DELETE",
    }
}

fn method_from_text(text: &str) -> Result<HttpMethod, WebhooksError> {
    match text {
        "GET" => Ok(HttpMethod::Get),
        "POST" => Ok(HttpMethod::Post),
        "PUT" => Ok(HttpMethod::Put),
        "PATCH" => Ok(HttpMethod::Patch),
        "DELETE" => Ok(HttpMethod::Delete),
        other => Err(WebhooksError::LogStore(format!("unknown http method: {other}"))),
    }
}

fn status_text(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::Delivered => "delivered",
        DeliveryStatus::Retrying => "retrying",
        DeliveryStatus::Failed => "failed",
    }
}

fn status_from_text(text: &str) -> Result<DeliveryStatus, WebhooksError> {
    match text {
        "delivered" => Ok(DeliveryStatus::Delivered),
        "retrying" => Ok(DeliveryStatus::Retrying),
        "failed" => Ok(DeliveryStatus::Failed),
        other => Err(WebhooksError::LogStore(format!("unknown delivery status: {other}"))),
    }
}

#[derive(FromRow)]
struct LogRowRaw {
    id: Uuid,
    webhook_id: String,
    entity: String,
    hook: String,
    url: String,
    method: String,
    request_headers: serde_json::Value,
    request_body: String,
    response_status: Option<i32>,
    response_body: Option<String>,
    status: String,
    attempt: i32,
    max_attempts: i32,
    next_retry_at: Option<DateTime<Utc>>,
    error: Option<String>,
    idempotency_key: String,
    updated_at: DateTime<Utc>,
}

impl LogRowRaw {
    fn into_row(self) -> Result<WebhookLogRow, WebhooksError> {
        Ok(WebhookLogRow {
            id: self.id,
            webhook_id: self.webhook_id,
            entity: self.entity,
            hook: hook_from_text(&self.hook)?,
            url: self.url,
            method: method_from_text(&self.method)?,
            request_headers: self.request_headers,
            request_body: self.request_body,
            response_status: self.response_status,
            response_body: self.response_body,
            status: status_from_text(&self.status)?,
            attempt: self.attempt as u32,
            max_attempts: self.max_attempts as u32,
            next_retry_at: self.next_retry_at,
            error: self.error,
            idempotency_key: self.idempotency_key,
            updated_at: self.updated_at,
        })
    }
}

const SELECT_COLUMNS: &str = "id, webhook_id, entity, hook, url, method, request_headers, request_body, \
     response_status, response_body, status, attempt, max_attempts, next_retry_at, error, idempotency_key, updated_at";

#[async_trait]
impl WebhookLogStore for PgWebhookLogStore {
    async fn insert_log(&self, row: &WebhookLogRow) -> Result<(), WebhooksError> {
        sqlx::query(
            "INSERT INTO _webhook_logs \
             (id, webhook_id, entity, hook, url, method, request_headers, request_body, response_status, \
              response_body, status, attempt, max_attempts, next_retry_at, error, idempotency_key, updated_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)",
        )
        .bind(row.id)
        .bind(&row.webhook_id)
        .bind(&row.entity)
        .bind(hook_text(row.hook))
        .bind(&row.url)
        .bind(method_text(row.method))
        .bind(&row.request_headers)
        .bind(&row.request_body)
        .bind(row.response_status)
        .bind(&row.response_body)
        .bind(status_text(row.status))
        .bind(row.attempt as i32)
        .bind(row.max_attempts as i32)
        .bind(row.next_retry_at)
        .bind(&row.error)
        .bind(&row.idempotency_key)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::from)
        .map_err(WebhooksError::from)?;
        Ok(())
    }

    async fn update_log(&self, row: &WebhookLogRow) -> Result<(), WebhooksError> {
        sqlx::query(
            "UPDATE _webhook_logs SET \
             response_status = $1, response_body = $2, status = $3, attempt = $4, \
             next_retry_at = $5, error = $6, updated_at = $7 \
             WHERE id = $8",
        )
        .bind(row.response_status)
        .bind(&row.response_body)
        .bind(status_text(row.status))
        .bind(row.attempt as i32)
        .bind(row.next_retry_at)
        .bind(&row.error)
        .bind(row.updated_at)
        .bind(row.id)
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::from)
        .map_err(WebhooksError::from)?;
        Ok(())
    }

    async fn fetch_retrying(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<WebhookLogRow>, WebhooksError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM _webhook_logs \
             WHERE status = 'retrying' AND next_retry_at < $1 \
             ORDER BY next_retry_at ASC LIMIT $2"
        );
        let rows: Vec<LogRowRaw> = sqlx::query_as(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(PersistenceError::from)
            .map_err(WebhooksError::from)?;
        rows.into_iter().map(LogRowRaw::into_row).collect()
    }
}
