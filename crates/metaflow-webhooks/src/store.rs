//! `WebhookLogStore`: persistence seam for the `_webhook_logs` table (§6).
//! `metaflow-persistence` provides the Postgres implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metaflow_domain::WebhookLogRow;

use crate::error::WebhooksError;

#[async_trait]
pub trait WebhookLogStore: Send + Sync {
    async fn insert_log(&self, row: &WebhookLogRow) -> Result<(), WebhooksError>;

    async fn update_log(&self, row: &WebhookLogRow) -> Result<(), WebhooksError>;

    /// Up to `limit` rows with `status='retrying' AND next_retry_at < now`,
    /// ordered by `next_retry_at` ascending (§4.8).
    async fn fetch_retrying(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<WebhookLogRow>, WebhooksError>;
}
