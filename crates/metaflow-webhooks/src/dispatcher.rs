//! Orchestration entry points (§4.7): `fireSync` iterates non-async
//! webhooks, dispatches and logs them, and returns the first failure so
//! the pipeline aborts. `fireAsync` launches async webhooks concurrently
//! and never blocks the caller.
//!
//! Sync dispatch and logging do not share the entity write's own
//! transaction: `WebhookTrigger` is generic over no particular
//! `EntityStore::Tx`, so participating in that transaction would require
//! threading the storage implementation's transaction type through this
//! crate. What the pipeline actually needs — a failed sync webhook aborts
//! the write — is preserved because `fire_sync` returns `Err` and
//! `metaflow-core::pipeline` rolls the entity transaction back before this
//! function's log row would ever be visible to the caller as "committed".

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use metaflow_core::{EngineError, Record, UserRef, WebhookTrigger};
use metaflow_domain::{DeliveryStatus, Hook, WebhookDescriptor};
use reqwest::Client;
use uuid::Uuid;

use crate::dispatch::dispatch;
use crate::payload::{build_payload, evaluate_condition, resolve_headers};
use crate::registry::WebhookRegistry;
use crate::store::WebhookLogStore;

pub struct WebhookDispatcher<R, L>
where
    R: WebhookRegistry + 'static,
    L: WebhookLogStore + 'static,
{
    registry: Arc<R>,
    log_store: Arc<L>,
    client: Client,
}

impl<R, L> WebhookDispatcher<R, L>
where
    R: WebhookRegistry + 'static,
    L: WebhookLogStore + 'static,
{
    pub fn new(registry: Arc<R>, log_store: Arc<L>) -> Self {
        WebhookDispatcher {
            registry,
            log_store,
            client: Client::new(),
        }
    }
}

/// Dispatches one webhook, logs the result, and returns whether it was
/// delivered (2xx and no transport error). A condition evaluating to false
/// is a no-op, reported as delivered so it never aborts a pipeline.
async fn dispatch_and_log<L: WebhookLogStore>(
    client: &Client,
    log_store: &L,
    webhook: &WebhookDescriptor,
    entity: &str,
    action: &str,
    record: &Record,
    old: Option<&Record>,
    user: Option<&UserRef>,
) -> Result<bool, EngineError> {
    let now = Utc::now();
    let payload = build_payload(webhook.hook, entity, action, record, old, user, now);

    let should_fire = evaluate_condition(webhook, &payload).map_err(|e| EngineError::WebhookFailed(e.to_string()))?;
    if !should_fire {
        return Ok(true);
    }

    let headers = resolve_headers(&webhook.headers);
    let result = dispatch(client, &webhook.url, webhook.method, &headers, &payload).await;

    let delivered = result.status / 100 == 2 && result.error.is_none();
    let status = if delivered {
        DeliveryStatus::Delivered
    } else if webhook.retry_policy.max_attempts > 1 {
        DeliveryStatus::Retrying
    } else {
        DeliveryStatus::Failed
    };
    let next_retry_at = matches!(status, DeliveryStatus::Retrying).then(|| now + chrono::Duration::seconds(30));

    let row = metaflow_domain::WebhookLogRow {
        id: Uuid::new_v4(),
        webhook_id: webhook.id.clone(),
        entity: entity.to_string(),
        hook: webhook.hook,
        url: webhook.url.clone(),
        method: webhook.method,
        request_headers: serde_json::to_value(&headers).unwrap_or(serde_json::Value::Null),
        request_body: payload.to_string(),
        response_status: Some(result.status as i32),
        response_body: result.body,
        status,
        attempt: 1,
        max_attempts: webhook.retry_policy.max_attempts,
        next_retry_at,
        error: result.error,
        idempotency_key: payload
            .get("idempotency_key")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        updated_at: now,
    };

    log_store
        .insert_log(&row)
        .await
        .map_err(|e| EngineError::WebhookFailed(e.to_string()))?;

    Ok(delivered)
}

#[async_trait]
impl<R, L> WebhookTrigger for WebhookDispatcher<R, L>
where
    R: WebhookRegistry + 'static,
    L: WebhookLogStore + 'static,
{
    async fn fire_sync(
        &self,
        hook: Hook,
        entity: &str,
        action: &str,
        record: &Record,
        old: Option<&Record>,
        user: Option<&UserRef>,
    ) -> Result<(), EngineError> {
        for webhook in self.registry.find(entity, hook, false) {
            let delivered = dispatch_and_log(&self.client, self.log_store.as_ref(), &webhook, entity, action, record, old, user).await?;
            if !delivered {
                return Err(EngineError::WebhookFailed(format!(
                    "sync webhook '{}' for {entity}.{hook:?} did not return 2xx",
                    webhook.id
                )));
            }
        }
        Ok(())
    }

    fn fire_async(&self, hook: Hook, entity: &str, action: &str, record: Record, old: Option<Record>, user: Option<UserRef>) {
        let webhooks = self.registry.find(entity, hook, true);

        // §4.7: async webhooks for one entity/hook are independent
        // fire-and-forget dispatches — one task per webhook, so a slow or
        // hanging endpoint can't hold up its siblings.
        for webhook in webhooks {
            let entity_owned = entity.to_string();
            let action_owned = action.to_string();
            let client = self.client.clone();
            let log_store = self.log_store.clone();
            let record = record.clone();
            let old = old.clone();
            let user = user.clone();

            tokio::spawn(async move {
                if let Err(e) = dispatch_and_log(&client, log_store.as_ref(), &webhook, &entity_owned, &action_owned, &record, old.as_ref(), user.as_ref()).await {
                    log::error!("async webhook '{}' for {entity_owned} failed: {e}", webhook.id);
                }
            });
        }
    }

    fn fire_webhook_action(&self, webhook_id: &str, entity: &str, record: Record, old: Option<Record>) {
        let Some(webhook) = self.registry.find_by_id(webhook_id) else {
            log::debug!("webhook action references unknown webhook id '{webhook_id}'");
            return;
        };
        let entity_owned = entity.to_string();
        let client = self.client.clone();
        let log_store = self.log_store.clone();

        tokio::spawn(async move {
            if let Err(e) = dispatch_and_log(&client, log_store.as_ref(), &webhook, &entity_owned, "transition", &record, old.as_ref(), None).await {
                log::error!("webhook action '{webhook_id}' for {entity_owned} failed: {e}");
            }
        });
    }
}
