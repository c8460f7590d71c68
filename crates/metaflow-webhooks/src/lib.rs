//! metaflow-webhooks: the Webhook Dispatcher (§4.7) and Webhook Retry
//! Scheduler (§4.8).
//!
//! Components:
//! - `payload`: `buildPayload`, `resolveHeaders`, `evaluateCondition` — the
//!   pure pieces of the dispatcher.
//! - `dispatch`: the single outbound HTTP call, with timeout and response
//!   truncation.
//! - `dispatcher`: `WebhookDispatcher`, implementing
//!   `metaflow_core::WebhookTrigger` (`fireSync`/`fireAsync`/
//!   `fire_webhook_action`).
//! - `scheduler`: `RetryScheduler`, ticking every 30 s to resend
//!   `retrying` log rows with exponential backoff.
//! - `registry`: `WebhookRegistry`, the descriptor-lookup seam.
//! - `store`: `WebhookLogStore`, the `_webhook_logs` persistence seam.
//! - `error`: `WebhooksError`, convertible into `metaflow_core::EngineError`.

pub mod dispatch;
pub mod dispatcher;
pub mod error;
pub mod payload;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use dispatch::{dispatch as dispatch_request, DispatchResult};
pub use dispatcher::WebhookDispatcher;
pub use error::WebhooksError;
pub use payload::{build_payload, evaluate_condition, resolve_headers};
pub use registry::WebhookRegistry;
pub use scheduler::RetryScheduler;
pub use store::WebhookLogStore;
