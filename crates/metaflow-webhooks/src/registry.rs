//! Lookup seam for webhook descriptors. Metadata registry loading is out
//! of scope (§1); this trait is the narrow interface the dispatcher needs
//! from whatever the embedding application uses to store webhook
//! definitions.

use std::sync::Arc;

use metaflow_domain::{Hook, WebhookDescriptor};

/// Descriptors are handed out behind `Arc` rather than cloned: the
/// compiled-expression cache slot (`OnceLock`) isn't `Clone`, and the
/// dispatcher needs to hold onto matched webhooks across an `.await` in a
/// spawned task for async/fire-and-forget delivery.
pub trait WebhookRegistry: Send + Sync {
    /// Webhooks configured for `(entity, hook)`, matching `is_async`.
    fn find(&self, entity: &str, hook: Hook, is_async: bool) -> Vec<Arc<WebhookDescriptor>>;

    /// A single webhook by descriptor id, used for state-machine/workflow
    /// `webhook` actions (§4.3, §4.9) which reference a specific webhook
    /// rather than matching by `(entity, hook)`.
    fn find_by_id(&self, id: &str) -> Option<Arc<WebhookDescriptor>>;
}
