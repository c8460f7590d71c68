//! Lookup seam for workflow definitions (§4.9 `trigger`). Metadata registry
//! loading is out of scope (§1); this trait is the narrow interface the
//! engine needs from whatever the embedding application uses to store
//! workflow definitions.

use std::sync::Arc;

use metaflow_domain::WorkflowDefinition;

/// Definitions are handed out behind `Arc`, the same reasoning as
/// `WebhookRegistry`: `ConditionStep`'s compiled-expression cache slot
/// (`OnceLock`) isn't `Clone`.
pub trait WorkflowRegistry: Send + Sync {
    /// Workflows whose trigger matches `(entity, state_field, target_state)`.
    fn find_by_trigger(&self, entity: &str, field: &str, to: &str) -> Vec<Arc<WorkflowDefinition>>;

    /// A single workflow definition by id, used to re-resolve the owning
    /// definition of a persisted instance.
    fn find_by_id(&self, id: &str) -> Option<Arc<WorkflowDefinition>>;
}
