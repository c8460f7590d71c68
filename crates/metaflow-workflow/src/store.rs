//! `WorkflowInstanceStore`: persistence seam for the `_workflow_instances`
//! table (§6). `metaflow-persistence` provides the Postgres
//! implementation. Per the design notes (§9), instances are the only
//! long-lived state of this engine — the engine reconstructs an instance
//! from the store on every call rather than caching it in memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metaflow_domain::WorkflowInstance;
use uuid::Uuid;

use crate::error::WorkflowError;

#[async_trait]
pub trait WorkflowInstanceStore: Send + Sync {
    async fn insert(&self, instance: &WorkflowInstance) -> Result<(), WorkflowError>;

    async fn update(&self, instance: &WorkflowInstance) -> Result<(), WorkflowError>;

    async fn fetch(&self, id: Uuid) -> Result<Option<WorkflowInstance>, WorkflowError>;

    /// `GET /_workflows/pending` (§6): `status=running AND current_step !=
    /// ""`.
    async fn fetch_pending(&self) -> Result<Vec<WorkflowInstance>, WorkflowError>;

    /// §4.10: running instances whose deadline has passed.
    async fn fetch_expired(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowInstance>, WorkflowError>;
}

/// Narrow seam the `set_field` workflow action (§4.9) writes through.
/// Deliberately thinner than `metaflow_core::EntityStore`: the workflow
/// engine never resolves a full `EntityDescriptor` (metadata registry
/// loading is out of scope, §1), it only ever needs "write one field on
/// one row of this entity".
#[async_trait]
pub trait WorkflowFieldStore: Send + Sync {
    async fn set_field(
        &self,
        entity: &str,
        id: &str,
        field: &str,
        value: serde_json::Value,
    ) -> Result<(), WorkflowError>;
}
