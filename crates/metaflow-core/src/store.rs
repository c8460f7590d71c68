//! Collaborator interfaces (§6): the write pipeline, child-write executor
//! and rule/state-machine engines never speak SQL directly. They're
//! generic over an [`EntityStore`] implementation, the same way the
//! teacher's `FlowEngine<E: EventStore, R: FlowRepository>` is generic over
//! its storage traits rather than depending on a concrete backend.
//! `metaflow-persistence` provides the Postgres implementation;
//! `metaflow-core`'s own test module provides an in-memory one.

use std::collections::BTreeMap;

use async_trait::async_trait;
use metaflow_domain::{EntityDescriptor, RelationDescriptor};
use serde_json::Value as JsonValue;

use crate::errors::EngineError;

/// A record is a flat, ordered map from field name to JSON value. Ordered
/// so that deterministic iteration (rule evaluation order, webhook `changes`
/// diffing) doesn't depend on a hash map's arbitrary order.
pub type Record = BTreeMap<String, JsonValue>;

#[derive(Debug, Clone)]
pub struct UserRef {
    pub id: String,
    pub roles: Vec<String>,
}

/// Storage collaborator the write pipeline and child-write executor
/// consume. `Tx` is the implementation's transaction handle; every method
/// that must run inside the pipeline's single ACID boundary (§4.6) takes
/// `&mut Self::Tx`.
#[async_trait]
pub trait EntityStore: Send + Sync {
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx, EngineError>;
    async fn commit(&self, tx: Self::Tx) -> Result<(), EngineError>;
    async fn rollback(&self, tx: Self::Tx) -> Result<(), EngineError>;

    async fn fetch_record(
        &self,
        tx: &mut Self::Tx,
        entity: &EntityDescriptor,
        id: &str,
    ) -> Result<Option<Record>, EngineError>;

    /// INSERT, returning the row with any DB-generated columns (primary
    /// key, defaults) populated.
    async fn insert_record(
        &self,
        tx: &mut Self::Tx,
        entity: &EntityDescriptor,
        fields: &Record,
    ) -> Result<Record, EngineError>;

    /// UPDATE by primary key, returning the row post-update.
    async fn update_record(
        &self,
        tx: &mut Self::Tx,
        entity: &EntityDescriptor,
        id: &str,
        fields: &Record,
    ) -> Result<Record, EngineError>;

    async fn soft_delete_record(
        &self,
        tx: &mut Self::Tx,
        entity: &EntityDescriptor,
        id: &str,
    ) -> Result<(), EngineError>;

    async fn hard_delete_record(
        &self,
        tx: &mut Self::Tx,
        entity: &EntityDescriptor,
        id: &str,
    ) -> Result<(), EngineError>;

    /// Children currently pointing at `parent_id` via the relation's
    /// target foreign key, excluding soft-deleted rows.
    async fn fetch_children(
        &self,
        tx: &mut Self::Tx,
        relation: &RelationDescriptor,
        target_entity: &EntityDescriptor,
        parent_id: &str,
    ) -> Result<Vec<Record>, EngineError>;

    async fn insert_child(
        &self,
        tx: &mut Self::Tx,
        relation: &RelationDescriptor,
        target_entity: &EntityDescriptor,
        parent_id: &str,
        fields: &Record,
    ) -> Result<Record, EngineError>;

    async fn update_child(
        &self,
        tx: &mut Self::Tx,
        target_entity: &EntityDescriptor,
        child_id: &str,
        fields: &Record,
    ) -> Result<Record, EngineError>;

    async fn soft_delete_child(
        &self,
        tx: &mut Self::Tx,
        target_entity: &EntityDescriptor,
        child_id: &str,
    ) -> Result<(), EngineError>;

    async fn hard_delete_child(
        &self,
        tx: &mut Self::Tx,
        target_entity: &EntityDescriptor,
        child_id: &str,
    ) -> Result<(), EngineError>;

    async fn set_child_fk_null(
        &self,
        tx: &mut Self::Tx,
        relation: &RelationDescriptor,
        target_entity: &EntityDescriptor,
        child_id: &str,
    ) -> Result<(), EngineError>;

    async fn count_active_children(
        &self,
        tx: &mut Self::Tx,
        relation: &RelationDescriptor,
        target_entity: &EntityDescriptor,
        parent_id: &str,
    ) -> Result<i64, EngineError>;

    /// N-N join table operations.
    async fn fetch_join_targets(
        &self,
        tx: &mut Self::Tx,
        relation: &RelationDescriptor,
        source_id: &str,
    ) -> Result<Vec<String>, EngineError>;

    async fn insert_join_row(
        &self,
        tx: &mut Self::Tx,
        relation: &RelationDescriptor,
        source_id: &str,
        target_id: &str,
    ) -> Result<(), EngineError>;

    async fn delete_join_row(
        &self,
        tx: &mut Self::Tx,
        relation: &RelationDescriptor,
        source_id: &str,
        target_id: &str,
    ) -> Result<(), EngineError>;

    async fn delete_all_join_rows(
        &self,
        tx: &mut Self::Tx,
        relation: &RelationDescriptor,
        source_id: &str,
    ) -> Result<(), EngineError>;

    /// §4.6 step 4: file-typed field expansion. `None` means no such file.
    async fn fetch_file_metadata(
        &self,
        tx: &mut Self::Tx,
        file_id: &str,
    ) -> Result<Option<Record>, EngineError>;

    /// Direct single-field update used by the workflow engine's
    /// `set_field` action (§4.9), outside of a full write-pipeline pass and
    /// its own short-lived transaction.
    async fn set_field(
        &self,
        entity: &EntityDescriptor,
        id: &str,
        field: &str,
        value: JsonValue,
    ) -> Result<(), EngineError>;
}

/// Webhook dispatch collaborator (§4.7), implemented by
/// `metaflow-webhooks`. Kept narrow: the pipeline never builds a payload or
/// evaluates a condition itself, it only tells the dispatcher which hook
/// fired and hands over the raw before/after state.
#[async_trait]
pub trait WebhookTrigger: Send + Sync {
    /// `fireSync`: iterate matching non-async webhooks, dispatch, log
    /// within the caller's transaction conceptually (the dispatcher owns
    /// its own log-store transaction boundary), and return the first
    /// failure so the pipeline can roll back.
    async fn fire_sync(
        &self,
        hook: metaflow_domain::Hook,
        entity: &str,
        action: &str,
        record: &Record,
        old: Option<&Record>,
        user: Option<&UserRef>,
    ) -> Result<(), EngineError>;

    /// `fireAsync`: launch dispatch for matching async webhooks and return
    /// immediately; failures are only ever visible in the webhook log.
    fn fire_async(
        &self,
        hook: metaflow_domain::Hook,
        entity: &str,
        action: &str,
        record: Record,
        old: Option<Record>,
        user: Option<UserRef>,
    );

    /// Dispatches one specific webhook descriptor by id, fire-and-forget.
    /// Used by the state-machine engine's `webhook` transition action and
    /// the workflow engine's `webhook` action (§4.3, §4.9) — both reference
    /// a webhook descriptor directly rather than matching by
    /// `(entity, hook)`.
    fn fire_webhook_action(&self, webhook_id: &str, entity: &str, record: Record, old: Option<Record>);
}

/// Workflow trigger collaborator (§4.9 `trigger`), implemented by
/// `metaflow-workflow`.
#[async_trait]
pub trait WorkflowTrigger: Send + Sync {
    async fn trigger(
        &self,
        entity: &str,
        field: &str,
        to: &str,
        record: &Record,
        record_id: &str,
    ) -> Result<(), EngineError>;
}
