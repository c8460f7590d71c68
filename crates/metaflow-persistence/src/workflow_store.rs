//! Postgres implementation of the `_workflow_instances` table (§6) and of
//! `WorkflowFieldStore`, the narrow `set_field` seam the workflow engine
//! uses instead of the full `EntityStore` (entity-descriptor resolution is
//! out of the workflow engine's scope).
//!
//! Uses `sqlx::query_as` against a plain `FromRow` struct rather than the
//! `query!`/`query_as!` macros — those need a live database (or a checked-in
//! `.sqlx` cache) at compile time, which this workspace never assumes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metaflow_domain::{HistoryEntry, InstanceStatus, WorkflowInstance};
use metaflow_workflow::{WorkflowError, WorkflowFieldStore, WorkflowInstanceStore};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::PersistenceError;

pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_text(status: InstanceStatus) -> &'static str {
    match status {
        InstanceStatus::Running => "running",
        InstanceStatus::Completed => "completed",
        InstanceStatus::Failed => "failed",
    }
}

fn status_from_text(text: &str) -> InstanceStatus {
    match text {
        "completed" => InstanceStatus::Completed,
        "failed" => InstanceStatus::Failed,
        _ => InstanceStatus::Running,
    }
}

#[derive(FromRow)]
struct InstanceRow {
    id: Uuid,
    workflow_id: String,
    workflow_name: String,
    status: String,
    current_step: String,
    current_step_deadline: Option<DateTime<Utc>>,
    context: serde_json::Value,
    history: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl InstanceRow {
    fn into_instance(self) -> Result<WorkflowInstance, WorkflowError> {
        let history: Vec<HistoryEntry> =
            serde_json::from_value(self.history).map_err(|e| WorkflowError::Store(e.to_string()))?;
        Ok(WorkflowInstance {
            id: self.id,
            workflow_id: self.workflow_id,
            workflow_name: self.workflow_name,
            status: status_from_text(&self.status),
            current_step: self.current_step,
            current_step_deadline: self.current_step_deadline,
            context: self.context,
            history,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const SELECT_COLUMNS: &str = "id, workflow_id, workflow_name, status, current_step, \
     current_step_deadline, context, history, created_at, updated_at";

#[async_trait]
impl WorkflowInstanceStore for PgWorkflowStore {
    async fn insert(&self, instance: &WorkflowInstance) -> Result<(), WorkflowError> {
        let history = serde_json::to_value(&instance.history).map_err(|e| WorkflowError::Store(e.to_string()))?;
        sqlx::query(
            "INSERT INTO _workflow_instances \
             (id, workflow_id, workflow_name, status, current_step, current_step_deadline, context, history, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(instance.id)
        .bind(&instance.workflow_id)
        .bind(&instance.workflow_name)
        .bind(status_text(instance.status))
        .bind(&instance.current_step)
        .bind(instance.current_step_deadline)
        .bind(&instance.context)
        .bind(history)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::from)
        .map_err(WorkflowError::from)?;
        Ok(())
    }

    async fn update(&self, instance: &WorkflowInstance) -> Result<(), WorkflowError> {
        let history = serde_json::to_value(&instance.history).map_err(|e| WorkflowError::Store(e.to_string()))?;
        sqlx::query(
            "UPDATE _workflow_instances SET \
             status = $1, current_step = $2, current_step_deadline = $3, context = $4, history = $5, updated_at = $6 \
             WHERE id = $7",
        )
        .bind(status_text(instance.status))
        .bind(&instance.current_step)
        .bind(instance.current_step_deadline)
        .bind(&instance.context)
        .bind(history)
        .bind(instance.updated_at)
        .bind(instance.id)
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::from)
        .map_err(WorkflowError::from)?;
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<WorkflowInstance>, WorkflowError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM _workflow_instances WHERE id = $1");
        let row: Option<InstanceRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(PersistenceError::from)
            .map_err(WorkflowError::from)?;
        row.map(InstanceRow::into_instance).transpose()
    }

    async fn fetch_pending(&self) -> Result<Vec<WorkflowInstance>, WorkflowError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM _workflow_instances \
             WHERE status = 'running' AND current_step <> ''"
        );
        let rows: Vec<InstanceRow> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(PersistenceError::from)
            .map_err(WorkflowError::from)?;
        rows.into_iter().map(InstanceRow::into_instance).collect()
    }

    async fn fetch_expired(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowInstance>, WorkflowError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM _workflow_instances \
             WHERE status = 'running' AND current_step_deadline IS NOT NULL AND current_step_deadline <= $1"
        );
        let rows: Vec<InstanceRow> = sqlx::query_as(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(PersistenceError::from)
            .map_err(WorkflowError::from)?;
        rows.into_iter().map(InstanceRow::into_instance).collect()
    }
}

#[async_trait]
impl WorkflowFieldStore for PgWorkflowStore {
    async fn set_field(
        &self,
        entity: &str,
        id: &str,
        field: &str,
        value: serde_json::Value,
    ) -> Result<(), WorkflowError> {
        if !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(WorkflowError::Store(format!("unsafe field name: {field}")));
        }
        if !entity.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(WorkflowError::Store(format!("unsafe entity name: {entity}")));
        }
        let sql = format!("UPDATE \"{entity}\" SET \"{field}\" = $1 WHERE id = $2");
        // No `EntityDescriptor` available here (by design: the workflow engine
        // never resolves one), so the column's wire type is inferred from the
        // JSON variant rather than a declared `FieldType`.
        let query = sqlx::query(&sql);
        let query = match &value {
            serde_json::Value::Null => query.bind(None::<String>),
            serde_json::Value::Bool(b) => query.bind(*b),
            serde_json::Value::Number(n) => query.bind(n.as_f64()),
            serde_json::Value::String(s) => query.bind(s.clone()),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => query.bind(value.clone()),
        };
        query
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(PersistenceError::from)
            .map_err(WorkflowError::from)?;
        Ok(())
    }
}
