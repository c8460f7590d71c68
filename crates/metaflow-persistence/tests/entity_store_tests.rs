//! Exercises `PgEntityStore` against a real Postgres instance
//! (`DATABASE_URL`-gated, skips otherwise). Covers scenario 1 from §8: a
//! Postgres unique violation on insert surfaces through the write pipeline
//! as `EngineError::Conflict`, not a raw `sqlx::Error` — the one path
//! the in-memory store used by `metaflow-core`'s own tests can't exercise,
//! since it never enforces uniqueness.

mod test_support;

use async_trait::async_trait;
use chrono::Utc;
use metaflow_core::{execute, plan, EngineError, EntityContext, Record, UserRef, WebhookTrigger, WorkflowTrigger};
use metaflow_domain::{AutoFillPolicy, EntityDescriptor, FieldDescriptor, FieldType, Hook, PkGeneration};
use metaflow_persistence::PgEntityStore;
use serde_json::json;
use sqlx::Executor;

struct NoopWebhooks;

#[async_trait]
impl WebhookTrigger for NoopWebhooks {
    async fn fire_sync(
        &self,
        _hook: Hook,
        _entity: &str,
        _action: &str,
        _record: &Record,
        _old: Option<&Record>,
        _user: Option<&UserRef>,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn fire_async(&self, _hook: Hook, _entity: &str, _action: &str, _record: Record, _old: Option<Record>, _user: Option<UserRef>) {}

    fn fire_webhook_action(&self, _webhook_id: &str, _entity: &str, _record: Record, _old: Option<Record>) {}
}

struct NoopWorkflows;

#[async_trait]
impl WorkflowTrigger for NoopWorkflows {
    async fn trigger(&self, _entity: &str, _field: &str, _to: &str, _record: &Record, _record_id: &str) -> Result<(), EngineError> {
        Ok(())
    }
}

fn invoices_entity() -> EntityDescriptor {
    EntityDescriptor {
        name: "invoices".into(),
        table_name: "it_entity_store_invoices".into(),
        primary_key: "id".into(),
        pk_generation: PkGeneration::Database,
        fields: vec![
            FieldDescriptor {
                name: "id".into(),
                field_type: FieldType::String,
                required: false,
                nullable: true,
                enum_values: None,
                default: None,
                auto_fill: AutoFillPolicy::None,
            },
            FieldDescriptor {
                name: "email".into(),
                field_type: FieldType::String,
                required: true,
                nullable: false,
                enum_values: None,
                default: None,
                auto_fill: AutoFillPolicy::None,
            },
        ],
        soft_delete: false,
    }
}

#[tokio::test]
async fn unique_violation_on_insert_surfaces_as_conflict() {
    let Some(pool) = test_support::test_pool().await else {
        eprintln!("DATABASE_URL not set: skipping");
        return;
    };

    pool.execute("CREATE EXTENSION IF NOT EXISTS pgcrypto").await.expect("pgcrypto extension");
    pool.execute(
        "CREATE TABLE IF NOT EXISTS it_entity_store_invoices (\
            id TEXT PRIMARY KEY DEFAULT gen_random_uuid()::text,\
            email TEXT NOT NULL UNIQUE\
         )",
    )
    .await
    .expect("create table");
    pool.execute("TRUNCATE it_entity_store_invoices").await.expect("truncate table");

    let store = PgEntityStore::new(pool.clone());
    let webhooks = NoopWebhooks;
    let workflows = NoopWorkflows;
    let entity = invoices_entity();
    let ctx = EntityContext {
        entity: &entity,
        rules: &[],
        state_machines: &[],
        relations: &[],
    };

    let body: serde_json::Map<String, serde_json::Value> =
        serde_json::from_value(json!({ "email": "dup@example.com" })).unwrap();
    let p = plan(&entity, &[], &body, None, None).unwrap();
    execute(&store, &webhooks, &workflows, &ctx, p, Utc::now())
        .await
        .expect("first insert should succeed");

    let body2: serde_json::Map<String, serde_json::Value> =
        serde_json::from_value(json!({ "email": "dup@example.com" })).unwrap();
    let p2 = plan(&entity, &[], &body2, None, None).unwrap();
    let err = execute(&store, &webhooks, &workflows, &ctx, p2, Utc::now())
        .await
        .expect_err("duplicate email should conflict");

    assert!(matches!(err, EngineError::Conflict(_)));
    assert_eq!(err.http_status(), 409);

    pool.execute("DROP TABLE it_entity_store_invoices").await.ok();
}
