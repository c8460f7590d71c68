//! metaflow-cli: the Postgres-backed entry point. Connects using
//! `metaflow-persistence`, applies the engine-owned migrations, then runs
//! the same invoice scenario as the root demo binary against a real
//! database instead of in-memory collaborators.
//!
//! Registry loading (resolving an `EntityDescriptor`/its rules/state
//! machines/relations from stored metadata) is out of scope everywhere in
//! this workspace, so this binary still hand-builds those descriptors; the
//! one thing it adds over the root demo is that the `invoices` table and
//! the rows in it are real. Creating that table is itself something a
//! registry would normally own — done here directly since nothing else in
//! the workspace does.

use std::sync::Arc;

use chrono::Utc;
use metaflow_core::{execute, plan, EntityContext};
use metaflow_domain::{AutoFillPolicy, EntityDescriptor, FieldDescriptor, FieldType, PkGeneration, Rule, StateMachine};
use metaflow_persistence::{create_pool, init_dotenv, run_pending_migrations, DbConfig, PgEntityStore, PgWebhookLogStore, PgWorkflowStore};
use metaflow_webhooks::{WebhookDispatcher, WebhookRegistry};
use metaflow_workflow::{WorkflowEngine, WorkflowRegistry};
use serde_json::json;
use sqlx::Executor;

struct EmptyWebhookRegistry;

impl WebhookRegistry for EmptyWebhookRegistry {
    fn find(&self, _entity: &str, _hook: metaflow_domain::Hook, _is_async: bool) -> Vec<Arc<metaflow_domain::WebhookDescriptor>> {
        vec![]
    }
    fn find_by_id(&self, _id: &str) -> Option<Arc<metaflow_domain::WebhookDescriptor>> {
        None
    }
}

struct EmptyWorkflowRegistry;

impl WorkflowRegistry for EmptyWorkflowRegistry {
    fn find_by_trigger(&self, _entity: &str, _field: &str, _to: &str) -> Vec<Arc<metaflow_domain::WorkflowDefinition>> {
        vec![]
    }
    fn find_by_id(&self, _id: &str) -> Option<Arc<metaflow_domain::WorkflowDefinition>> {
        None
    }
}

fn invoices_entity() -> EntityDescriptor {
    EntityDescriptor {
        name: "invoices".into(),
        table_name: "invoices".into(),
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
                name: "total".into(),
                field_type: FieldType::Number,
                required: true,
                nullable: false,
                enum_values: None,
                default: None,
                auto_fill: AutoFillPolicy::None,
            },
            FieldDescriptor {
                name: "tax".into(),
                field_type: FieldType::Number,
                required: false,
                nullable: true,
                enum_values: None,
                default: None,
                auto_fill: AutoFillPolicy::None,
            },
            FieldDescriptor {
                name: "grand_total".into(),
                field_type: FieldType::Number,
                required: false,
                nullable: true,
                enum_values: None,
                default: None,
                auto_fill: AutoFillPolicy::None,
            },
            FieldDescriptor {
                name: "status".into(),
                field_type: FieldType::String,
                required: false,
                nullable: true,
                enum_values: None,
                default: Some(json!("draft")),
                auto_fill: AutoFillPolicy::None,
            },
        ],
        soft_delete: false,
    }
}

fn invoice_rules() -> Vec<Rule> {
    let positive_total: Rule = serde_json::from_value(json!({
        "id": "r_positive_total",
        "entity": "invoices",
        "hook": "before_write",
        "kind": "field",
        "definition": {
            "field": "total",
            "operator": "min",
            "value": 0,
            "message": "total must not be negative"
        },
        "priority": 0,
        "active": true,
        "sequence": 0
    }))
    .expect("valid rule json");

    let grand_total: Rule = serde_json::from_value(json!({
        "id": "r_grand_total",
        "entity": "invoices",
        "hook": "before_write",
        "kind": "computed",
        "definition": {
            "field": "grand_total",
            "expression": "record.total + record.tax",
            "message": "grand_total computation"
        },
        "priority": 10,
        "active": true,
        "sequence": 1
    }))
    .expect("valid rule json");

    vec![positive_total, grand_total]
}

fn invoice_state_machine() -> StateMachine {
    serde_json::from_value(json!({
        "id": "sm_invoice_status",
        "entity": "invoices",
        "field": "status",
        "initial_state": "draft",
        "transitions": [
            {
                "from": ["draft"],
                "to": "submitted",
                "guard": "record.total > 0",
                "actions": []
            }
        ],
        "active": true
    }))
    .expect("valid state machine json")
}

async fn ensure_demo_table(pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
    pool.execute("CREATE EXTENSION IF NOT EXISTS pgcrypto").await?;
    pool.execute(
        "CREATE TABLE IF NOT EXISTS invoices (\
            id TEXT PRIMARY KEY DEFAULT gen_random_uuid()::text,\
            total DOUBLE PRECISION NOT NULL,\
            tax DOUBLE PRECISION,\
            grand_total DOUBLE PRECISION,\
            status TEXT\
         )",
    )
    .await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    println!("=== metaflow-cli ===\n");

    init_dotenv();
    let config = DbConfig::from_env();
    let pool = create_pool(&config).await.expect("failed to connect to database");

    run_pending_migrations(&pool, "migrations")
        .await
        .expect("failed to apply migrations");
    ensure_demo_table(&pool).await.expect("failed to create demo invoices table");

    let entity_store = PgEntityStore::new(pool.clone());
    let workflow_store = Arc::new(PgWorkflowStore::new(pool.clone()));
    let webhook_log_store = Arc::new(PgWebhookLogStore::new(pool.clone()));

    let webhooks = WebhookDispatcher::new(Arc::new(EmptyWebhookRegistry), webhook_log_store);
    let workflows = WorkflowEngine::new(Arc::new(EmptyWorkflowRegistry), workflow_store.clone(), workflow_store.clone());

    let entity = invoices_entity();
    let rules = invoice_rules();
    let state_machines = vec![invoice_state_machine()];
    let ctx = EntityContext {
        entity: &entity,
        rules: &rules,
        state_machines: &state_machines,
        relations: &[],
    };

    let body: serde_json::Map<String, serde_json::Value> = serde_json::from_value(json!({ "total": 250, "tax": 20 })).unwrap();
    let create_plan = plan(&entity, &[], &body, None, None).unwrap();
    let created = execute(&entity_store, &webhooks, &workflows, &ctx, create_plan, Utc::now())
        .await
        .expect("failed to create invoice");
    println!("created invoice: {created:?}");

    let id = created.get("id").unwrap().as_str().unwrap().to_string();
    let body2: serde_json::Map<String, serde_json::Value> = serde_json::from_value(json!({ "status": "submitted" })).unwrap();
    let update_plan = plan(&entity, &[], &body2, Some(id), None).unwrap();
    let updated = execute(&entity_store, &webhooks, &workflows, &ctx, update_plan, Utc::now())
        .await
        .expect("failed to submit invoice");
    println!("invoice after submission: {updated:?}");

    println!("\n=== done ===");
}
