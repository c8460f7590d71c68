//! Demo binary: wires the write pipeline and workflow engine together
//! against in-memory collaborators and runs a handful of scenarios end to
//! end, printing what happened at each step.
//!
//! This is not a server — `metaflow-cli` carries the runnable entry point
//! a deployment would actually use. This binary exercises the pieces in
//! one process without a database, and doubles as a readable tour of how
//! `metaflow-core`, `metaflow-domain` and `metaflow-workflow` fit together.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use metaflow_core::{execute, plan, EngineError, EntityContext, Record};
use metaflow_domain::{AutoFillPolicy, EntityDescriptor, FieldDescriptor, FieldType, Hook, PkGeneration, Rule, StateMachine};
use metaflow_webhooks::{WebhookDispatcher, WebhookLogStore, WebhookRegistry, WebhooksError};
use metaflow_workflow::{WorkflowEngine, WorkflowFieldStore, WorkflowInstanceStore, WorkflowRegistry};
use serde_json::json;
use uuid::Uuid;

/// An `EntityStore` that keeps everything in a `BTreeMap` behind a mutex;
/// good enough to drive the pipeline through a handful of requests without
/// a database.
struct InMemoryStore {
    rows: Mutex<BTreeMap<String, Record>>,
    next_id: Mutex<u64>,
}

impl InMemoryStore {
    fn new() -> Self {
        InMemoryStore {
            rows: Mutex::new(BTreeMap::new()),
            next_id: Mutex::new(1),
        }
    }
}

#[async_trait]
impl metaflow_core::EntityStore for InMemoryStore {
    type Tx = ();

    async fn begin(&self) -> Result<(), EngineError> {
        Ok(())
    }
    async fn commit(&self, _tx: ()) -> Result<(), EngineError> {
        Ok(())
    }
    async fn rollback(&self, _tx: ()) -> Result<(), EngineError> {
        Ok(())
    }

    async fn fetch_record(&self, _tx: &mut (), _entity: &EntityDescriptor, id: &str) -> Result<Option<Record>, EngineError> {
        Ok(self.rows.lock().unwrap().get(id).cloned())
    }

    async fn insert_record(&self, _tx: &mut (), entity: &EntityDescriptor, fields: &Record) -> Result<Record, EngineError> {
        let mut id_counter = self.next_id.lock().unwrap();
        let id = id_counter.to_string();
        *id_counter += 1;
        let mut row = fields.clone();
        row.insert(entity.primary_key.clone(), json!(id));
        self.rows.lock().unwrap().insert(id, row.clone());
        Ok(row)
    }

    async fn update_record(&self, _tx: &mut (), entity: &EntityDescriptor, id: &str, fields: &Record) -> Result<Record, EngineError> {
        let mut rows = self.rows.lock().unwrap();
        let mut row = rows.get(id).cloned().unwrap_or_default();
        for (k, v) in fields {
            row.insert(k.clone(), v.clone());
        }
        row.insert(entity.primary_key.clone(), json!(id));
        rows.insert(id.to_string(), row.clone());
        Ok(row)
    }

    async fn soft_delete_record(&self, _tx: &mut (), _e: &EntityDescriptor, id: &str) -> Result<(), EngineError> {
        if let Some(row) = self.rows.lock().unwrap().get_mut(id) {
            row.insert("deleted_at".into(), json!(Utc::now().to_rfc3339()));
        }
        Ok(())
    }

    async fn hard_delete_record(&self, _tx: &mut (), _e: &EntityDescriptor, id: &str) -> Result<(), EngineError> {
        self.rows.lock().unwrap().remove(id);
        Ok(())
    }

    async fn fetch_children(&self, _tx: &mut (), _r: &metaflow_domain::RelationDescriptor, _t: &EntityDescriptor, _parent_id: &str) -> Result<Vec<Record>, EngineError> {
        Ok(vec![])
    }

    async fn insert_child(&self, _tx: &mut (), _r: &metaflow_domain::RelationDescriptor, _t: &EntityDescriptor, _parent_id: &str, fields: &Record) -> Result<Record, EngineError> {
        Ok(fields.clone())
    }

    async fn update_child(&self, _tx: &mut (), _t: &EntityDescriptor, _id: &str, fields: &Record) -> Result<Record, EngineError> {
        Ok(fields.clone())
    }

    async fn soft_delete_child(&self, _tx: &mut (), _t: &EntityDescriptor, _id: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn hard_delete_child(&self, _tx: &mut (), _t: &EntityDescriptor, _id: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn set_child_fk_null(&self, _tx: &mut (), _r: &metaflow_domain::RelationDescriptor, _t: &EntityDescriptor, _id: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn count_active_children(&self, _tx: &mut (), _r: &metaflow_domain::RelationDescriptor, _t: &EntityDescriptor, _parent_id: &str) -> Result<i64, EngineError> {
        Ok(0)
    }

    async fn fetch_join_targets(&self, _tx: &mut (), _r: &metaflow_domain::RelationDescriptor, _source_id: &str) -> Result<Vec<String>, EngineError> {
        Ok(vec![])
    }

    async fn insert_join_row(&self, _tx: &mut (), _r: &metaflow_domain::RelationDescriptor, _s: &str, _t: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn delete_join_row(&self, _tx: &mut (), _r: &metaflow_domain::RelationDescriptor, _s: &str, _t: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn delete_all_join_rows(&self, _tx: &mut (), _r: &metaflow_domain::RelationDescriptor, _s: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn fetch_file_metadata(&self, _tx: &mut (), _file_id: &str) -> Result<Option<Record>, EngineError> {
        Ok(None)
    }

    async fn set_field(&self, _entity: &EntityDescriptor, id: &str, field: &str, value: serde_json::Value) -> Result<(), EngineError> {
        if let Some(row) = self.rows.lock().unwrap().get_mut(id) {
            row.insert(field.to_string(), value);
        }
        Ok(())
    }
}

/// Holds no webhook descriptors at all: the dispatcher still runs for
/// real, it just never finds anything to send.
struct EmptyWebhookRegistry;

impl WebhookRegistry for EmptyWebhookRegistry {
    fn find(&self, _entity: &str, _hook: Hook, _is_async: bool) -> Vec<Arc<metaflow_domain::WebhookDescriptor>> {
        vec![]
    }
    fn find_by_id(&self, _id: &str) -> Option<Arc<metaflow_domain::WebhookDescriptor>> {
        None
    }
}

#[derive(Default)]
struct InMemoryWebhookLogStore {
    logs: Mutex<Vec<metaflow_domain::WebhookLogRow>>,
}

#[async_trait]
impl WebhookLogStore for InMemoryWebhookLogStore {
    async fn insert_log(&self, row: &metaflow_domain::WebhookLogRow) -> Result<(), WebhooksError> {
        self.logs.lock().unwrap().push(row.clone());
        Ok(())
    }
    async fn update_log(&self, row: &metaflow_domain::WebhookLogRow) -> Result<(), WebhooksError> {
        let mut logs = self.logs.lock().unwrap();
        if let Some(existing) = logs.iter_mut().find(|r| r.id == row.id) {
            *existing = row.clone();
        }
        Ok(())
    }
    async fn fetch_retrying(&self, _now: chrono::DateTime<Utc>, _limit: i64) -> Result<Vec<metaflow_domain::WebhookLogRow>, WebhooksError> {
        Ok(vec![])
    }
}

struct InMemoryWorkflowRegistry {
    defs: Vec<Arc<metaflow_domain::WorkflowDefinition>>,
}

impl WorkflowRegistry for InMemoryWorkflowRegistry {
    fn find_by_trigger(&self, entity: &str, field: &str, to: &str) -> Vec<Arc<metaflow_domain::WorkflowDefinition>> {
        self.defs
            .iter()
            .filter(|d| d.trigger.entity == entity && d.trigger.state_field == field && d.trigger.target_state == to)
            .cloned()
            .collect()
    }
    fn find_by_id(&self, id: &str) -> Option<Arc<metaflow_domain::WorkflowDefinition>> {
        self.defs.iter().find(|d| d.id == id).cloned()
    }
}

#[derive(Default)]
struct InMemoryInstanceStore {
    instances: Mutex<BTreeMap<Uuid, metaflow_domain::WorkflowInstance>>,
}

#[async_trait]
impl WorkflowInstanceStore for InMemoryInstanceStore {
    async fn insert(&self, instance: &metaflow_domain::WorkflowInstance) -> Result<(), metaflow_workflow::WorkflowError> {
        self.instances.lock().unwrap().insert(instance.id, instance.clone());
        Ok(())
    }
    async fn update(&self, instance: &metaflow_domain::WorkflowInstance) -> Result<(), metaflow_workflow::WorkflowError> {
        self.instances.lock().unwrap().insert(instance.id, instance.clone());
        Ok(())
    }
    async fn fetch(&self, id: Uuid) -> Result<Option<metaflow_domain::WorkflowInstance>, metaflow_workflow::WorkflowError> {
        Ok(self.instances.lock().unwrap().get(&id).cloned())
    }
    async fn fetch_pending(&self) -> Result<Vec<metaflow_domain::WorkflowInstance>, metaflow_workflow::WorkflowError> {
        Ok(self
            .instances
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.is_running() && !i.current_step.is_empty())
            .cloned()
            .collect())
    }
    async fn fetch_expired(&self, now: chrono::DateTime<Utc>) -> Result<Vec<metaflow_domain::WorkflowInstance>, metaflow_workflow::WorkflowError> {
        Ok(self
            .instances
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.is_running() && i.current_step_deadline.is_some_and(|d| d < now))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct InMemoryFieldStore {
    rows: Mutex<BTreeMap<(String, String), BTreeMap<String, serde_json::Value>>>,
}

#[async_trait]
impl WorkflowFieldStore for InMemoryFieldStore {
    async fn set_field(&self, entity: &str, id: &str, field: &str, value: serde_json::Value) -> Result<(), metaflow_workflow::WorkflowError> {
        self.rows
            .lock()
            .unwrap()
            .entry((entity.to_string(), id.to_string()))
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
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

/// A non-negative-total field rule and a `grand_total = total + tax`
/// computed rule, built via JSON since `Rule` keeps its compiled-expression
/// cache private to the owning crate.
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

/// A `draft -> submitted` transition guarded by `record.total > 0`, built
/// the same way as `invoice_rules` for the same reason.
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

fn approval_workflow() -> metaflow_domain::WorkflowDefinition {
    use metaflow_domain::{ActionStep, ApprovalStep, StepBody, WorkflowAction, WorkflowActionKind, WorkflowStep, GOTO_END};

    metaflow_domain::WorkflowDefinition {
        id: "wf_invoice_approval".into(),
        name: "invoice_submission_approval".into(),
        trigger: metaflow_domain::WorkflowTrigger {
            entity: "invoices".into(),
            state_field: "status".into(),
            target_state: "submitted".into(),
        },
        context_mapping: BTreeMap::new(),
        steps: vec![
            WorkflowStep {
                id: "approval".into(),
                body: StepBody::Approval(ApprovalStep {
                    timeout: None,
                    on_approve: "mark_approved".into(),
                    on_reject: GOTO_END.into(),
                    on_timeout: GOTO_END.into(),
                }),
            },
            WorkflowStep {
                id: "mark_approved".into(),
                body: StepBody::Action(ActionStep {
                    actions: vec![WorkflowAction {
                        kind: WorkflowActionKind::SetField,
                        record_id_path: Some("context.trigger.record_id".into()),
                        field: Some("approved_at".into()),
                        value: Some(json!("now")),
                    }],
                    then: GOTO_END.into(),
                }),
            },
        ],
    }
}

#[tokio::main]
async fn main() {
    println!("=== metaflow demo ===\n");

    let store = InMemoryStore::new();
    let webhooks = WebhookDispatcher::new(Arc::new(EmptyWebhookRegistry), Arc::new(InMemoryWebhookLogStore::default()));

    let workflow_registry = Arc::new(InMemoryWorkflowRegistry {
        defs: vec![Arc::new(approval_workflow())],
    });
    let instance_store = Arc::new(InMemoryInstanceStore::default());
    let field_store = Arc::new(InMemoryFieldStore::default());
    let workflows = WorkflowEngine::new(workflow_registry, instance_store.clone(), field_store);

    let entity = invoices_entity();
    let rules = invoice_rules();
    let state_machines = vec![invoice_state_machine()];
    let ctx = EntityContext {
        entity: &entity,
        rules: &rules,
        state_machines: &state_machines,
        relations: &[],
    };

    // Scenario 1: create with a passing field rule and a computed field.
    let body: serde_json::Map<String, serde_json::Value> = serde_json::from_value(json!({ "total": 100, "tax": 8 })).unwrap();
    let create_plan = plan(&entity, &[], &body, None, None).unwrap();
    let created = execute(&store, &webhooks, &workflows, &ctx, create_plan, Utc::now()).await.unwrap();
    println!("created invoice: {created:?}");
    let id = created.get("id").unwrap().as_str().unwrap().to_string();

    // Scenario 2: a negative total passes planning (it's a well-shaped
    // number) but the field rule rejects it once the pipeline runs.
    let bad_body: serde_json::Map<String, serde_json::Value> = serde_json::from_value(json!({ "total": -5 })).unwrap();
    let bad_plan = plan(&entity, &[], &bad_body, None, None).unwrap();
    match execute(&store, &webhooks, &workflows, &ctx, bad_plan, Utc::now()).await {
        Ok(_) => println!("unexpected: negative total accepted"),
        Err(e) => println!("negative total rejected by the rule engine: {e}"),
    }

    // Scenario 3: a guarded state-machine transition draft -> submitted,
    // which triggers the approval workflow.
    let body3: serde_json::Map<String, serde_json::Value> = serde_json::from_value(json!({ "status": "submitted" })).unwrap();
    let submit_plan = plan(&entity, &[], &body3, Some(id.clone()), None).unwrap();
    let submitted = execute(&store, &webhooks, &workflows, &ctx, submit_plan, Utc::now()).await.unwrap();
    println!("invoice after submission: {submitted:?}");

    let pending = instance_store.fetch_pending().await.unwrap();
    if let Some(instance) = pending.first() {
        println!("workflow instance paused at step '{}'", instance.current_step);
        let resolved = workflows.resolve_action(instance.id, true, "manager1").await.unwrap();
        println!("workflow instance resolved: status={:?}", resolved.status);
    } else {
        println!("no workflow instance was created (state machine guard likely blocked the transition)");
    }

    println!("\n=== demo complete ===");
}
