//! metaflow-core: the transactional write pipeline and the component
//! engines it orchestrates (expression evaluation lives one layer down, in
//! `metaflow-expr`; entity/rule/state-machine/workflow/webhook descriptors
//! live in `metaflow-domain`).
//!
//! Components:
//! - `rules`: Rule Engine (§4.2).
//! - `state_machine`: State-Machine Engine (§4.3).
//! - `planner`: Write Planner (§4.4).
//! - `child_writes`: Child-Write Executor (§4.5).
//! - `pipeline`: Write Pipeline, the transactional core (§4.6).
//! - `store`: collaborator traits (`EntityStore`, `WebhookTrigger`,
//!   `WorkflowTrigger`) that keep this crate storage- and
//!   transport-agnostic.
//! - `expr_env`: the `{record, old, action}` environment shared by the rule
//!   and state-machine engines.
//! - `hashing`: canonical JSON + blake3, used for webhook payload hashing
//!   and idempotency keys.
//! - `errors`: the shared `EngineError` taxonomy (§7).

pub mod child_writes;
pub mod constants;
pub mod errors;
pub mod expr_env;
pub mod hashing;
pub mod pipeline;
pub mod planner;
pub mod rules;
pub mod state_machine;
pub mod store;

pub use errors::{EngineError, ValidationDetail};
pub use pipeline::{execute, execute_delete, EntityContext};
pub use planner::{plan, ChildOp, WriteMode, WritePlan};
pub use store::{EntityStore, Record, UserRef, WebhookTrigger, WorkflowTrigger};

#[cfg(test)]
mod tests {
    //! End-to-end exercise of the write pipeline against an in-memory
    //! `EntityStore`/`WebhookTrigger`/`WorkflowTrigger`.
    //!
    //! `create_then_update_round_trip`,
    //! `application_pk_generation_assigns_uuid_and_autofill_stamps_timestamps`
    //! and `missing_required_field_rejected_before_any_write` exercise the
    //! planner/pipeline plumbing itself (pk generation, auto-fill,
    //! required-field validation). The seed scenarios from §8 — unique
    //! conflict, field rule validation, computed fields, and a guarded
    //! state-machine transition — are covered further below by
    //! `unique_conflict_on_insert_is_reported_as_conflict`,
    //! `field_rule_rejects_negative_total`,
    //! `computed_rule_fills_grand_total`, and
    //! `guarded_transition_blocks_then_allows_submission`.

    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use metaflow_domain::{
        AutoFillPolicy, EntityDescriptor, FieldDescriptor, FieldType, Hook, PkGeneration,
        RelationDescriptor, Rule, StateMachine,
    };
    use serde_json::json;

    use super::*;

    struct InMemoryStore {
        rows: Mutex<BTreeMap<String, Record>>,
        next_id: Mutex<u64>,
        unique_on: Option<&'static str>,
    }

    impl InMemoryStore {
        fn new() -> Self {
            InMemoryStore {
                rows: Mutex::new(BTreeMap::new()),
                next_id: Mutex::new(1),
                unique_on: None,
            }
        }

        fn with_unique_on(field: &'static str) -> Self {
            InMemoryStore {
                rows: Mutex::new(BTreeMap::new()),
                next_id: Mutex::new(1),
                unique_on: Some(field),
            }
        }
    }

    #[async_trait]
    impl EntityStore for InMemoryStore {
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

        async fn fetch_record(
            &self,
            _tx: &mut (),
            _entity: &EntityDescriptor,
            id: &str,
        ) -> Result<Option<Record>, EngineError> {
            Ok(self.rows.lock().unwrap().get(id).cloned())
        }

        async fn insert_record(
            &self,
            _tx: &mut (),
            entity: &EntityDescriptor,
            fields: &Record,
        ) -> Result<Record, EngineError> {
            if let Some(unique_field) = self.unique_on {
                if let Some(value) = fields.get(unique_field) {
                    let rows = self.rows.lock().unwrap();
                    if rows.values().any(|r| r.get(unique_field) == Some(value)) {
                        return Err(EngineError::Conflict(format!(
                            "{} '{}' already exists",
                            unique_field, value
                        )));
                    }
                }
            }
            let mut id_counter = self.next_id.lock().unwrap();
            let id = id_counter.to_string();
            *id_counter += 1;
            let mut row = fields.clone();
            row.insert(entity.primary_key.clone(), json!(id));
            self.rows.lock().unwrap().insert(id, row.clone());
            Ok(row)
        }

        async fn update_record(
            &self,
            _tx: &mut (),
            entity: &EntityDescriptor,
            id: &str,
            fields: &Record,
        ) -> Result<Record, EngineError> {
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

        async fn fetch_children(
            &self,
            _tx: &mut (),
            _r: &RelationDescriptor,
            _t: &EntityDescriptor,
            _parent_id: &str,
        ) -> Result<Vec<Record>, EngineError> {
            Ok(vec![])
        }

        async fn insert_child(
            &self,
            _tx: &mut (),
            _r: &RelationDescriptor,
            _t: &EntityDescriptor,
            _parent_id: &str,
            fields: &Record,
        ) -> Result<Record, EngineError> {
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

        async fn set_child_fk_null(&self, _tx: &mut (), _r: &RelationDescriptor, _t: &EntityDescriptor, _id: &str) -> Result<(), EngineError> {
            Ok(())
        }

        async fn count_active_children(&self, _tx: &mut (), _r: &RelationDescriptor, _t: &EntityDescriptor, _parent_id: &str) -> Result<i64, EngineError> {
            Ok(0)
        }

        async fn fetch_join_targets(&self, _tx: &mut (), _r: &RelationDescriptor, _source_id: &str) -> Result<Vec<String>, EngineError> {
            Ok(vec![])
        }

        async fn insert_join_row(&self, _tx: &mut (), _r: &RelationDescriptor, _s: &str, _t: &str) -> Result<(), EngineError> {
            Ok(())
        }

        async fn delete_join_row(&self, _tx: &mut (), _r: &RelationDescriptor, _s: &str, _t: &str) -> Result<(), EngineError> {
            Ok(())
        }

        async fn delete_all_join_rows(&self, _tx: &mut (), _r: &RelationDescriptor, _s: &str) -> Result<(), EngineError> {
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
            ],
            soft_delete: false,
        }
    }

    #[tokio::test]
    async fn create_then_update_round_trip() {
        let store = InMemoryStore::new();
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
            serde_json::from_value(json!({ "total": 42 })).unwrap();
        let p = plan(&entity, &[], &body, None, None).unwrap();
        let created = execute(&store, &webhooks, &workflows, &ctx, p, Utc::now())
            .await
            .unwrap();
        assert_eq!(created.get("total"), Some(&json!(42)));
        let id = created.get("id").unwrap().as_str().unwrap().to_string();

        let body2: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(json!({ "total": 99 })).unwrap();
        let p2 = plan(&entity, &[], &body2, Some(id), None).unwrap();
        let updated = execute(&store, &webhooks, &workflows, &ctx, p2, Utc::now())
            .await
            .unwrap();
        assert_eq!(updated.get("total"), Some(&json!(99)));
    }

    fn notes_entity() -> EntityDescriptor {
        EntityDescriptor {
            name: "notes".into(),
            table_name: "notes".into(),
            primary_key: "id".into(),
            pk_generation: PkGeneration::Application,
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
                    name: "body".into(),
                    field_type: FieldType::String,
                    required: true,
                    nullable: false,
                    enum_values: None,
                    default: None,
                    auto_fill: AutoFillPolicy::None,
                },
                FieldDescriptor {
                    name: "created_at".into(),
                    field_type: FieldType::DateTime,
                    required: false,
                    nullable: true,
                    enum_values: None,
                    default: None,
                    auto_fill: AutoFillPolicy::OnCreate,
                },
                FieldDescriptor {
                    name: "updated_at".into(),
                    field_type: FieldType::DateTime,
                    required: false,
                    nullable: true,
                    enum_values: None,
                    default: None,
                    auto_fill: AutoFillPolicy::OnUpdate,
                },
            ],
            soft_delete: false,
        }
    }

    #[tokio::test]
    async fn application_pk_generation_assigns_uuid_and_autofill_stamps_timestamps() {
        let store = InMemoryStore::new();
        let webhooks = NoopWebhooks;
        let workflows = NoopWorkflows;
        let entity = notes_entity();
        let ctx = EntityContext {
            entity: &entity,
            rules: &[],
            state_machines: &[],
            relations: &[],
        };

        // User-submitted created_at/id values must be overridden, not honored.
        let body: serde_json::Map<String, serde_json::Value> = serde_json::from_value(json!({
            "body": "hi", "created_at": "2000-01-01T00:00:00Z"
        }))
        .unwrap();
        let p = plan(&entity, &[], &body, None, None).unwrap();
        let created = execute(&store, &webhooks, &workflows, &ctx, p, Utc::now())
            .await
            .unwrap();
        let id = created.get("id").unwrap().as_str().unwrap().to_string();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
        let created_at = created.get("created_at").unwrap().as_str().unwrap().to_string();
        assert_ne!(created_at, "2000-01-01T00:00:00Z");
        assert!(created.get("updated_at").unwrap().as_str().unwrap() == created_at);

        let body2: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(json!({ "body": "bye" })).unwrap();
        let p2 = plan(&entity, &[], &body2, Some(id), None).unwrap();
        let updated = execute(&store, &webhooks, &workflows, &ctx, p2, Utc::now())
            .await
            .unwrap();
        // on_create field is stripped on update, leaving the original value in place.
        assert_eq!(updated.get("created_at").unwrap().as_str().unwrap(), created_at);
        let updated_at = updated.get("updated_at").unwrap().as_str().unwrap();
        let parsed_updated_at = chrono::DateTime::parse_from_rfc3339(updated_at).unwrap();
        let parsed_created_at = chrono::DateTime::parse_from_rfc3339(&created_at).unwrap();
        assert!(parsed_updated_at >= parsed_created_at);
    }

    #[tokio::test]
    async fn missing_required_field_rejected_before_any_write() {
        let store = InMemoryStore::new();
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
            serde_json::from_value(json!({})).unwrap();
        let result = plan(&entity, &[], &body, None, None);
        assert!(result.is_err());
    }

    fn invoices_entity_with_email() -> EntityDescriptor {
        let mut e = invoices_entity();
        e.fields.push(FieldDescriptor {
            name: "email".into(),
            field_type: FieldType::String,
            required: true,
            nullable: false,
            enum_values: None,
            default: None,
            auto_fill: AutoFillPolicy::None,
        });
        e
    }

    #[tokio::test]
    async fn unique_conflict_on_insert_is_reported_as_conflict() {
        let store = InMemoryStore::with_unique_on("email");
        let webhooks = NoopWebhooks;
        let workflows = NoopWorkflows;
        let entity = invoices_entity_with_email();
        let ctx = EntityContext {
            entity: &entity,
            rules: &[],
            state_machines: &[],
            relations: &[],
        };

        let body: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(json!({ "total": 10, "email": "a@example.com" })).unwrap();
        let p = plan(&entity, &[], &body, None, None).unwrap();
        execute(&store, &webhooks, &workflows, &ctx, p, Utc::now()).await.unwrap();

        let body2: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(json!({ "total": 20, "email": "a@example.com" })).unwrap();
        let p2 = plan(&entity, &[], &body2, None, None).unwrap();
        let result = execute(&store, &webhooks, &workflows, &ctx, p2, Utc::now()).await;
        assert!(matches!(result, Err(EngineError::Conflict(_))));
    }

    fn positive_total_rule() -> Rule {
        serde_json::from_value(json!({
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
        .unwrap()
    }

    fn grand_total_rule() -> Rule {
        serde_json::from_value(json!({
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
        .unwrap()
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
        .unwrap()
    }

    #[tokio::test]
    async fn field_rule_rejects_negative_total() {
        let store = InMemoryStore::new();
        let webhooks = NoopWebhooks;
        let workflows = NoopWorkflows;
        let entity = invoices_entity();
        let rules = vec![positive_total_rule()];
        let ctx = EntityContext {
            entity: &entity,
            rules: &rules,
            state_machines: &[],
            relations: &[],
        };

        let body: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(json!({ "total": -5 })).unwrap();
        let p = plan(&entity, &[], &body, None, None).unwrap();
        let result = execute(&store, &webhooks, &workflows, &ctx, p, Utc::now()).await;
        assert!(matches!(result, Err(EngineError::ValidationFailed { .. })));
    }

    #[tokio::test]
    async fn computed_rule_fills_grand_total() {
        let store = InMemoryStore::new();
        let webhooks = NoopWebhooks;
        let workflows = NoopWorkflows;
        let mut entity = invoices_entity();
        entity.fields.push(FieldDescriptor {
            name: "tax".into(),
            field_type: FieldType::Number,
            required: false,
            nullable: true,
            enum_values: None,
            default: None,
            auto_fill: AutoFillPolicy::None,
        });
        entity.fields.push(FieldDescriptor {
            name: "grand_total".into(),
            field_type: FieldType::Number,
            required: false,
            nullable: true,
            enum_values: None,
            default: None,
            auto_fill: AutoFillPolicy::None,
        });
        let rules = vec![grand_total_rule()];
        let ctx = EntityContext {
            entity: &entity,
            rules: &rules,
            state_machines: &[],
            relations: &[],
        };

        let body: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(json!({ "total": 250, "tax": 20 })).unwrap();
        let p = plan(&entity, &[], &body, None, None).unwrap();
        let created = execute(&store, &webhooks, &workflows, &ctx, p, Utc::now())
            .await
            .unwrap();
        let grand_total = created.get("grand_total").unwrap().as_f64().unwrap();
        assert!((grand_total - 270.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn guarded_transition_blocks_then_allows_submission() {
        let store = InMemoryStore::new();
        let webhooks = NoopWebhooks;
        let workflows = NoopWorkflows;
        let mut entity = invoices_entity();
        entity.fields.push(FieldDescriptor {
            name: "status".into(),
            field_type: FieldType::String,
            required: false,
            nullable: true,
            enum_values: None,
            default: Some(json!("draft")),
            auto_fill: AutoFillPolicy::None,
        });
        let state_machines = vec![invoice_state_machine()];
        let ctx = EntityContext {
            entity: &entity,
            rules: &[],
            state_machines: &state_machines,
            relations: &[],
        };

        // Guard `record.total > 0` fails when the invoice is created at zero,
        // so the attempted draft -> submitted transition is rejected. The
        // guard reads `record.total` out of the write's own submitted
        // fields, so a request that changes `status` must carry `total`
        // alongside it for the guard to see anything but null.
        let body: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(json!({ "total": 0 })).unwrap();
        let p = plan(&entity, &[], &body, None, None).unwrap();
        let created = execute(&store, &webhooks, &workflows, &ctx, p, Utc::now())
            .await
            .unwrap();
        assert_eq!(created.get("status"), Some(&json!("draft")));
        let id = created.get("id").unwrap().as_str().unwrap().to_string();

        let blocked_body: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(json!({ "status": "submitted", "total": 0 })).unwrap();
        let blocked_plan = plan(&entity, &[], &blocked_body, Some(id.clone()), None).unwrap();
        let blocked = execute(&store, &webhooks, &workflows, &ctx, blocked_plan, Utc::now()).await;
        assert!(matches!(blocked, Err(EngineError::ValidationFailed { .. })));

        let submit_body: serde_json::Map<String, serde_json::Value> =
            serde_json::from_value(json!({ "status": "submitted", "total": 100 })).unwrap();
        let submit_plan = plan(&entity, &[], &submit_body, Some(id), None).unwrap();
        let submitted = execute(&store, &webhooks, &workflows, &ctx, submit_plan, Utc::now())
            .await
            .unwrap();
        assert_eq!(submitted.get("status"), Some(&json!("submitted")));
        assert_eq!(submitted.get("total"), Some(&json!(100)));
    }
}
