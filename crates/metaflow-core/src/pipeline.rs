//! Write Pipeline (§4.6): the transactional core. `execute(plan) -> record
//! | error` runs validation, state-machine evaluation, the INSERT/UPDATE,
//! child writes and sync webhooks inside one transaction; post-commit it
//! fetches the final record, triggers workflows on state change, and fires
//! async webhooks.

use chrono::{DateTime, Utc};
use metaflow_domain::{AutoFillPolicy, EntityDescriptor, Hook, OnDeletePolicy, PkGeneration, RelationDescriptor, StateMachine};
use serde_json::Value as JsonValue;

use crate::child_writes;
use crate::errors::EngineError;
use crate::planner::WritePlan;
use crate::rules;
use crate::state_machine;
use crate::store::{EntityStore, Record, WebhookTrigger, WorkflowTrigger};

/// Everything the pipeline needs about one entity for a single write,
/// resolved ahead of time by the (out-of-scope) registry: the rules active
/// for `before_write`, the entity's state machines, and — for every
/// relation whose source is this entity — the relation descriptor paired
/// with its resolved target entity descriptor.
pub struct EntityContext<'a> {
    pub entity: &'a EntityDescriptor,
    pub rules: &'a [metaflow_domain::Rule],
    pub state_machines: &'a [StateMachine],
    pub relations: &'a [(RelationDescriptor, EntityDescriptor)],
}

impl<'a> EntityContext<'a> {
    fn resolve_relation(&self, name: &str) -> Result<(&RelationDescriptor, &EntityDescriptor), EngineError> {
        self.relations
            .iter()
            .find(|(r, _)| r.name == name)
            .map(|(r, e)| (r, e))
            .ok_or_else(|| EngineError::Internal(format!("unresolved relation '{name}'")))
    }
}

fn json_to_id_string(v: &JsonValue) -> Option<String> {
    match v {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub async fn execute<S, W, T>(
    store: &S,
    webhooks: &W,
    workflows: &T,
    ctx: &EntityContext<'_>,
    plan: WritePlan,
    now: DateTime<Utc>,
) -> Result<Record, EngineError>
where
    S: EntityStore,
    W: WebhookTrigger,
    T: WorkflowTrigger,
{
    let action = if plan.is_create { "create" } else { "update" };
    let mut tx = store.begin().await?;

    let outcome = run_in_tx(store, webhooks, ctx, &mut tx, &plan, now).await;
    let (saved, old) = match outcome {
        Ok(v) => v,
        Err(e) => {
            store.rollback(tx).await?;
            return Err(e);
        }
    };
    store.commit(tx).await?;

    let saved_id = json_to_id_string(saved.get(&ctx.entity.primary_key).unwrap_or(&JsonValue::Null))
        .ok_or_else(|| EngineError::Internal("saved record missing primary key".to_string()))?;

    // Post-commit: re-fetch the fully materialized record in its own
    // short-lived transaction.
    let mut read_tx = store.begin().await?;
    let final_record = store
        .fetch_record(&mut read_tx, ctx.entity, &saved_id)
        .await?
        .ok_or_else(|| EngineError::Internal("record vanished post-commit".to_string()))?;
    store.commit(read_tx).await?;

    // §4.6 step 11: fire-and-forget workflow triggers on state change.
    for sm in ctx.state_machines.iter().filter(|m| m.active) {
        let old_val = old
            .as_ref()
            .and_then(|o| o.get(&sm.field))
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        let new_val = final_record
            .get(&sm.field)
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        if old_val != new_val && !new_val.is_empty() {
            if let Err(e) = workflows
                .trigger(&ctx.entity.name, &sm.field, new_val, &final_record, &saved_id)
                .await
            {
                log::error!(
                    "workflow trigger failed for {}.{} -> {}: {e}",
                    ctx.entity.name,
                    sm.field,
                    new_val
                );
            }
        }
    }

    webhooks.fire_async(
        Hook::AfterWrite,
        &ctx.entity.name,
        action,
        final_record.clone(),
        old,
        plan.user.clone(),
    );

    Ok(final_record)
}

async fn run_in_tx<S, W>(
    store: &S,
    webhooks: &W,
    ctx: &EntityContext<'_>,
    tx: &mut S::Tx,
    plan: &WritePlan,
    now: DateTime<Utc>,
) -> Result<(Record, Option<Record>), EngineError>
where
    S: EntityStore,
    W: WebhookTrigger,
{
    let old = if plan.is_create {
        None
    } else {
        let id = plan
            .id
            .as_deref()
            .ok_or_else(|| EngineError::Internal("update plan missing id".to_string()))?;
        Some(store.fetch_record(tx, ctx.entity, id).await?.unwrap_or_default())
    };

    let mut fields = plan.fields.clone();

    let rule_errors = rules::evaluate(ctx.rules, &mut fields, old.as_ref(), plan.is_create);
    if !rule_errors.is_empty() {
        return Err(EngineError::validation(rule_errors));
    }

    let sm_outcome = state_machine::evaluate(
        ctx.state_machines,
        &mut fields,
        old.as_ref(),
        plan.is_create,
        now,
    );
    if !sm_outcome.errors.is_empty() {
        return Err(EngineError::validation(sm_outcome.errors));
    }

    expand_file_fields(store, tx, ctx.entity, &mut fields).await?;

    apply_auto_fill(ctx.entity, &mut fields, plan.is_create, now);

    let saved = if plan.is_create {
        if ctx.entity.pk_generation == PkGeneration::Application && !fields.contains_key(&ctx.entity.primary_key) {
            fields.insert(
                ctx.entity.primary_key.clone(),
                JsonValue::String(uuid::Uuid::new_v4().to_string()),
            );
        }
        store.insert_record(tx, ctx.entity, &fields).await?
    } else {
        let id = plan.id.as_deref().unwrap();
        store.update_record(tx, ctx.entity, id, &fields).await?
    };

    let saved_id = json_to_id_string(saved.get(&ctx.entity.primary_key).unwrap_or(&JsonValue::Null))
        .ok_or_else(|| EngineError::Internal("saved record missing primary key".to_string()))?;

    for op in &plan.child_ops {
        let (relation, target_entity) = ctx.resolve_relation(&op.relation_name)?;
        child_writes::execute(store, tx, relation, target_entity, &saved_id, op).await?;
    }

    let action = if plan.is_create { "create" } else { "update" };
    webhooks
        .fire_sync(Hook::BeforeWrite, &ctx.entity.name, action, &saved, old.as_ref(), plan.user.as_ref())
        .await?;

    // State-machine `webhook` actions are fire-and-forget (§4.3), dispatched
    // by descriptor id rather than by `(entity, hook)` matching.
    for webhook_id in &sm_outcome.fired_webhook_ids {
        webhooks.fire_webhook_action(webhook_id, &ctx.entity.name, saved.clone(), old.clone());
    }

    Ok((saved, old))
}

/// §4.6 step 5: stamp auto-managed timestamp columns and strip whatever
/// the user submitted for them — an `on_create` field is set (and only
/// set) on INSERT, stripped entirely on UPDATE; an `on_update` field is
/// set on both INSERT and UPDATE.
fn apply_auto_fill(entity: &EntityDescriptor, fields: &mut Record, is_create: bool, now: DateTime<Utc>) {
    let now_value = JsonValue::String(now.to_rfc3339());
    for field in &entity.fields {
        match field.auto_fill {
            AutoFillPolicy::None => {}
            AutoFillPolicy::OnCreate => {
                if is_create {
                    fields.insert(field.name.clone(), now_value.clone());
                } else {
                    fields.remove(&field.name);
                }
            }
            AutoFillPolicy::OnUpdate => {
                fields.insert(field.name.clone(), now_value.clone());
            }
        }
    }
}

async fn expand_file_fields<S: EntityStore>(
    store: &S,
    tx: &mut S::Tx,
    entity: &EntityDescriptor,
    fields: &mut Record,
) -> Result<(), EngineError> {
    let file_field_names: Vec<String> = entity
        .fields
        .iter()
        .filter(|f| f.field_type == metaflow_domain::FieldType::File)
        .map(|f| f.name.clone())
        .collect();

    for name in file_field_names {
        let Some(JsonValue::String(file_id)) = fields.get(&name).cloned() else {
            continue;
        };
        let meta = store
            .fetch_file_metadata(tx, &file_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("file '{file_id}' not found")))?;
        let obj: serde_json::Map<String, JsonValue> = meta.into_iter().collect();
        fields.insert(name, JsonValue::Object(obj));
    }

    Ok(())
}

/// Delete pipeline (§4.6, structurally similar to the write pipeline):
/// fetch current, cascade per relation's `on_delete`, soft- or hard-delete
/// the row, fire sync `before_delete` inside the tx, commit, fire async
/// `after_delete`.
pub async fn execute_delete<S, W>(
    store: &S,
    webhooks: &W,
    entity: &EntityDescriptor,
    relations: &[(RelationDescriptor, EntityDescriptor)],
    id: &str,
    user: Option<crate::store::UserRef>,
) -> Result<(), EngineError>
where
    S: EntityStore,
    W: WebhookTrigger,
{
    let mut tx = store.begin().await?;

    let outcome = run_delete_in_tx(store, webhooks, entity, relations, &mut tx, id, user.as_ref()).await;
    let old = match outcome {
        Ok(old) => old,
        Err(e) => {
            store.rollback(tx).await?;
            return Err(e);
        }
    };
    store.commit(tx).await?;

    webhooks.fire_async(Hook::AfterDelete, &entity.name, "delete", old.clone(), Some(old), user);

    Ok(())
}

async fn run_delete_in_tx<S, W>(
    store: &S,
    webhooks: &W,
    entity: &EntityDescriptor,
    relations: &[(RelationDescriptor, EntityDescriptor)],
    tx: &mut S::Tx,
    id: &str,
    user: Option<&crate::store::UserRef>,
) -> Result<Record, EngineError>
where
    S: EntityStore,
    W: WebhookTrigger,
{
    let old = store
        .fetch_record(tx, entity, id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("{} '{}' not found", entity.name, id)))?;

    for (relation, target_entity) in relations.iter().filter(|(r, _)| r.source_entity == entity.name) {
        match relation.on_delete {
            OnDeletePolicy::Cascade => {
                let children = store.fetch_children(tx, relation, target_entity, id).await?;
                for child in children {
                    let Some(child_id) = json_to_id_string(
                        child.get(&target_entity.primary_key).unwrap_or(&JsonValue::Null),
                    ) else {
                        continue;
                    };
                    if target_entity.soft_delete {
                        store.soft_delete_child(tx, target_entity, &child_id).await?;
                    } else {
                        store.hard_delete_child(tx, target_entity, &child_id).await?;
                    }
                }
                if relation.is_many_to_many() {
                    store.delete_all_join_rows(tx, relation, id).await?;
                }
            }
            OnDeletePolicy::SetNull => {
                let children = store.fetch_children(tx, relation, target_entity, id).await?;
                for child in children {
                    let Some(child_id) = json_to_id_string(
                        child.get(&target_entity.primary_key).unwrap_or(&JsonValue::Null),
                    ) else {
                        continue;
                    };
                    store
                        .set_child_fk_null(tx, relation, target_entity, &child_id)
                        .await?;
                }
            }
            OnDeletePolicy::Restrict => {
                let count = store.count_active_children(tx, relation, target_entity, id).await?;
                if count > 0 {
                    return Err(EngineError::Conflict(format!(
                        "cannot delete {} '{}': active children via relation '{}'",
                        entity.name, id, relation.name
                    )));
                }
            }
            OnDeletePolicy::Detach => {
                if relation.is_many_to_many() {
                    store.delete_all_join_rows(tx, relation, id).await?;
                }
            }
        }
    }

    if entity.soft_delete {
        store.soft_delete_record(tx, entity, id).await?;
    } else {
        store.hard_delete_record(tx, entity, id).await?;
    }

    webhooks
        .fire_sync(Hook::BeforeDelete, &entity.name, "delete", &old, None, user)
        .await?;

    Ok(old)
}
