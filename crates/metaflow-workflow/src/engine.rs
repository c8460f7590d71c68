//! Workflow Engine (§4.9): instantiate, advance, pause and resume workflow
//! instances. The only collaborators are a `WorkflowRegistry` (definition
//! lookup), a `WorkflowInstanceStore` (the only long-lived state this
//! engine owns — kept entirely in the database per the design notes) and a
//! `WorkflowFieldStore` (the `set_field` action's write path).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use metaflow_core::{EngineError, Record};
use metaflow_domain::{
    HistoryEntry, InstanceStatus, StepBody, WorkflowAction, WorkflowActionKind, WorkflowDefinition,
    WorkflowInstance, GOTO_END,
};
use serde_json::json;
use uuid::Uuid;

use crate::context::{build_trigger_context, parse_duration, resolve_dot_path};
use crate::error::WorkflowError;
use crate::registry::WorkflowRegistry;
use crate::store::{WorkflowFieldStore, WorkflowInstanceStore};

pub struct WorkflowEngine<R, S, F>
where
    R: WorkflowRegistry + 'static,
    S: WorkflowInstanceStore + 'static,
    F: WorkflowFieldStore + 'static,
{
    registry: Arc<R>,
    store: Arc<S>,
    field_store: Arc<F>,
}

impl<R, S, F> WorkflowEngine<R, S, F>
where
    R: WorkflowRegistry + 'static,
    S: WorkflowInstanceStore + 'static,
    F: WorkflowFieldStore + 'static,
{
    pub fn new(registry: Arc<R>, store: Arc<S>, field_store: Arc<F>) -> Self {
        WorkflowEngine {
            registry,
            store,
            field_store,
        }
    }

    /// `advance(instance, definition)` (§4.9): loops while the instance
    /// stays running, mutating and persisting it after every step. Any
    /// exception inside a step marks the instance failed rather than
    /// propagating — workflow runs are side channels (§9 design note).
    pub async fn advance(&self, instance: &mut WorkflowInstance, definition: &WorkflowDefinition) {
        loop {
            if !instance.is_running() {
                return;
            }

            let Some(step) = definition.step(&instance.current_step).map(|s| s.id.clone()) else {
                self.fail(instance).await;
                return;
            };
            let step_body = &definition.step(&step).expect("resolved above").body;

            match step_body {
                StepBody::Action(action_step) => {
                    for action in &action_step.actions {
                        self.run_action(instance, action).await;
                    }
                    instance.history.push(HistoryEntry {
                        step: step.clone(),
                        status: "completed".to_string(),
                        actor: None,
                        timestamp: Utc::now(),
                    });
                    let next = action_step.then.clone();
                    if !self.advance_or_complete(instance, &next).await {
                        return;
                    }
                }
                StepBody::Condition(condition_step) => {
                    let env = metaflow_expr::env_from(vec![(
                        "context",
                        metaflow_expr::Value::from(instance.context.clone()),
                    )]);
                    let compiled = match condition_step.compiled() {
                        Ok(c) => c,
                        Err(e) => {
                            log::error!(
                                "workflow '{}' step '{}': condition compile error: {e}",
                                instance.workflow_name,
                                step
                            );
                            self.fail(instance).await;
                            return;
                        }
                    };
                    match compiled.eval_bool(&env) {
                        Ok(taken) => {
                            let (status, next) = if taken {
                                ("on_true", condition_step.on_true.clone())
                            } else {
                                ("on_false", condition_step.on_false.clone())
                            };
                            instance.history.push(HistoryEntry {
                                step: step.clone(),
                                status: status.to_string(),
                                actor: None,
                                timestamp: Utc::now(),
                            });
                            if !self.advance_or_complete(instance, &next).await {
                                return;
                            }
                        }
                        Err(e) => {
                            log::error!(
                                "workflow '{}' step '{}': condition evaluation error: {e}",
                                instance.workflow_name,
                                step
                            );
                            self.fail(instance).await;
                            return;
                        }
                    }
                }
                StepBody::Approval(approval_step) => {
                    if let Some(timeout) = &approval_step.timeout {
                        match parse_duration(timeout) {
                            Ok(d) => instance.current_step_deadline = Some(Utc::now() + d),
                            Err(e) => {
                                log::error!(
                                    "workflow '{}' step '{}': {e}",
                                    instance.workflow_name,
                                    step
                                );
                                self.fail(instance).await;
                                return;
                            }
                        }
                    }
                    instance.updated_at = Utc::now();
                    self.persist(instance).await;
                    return;
                }
            }
        }
    }

    /// Marks completed+persisted if `next` is empty/`end`, else sets
    /// `current_step=next` and signals the caller to keep looping. Returns
    /// `false` when the instance reached a terminal state.
    async fn advance_or_complete(&self, instance: &mut WorkflowInstance, next: &str) -> bool {
        if next.is_empty() || next == GOTO_END {
            instance.status = InstanceStatus::Completed;
            instance.current_step = String::new();
            instance.current_step_deadline = None;
            instance.updated_at = Utc::now();
            self.persist(instance).await;
            false
        } else {
            instance.current_step = next.to_string();
            true
        }
    }

    async fn fail(&self, instance: &mut WorkflowInstance) {
        instance.status = InstanceStatus::Failed;
        instance.current_step = String::new();
        instance.current_step_deadline = None;
        instance.updated_at = Utc::now();
        self.persist(instance).await;
    }

    async fn persist(&self, instance: &WorkflowInstance) {
        if let Err(e) = self.store.update(instance).await {
            log::error!("failed to persist workflow instance {}: {e}", instance.id);
        }
    }

    /// §4.9 workflow actions: only `set_field` has a persistence effect.
    /// `webhook`, `create_record`, `send_event` are recognized and logged
    /// only (§9 open question, preserved).
    async fn run_action(&self, instance: &WorkflowInstance, action: &WorkflowAction) {
        match action.kind {
            WorkflowActionKind::SetField => {
                let (Some(path), Some(field)) = (&action.record_id_path, &action.field) else {
                    log::debug!("set_field action missing record_id_path or field, skipped");
                    return;
                };
                let env = json!({ "context": instance.context });
                let record_id = resolve_dot_path(&env, path);
                let Some(record_id) = record_id.as_str() else {
                    log::error!(
                        "workflow '{}': set_field could not resolve record id at path '{path}'",
                        instance.workflow_name
                    );
                    return;
                };
                let value = match &action.value {
                    Some(serde_json::Value::String(s)) if s == "now" => {
                        json!(Utc::now().to_rfc3339())
                    }
                    Some(v) => v.clone(),
                    None => serde_json::Value::Null,
                };
                if let Err(e) = self
                    .field_store
                    .set_field(&instance_target_entity(instance), record_id, field, value)
                    .await
                {
                    log::error!("workflow '{}': set_field failed: {e}", instance.workflow_name);
                }
            }
            WorkflowActionKind::Webhook | WorkflowActionKind::CreateRecord | WorkflowActionKind::SendEvent => {
                log::debug!(
                    "workflow action kind {:?} recognized but has no effect",
                    action.kind
                );
            }
        }
    }

    /// `resolveAction` (§4.9): applies an approver's decision to a paused
    /// instance. Returns the post-advance instance.
    pub async fn resolve_action(
        &self,
        instance_id: Uuid,
        approved: bool,
        user_id: &str,
    ) -> Result<WorkflowInstance, WorkflowError> {
        let mut instance = self
            .store
            .fetch(instance_id)
            .await?
            .ok_or(WorkflowError::InstanceNotFound(instance_id))?;

        if !instance.is_running() {
            return Err(WorkflowError::NotRunning(instance_id));
        }

        let definition = self
            .registry
            .find_by_id(&instance.workflow_id)
            .ok_or_else(|| WorkflowError::UnknownDefinition(instance.workflow_id.clone()))?;

        let StepBody::Approval(approval_step) = &definition
            .step(&instance.current_step)
            .ok_or(WorkflowError::NotAwaitingApproval(instance_id))?
            .body
        else {
            return Err(WorkflowError::NotAwaitingApproval(instance_id));
        };

        let status = if approved { "approved" } else { "rejected" };
        instance.history.push(HistoryEntry {
            step: instance.current_step.clone(),
            status: status.to_string(),
            actor: Some(user_id.to_string()),
            timestamp: Utc::now(),
        });
        instance.current_step_deadline = None;

        let next = if approved {
            approval_step.on_approve.clone()
        } else {
            approval_step.on_reject.clone()
        };

        let ran_advance = self.advance_or_complete(&mut instance, &next).await;
        if ran_advance {
            self.persist(&instance).await;
            self.advance(&mut instance, &definition).await;
        }

        // Reload so a concurrently-advancing/timing-out instance is
        // observed with its latest persisted state.
        self.store
            .fetch(instance_id)
            .await?
            .ok_or(WorkflowError::InstanceNotFound(instance_id))
    }
}

/// Every action inside a workflow definition operates on the definition's
/// trigger entity (§4.9's `set_field` has no entity of its own to name —
/// it shares the entity that triggered the instance).
fn instance_target_entity(instance: &WorkflowInstance) -> String {
    instance
        .context
        .get("__trigger_entity")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl<R, S, F> metaflow_core::WorkflowTrigger for WorkflowEngine<R, S, F>
where
    R: WorkflowRegistry + 'static,
    S: WorkflowInstanceStore + 'static,
    F: WorkflowFieldStore + 'static,
{
    /// `trigger(entity, field, to, record, recordID)` (§4.9): registry
    /// lookup `(entity, field, to) -> workflows[]`; for each match, build
    /// context, create a running instance at `step[0]`, and advance it.
    async fn trigger(
        &self,
        entity: &str,
        field: &str,
        to: &str,
        record: &Record,
        record_id: &str,
    ) -> Result<(), EngineError> {
        for definition in self.registry.find_by_trigger(entity, field, to) {
            let mut context = build_trigger_context(&definition.context_mapping, record_id, record);
            // Stashed so `set_field` actions (which carry no entity of
            // their own) know which table to write through.
            if let Some(obj) = context.as_object_mut() {
                obj.insert("__trigger_entity".to_string(), json!(entity));
            }

            let now = Utc::now();
            let mut instance = WorkflowInstance::new(&definition, context, now);
            self.store.insert(&instance).await.map_err(EngineError::from)?;
            self.advance(&mut instance, &definition).await;
        }
        Ok(())
    }
}
