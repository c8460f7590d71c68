//! State-Machine Engine (§4.3): `evaluate(entity, fields, old, isCreate) ->
//! errors[]`, processing every active state machine for the entity.

use chrono::{DateTime, Utc};
use metaflow_domain::{ActionKind, StateMachine};

use crate::errors::ValidationDetail;
use crate::expr_env::build_env;
use crate::store::Record;

/// `webhook` actions are fire-and-forget (§4.3): this engine only collects
/// which webhook ids to dispatch; actually firing them is the caller's
/// (write pipeline's) job, since that needs the `WebhookTrigger`
/// collaborator.
#[derive(Debug, Default)]
pub struct StateMachineOutcome {
    pub errors: Vec<ValidationDetail>,
    pub fired_webhook_ids: Vec<String>,
}

pub fn evaluate(
    machines: &[StateMachine],
    fields: &mut Record,
    old: Option<&Record>,
    is_create: bool,
    now: DateTime<Utc>,
) -> StateMachineOutcome {
    let mut outcome = StateMachineOutcome::default();

    for machine in machines.iter().filter(|m| m.active) {
        let Some(new_value) = fields.get(&machine.field).cloned() else {
            continue;
        };

        if is_create {
            let new_str = new_value.as_str().unwrap_or_default();
            if new_str != machine.initial_state {
                outcome.errors.push(ValidationDetail {
                    field: Some(machine.field.clone()),
                    rule: Some("state_machine".to_string()),
                    message: format!(
                        "expected initial state '{}', got '{}'",
                        machine.initial_state, new_str
                    ),
                });
            }
            continue;
        }

        let old_str = old
            .and_then(|o| o.get(&machine.field))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let new_str = new_value.as_str().unwrap_or_default().to_string();

        if old_str == new_str {
            continue;
        }

        let Some(transition) = machine.find_transition(&old_str, &new_str) else {
            outcome.errors.push(ValidationDetail {
                field: Some(machine.field.clone()),
                rule: Some("state_machine".to_string()),
                message: format!("Invalid transition from {} to {}", old_str, new_str),
            });
            continue;
        };

        if let Some(guard_result) = transition.compiled_guard() {
            let env = build_env(fields, old, "update");
            match guard_result {
                Ok(compiled) => match compiled.eval_bool(&env) {
                    Ok(true) => {}
                    Ok(false) => {
                        outcome.errors.push(ValidationDetail {
                            field: Some(machine.field.clone()),
                            rule: Some("state_machine".to_string()),
                            message: format!(
                                "Transition {} -> {} blocked by guard",
                                old_str, new_str
                            ),
                        });
                        continue;
                    }
                    Err(e) => {
                        outcome.errors.push(ValidationDetail {
                            field: Some(machine.field.clone()),
                            rule: Some("state_machine".to_string()),
                            message: format!("Guard evaluation error: {e}"),
                        });
                        continue;
                    }
                },
                Err(e) => {
                    outcome.errors.push(ValidationDetail {
                        field: Some(machine.field.clone()),
                        rule: Some("state_machine".to_string()),
                        message: format!("Guard evaluation error: {e}"),
                    });
                    continue;
                }
            }
        }

        for action in &transition.actions {
            match action.kind {
                ActionKind::SetField => {
                    if let Some(target) = &action.field {
                        let value = match &action.value {
                            Some(serde_json::Value::String(s)) if s == "now" => {
                                serde_json::Value::String(now.to_rfc3339())
                            }
                            Some(v) => v.clone(),
                            None => serde_json::Value::Null,
                        };
                        fields.insert(target.clone(), value);
                    }
                }
                ActionKind::Webhook => {
                    if let Some(id) = &action.webhook_id {
                        outcome.fired_webhook_ids.push(id.clone());
                    }
                }
                ActionKind::CreateRecord | ActionKind::SendEvent => {
                    log::debug!(
                        "state machine action kind {:?} recognized but has no effect",
                        action.kind
                    );
                }
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(json: serde_json::Value) -> StateMachine {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn create_requires_initial_state() {
        let sm = machine(serde_json::json!({
            "id": "sm1", "entity": "invoices", "field": "status",
            "initial_state": "draft", "transitions": [], "active": true
        }));
        let mut fields: Record = Record::new();
        fields.insert("status".into(), serde_json::json!("sent"));
        let outcome = evaluate(&[sm], &mut fields, None, true, Utc::now());
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn guard_blocks_transition_and_action_sets_field() {
        let sm = machine(serde_json::json!({
            "id": "sm1", "entity": "invoices", "field": "status",
            "initial_state": "draft",
            "transitions": [
                {
                    "from": ["draft"], "to": "sent",
                    "guard": "record.total > 0",
                    "actions": [{"kind": "set_field", "field": "sent_at", "value": "now"}]
                }
            ],
            "active": true
        }));
        let mut fields: Record = Record::new();
        fields.insert("status".into(), serde_json::json!("sent"));
        fields.insert("total".into(), serde_json::json!(0));
        let mut old: Record = Record::new();
        old.insert("status".into(), serde_json::json!("draft"));
        let outcome = evaluate(&[sm], &mut fields, Some(&old), false, Utc::now());
        assert_eq!(outcome.errors.len(), 1);
        assert!(!fields.contains_key("sent_at"));
    }

    #[test]
    fn transition_action_runs_when_guard_passes() {
        let sm = machine(serde_json::json!({
            "id": "sm1", "entity": "invoices", "field": "status",
            "initial_state": "draft",
            "transitions": [
                {
                    "from": ["draft"], "to": "sent",
                    "guard": "record.total > 0",
                    "actions": [{"kind": "set_field", "field": "sent_at", "value": "now"}]
                }
            ],
            "active": true
        }));
        let mut fields: Record = Record::new();
        fields.insert("status".into(), serde_json::json!("sent"));
        fields.insert("total".into(), serde_json::json!(100));
        let mut old: Record = Record::new();
        old.insert("status".into(), serde_json::json!("draft"));
        let outcome = evaluate(&[sm], &mut fields, Some(&old), false, Utc::now());
        assert!(outcome.errors.is_empty());
        assert!(fields.contains_key("sent_at"));
    }

    #[test]
    fn unknown_destination_is_invalid_transition() {
        let sm = machine(serde_json::json!({
            "id": "sm1", "entity": "invoices", "field": "status",
            "initial_state": "draft",
            "transitions": [
                { "from": ["sent"], "to": "paid", "guard": null, "actions": [] }
            ],
            "active": true
        }));
        let mut fields: Record = Record::new();
        fields.insert("status".into(), serde_json::json!("paid"));
        let mut old: Record = Record::new();
        old.insert("status".into(), serde_json::json!("draft"));
        let outcome = evaluate(&[sm], &mut fields, Some(&old), false, Utc::now());
        assert_eq!(outcome.errors.len(), 1);
    }
}
