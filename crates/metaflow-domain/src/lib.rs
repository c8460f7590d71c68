//! Metadata descriptors for the write-pipeline and workflow orchestrator:
//! entities, relations, rules, state machines, workflow definitions and
//! instances, webhook descriptors and log rows.
//!
//! These types are produced by a registry (out of scope here — see the
//! root spec's §1) and consumed read-only by `metaflow-core`,
//! `metaflow-webhooks` and `metaflow-workflow`. Descriptors that carry a
//! compiled-expression cache slot (`Rule`, `Transition`, `ConditionStep`,
//! `WebhookDescriptor`) compile lazily and at most once per process.

pub mod entity;
pub mod error;
pub mod relation;
pub mod rule;
pub mod state_machine;
pub mod webhook;
pub mod workflow;

pub use entity::{AutoFillPolicy, EntityDescriptor, FieldDescriptor, FieldType, PkGeneration};
pub use error::DomainError;
pub use relation::{JoinTable, OnDeletePolicy, RelationDescriptor, RelationKind};
pub use rule::{FieldOperator, Hook, Rule, RuleDefinition, RuleKind};
pub use state_machine::{Action, ActionKind, StateMachine, Transition};
pub use webhook::{
    DeliveryStatus, HttpMethod, RetryPolicy, WebhookDescriptor, WebhookLogRow,
    MAX_RESPONSE_BODY_BYTES,
};
pub use workflow::{
    ActionStep, ApprovalStep, ConditionStep, HistoryEntry, InstanceStatus, StepBody,
    WorkflowAction, WorkflowActionKind, WorkflowDefinition, WorkflowInstance, WorkflowStep,
    WorkflowTrigger, GOTO_END,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_validate_requires_primary_key() {
        let e = EntityDescriptor {
            name: "orders".into(),
            table_name: "orders".into(),
            primary_key: "id".into(),
            pk_generation: PkGeneration::Database,
            fields: vec![FieldDescriptor {
                name: "total".into(),
                field_type: FieldType::Number,
                required: true,
                nullable: false,
                enum_values: None,
                default: None,
                auto_fill: AutoFillPolicy::None,
            }],
            soft_delete: false,
        };
        assert!(matches!(e.validate(), Err(DomainError::MissingPrimaryKey(_))));
    }

    #[test]
    fn entity_validate_requires_deleted_at_for_soft_delete() {
        let e = EntityDescriptor {
            name: "orders".into(),
            table_name: "orders".into(),
            primary_key: "id".into(),
            pk_generation: PkGeneration::Database,
            fields: vec![FieldDescriptor {
                name: "id".into(),
                field_type: FieldType::String,
                required: true,
                nullable: false,
                enum_values: None,
                default: None,
                auto_fill: AutoFillPolicy::None,
            }],
            soft_delete: true,
        };
        assert!(matches!(e.validate(), Err(DomainError::MissingDeletedAt(_))));
    }

    #[test]
    fn workflow_definition_validate_catches_unresolved_goto() {
        let def = WorkflowDefinition {
            id: "wf1".into(),
            name: "test".into(),
            trigger: WorkflowTrigger {
                entity: "orders".into(),
                state_field: "status".into(),
                target_state: "submitted".into(),
            },
            context_mapping: Default::default(),
            steps: vec![WorkflowStep {
                id: "step1".into(),
                body: StepBody::Action(ActionStep {
                    actions: vec![],
                    then: "missing_step".into(),
                }),
            }],
        };
        assert!(def.validate().is_err());
    }
}
