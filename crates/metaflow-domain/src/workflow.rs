use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use metaflow_expr::CompiledExpr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `end` is the terminal sentinel a step's goto may resolve to; any other
/// string must name an existing step id (validated by
/// [`WorkflowDefinition::validate`]).
pub const GOTO_END: &str = "end";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTrigger {
    pub entity: String,
    pub state_field: String,
    pub target_state: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowActionKind {
    SetField,
    /// Recognized, no persistence effect in scope (§9 open question).
    Webhook,
    /// Recognized, no persistence effect in scope (§9 open question).
    CreateRecord,
    /// Recognized, no persistence effect in scope (§9 open question).
    SendEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowAction {
    pub kind: WorkflowActionKind,
    /// Dot-path into `{context: instance.context}` resolving the target
    /// record id, for `set_field`.
    #[serde(default)]
    pub record_id_path: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionStep {
    pub actions: Vec<WorkflowAction>,
    pub then: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConditionStep {
    pub expression: String,
    pub on_true: String,
    pub on_false: String,
    #[serde(skip)]
    compiled: OnceLock<Result<CompiledExpr, metaflow_expr::CompileError>>,
}

impl ConditionStep {
    pub fn compiled(&self) -> Result<&CompiledExpr, &metaflow_expr::CompileError> {
        self.compiled
            .get_or_init(|| CompiledExpr::compile(&self.expression))
            .as_ref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalStep {
    /// Raw duration grammar `\d+[hms]`, parsed at trigger time.
    #[serde(default)]
    pub timeout: Option<String>,
    pub on_approve: String,
    pub on_reject: String,
    pub on_timeout: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepBody {
    Action(ActionStep),
    Condition(ConditionStep),
    Approval(ApprovalStep),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    #[serde(flatten)]
    pub body: StepBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    pub trigger: WorkflowTrigger,
    /// context key -> dot-path into `{trigger.record_id, trigger.record}`.
    pub context_mapping: std::collections::BTreeMap<String, String>,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn initial_step_id(&self) -> Option<&str> {
        self.steps.first().map(|s| s.id.as_str())
    }

    /// Validates invariant: every goto resolves to an existing step or
    /// `end`.
    pub fn validate(&self) -> Result<(), String> {
        let resolves = |goto: &str| goto == GOTO_END || self.step(goto).is_some();
        for step in &self.steps {
            match &step.body {
                StepBody::Action(a) => {
                    if !resolves(&a.then) {
                        return Err(format!("step '{}': unresolved goto '{}'", step.id, a.then));
                    }
                }
                StepBody::Condition(c) => {
                    if !resolves(&c.on_true) || !resolves(&c.on_false) {
                        return Err(format!("step '{}': unresolved condition goto", step.id));
                    }
                }
                StepBody::Approval(ap) => {
                    if !resolves(&ap.on_approve) || !resolves(&ap.on_reject) || !resolves(&ap.on_timeout) {
                        return Err(format!("step '{}': unresolved approval goto", step.id));
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step: String,
    pub status: String,
    #[serde(default)]
    pub actor: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: InstanceStatus,
    /// Empty when terminal.
    pub current_step: String,
    pub current_step_deadline: Option<DateTime<Utc>>,
    pub context: serde_json::Value,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    pub fn new(
        definition: &WorkflowDefinition,
        context: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        WorkflowInstance {
            id: Uuid::new_v4(),
            workflow_id: definition.id.clone(),
            workflow_name: definition.name.clone(),
            status: InstanceStatus::Running,
            current_step: definition.initial_step_id().unwrap_or_default().to_string(),
            current_step_deadline: None,
            context,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, InstanceStatus::Running)
    }
}
