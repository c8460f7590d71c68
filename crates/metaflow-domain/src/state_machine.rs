use std::sync::OnceLock;

use metaflow_expr::CompiledExpr;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SetField,
    Webhook,
    /// Recognized, no side effect in scope (§9 open question: preserve).
    CreateRecord,
    /// Recognized, no side effect in scope (§9 open question: preserve).
    SendEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    /// `set_field` target field name.
    #[serde(default)]
    pub field: Option<String>,
    /// `set_field` literal value; `"now"` is resolved to the current UTC
    /// timestamp at execution time, anything else is written verbatim.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    /// `webhook` action's webhook descriptor id.
    #[serde(default)]
    pub webhook_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Transition {
    pub from: Vec<String>,
    pub to: String,
    #[serde(default)]
    pub guard: Option<String>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(skip)]
    compiled_guard: OnceLock<Result<CompiledExpr, metaflow_expr::CompileError>>,
}

impl Transition {
    pub fn compiled_guard(&self) -> Option<Result<&CompiledExpr, &metaflow_expr::CompileError>> {
        let src = self.guard.as_deref()?;
        Some(
            self.compiled_guard
                .get_or_init(|| CompiledExpr::compile(src))
                .as_ref(),
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StateMachine {
    pub id: String,
    pub entity: String,
    pub field: String,
    pub initial_state: String,
    pub transitions: Vec<Transition>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl StateMachine {
    /// Finds the transition whose destination equals `to` and whose source
    /// set contains `from`, per §4.3's update-path search.
    pub fn find_transition(&self, from: &str, to: &str) -> Option<&Transition> {
        self.transitions
            .iter()
            .find(|t| t.to == to && t.from.iter().any(|s| s == from))
    }
}
