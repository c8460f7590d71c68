use std::sync::OnceLock;

use metaflow_expr::CompiledExpr;
use serde::{Deserialize, Serialize};

/// Only `before_write` is in scope; the enum still names the other hooks
/// from the glossary so descriptors loaded from a wider registry round-trip
/// cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    BeforeWrite,
    AfterWrite,
    BeforeDelete,
    AfterDelete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Field,
    Expression,
    Computed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOperator {
    Min,
    Max,
    MinLength,
    MaxLength,
    Pattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Field-rule fields.
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub operator: Option<FieldOperator>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub pattern: Option<String>,
    /// Expression-rule / computed-rule source.
    #[serde(default)]
    pub expression: Option<String>,
    pub message: String,
    #[serde(default)]
    pub stop_on_fail: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub entity: String,
    pub hook: Hook,
    pub kind: RuleKind,
    pub definition: RuleDefinition,
    pub priority: i32,
    pub active: bool,
    /// Insertion order within the owning registry; used as the
    /// deterministic tie-break after priority (§4.2).
    #[serde(default)]
    pub sequence: u64,
    #[serde(skip)]
    compiled_expr: OnceLock<Result<CompiledExpr, metaflow_expr::CompileError>>,
    #[serde(skip)]
    compiled_pattern: OnceLock<Result<regex::Regex, regex::Error>>,
}

impl Rule {
    /// Compiles (once) and returns the rule's expression, for
    /// `RuleKind::Expression` / `RuleKind::Computed` rules.
    pub fn compiled_expression(&self) -> Result<&CompiledExpr, &metaflow_expr::CompileError> {
        let src = self.definition.expression.as_deref().unwrap_or_default();
        self.compiled_expr
            .get_or_init(|| CompiledExpr::compile(src))
            .as_ref()
    }

    /// Compiles (once) and returns the rule's `pattern` regex, for the
    /// field-rule `pattern` operator.
    pub fn compiled_pattern(&self) -> Result<&regex::Regex, &regex::Error> {
        let src = self.definition.pattern.as_deref().unwrap_or_default();
        self.compiled_pattern
            .get_or_init(|| regex::Regex::new(src))
            .as_ref()
    }
}
