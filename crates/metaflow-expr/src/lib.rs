//! A whitelisted, side-effect-free boolean/value expression evaluator.
//!
//! Expressions reference a named environment by dotted path
//! (`record.total`), support arithmetic/comparison/logical operators, and
//! nothing else: no function calls, no indexing by expression, no host
//! primitives. Compilation and evaluation are separate steps so callers can
//! cache the compiled form on the owning descriptor (a rule, a state-machine
//! transition, a webhook) and evaluate it repeatedly against different
//! environments.

mod ast;
mod error;
mod eval;
mod lexer;
mod parser;
mod value;

pub use error::{CompileError, EvalError};
pub use value::{env_from, resolve_path, Value};

/// An opaque, compiled expression. Descriptors hold this behind a
/// lazily-populated cache slot (see the `OnceLock` fields on
/// `metaflow-domain` descriptor types); nothing outside this crate
/// inspects its internals.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpr(ast::Expr);

impl CompiledExpr {
    pub fn compile(src: &str) -> Result<Self, CompileError> {
        parser::parse(src).map(CompiledExpr)
    }

    /// Evaluates to an arbitrary [`Value`].
    pub fn eval(&self, env: &Value) -> Result<Value, EvalError> {
        eval::eval(&self.0, env)
    }

    /// Evaluates in boolean context. A non-boolean result is an
    /// `EVAL_TYPE` failure per the explicit truthiness rule — booleans are
    /// never implicitly derived from non-bool values here.
    pub fn eval_bool(&self, env: &Value) -> Result<bool, EvalError> {
        match self.eval(env)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::NotBoolean(describe(&other))),
        }
    }
}

fn describe(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "bool".to_string(),
        Value::Number(_) => "number".to_string(),
        Value::String(_) => "string".to_string(),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: Vec<(&'static str, Value)>) -> Value {
        env_from(pairs)
    }

    #[test]
    fn dot_access_and_comparison() {
        let e = env(vec![(
            "record",
            Value::Object(
                vec![("total".to_string(), Value::Number(150.0))]
                    .into_iter()
                    .collect(),
            ),
        )]);
        let compiled = CompiledExpr::compile("record.total > 100").unwrap();
        assert_eq!(compiled.eval_bool(&e).unwrap(), true);
    }

    #[test]
    fn arithmetic_and_precedence() {
        let e = env(vec![]);
        let compiled = CompiledExpr::compile("1 + 2 * 3").unwrap();
        assert_eq!(compiled.eval(&e).unwrap(), Value::Number(7.0));
    }

    #[test]
    fn logical_operators() {
        let e = env(vec![]);
        let compiled = CompiledExpr::compile("true && !false || false").unwrap();
        assert_eq!(compiled.eval_bool(&e).unwrap(), true);
    }

    #[test]
    fn missing_path_yields_null_not_error() {
        let e = env(vec![]);
        let compiled = CompiledExpr::compile("record.total == null").unwrap();
        assert_eq!(compiled.eval_bool(&e).unwrap(), true);
    }

    #[test]
    fn non_bool_result_in_bool_context_is_eval_type_error() {
        let e = env(vec![]);
        let compiled = CompiledExpr::compile("1 + 1").unwrap();
        match compiled.eval_bool(&e) {
            Err(EvalError::NotBoolean(_)) => {}
            other => panic!("expected EVAL_TYPE error, got {:?}", other),
        }
    }

    #[test]
    fn string_comparison() {
        let e = env(vec![(
            "record",
            Value::Object(
                vec![("status".to_string(), Value::String("draft".into()))]
                    .into_iter()
                    .collect(),
            ),
        )]);
        let compiled = CompiledExpr::compile("record.status == 'draft'").unwrap();
        assert_eq!(compiled.eval_bool(&e).unwrap(), true);
    }

    #[test]
    fn compile_error_on_garbage() {
        assert!(CompiledExpr::compile("record.total >>").is_err());
    }
}
