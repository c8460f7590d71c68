use thiserror::Error;

/// Failure compiling an expression string into a [`crate::CompiledExpr`].
/// Distinct from [`EvalError`] per §4.1: callers map compile failures to
/// validation errors at descriptor-load time, runtime failures to
/// per-evaluation errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unexpected end of expression")]
    UnexpectedEof,
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
    #[error("expected closing parenthesis")]
    ExpectedCloseParen,
    #[error("empty expression")]
    Empty,
}

/// Failure evaluating a compiled expression against an environment.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("EVAL_TYPE: expected boolean result, got {0}")]
    NotBoolean(String),
    #[error("type error: cannot apply '{op}' to the given operands")]
    TypeMismatch { op: &'static str },
    #[error("division by zero")]
    DivisionByZero,
}
