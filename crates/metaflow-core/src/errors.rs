//! The shared error taxonomy (§7): one enum, reused at every crate
//! boundary in this workspace rather than per-crate error types, since the
//! taxonomy itself is the thing callers (an HTTP layer, out of scope here)
//! map onto status codes.

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct ValidationDetail {
    pub field: Option<String>,
    pub rule: Option<String>,
    pub message: String,
}

#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("validation failed")]
    ValidationFailed { details: Vec<ValidationDetail> },
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    #[error("unknown field: {0}")]
    UnknownField(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("webhook failed: {0}")]
    WebhookFailed(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable machine-readable code, per §7's "kinds, not type names".
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::ValidationFailed { .. } => "VALIDATION_FAILED",
            EngineError::UnknownEntity(_) => "UNKNOWN_ENTITY",
            EngineError::UnknownField(_) => "UNKNOWN_FIELD",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::InvalidPayload(_) => "INVALID_PAYLOAD",
            EngineError::InvalidState(_) => "INVALID_STATE",
            EngineError::WebhookFailed(_) => "WEBHOOK_FAILED",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status an enclosing request handler would map this to (§6);
    /// this crate never constructs an HTTP response itself.
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::ValidationFailed { .. } => 422,
            EngineError::UnknownEntity(_) => 404,
            EngineError::UnknownField(_) => 400,
            EngineError::NotFound(_) => 404,
            EngineError::Conflict(_) => 409,
            EngineError::InvalidPayload(_) => 400,
            EngineError::InvalidState(_) => 422,
            EngineError::WebhookFailed(_) => 502,
            EngineError::Internal(_) => 500,
        }
    }

    pub fn validation(details: Vec<ValidationDetail>) -> Self {
        EngineError::ValidationFailed { details }
    }

    pub fn single_validation(field: Option<&str>, rule: &str, message: impl Into<String>) -> Self {
        EngineError::ValidationFailed {
            details: vec![ValidationDetail {
                field: field.map(str::to_string),
                rule: Some(rule.to_string()),
                message: message.into(),
            }],
        }
    }
}
