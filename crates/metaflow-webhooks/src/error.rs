use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum WebhooksError {
    #[error("webhook condition failed to compile: {0}")]
    ConditionCompile(String),
    #[error("webhook condition evaluation error: {0}")]
    ConditionEval(String),
    #[error("webhook transport error: {0}")]
    Transport(String),
    #[error("webhook log store error: {0}")]
    LogStore(String),
}

impl From<WebhooksError> for metaflow_core::EngineError {
    fn from(e: WebhooksError) -> Self {
        metaflow_core::EngineError::WebhookFailed(e.to_string())
    }
}
