//! Maps `sqlx` errors onto the semantic variants the rest of this crate
//! and `metaflow_core::EngineError` (§7) care about.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),
    #[error("not found")]
    NotFound,
    #[error("connection/pool error: {0}")]
    TransientIo(String),
    #[error("unknown database error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some("23505") => Self::UniqueViolation(db_err.message().to_string()),
                Some("23503") => Self::ForeignKeyViolation(db_err.message().to_string()),
                _ => Self::Unknown(db_err.message().to_string()),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::TransientIo(err.to_string())
            }
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl From<PersistenceError> for metaflow_core::EngineError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::UniqueViolation(msg) => metaflow_core::EngineError::Conflict(msg),
            PersistenceError::NotFound => metaflow_core::EngineError::NotFound("record not found".to_string()),
            other => metaflow_core::EngineError::Internal(other.to_string()),
        }
    }
}

impl From<PersistenceError> for metaflow_webhooks::error::WebhooksError {
    fn from(e: PersistenceError) -> Self {
        metaflow_webhooks::error::WebhooksError::LogStore(e.to_string())
    }
}

impl From<PersistenceError> for metaflow_workflow::WorkflowError {
    fn from(e: PersistenceError) -> Self {
        metaflow_workflow::WorkflowError::Store(e.to_string())
    }
}
