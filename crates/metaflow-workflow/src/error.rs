use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum WorkflowError {
    #[error("unknown workflow definition: {0}")]
    UnknownDefinition(String),
    #[error("invalid deadline duration: {0}")]
    InvalidDuration(String),
    #[error("instance store error: {0}")]
    Store(String),
    #[error("instance {0} not found")]
    InstanceNotFound(uuid::Uuid),
    #[error("instance {0} is not running")]
    NotRunning(uuid::Uuid),
    #[error("instance {0} is not paused at an approval step")]
    NotAwaitingApproval(uuid::Uuid),
}

impl From<WorkflowError> for metaflow_core::EngineError {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::NotRunning(_) | WorkflowError::NotAwaitingApproval(_) => {
                metaflow_core::EngineError::InvalidState(e.to_string())
            }
            WorkflowError::InstanceNotFound(_) => metaflow_core::EngineError::NotFound(e.to_string()),
            other => metaflow_core::EngineError::Internal(other.to_string()),
        }
    }
}
