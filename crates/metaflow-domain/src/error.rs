use thiserror::Error;

/// Descriptor-level validation failures — malformed metadata rejected
/// before it ever reaches the write pipeline (e.g. an entity with no
/// primary key field).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    #[error("entity '{0}' has no primary key field")]
    MissingPrimaryKey(String),
    #[error("soft-delete entity '{0}' has no deleted_at field")]
    MissingDeletedAt(String),
    #[error("relation '{0}' has no matching source entity descriptor")]
    UnresolvedRelationSource(String),
}
