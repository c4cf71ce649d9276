use serde::Serialize;

/// Unified error type for every engine and service in the crate.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Insufficient residual quantity: {0}")]
    InsufficientResidual(String),

    #[error("Search index error: {0}")]
    SearchIndexError(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Audit log error: {0}")]
    AuditLogError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    /// Shapes a `not found` error for an entity with a displayable key.
    pub fn not_found(entity: &str, key: impl std::fmt::Display) -> Self {
        ServiceError::NotFound(format!("{} {} not found", entity, key))
    }

    /// True when the error is recoverable by retrying the operation later.
    /// The outbox worker uses this to decide between re-queueing and
    /// dropping a sync attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_) | Self::SearchIndexError(_) | Self::InternalError(_)
        )
    }
}
