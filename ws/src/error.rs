//! Store error types

use thiserror::Error;

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Version conflict on {collection} id {id}: expected {expected}")]
    Conflict {
        collection: &'static str,
        id: i64,
        expected: i64,
    },

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    /// Check if the caller may retry this operation with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _) => match code.code {
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    StoreError::Unavailable(err.to_string())
                }
                rusqlite::ErrorCode::ConstraintViolation => StoreError::Integrity(err.to_string()),
                _ => StoreError::Integrity(err.to_string()),
            },
            _ => StoreError::Integrity(err.to_string()),
        }
    }
}
