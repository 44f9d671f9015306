//! Error types for storage access and context queries

use olly_core::correlation_id::ValidationError;
use thiserror::Error;

/// Storage gateway errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage query failed: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Fatal context query errors
///
/// A missing correlation id is not an error; see `ContextLookup::NotFound`.
#[derive(Error, Debug)]
pub enum CorrelationError {
    #[error("Invalid correlation id: {0}")]
    Validation(#[from] ValidationError),

    #[error("Trace query exceeded {budget_ms}ms budget")]
    UpstreamTimeout { budget_ms: u64 },

    #[error("Trace query failed: {0}")]
    Storage(#[from] StorageError),
}

impl CorrelationError {
    /// Whether a caller retrying later could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CorrelationError::UpstreamTimeout { .. }
                | CorrelationError::Storage(StorageError::Unavailable(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CorrelationError::UpstreamTimeout { budget_ms: 5000 };
        assert_eq!(err.to_string(), "Trace query exceeded 5000ms budget");
        assert!(err.is_retryable());

        let err: CorrelationError = ValidationError::Empty.into();
        assert!(matches!(err, CorrelationError::Validation(_)));
        assert!(!err.is_retryable());

        let err: CorrelationError = StorageError::Query("bad column".into()).into();
        assert_eq!(err.to_string(), "Trace query failed: Storage query failed: bad column");
    }
}
