//! Error types for queue operations.

use courier_redis::RedisError;
use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue errors.
///
/// Unknown message ids are not errors; see [`FailOutcome`](crate::FailOutcome)
/// and [`RequeueOutcome`](crate::RequeueOutcome).
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing store is not configured or cannot be reached.
    #[error("Queue store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store answered with an error.
    #[error("Queue store error: {0}")]
    Store(String),

    /// Rejected input. Nothing was mutated.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A worker handler reported a failure.
    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Worker not running")]
    WorkerNotRunning,

    #[error("Worker already running")]
    WorkerAlreadyRunning,
}

impl QueueError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<RedisError> for QueueError {
    fn from(err: RedisError) -> Self {
        if err.is_unavailable() {
            Self::StoreUnavailable(err.to_string())
        } else {
            Self::Store(err.to_string())
        }
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        RedisError::from(err).into()
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_maps_to_unavailable() {
        let err: QueueError = RedisError::Timeout.into();
        assert!(err.is_unavailable());

        let err: QueueError = RedisError::Config("bad url".into()).into();
        assert!(!err.is_unavailable());
        assert!(matches!(err, QueueError::Store(_)));
    }

    #[test]
    fn test_validation_helper() {
        let err = QueueError::validation("max_attempts must be at least 1");
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "Invalid request: max_attempts must be at least 1");
    }
}
