//! Redis error types.

use thiserror::Error;

/// Result type for Redis operations.
pub type Result<T> = std::result::Result<T, RedisError>;

#[derive(Debug, Error)]
pub enum RedisError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Pool error: {0}")]
    Pool(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl RedisError {
    /// Whether the server could not be reached at all, as opposed to a
    /// command that reached Redis and failed there.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Pool(_) | Self::Timeout => true,
            Self::Redis(e) => {
                e.is_io_error()
                    || e.is_connection_refusal()
                    || e.is_connection_dropped()
                    || e.is_timeout()
            }
            Self::Config(_) | Self::Serialization(_) => false,
        }
    }
}

impl<E> From<bb8::RunError<E>> for RedisError
where
    E: std::error::Error + 'static,
{
    fn from(err: bb8::RunError<E>) -> Self {
        match err {
            bb8::RunError::TimedOut => Self::Timeout,
            bb8::RunError::User(e) => Self::Pool(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for RedisError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_classification() {
        assert!(RedisError::Connection("refused".into()).is_unavailable());
        assert!(RedisError::Pool("exhausted".into()).is_unavailable());
        assert!(RedisError::Timeout.is_unavailable());
        assert!(!RedisError::Config("bad url".into()).is_unavailable());
        assert!(!RedisError::Serialization("eof".into()).is_unavailable());
    }
}
