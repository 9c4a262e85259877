//! Error types for broker access

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Subscriber connection closed")]
    Closed,
}

impl From<livetail_core::Error> for Error {
    fn from(err: livetail_core::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for broker operations
pub type Result<T> = std::result::Result<T, Error>;
