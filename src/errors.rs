use thiserror::Error;

/// Custom error types for JobRs
#[derive(Error, Debug)]
pub enum JobRsError {
    /// Error related to Redis operations
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Error related to serialization or deserialization of a job record
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A job record was written by a newer, unknown schema version
    #[error("Unsupported job record version: {0}")]
    UnsupportedVersion(u32),

    /// The backing store could not be reached
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Error when an invalid argument is provided
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Error in the queue configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Operation not allowed while workers are running
    #[error("Queue is running")]
    QueueRunning,

    /// Error related to system time operations
    #[error("System time error: {0}")]
    SystemTimeError(String),
}

impl From<serde_json::Error> for JobRsError {
    fn from(err: serde_json::Error) -> Self {
        JobRsError::SerializationError(err.to_string())
    }
}

/// Result type for JobRs operations
pub type Result<T> = std::result::Result<T, JobRsError>;
