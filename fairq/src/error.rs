//! Error type definitions
//!
//! Provides all possible error types in the fairq crate.

/// Result type alias for fairq
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the fairq crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Redis-related errors
    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::RedisError),

    /// In-process store errors
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Task validation errors
    #[error("Task validation error: {0}")]
    Validation(String),

    /// Handler processing errors
    #[error("Handler error: {0}")]
    Handler(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registration errors
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Shutdown requested
    #[error("Shutdown requested")]
    Shutdown,
}

impl Error {
    /// Check if the error is retryable
    ///
    /// Only store errors qualify. The queue never retries on its own, so the
    /// caller decides the cadence.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Redis(_) | Error::Store(_))
    }

    /// Check if the error is fatal (non-recoverable)
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::Config(_) | Error::Shutdown)
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(e: prometheus::Error) -> Self {
        Error::Metrics(e.to_string())
    }
}
