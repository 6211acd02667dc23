//! Error types for provider calls.

use thiserror::Error;

/// Errors that can occur when talking to an LLM or embedding provider.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Network-level failure (connection, timeout).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The provider returned an error response.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to serialize a request or parse a response.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The provider does not support the requested operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Whether an error is transient and worth retrying.
///
/// Only network-level failures are retried; provider rejections and
/// configuration problems will not heal on retry.
pub fn is_retryable(error: &LlmError) -> bool {
    matches!(error, LlmError::Network(_))
}
