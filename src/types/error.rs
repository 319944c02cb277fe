//! Error types for granary

/// Main error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum GranaryError {
    /// The caller's version token no longer matches the stored document.
    /// Nothing was mutated; the caller must re-read before retrying.
    #[error("Concurrency conflict on {grain}: provided ETag {provided} does not match stored ETag {current}")]
    ConcurrencyConflict {
        grain: String,
        provided: String,
        current: String,
    },

    #[error("Durable store error: {0}")]
    DurableStore(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GranaryError {
    /// Whether this error is a version-token mismatch.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

// Implement From conversions for common error types

impl From<mongodb::error::Error> for GranaryError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::DurableStore(err.to_string())
    }
}

impl From<serde_json::Error> for GranaryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, GranaryError>;
