//! Error types for the Steward domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Steward operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Task/project store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- External capability errors ---
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure came from an exceeded time bound.
    ///
    /// Timeouts are surfaced to the caller as retryable and are never
    /// retried inside the same turn.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Provider(ProviderError::Timeout(_))
                | Error::Tool(ToolError::Timeout { .. })
                | Error::Capability(CapabilityError::Timeout { .. })
        )
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// The backend has no similarity index; callers fall back to exact matching.
    #[error("Similarity index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Corrupt record {collection}/{key}: {reason}")]
    Corrupt {
        collection: String,
        key: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("Invalid {kind} data: {reason}")]
    Invalid { kind: String, reason: String },

    #[error("Store backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("Capability service '{0}' is unavailable")]
    Unavailable(String),

    #[error("Capability '{service}/{operation}' not found")]
    NotFound { service: String, operation: String },

    #[error("Capability '{service}/{operation}' failed: {reason}")]
    InvocationFailed {
        service: String,
        operation: String,
        reason: String,
    },

    #[error("Capability {stage} timed out after {timeout_secs}s")]
    Timeout { stage: String, timeout_secs: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn store_not_found_names_kind_and_id() {
        let err = Error::Store(StoreError::NotFound {
            kind: "task".into(),
            id: "t-42".into(),
        });
        assert!(err.to_string().contains("task not found"));
        assert!(err.to_string().contains("t-42"));
    }

    #[test]
    fn timeouts_are_classified() {
        let err = Error::Capability(CapabilityError::Timeout {
            stage: "invocation".into(),
            timeout_secs: 30,
        });
        assert!(err.is_timeout());
        assert!(Error::Provider(ProviderError::Timeout("slow".into())).is_timeout());
        assert!(!Error::Internal("boom".into()).is_timeout());
    }
}
