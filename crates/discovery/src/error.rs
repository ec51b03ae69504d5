use steward_core::error::MemoryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Nothing in the catalogue could serve the request
    #[error("No suitable capability: {reason}")]
    NoSuitableCapability { reason: String },

    /// Handshake, proposal or invocation ran out of time; safe to retry
    #[error("Discovery {stage} timed out after {timeout_secs}s")]
    Timeout { stage: String, timeout_secs: u64 },

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl DiscoveryError {
    pub fn no_suitable(reason: impl Into<String>) -> Self {
        DiscoveryError::NoSuitableCapability { reason: reason.into() }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DiscoveryError::Timeout { .. })
    }
}
