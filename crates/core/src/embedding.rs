//! Embedder trait: text to fixed-length vector.
//!
//! One embedder is shared by episodic search, workflow matching and the
//! discovery cache so their similarity scores are comparable.

use async_trait::async_trait;
use std::sync::Arc;
use crate::error::ProviderError;
use crate::provider::{EmbeddingRequest, Provider};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError>;
}

/// Adapts a `Provider` with embedding support into an `Embedder`.
pub struct ProviderEmbedder {
    provider: Arc<dyn Provider>,
    model: String,
}

impl ProviderEmbedder {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
        let response = self
            .provider
            .embed(EmbeddingRequest {
                model: self.model.clone(),
                inputs: vec![text.to_string()],
            })
            .await?;
        response.embeddings.into_iter().next().ok_or_else(|| ProviderError::ApiError {
            status_code: 200,
            message: "Embedding response contained no vectors".into(),
        })
    }
}
