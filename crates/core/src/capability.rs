//! Capability catalogue: dynamically discoverable external services.
//!
//! A catalogue lists `{service, name, description, schema}` descriptors and
//! invokes them by name with JSON arguments. Only the discovery cache talks
//! to it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::CapabilityError;

/// One discoverable operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// The service exposing the operation
    pub service: String,

    /// The operation name
    pub name: String,

    pub description: String,

    /// JSON Schema of the operation's arguments
    #[serde(default)]
    pub schema: serde_json::Value,
}

/// A piece of content returned by an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentChunk {
    Text { text: String },
    Data { value: serde_json::Value },
}

impl ContentChunk {
    pub fn text(text: impl Into<String>) -> Self {
        ContentChunk::Text { text: text.into() }
    }
}

/// Flatten chunks into one text body.
pub fn chunks_to_text(chunks: &[ContentChunk]) -> String {
    chunks
        .iter()
        .map(|c| match c {
            ContentChunk::Text { text } => text.clone(),
            ContentChunk::Data { value } => value.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
pub trait CapabilityCatalogue: Send + Sync {
    /// Handshake and list the currently available operations.
    async fn list_capabilities(&self) -> std::result::Result<Vec<CapabilityDescriptor>, CapabilityError>;

    /// Invoke one operation.
    async fn invoke(
        &self,
        service: &str,
        operation: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<Vec<ContentChunk>, CapabilityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_flatten_in_order() {
        let chunks = vec![
            ContentChunk::text("Sunny"),
            ContentChunk::Data { value: serde_json::json!({"temp": 21}) },
        ];
        assert_eq!(chunks_to_text(&chunks), "Sunny\n{\"temp\":21}");
    }

    #[test]
    fn chunk_serialization_is_tagged() {
        let json = serde_json::to_string(&ContentChunk::text("hi")).unwrap();
        assert_eq!(json, r#"{"type":"text","text":"hi"}"#);
    }
}
