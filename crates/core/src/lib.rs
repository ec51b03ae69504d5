//! # Steward Core
//!
//! Domain types, traits, and error definitions for the Steward task assistant.
//! This crate has **zero framework dependencies**: it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator is defined as a trait here. Implementations live in their
//! respective crates (or outside the workspace entirely, for the task store and
//! capability catalogue). This enables:
//! - Swapping implementations via configuration
//! - Easy testing with scripted/mock implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod capability;
pub mod embedding;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod provider;
pub mod task;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use capability::{CapabilityCatalogue, CapabilityDescriptor, ContentChunk, chunks_to_text};
pub use embedding::{Embedder, ProviderEmbedder};
pub use error::{
    CapabilityError, Error, MemoryError, ProviderError, Result, StoreError, ToolError,
};
pub use event::{DomainEvent, EventBus};
pub use memory::{Collection, MemoryRecord, MemoryStore, RecordFilter, ScoredRecord};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolChoice, ToolDefinition};
pub use task::{
    AnnotationKind, EntityFilter, EntityKind, EntityPatch, EntityRecord, EntityStatus, NewEntity,
    TaskStore,
};
pub use tool::{Tool, ToolCall, ToolContext, ToolRegistry, ToolResult};
