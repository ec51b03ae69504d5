//! The static tool catalogue for Steward.
//!
//! Tools let the tool-use loop and the workflow executor act on the
//! task/project store and the memory managers:
//! task and project CRUD, annotations, activity history, disambiguation
//! and template listing.

pub mod annotate;
pub mod args;
pub mod entity;
pub mod history;
pub mod selection;
pub mod task_store;
pub mod templates;

pub use annotate::AnnotateTool;
pub use entity::{EntityOp, EntityTool};
pub use history::{GetActivityTool, QueryHistoryTool};
pub use selection::ResolveDisambiguationTool;
pub use task_store::InMemoryTaskStore;
pub use templates::ListTemplatesTool;

use std::sync::Arc;
use steward_core::task::{EntityKind, TaskStore};
use steward_core::tool::ToolRegistry;
use steward_memory::MemorySystem;

/// Build the full static catalogue over a task store and memory system.
pub fn default_catalogue(store: Arc<dyn TaskStore>, memory: Arc<MemorySystem>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for kind in [EntityKind::Task, EntityKind::Project] {
        for tool in EntityTool::all(kind, store.clone()) {
            registry.register(Box::new(tool));
        }
    }
    for tool in AnnotateTool::all(store) {
        registry.register(Box::new(tool));
    }
    registry.register(Box::new(GetActivityTool::new(memory.clone())));
    registry.register(Box::new(QueryHistoryTool::new(memory.clone())));
    registry.register(Box::new(ResolveDisambiguationTool::new(memory.clone())));
    registry.register(Box::new(ListTemplatesTool::new(memory)));
    registry
}
