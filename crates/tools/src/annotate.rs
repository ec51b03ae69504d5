//! Annotation tools: `add_note`, `add_context`, `add_decision`, `add_method`.

use crate::args::{entity_json, entity_kind, required_str, store_failure};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use steward_core::error::ToolError;
use steward_core::task::{AnnotationKind, TaskStore};
use steward_core::tool::{Tool, ToolContext, ToolResult};

pub struct AnnotateTool {
    annotation: AnnotationKind,
    store: Arc<dyn TaskStore>,
}

impl AnnotateTool {
    pub fn new(annotation: AnnotationKind, store: Arc<dyn TaskStore>) -> Self {
        Self { annotation, store }
    }

    pub fn all(store: Arc<dyn TaskStore>) -> Vec<AnnotateTool> {
        [
            AnnotationKind::Note,
            AnnotationKind::Context,
            AnnotationKind::Decision,
            AnnotationKind::Method,
        ]
        .into_iter()
        .map(|kind| AnnotateTool::new(kind, store.clone()))
        .collect()
    }
}

#[async_trait]
impl Tool for AnnotateTool {
    fn name(&self) -> &str {
        match self.annotation {
            AnnotationKind::Note => "add_note",
            AnnotationKind::Context => "add_context",
            AnnotationKind::Decision => "add_decision",
            AnnotationKind::Method => "add_method",
        }
    }

    fn description(&self) -> &str {
        match self.annotation {
            AnnotationKind::Note => "Attach a free-form note to a task or project.",
            AnnotationKind::Context => "Record background context on a task or project.",
            AnnotationKind::Decision => "Record a decision made about a task or project.",
            AnnotationKind::Method => "Record how a task or project was (or should be) done.",
        }
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "string", "description": "Task or project id"},
                "entity_type": {"type": "string", "enum": ["task", "project"], "default": "task"},
                "text": {"type": "string"}
            },
            "required": ["id", "text"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, arguments: Value) -> Result<ToolResult, ToolError> {
        let id = required_str(&arguments, "id")?;
        let text = required_str(&arguments, "text")?;
        let kind = entity_kind(&arguments);

        match self.store.append(kind, &id, self.annotation, &text).await {
            Ok(record) => {
                let entity = entity_json(self.store.as_ref(), &record).await;
                Ok(ToolResult::ok(json!({ "success": true, kind.as_str(): entity })))
            }
            Err(e) => store_failure(self.name(), e),
        }
    }
}
