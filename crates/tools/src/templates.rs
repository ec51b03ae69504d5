//! `list_templates`: the procedural task templates available to plans.

use crate::args::opt_str;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use steward_core::error::ToolError;
use steward_core::tool::{Tool, ToolContext, ToolResult};
use steward_memory::MemorySystem;

pub struct ListTemplatesTool {
    memory: Arc<MemorySystem>,
}

impl ListTemplatesTool {
    pub fn new(memory: Arc<MemorySystem>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for ListTemplatesTool {
    fn name(&self) -> &str {
        "list_templates"
    }

    fn description(&self) -> &str {
        "List task templates (name, category, keywords and the tasks each would create)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "category": {"type": "string", "description": "Only templates in this category"}
            }
        })
    }

    async fn execute(&self, _ctx: &ToolContext, arguments: Value) -> Result<ToolResult, ToolError> {
        let category = opt_str(&arguments, "category").map(|c| c.to_lowercase());
        let templates: Vec<_> = self
            .memory
            .procedural
            .templates()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().to_string(),
                reason: e.to_string(),
            })?
            .into_iter()
            .filter(|t| category.as_deref().is_none_or(|c| t.category.to_lowercase() == c))
            .collect();

        Ok(ToolResult::ok(json!({
            "success": true,
            "count": templates.len(),
            "templates": templates,
        })))
    }
}
