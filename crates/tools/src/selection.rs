//! `resolve_disambiguation`: pick one of the session's pending candidates.

use crate::args::opt_usize;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use steward_core::error::ToolError;
use steward_core::tool::{Tool, ToolContext, ToolResult};
use steward_memory::{DisambiguationError, MemorySystem};

pub struct ResolveDisambiguationTool {
    memory: Arc<MemorySystem>,
}

impl ResolveDisambiguationTool {
    pub fn new(memory: Arc<MemorySystem>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for ResolveDisambiguationTool {
    fn name(&self) -> &str {
        "resolve_disambiguation"
    }

    fn description(&self) -> &str {
        "Choose one item from the most recent list of several matches, by its 1-based position."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "index": {"type": "integer", "minimum": 1, "description": "1-based position in the offered list"}
            },
            "required": ["index"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, arguments: Value) -> Result<ToolResult, ToolError> {
        let index = opt_usize(&arguments, "index")
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'index' argument".into()))?;

        match self.memory.disambiguation.resolve(&ctx.session_id, index).await {
            Ok(candidate) => Ok(ToolResult::ok(json!({ "success": true, "selected": candidate }))),
            Err(DisambiguationError::Memory(e)) => Err(ToolError::ExecutionFailed {
                tool_name: self.name().to_string(),
                reason: e.to_string(),
            }),
            Err(e) => Ok(ToolResult::failure(e.to_string())),
        }
    }
}
