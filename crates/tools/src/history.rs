//! Episodic history tools: `get_activity` and `query_history`.

use crate::args::{opt_bool, opt_str, opt_usize};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use steward_core::error::ToolError;
use steward_core::tool::{Tool, ToolContext, ToolResult};
use steward_memory::{ActionRecord, EpisodeFilter, MemorySystem};

const DEFAULT_DAYS: i64 = 7;
const DEFAULT_LIMIT: usize = 20;

fn filter_from_args(args: &Value) -> EpisodeFilter {
    let days = opt_usize(args, "days").map(|d| d as i64).unwrap_or(DEFAULT_DAYS);
    EpisodeFilter {
        since: Some(Utc::now() - Duration::days(days)),
        action_type: opt_str(args, "action_type"),
        entity_type: opt_str(args, "entity_type"),
        entity_id: opt_str(args, "entity_id"),
        project: opt_str(args, "project"),
        session_id: None,
        limit: Some(opt_usize(args, "limit").unwrap_or(DEFAULT_LIMIT)),
    }
}

fn actions_result(actions: &[ActionRecord]) -> ToolResult {
    let items: Vec<Value> = actions
        .iter()
        .map(|a| {
            json!({
                "summary": a.summary(),
                "action_type": a.action_type,
                "entity_type": a.entity_type,
                "entity": a.entity,
                "entity_id": a.entity_id,
                "project": a.project,
                "at": a.created_at.to_rfc3339(),
            })
        })
        .collect();
    ToolResult::ok(json!({ "success": true, "count": items.len(), "actions": items }))
}

fn memory_failure(tool_name: &str, err: impl std::fmt::Display) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: tool_name.to_string(),
        reason: err.to_string(),
    }
}

fn filter_properties() -> Value {
    json!({
        "days": {"type": "integer", "description": "Look back this many days", "default": DEFAULT_DAYS},
        "action_type": {"type": "string", "description": "e.g. create_task, complete_task"},
        "entity_type": {"type": "string", "enum": ["task", "project"]},
        "entity_id": {"type": "string"},
        "project": {"type": "string"},
        "limit": {"type": "integer", "default": DEFAULT_LIMIT}
    })
}

/// Recent activity, newest first.
pub struct GetActivityTool {
    memory: Arc<MemorySystem>,
}

impl GetActivityTool {
    pub fn new(memory: Arc<MemorySystem>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for GetActivityTool {
    fn name(&self) -> &str {
        "get_activity"
    }

    fn description(&self) -> &str {
        "List the user's recent actions (created, completed, updated tasks and projects), newest first."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": filter_properties() })
    }

    async fn execute(&self, ctx: &ToolContext, arguments: Value) -> Result<ToolResult, ToolError> {
        let actions = self
            .memory
            .episodic
            .list(&ctx.user_id, &filter_from_args(&arguments))
            .await
            .map_err(|e| memory_failure(self.name(), e))?;
        Ok(actions_result(&actions))
    }
}

/// Filtered or semantic history, optionally summarized.
pub struct QueryHistoryTool {
    memory: Arc<MemorySystem>,
}

impl QueryHistoryTool {
    pub fn new(memory: Arc<MemorySystem>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for QueryHistoryTool {
    fn name(&self) -> &str {
        "query_history"
    }

    fn description(&self) -> &str {
        "Query the user's action history. mode=filter narrows by type/entity/project/time; \
         mode=semantic finds actions similar to a free-text query. summarize=true returns \
         counts by type, project and agent plus a short timeline."
    }

    fn parameters_schema(&self) -> Value {
        let mut properties = filter_properties();
        if let Some(map) = properties.as_object_mut() {
            map.insert("mode".into(), json!({"type": "string", "enum": ["filter", "semantic"], "default": "filter"}));
            map.insert("query".into(), json!({"type": "string", "description": "Free text for semantic mode"}));
            map.insert("summarize".into(), json!({"type": "boolean", "default": false}));
        }
        json!({ "type": "object", "properties": properties })
    }

    async fn execute(&self, ctx: &ToolContext, arguments: Value) -> Result<ToolResult, ToolError> {
        let filter = filter_from_args(&arguments);

        if opt_bool(&arguments, "summarize") {
            let narrative = self
                .memory
                .episodic
                .narrative(&ctx.user_id, filter.since)
                .await
                .map_err(|e| memory_failure(self.name(), e))?;
            let body = serde_json::to_value(&narrative).map_err(|e| memory_failure(self.name(), e))?;
            return Ok(ToolResult::ok(json!({ "success": true, "summary": body })));
        }

        let actions = match opt_str(&arguments, "mode").as_deref() {
            Some("semantic") => {
                let query = opt_str(&arguments, "query")
                    .ok_or_else(|| ToolError::InvalidArguments("Semantic mode needs a 'query'".into()))?;
                let limit = filter.limit.unwrap_or(DEFAULT_LIMIT);
                self.memory.episodic.search(&ctx.user_id, &query, &filter, limit).await
            }
            Some("filter") | None => self.memory.episodic.list(&ctx.user_id, &filter).await,
            Some(other) => {
                return Err(ToolError::InvalidArguments(format!("Unknown mode '{other}'")));
            }
        }
        .map_err(|e| memory_failure(self.name(), e))?;

        Ok(actions_result(&actions))
    }
}
