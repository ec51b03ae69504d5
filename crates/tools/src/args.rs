//! Argument helpers shared by the tools.

use serde_json::Value;
use steward_core::error::{StoreError, ToolError};
use steward_core::task::{EntityKind, EntityRecord, TaskStore};
use steward_core::tool::ToolResult;

/// A non-empty trimmed string argument.
pub fn opt_str(args: &Value, name: &str) -> Option<String> {
    args.get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

pub fn required_str(args: &Value, name: &str) -> Result<String, ToolError> {
    opt_str(args, name).ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{name}' argument")))
}

/// Integer argument, accepting numbers and numeric strings.
pub fn opt_usize(args: &Value, name: &str) -> Option<usize> {
    match args.get(name)? {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn opt_bool(args: &Value, name: &str) -> bool {
    match args.get(name) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.to_lowercase().as_str(), "true" | "yes" | "1"),
        _ => false,
    }
}

/// `"task"` unless the arguments say `"project"`.
pub fn entity_kind(args: &Value) -> EntityKind {
    match opt_str(args, "entity_type").as_deref() {
        Some("project") => EntityKind::Project,
        _ => EntityKind::Task,
    }
}

/// Map a store error into a tool result. Business failures become
/// structured `{success: false}` results; backend failures are errors.
pub fn store_failure(tool_name: &str, err: StoreError) -> Result<ToolResult, ToolError> {
    match err {
        StoreError::NotFound { .. } | StoreError::Invalid { .. } => Ok(ToolResult::failure(err.to_string())),
        StoreError::Backend(reason) => Err(ToolError::ExecutionFailed {
            tool_name: tool_name.to_string(),
            reason,
        }),
    }
}

/// Resolve a project by name: exact (case-insensitive) title first, then a
/// single search hit. `Ok(None)` when nothing or several things match.
pub async fn resolve_project(store: &dyn TaskStore, name: &str) -> Result<Option<EntityRecord>, StoreError> {
    let hits = store.search(EntityKind::Project, name, 10).await?;
    if let Some(exact) = hits.iter().find(|p| p.title.eq_ignore_ascii_case(name.trim())) {
        return Ok(Some(exact.clone()));
    }
    if hits.len() == 1 {
        return Ok(hits.into_iter().next());
    }
    Ok(None)
}

/// Entity JSON with the parent project's title attached when known.
pub async fn entity_json(store: &dyn TaskStore, record: &EntityRecord) -> Value {
    let mut value = serde_json::to_value(record).unwrap_or(Value::Null);
    if let (Some(project_id), Some(map)) = (&record.project_id, value.as_object_mut()) {
        if let Ok(project) = store.get(EntityKind::Project, project_id).await {
            map.insert("project".into(), Value::String(project.title));
        }
    }
    value
}
