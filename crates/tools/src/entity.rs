//! Task and project tools.
//!
//! Both entity kinds get the same eight operations, so one `EntityTool`
//! parameterised by kind and operation backs all sixteen catalogue entries
//! (`list_tasks`, `create_project`, `complete_task`, ...).

use crate::args::{entity_json, opt_str, opt_usize, required_str, resolve_project, store_failure};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use steward_core::error::ToolError;
use steward_core::task::{EntityFilter, EntityKind, EntityPatch, EntityRecord, EntityStatus, NewEntity, TaskStore};
use steward_core::tool::{Tool, ToolContext, ToolResult};
use tracing::debug;

const DEFAULT_LIST_LIMIT: usize = 20;
const DEFAULT_SEARCH_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityOp {
    List,
    Search,
    Get,
    Create,
    Update,
    Complete,
    Start,
    Stop,
}

impl EntityOp {
    pub const ALL: [EntityOp; 8] = [
        EntityOp::List,
        EntityOp::Search,
        EntityOp::Get,
        EntityOp::Create,
        EntityOp::Update,
        EntityOp::Complete,
        EntityOp::Start,
        EntityOp::Stop,
    ];

    pub fn tool_name(&self, kind: EntityKind) -> String {
        let noun = kind.as_str();
        match self {
            EntityOp::List => format!("list_{noun}s"),
            EntityOp::Search => format!("search_{noun}s"),
            EntityOp::Get => format!("get_{noun}"),
            EntityOp::Create => format!("create_{noun}"),
            EntityOp::Update => format!("update_{noun}"),
            EntityOp::Complete => format!("complete_{noun}"),
            EntityOp::Start => format!("start_{noun}"),
            EntityOp::Stop => format!("stop_{noun}"),
        }
    }

    fn describe(&self, kind: EntityKind) -> String {
        let noun = kind.as_str();
        match self {
            EntityOp::List => format!("List {noun}s, optionally filtered by status, priority, project or assignee."),
            EntityOp::Search => format!("Search {noun}s by free text over titles and descriptions."),
            EntityOp::Get => format!("Get one {noun} by id (or by exact title)."),
            EntityOp::Create => format!("Create a new {noun}."),
            EntityOp::Update => format!("Update fields of an existing {noun} by id."),
            EntityOp::Complete => format!("Mark a {noun} as done."),
            EntityOp::Start => format!("Mark a {noun} as in progress."),
            EntityOp::Stop => format!("Move a {noun} back to open."),
        }
    }

    fn target_status(&self) -> Option<EntityStatus> {
        match self {
            EntityOp::Complete => Some(EntityStatus::Done),
            EntityOp::Start => Some(EntityStatus::InProgress),
            EntityOp::Stop => Some(EntityStatus::Open),
            _ => None,
        }
    }
}

pub struct EntityTool {
    kind: EntityKind,
    op: EntityOp,
    name: String,
    description: String,
    store: Arc<dyn TaskStore>,
}

impl EntityTool {
    pub fn new(kind: EntityKind, op: EntityOp, store: Arc<dyn TaskStore>) -> Self {
        Self {
            kind,
            op,
            name: op.tool_name(kind),
            description: op.describe(kind),
            store,
        }
    }

    /// All eight tools for one entity kind.
    pub fn all(kind: EntityKind, store: Arc<dyn TaskStore>) -> Vec<EntityTool> {
        EntityOp::ALL
            .iter()
            .map(|op| EntityTool::new(kind, *op, store.clone()))
            .collect()
    }

    fn single(&self, entity: Value) -> ToolResult {
        ToolResult::ok(json!({ "success": true, self.kind.as_str(): entity }))
    }

    async fn many(&self, records: &[EntityRecord], extra: Option<(&str, &str)>) -> ToolResult {
        let mut items = Vec::with_capacity(records.len());
        for record in records {
            items.push(entity_json(self.store.as_ref(), record).await);
        }
        let mut body = json!({
            "success": true,
            "count": items.len(),
            format!("{}s", self.kind.as_str()): items,
        });
        if let (Some((key, value)), Some(map)) = (extra, body.as_object_mut()) {
            map.insert(key.into(), Value::String(value.into()));
        }
        ToolResult::ok(body)
    }

    /// Project name → id for task arguments. `Err` carries a ready failure.
    async fn project_id(&self, args: &Value) -> Result<Option<String>, ToolResult> {
        if let Some(id) = opt_str(args, "project_id") {
            return Ok(Some(id));
        }
        let Some(name) = opt_str(args, "project") else {
            return Ok(None);
        };
        match resolve_project(self.store.as_ref(), &name).await {
            Ok(Some(project)) => Ok(Some(project.id)),
            Ok(None) => Err(ToolResult::failure(format!("project not found: {name}"))),
            Err(e) => Err(ToolResult::failure(e.to_string())),
        }
    }

    /// The entity an operation acts on: `id`, else an exact or unique title.
    async fn target(&self, args: &Value) -> Result<Result<String, ToolResult>, ToolError> {
        if let Some(id) = opt_str(args, "id") {
            return Ok(Ok(id));
        }
        let Some(title) = opt_str(args, "title") else {
            return Err(ToolError::InvalidArguments("Missing 'id' argument".into()));
        };
        let hits = match self.store.search(self.kind, &title, DEFAULT_SEARCH_LIMIT).await {
            Ok(hits) => hits,
            Err(e) => return store_failure(&self.name, e).map(Err),
        };
        if let Some(exact) = hits.iter().find(|r| r.title.eq_ignore_ascii_case(&title)) {
            return Ok(Ok(exact.id.clone()));
        }
        Ok(match hits.len() {
            1 => Ok(hits[0].id.clone()),
            0 => Err(ToolResult::failure(format!("{} not found: {title}", self.kind))),
            n => Err(ToolResult::failure(format!(
                "{n} {}s match '{title}'; search and pick one by id",
                self.kind
            ))),
        })
    }

    async fn run(&self, args: Value) -> Result<ToolResult, ToolError> {
        match self.op {
            EntityOp::List => {
                let project_id = match self.project_id(&args).await {
                    Ok(id) => id,
                    Err(failure) => return Ok(failure),
                };
                let filter = EntityFilter {
                    status: opt_str(&args, "status").and_then(|s| EntityStatus::parse(&s)),
                    priority: opt_str(&args, "priority").map(|p| p.to_lowercase()),
                    project_id,
                    assignee: opt_str(&args, "assignee"),
                    limit: Some(opt_usize(&args, "limit").unwrap_or(DEFAULT_LIST_LIMIT)),
                };
                match self.store.list(self.kind, &filter).await {
                    Ok(records) => Ok(self.many(&records, None).await),
                    Err(e) => store_failure(&self.name, e),
                }
            }
            EntityOp::Search => {
                let query = required_str(&args, "query")?;
                let limit = opt_usize(&args, "limit").unwrap_or(DEFAULT_SEARCH_LIMIT);
                match self.store.search(self.kind, &query, limit).await {
                    Ok(records) => Ok(self.many(&records, Some(("query", &query))).await),
                    Err(e) => store_failure(&self.name, e),
                }
            }
            EntityOp::Get => {
                let id = match self.target(&args).await? {
                    Ok(id) => id,
                    Err(failure) => return Ok(failure),
                };
                match self.store.get(self.kind, &id).await {
                    Ok(record) => Ok(self.single(entity_json(self.store.as_ref(), &record).await)),
                    Err(e) => store_failure(&self.name, e),
                }
            }
            EntityOp::Create => {
                let title = required_str(&args, "title")?;
                let project_id = match self.kind {
                    EntityKind::Task => match self.project_id(&args).await {
                        Ok(id) => id,
                        Err(failure) => return Ok(failure),
                    },
                    EntityKind::Project => None,
                };
                let entity = NewEntity {
                    title,
                    description: opt_str(&args, "description"),
                    priority: opt_str(&args, "priority").map(|p| p.to_lowercase()),
                    project_id,
                    assignee: opt_str(&args, "assignee"),
                    due_date: opt_str(&args, "due_date"),
                };
                match self.store.create(self.kind, entity).await {
                    Ok(record) => {
                        debug!(kind = %self.kind, id = %record.id, "Entity created");
                        Ok(self.single(entity_json(self.store.as_ref(), &record).await))
                    }
                    Err(e) => store_failure(&self.name, e),
                }
            }
            EntityOp::Update => {
                let id = required_str(&args, "id")?;
                let status = match opt_str(&args, "status") {
                    Some(s) => match EntityStatus::parse(&s) {
                        Some(status) => Some(status),
                        None => return Ok(ToolResult::failure(format!("Unknown status: {s}"))),
                    },
                    None => None,
                };
                let project_id = match self.project_id(&args).await {
                    Ok(id) => id,
                    Err(failure) => return Ok(failure),
                };
                let patch = EntityPatch {
                    title: opt_str(&args, "title"),
                    description: opt_str(&args, "description"),
                    status,
                    priority: opt_str(&args, "priority").map(|p| p.to_lowercase()),
                    project_id,
                    assignee: opt_str(&args, "assignee"),
                    due_date: opt_str(&args, "due_date"),
                };
                match self.store.update(self.kind, &id, patch).await {
                    Ok(record) => Ok(self.single(entity_json(self.store.as_ref(), &record).await)),
                    Err(e) => store_failure(&self.name, e),
                }
            }
            EntityOp::Complete | EntityOp::Start | EntityOp::Stop => {
                let id = match self.target(&args).await? {
                    Ok(id) => id,
                    Err(failure) => return Ok(failure),
                };
                let status = self.op.target_status().unwrap_or_default();
                match self.store.update(self.kind, &id, EntityPatch::status(status)).await {
                    Ok(record) => Ok(self.single(entity_json(self.store.as_ref(), &record).await)),
                    Err(e) => store_failure(&self.name, e),
                }
            }
        }
    }

    fn schema(&self) -> Value {
        let entity_fields = json!({
            "title": {"type": "string"},
            "description": {"type": "string"},
            "priority": {"type": "string", "enum": ["low", "medium", "high", "urgent"]},
            "assignee": {"type": "string"},
            "due_date": {"type": "string", "description": "ISO date, YYYY-MM-DD"},
            "project": {"type": "string", "description": "Project name"},
            "project_id": {"type": "string"}
        });
        match self.op {
            EntityOp::List => json!({
                "type": "object",
                "properties": {
                    "status": {"type": "string", "enum": ["open", "in_progress", "done"]},
                    "priority": {"type": "string"},
                    "project": {"type": "string", "description": "Project name"},
                    "assignee": {"type": "string"},
                    "limit": {"type": "integer", "default": DEFAULT_LIST_LIMIT}
                }
            }),
            EntityOp::Search => json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "limit": {"type": "integer", "default": DEFAULT_SEARCH_LIMIT}
                },
                "required": ["query"]
            }),
            EntityOp::Create => json!({
                "type": "object",
                "properties": entity_fields,
                "required": ["title"]
            }),
            EntityOp::Update => {
                let mut properties = entity_fields;
                if let Some(map) = properties.as_object_mut() {
                    map.insert("id".into(), json!({"type": "string"}));
                    map.insert("status".into(), json!({"type": "string", "enum": ["open", "in_progress", "done"]}));
                }
                json!({ "type": "object", "properties": properties, "required": ["id"] })
            }
            EntityOp::Get | EntityOp::Complete | EntityOp::Start | EntityOp::Stop => json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string"},
                    "title": {"type": "string", "description": "Used when the id is unknown"}
                }
            }),
        }
    }
}

#[async_trait]
impl Tool for EntityTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema()
    }

    async fn execute(&self, _ctx: &ToolContext, arguments: Value) -> Result<ToolResult, ToolError> {
        self.run(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryTaskStore;

    fn tool(kind: EntityKind, op: EntityOp, store: &Arc<InMemoryTaskStore>) -> EntityTool {
        EntityTool::new(kind, op, store.clone())
    }

    async fn exec(tool: &EntityTool, args: Value) -> ToolResult {
        tool.execute(&ToolContext::new("u1", "s1"), args).await.unwrap()
    }

    #[test]
    fn names_cover_both_kinds() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let names: Vec<String> = EntityTool::all(EntityKind::Project, store)
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "list_projects",
                "search_projects",
                "get_project",
                "create_project",
                "update_project",
                "complete_project",
                "start_project",
                "stop_project"
            ]
        );
    }

    #[tokio::test]
    async fn create_task_under_named_project() {
        let store = Arc::new(InMemoryTaskStore::new());
        exec(&tool(EntityKind::Project, EntityOp::Create, &store), json!({"title": "Billing"})).await;

        let result = exec(
            &tool(EntityKind::Task, EntityOp::Create, &store),
            json!({"title": "Fix webhook", "project": "billing", "priority": "HIGH"}),
        )
        .await;

        assert!(result.success);
        let task = &result.value()["task"];
        assert_eq!(task["project_id"], "project-1");
        assert_eq!(task["project"], "Billing");
        assert_eq!(task["priority"], "high");
    }

    #[tokio::test]
    async fn unknown_project_is_a_structured_failure() {
        let store = Arc::new(InMemoryTaskStore::new());
        let result = exec(
            &tool(EntityKind::Task, EntityOp::Create, &store),
            json!({"title": "Fix webhook", "project": "Nowhere"}),
        )
        .await;
        assert!(!result.success);
        assert_eq!(result.value()["error"], "project not found: Nowhere");
    }

    #[tokio::test]
    async fn missing_task_is_a_structured_failure() {
        let store = Arc::new(InMemoryTaskStore::new());
        let result = exec(&tool(EntityKind::Task, EntityOp::Get, &store), json!({"id": "task-9"})).await;
        assert!(!result.success);
        assert_eq!(result.value()["success"], false);
    }

    #[tokio::test]
    async fn missing_title_is_an_argument_error() {
        let store = Arc::new(InMemoryTaskStore::new());
        let err = tool(EntityKind::Task, EntityOp::Create, &store)
            .execute(&ToolContext::default(), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn lifecycle_by_title() {
        let store = Arc::new(InMemoryTaskStore::new());
        exec(&tool(EntityKind::Task, EntityOp::Create, &store), json!({"title": "Fix login"})).await;

        let started = exec(&tool(EntityKind::Task, EntityOp::Start, &store), json!({"title": "fix login"})).await;
        assert_eq!(started.value()["task"]["status"], "in_progress");

        let done = exec(&tool(EntityKind::Task, EntityOp::Complete, &store), json!({"id": "task-1"})).await;
        assert_eq!(done.value()["task"]["status"], "done");

        let listed = exec(&tool(EntityKind::Task, EntityOp::List, &store), json!({"status": "done"})).await;
        assert_eq!(listed.value()["count"], 1);
    }

    #[tokio::test]
    async fn search_reports_count_and_query() {
        let store = Arc::new(InMemoryTaskStore::new());
        let create = tool(EntityKind::Task, EntityOp::Create, &store);
        exec(&create, json!({"title": "Fix login"})).await;
        exec(&create, json!({"title": "Fix docs"})).await;

        let result = exec(&tool(EntityKind::Task, EntityOp::Search, &store), json!({"query": "fix"})).await;
        let body = result.value();
        assert_eq!(body["count"], 2);
        assert_eq!(body["query"], "fix");
        assert_eq!(body["tasks"][0]["title"], "Fix login");
    }

    #[tokio::test]
    async fn ambiguous_title_asks_for_an_id() {
        let store = Arc::new(InMemoryTaskStore::new());
        let create = tool(EntityKind::Task, EntityOp::Create, &store);
        exec(&create, json!({"title": "Fix login"})).await;
        exec(&create, json!({"title": "Fix docs"})).await;

        let result = exec(&tool(EntityKind::Task, EntityOp::Complete, &store), json!({"title": "fix"})).await;
        assert!(!result.success);
    }
}
