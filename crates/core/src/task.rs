//! Task/project store: the external record store the tools operate on.
//!
//! Two entity kinds share one record shape; tasks may point at a parent
//! project through `project_id`. Identifiers are stable opaque strings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Project,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Task => "task",
            EntityKind::Project => "project",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    #[default]
    Open,
    InProgress,
    Done,
}

impl EntityStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "open" | "todo" | "pending" => Some(EntityStatus::Open),
            "in_progress" | "active" | "started" => Some(EntityStatus::InProgress),
            "done" | "complete" | "completed" => Some(EntityStatus::Done),
            _ => None,
        }
    }
}

/// The four kinds of free-text annotations an entity accumulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    Note,
    Context,
    Decision,
    Method,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub kind: AnnotationKind,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A task or project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub kind: EntityKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: EntityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    /// Parent project (tasks only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// ISO date (YYYY-MM-DD)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a new entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewEntity {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
}

/// A partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<EntityStatus>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
}

impl EntityPatch {
    pub fn status(status: EntityStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityFilter {
    #[serde(default)]
    pub status: Option<EntityStatus>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, kind: EntityKind, entity: NewEntity) -> std::result::Result<EntityRecord, StoreError>;

    async fn get(&self, kind: EntityKind, id: &str) -> std::result::Result<EntityRecord, StoreError>;

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        patch: EntityPatch,
    ) -> std::result::Result<EntityRecord, StoreError>;

    async fn list(
        &self,
        kind: EntityKind,
        filter: &EntityFilter,
    ) -> std::result::Result<Vec<EntityRecord>, StoreError>;

    /// Free-text search over titles and descriptions.
    async fn search(
        &self,
        kind: EntityKind,
        text: &str,
        limit: usize,
    ) -> std::result::Result<Vec<EntityRecord>, StoreError>;

    async fn append(
        &self,
        kind: EntityKind,
        id: &str,
        annotation: AnnotationKind,
        text: &str,
    ) -> std::result::Result<EntityRecord, StoreError>;
}
