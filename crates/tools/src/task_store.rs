//! In-memory task/project store.
//!
//! Backs the CLI and the test suites. Ids are sequential per kind
//! (`task-1`, `project-3`, ...) so transcripts stay readable.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use steward_core::error::StoreError;
use steward_core::task::{
    Annotation, AnnotationKind, EntityFilter, EntityKind, EntityPatch, EntityRecord, NewEntity, TaskStore,
};
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    next_id: u64,
    /// Insertion order
    records: Vec<EntityRecord>,
}

pub struct InMemoryTaskStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(kind: EntityKind, id: &str) -> StoreError {
    StoreError::NotFound {
        kind: kind.to_string(),
        id: id.to_string(),
    }
}

fn search_terms(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(String::from)
        .collect()
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, kind: EntityKind, entity: NewEntity) -> Result<EntityRecord, StoreError> {
        let title = entity.title.trim();
        if title.is_empty() {
            return Err(StoreError::Invalid {
                kind: kind.to_string(),
                reason: "title must not be empty".into(),
            });
        }

        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let now = Utc::now();
        let record = EntityRecord {
            id: format!("{kind}-{}", inner.next_id),
            kind,
            title: title.to_string(),
            description: entity.description,
            status: Default::default(),
            priority: entity.priority,
            project_id: entity.project_id,
            assignee: entity.assignee,
            due_date: entity.due_date,
            annotations: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        inner.records.push(record.clone());
        Ok(record)
    }

    async fn get(&self, kind: EntityKind, id: &str) -> Result<EntityRecord, StoreError> {
        self.inner
            .read()
            .await
            .records
            .iter()
            .find(|r| r.kind == kind && r.id == id)
            .cloned()
            .ok_or_else(|| not_found(kind, id))
    }

    async fn update(&self, kind: EntityKind, id: &str, patch: EntityPatch) -> Result<EntityRecord, StoreError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .records
            .iter_mut()
            .find(|r| r.kind == kind && r.id == id)
            .ok_or_else(|| not_found(kind, id))?;

        if let Some(title) = patch.title {
            record.title = title;
        }
        if let Some(description) = patch.description {
            record.description = Some(description);
        }
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(priority) = patch.priority {
            record.priority = Some(priority);
        }
        if let Some(project_id) = patch.project_id {
            record.project_id = Some(project_id);
        }
        if let Some(assignee) = patch.assignee {
            record.assignee = Some(assignee);
        }
        if let Some(due_date) = patch.due_date {
            record.due_date = Some(due_date);
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn list(&self, kind: EntityKind, filter: &EntityFilter) -> Result<Vec<EntityRecord>, StoreError> {
        let inner = self.inner.read().await;
        let matches = inner.records.iter().filter(|r| {
            r.kind == kind
                && filter.status.is_none_or(|s| r.status == s)
                && filter
                    .priority
                    .as_deref()
                    .is_none_or(|p| r.priority.as_deref().is_some_and(|rp| rp.eq_ignore_ascii_case(p)))
                && filter
                    .project_id
                    .as_deref()
                    .is_none_or(|p| r.project_id.as_deref() == Some(p))
                && filter
                    .assignee
                    .as_deref()
                    .is_none_or(|a| r.assignee.as_deref().is_some_and(|ra| ra.eq_ignore_ascii_case(a)))
        });
        Ok(matches.take(filter.limit.unwrap_or(usize::MAX)).cloned().collect())
    }

    async fn search(&self, kind: EntityKind, text: &str, limit: usize) -> Result<Vec<EntityRecord>, StoreError> {
        let terms = search_terms(text);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let inner = self.inner.read().await;
        let mut scored: Vec<(usize, &EntityRecord)> = inner
            .records
            .iter()
            .filter(|r| r.kind == kind)
            .filter_map(|r| {
                let haystack = format!("{} {}", r.title, r.description.as_deref().unwrap_or_default()).to_lowercase();
                let words = search_terms(&haystack);
                let hits = terms.iter().filter(|t| words.contains(t)).count();
                (hits > 0).then_some((hits, r))
            })
            .collect();
        // Stable: insertion order among equal scores
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(limit).map(|(_, r)| r.clone()).collect())
    }

    async fn append(
        &self,
        kind: EntityKind,
        id: &str,
        annotation: AnnotationKind,
        text: &str,
    ) -> Result<EntityRecord, StoreError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .records
            .iter_mut()
            .find(|r| r.kind == kind && r.id == id)
            .ok_or_else(|| not_found(kind, id))?;
        let now = Utc::now();
        record.annotations.push(Annotation {
            kind: annotation,
            text: text.to_string(),
            created_at: now,
        });
        record.updated_at = now;
        Ok(record.clone())
    }
}
