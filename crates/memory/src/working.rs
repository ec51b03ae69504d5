//! Working memory: session-scoped context with a short TTL.
//!
//! One record per session holds a bounded set of fields. Every write is a
//! read-modify-write of that record with last-write-wins semantics and
//! refreshes the TTL. Past expiry the whole context reads as absent.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use steward_core::error::MemoryError;
use steward_core::memory::{Collection, MemoryRecord, MemoryStore};
use tracing::debug;

/// A reference to a task or project held in working memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
    pub title: String,
}

impl EntityRef {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// The bounded field set of a session context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkingField {
    /// Project-level focus
    Focus,
    /// Task-level current task
    Task,
    /// Last state-changing action
    LastAction,
    /// Task-level priority filter
    PriorityFilter,
}

impl WorkingField {
    /// Fields cleared by a context switch.
    pub fn is_task_level(&self) -> bool {
        matches!(self, WorkingField::Task | WorkingField::LastAction | WorkingField::PriorityFilter)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub current_focus: Option<EntityRef>,
    #[serde(default)]
    pub current_task: Option<EntityRef>,
    #[serde(default)]
    pub last_action: Option<String>,
    #[serde(default)]
    pub priority_filter: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SessionContext {
    fn empty(session_id: &str, user_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            current_focus: None,
            current_task: None,
            last_action: None,
            priority_filter: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current_focus.is_none()
            && self.current_task.is_none()
            && self.last_action.is_none()
            && self.priority_filter.is_none()
    }

    fn clear(&mut self, field: WorkingField) {
        match field {
            WorkingField::Focus => self.current_focus = None,
            WorkingField::Task => self.current_task = None,
            WorkingField::LastAction => self.last_action = None,
            WorkingField::PriorityFilter => self.priority_filter = None,
        }
    }
}

/// One field write.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkingUpdate {
    Focus(EntityRef),
    Task(EntityRef),
    LastAction(String),
    PriorityFilter(String),
    Clear(WorkingField),
}

impl WorkingUpdate {
    fn apply(self, ctx: &mut SessionContext) {
        match self {
            WorkingUpdate::Focus(r) => ctx.current_focus = Some(r),
            WorkingUpdate::Task(r) => ctx.current_task = Some(r),
            WorkingUpdate::LastAction(a) => ctx.last_action = Some(a),
            WorkingUpdate::PriorityFilter(p) => ctx.priority_filter = Some(p),
            WorkingUpdate::Clear(field) => ctx.clear(field),
        }
    }
}

pub struct WorkingMemory {
    store: Arc<dyn MemoryStore>,
    ttl: Duration,
}

fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

impl WorkingMemory {
    pub fn new(store: Arc<dyn MemoryStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// The live context for a session, if any.
    pub async fn get(&self, session_id: &str) -> Result<Option<SessionContext>, MemoryError> {
        match self.store.get(Collection::Working, &session_key(session_id)).await? {
            Some(record) => Ok(Some(record.decode()?)),
            None => Ok(None),
        }
    }

    /// Apply field writes in order and refresh the TTL.
    pub async fn apply(
        &self,
        session_id: &str,
        user_id: &str,
        updates: Vec<WorkingUpdate>,
    ) -> Result<SessionContext, MemoryError> {
        let mut ctx = self
            .get(session_id)
            .await?
            .unwrap_or_else(|| SessionContext::empty(session_id, user_id));

        for update in updates {
            update.apply(&mut ctx);
        }
        ctx.updated_at = Utc::now();

        let value = serde_json::to_value(&ctx)
            .map_err(|e| MemoryError::Storage(format!("Session serialization: {e}")))?;
        self.store
            .put(MemoryRecord::new(Collection::Working, session_key(session_id), value).with_ttl(self.ttl))
            .await?;

        debug!(session_id, "Working memory updated");
        Ok(ctx)
    }

    pub async fn set(
        &self,
        session_id: &str,
        user_id: &str,
        update: WorkingUpdate,
    ) -> Result<SessionContext, MemoryError> {
        self.apply(session_id, user_id, vec![update]).await
    }

    /// Drop task-level fields, keeping the project-level focus.
    pub async fn clear_task_fields(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<SessionContext, MemoryError> {
        self.apply(
            session_id,
            user_id,
            vec![
                WorkingUpdate::Clear(WorkingField::Task),
                WorkingUpdate::Clear(WorkingField::LastAction),
                WorkingUpdate::Clear(WorkingField::PriorityFilter),
            ],
        )
        .await
    }

    pub async fn clear(&self, session_id: &str) -> Result<bool, MemoryError> {
        self.store.delete(Collection::Working, &session_key(session_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;

    fn working(ttl: Duration) -> WorkingMemory {
        WorkingMemory::new(Arc::new(InMemoryStore::new()), ttl)
    }

    #[tokio::test]
    async fn fields_upsert_last_write_wins() {
        let wm = working(Duration::hours(2));
        wm.set("s1", "u1", WorkingUpdate::Focus(EntityRef::new("p1", "Voice Agent"))).await.unwrap();
        wm.set("s1", "u1", WorkingUpdate::Task(EntityRef::new("t1", "Wire ASR"))).await.unwrap();
        wm.set("s1", "u1", WorkingUpdate::Focus(EntityRef::new("p2", "Billing"))).await.unwrap();

        let ctx = wm.get("s1").await.unwrap().unwrap();
        assert_eq!(ctx.current_focus.unwrap().title, "Billing");
        assert_eq!(ctx.current_task.unwrap().id, "t1");
    }

    #[tokio::test]
    async fn clear_task_fields_keeps_focus() {
        let wm = working(Duration::hours(2));
        wm.apply(
            "s1",
            "u1",
            vec![
                WorkingUpdate::Focus(EntityRef::new("p1", "Voice Agent")),
                WorkingUpdate::Task(EntityRef::new("t1", "Wire ASR")),
                WorkingUpdate::PriorityFilter("high".into()),
                WorkingUpdate::LastAction("start_task".into()),
            ],
        )
        .await
        .unwrap();

        let ctx = wm.clear_task_fields("s1", "u1").await.unwrap();
        assert!(ctx.current_focus.is_some());
        assert!(ctx.current_task.is_none());
        assert!(ctx.priority_filter.is_none());
        assert!(ctx.last_action.is_none());
    }

    #[tokio::test]
    async fn expired_context_reads_as_absent() {
        let wm = working(Duration::seconds(-1));
        wm.set("s1", "u1", WorkingUpdate::LastAction("create_task".into())).await.unwrap();
        assert!(wm.get("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let wm = working(Duration::hours(2));
        wm.set("s1", "u1", WorkingUpdate::LastAction("create_task".into())).await.unwrap();
        assert!(wm.get("s2").await.unwrap().is_none());
    }

    #[test]
    fn task_level_fields() {
        assert!(!WorkingField::Focus.is_task_level());
        assert!(WorkingField::Task.is_task_level());
        assert!(WorkingField::PriorityFilter.is_task_level());
    }
}
