//! Episodic memory: the append-only action log.
//!
//! Every state-changing tool call and multi-result search becomes an
//! immutable `ActionRecord`. Records optionally carry an embedding of their
//! summary text so history can be searched semantically; when the embedder
//! or the store's similarity index is unavailable, search falls back to
//! keyword matching.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use steward_core::embedding::Embedder;
use steward_core::error::MemoryError;
use steward_core::memory::{Collection, MemoryRecord, MemoryStore, RecordFilter};
use tracing::{debug, warn};
use uuid::Uuid;

const TIMELINE_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    /// The operation performed (e.g. "create_task", "search_tasks")
    pub action_type: String,
    /// "task", "project", ...
    pub entity_type: String,
    /// Human-readable entity name
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default = "default_agent")]
    pub agent: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

fn default_agent() -> String {
    "steward".into()
}

impl ActionRecord {
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        action_type: impl Into<String>,
        entity_type: impl Into<String>,
        entity: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            action_type: action_type.into(),
            entity_type: entity_type.into(),
            entity: entity.into(),
            entity_id: None,
            project: None,
            agent: default_agent(),
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// The text that gets embedded and keyword-matched.
    pub fn summary(&self) -> String {
        match &self.project {
            Some(project) => format!("{} {} {} in {}", self.action_type, self.entity_type, self.entity, project),
            None => format!("{} {} {}", self.action_type, self.entity_type, self.entity),
        }
    }
}

/// Time/type/entity narrowing for `list` and `search`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeFilter {
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl EpisodeFilter {
    fn to_record_filter(&self, user_id: &str) -> RecordFilter {
        let mut filter = RecordFilter::new().prefix(format!("{user_id}:")).field_eq("user_id", user_id);
        let pairs = [
            ("action_type", &self.action_type),
            ("entity_type", &self.entity_type),
            ("entity_id", &self.entity_id),
            ("project", &self.project),
            ("session_id", &self.session_id),
        ];
        for (field, value) in pairs {
            if let Some(v) = value {
                filter = filter.field_eq(field, v.clone());
            }
        }
        filter.since = self.since;
        filter.limit = self.limit;
        filter
    }
}

/// One line of the narrative timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub at: DateTime<Utc>,
    pub summary: String,
}

/// Aggregated view of a user's recent activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodicNarrative {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_project: BTreeMap<String, usize>,
    pub by_agent: BTreeMap<String, usize>,
    /// Most recent first
    pub timeline: Vec<TimelineEntry>,
}

pub struct EpisodicMemory {
    store: Arc<dyn MemoryStore>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl EpisodicMemory {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store, embedder: None }
    }

    pub fn with_embedder(mut self, embedder: Option<Arc<dyn Embedder>>) -> Self {
        self.embedder = embedder;
        self
    }

    async fn try_embed(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(text).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "Episodic embedding failed; storing without embedding");
                None
            }
        }
    }

    /// Append an action. Records are never updated afterwards.
    pub async fn record(&self, action: ActionRecord) -> Result<ActionRecord, MemoryError> {
        let embedding = self.try_embed(&action.summary()).await;
        let value = serde_json::to_value(&action)
            .map_err(|e| MemoryError::Storage(format!("Action serialization: {e}")))?;
        let key = format!("{}:{}", action.user_id, action.id);
        let record = MemoryRecord::new(Collection::Episodic, key, value)
            .with_created_at(action.created_at)
            .with_embedding(embedding);
        self.store.put(record).await?;
        debug!(action_type = %action.action_type, entity = %action.entity, "Action recorded");
        Ok(action)
    }

    /// Filtered list, newest first.
    pub async fn list(&self, user_id: &str, filter: &EpisodeFilter) -> Result<Vec<ActionRecord>, MemoryError> {
        let records = self
            .store
            .scan(Collection::Episodic, &filter.to_record_filter(user_id))
            .await?;
        records.iter().map(|r| r.decode()).collect()
    }

    /// Semantic search with optional filters; keyword fallback.
    pub async fn search(
        &self,
        user_id: &str,
        query: &str,
        filter: &EpisodeFilter,
        limit: usize,
    ) -> Result<Vec<ActionRecord>, MemoryError> {
        let record_filter = EpisodeFilter {
            limit: None,
            ..filter.clone()
        }
        .to_record_filter(user_id);

        if let Some(embedding) = self.try_embed(query).await {
            match self
                .store
                .nearest(Collection::Episodic, &embedding, &record_filter, limit, 0.0)
                .await
            {
                Ok(hits) if !hits.is_empty() => {
                    return hits.iter().map(|h| h.record.decode()).collect();
                }
                Ok(_) => debug!("No embedded episodes matched; using keyword search"),
                Err(MemoryError::IndexUnavailable(reason)) => {
                    debug!(%reason, "Similarity index unavailable; using keyword search");
                }
                Err(e) => return Err(e),
            }
        }

        self.keyword_search(query, &record_filter, limit).await
    }

    async fn keyword_search(
        &self,
        query: &str,
        filter: &RecordFilter,
        limit: usize,
    ) -> Result<Vec<ActionRecord>, MemoryError> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|t| t.len() > 2)
            .collect();

        let actions: Vec<ActionRecord> = self
            .store
            .scan(Collection::Episodic, filter)
            .await?
            .iter()
            .map(|r| r.decode())
            .collect::<Result<_, _>>()?;

        if terms.is_empty() {
            return Ok(actions.into_iter().take(limit).collect());
        }

        // Stable sort keeps newest-first among equal hit counts
        let mut scored: Vec<(usize, ActionRecord)> = actions
            .into_iter()
            .filter_map(|a| {
                let text = a.summary().to_lowercase();
                let hits = terms.iter().filter(|t| text.contains(t.as_str())).count();
                (hits > 0).then_some((hits, a))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(limit).map(|(_, a)| a).collect())
    }

    /// Counts by type/project/agent plus a recent timeline.
    pub async fn narrative(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<EpisodicNarrative, MemoryError> {
        let actions = self
            .list(
                user_id,
                &EpisodeFilter {
                    since,
                    ..EpisodeFilter::default()
                },
            )
            .await?;

        let mut narrative = EpisodicNarrative {
            total: actions.len(),
            ..EpisodicNarrative::default()
        };
        for action in &actions {
            *narrative.by_type.entry(action.action_type.clone()).or_default() += 1;
            if let Some(project) = &action.project {
                *narrative.by_project.entry(project.clone()).or_default() += 1;
            }
            *narrative.by_agent.entry(action.agent.clone()).or_default() += 1;
        }
        narrative.timeline = actions
            .iter()
            .take(TIMELINE_LEN)
            .map(|a| TimelineEntry {
                at: a.created_at,
                summary: a.summary(),
            })
            .collect();

        Ok(narrative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;
    use async_trait::async_trait;
    use chrono::Duration;
    use steward_core::error::ProviderError;

    /// Hashed bag-of-words embedder: deterministic and good enough to rank.
    struct WordEmbedder;

    #[async_trait]
    impl Embedder for WordEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            let mut v = vec![0.0f32; 64];
            for word in text.to_lowercase().split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
                let h = word.bytes().fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(b as u32));
                v[(h % 64) as usize] += 1.0;
            }
            Ok(v)
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            Err(ProviderError::Network("offline".into()))
        }
    }

    fn action(action_type: &str, entity: &str, project: Option<&str>) -> ActionRecord {
        let a = ActionRecord::new("u1", "s1", action_type, "task", entity);
        match project {
            Some(p) => a.with_project(p),
            None => a,
        }
    }

    #[tokio::test]
    async fn list_filters_by_type_newest_first() {
        let em = EpisodicMemory::new(Arc::new(InMemoryStore::new()));
        let base = Utc::now() - Duration::minutes(10);
        for (i, t) in ["create_task", "complete_task", "create_task"].iter().enumerate() {
            let mut a = action(t, &format!("Task {i}"), None);
            a.created_at = base + Duration::seconds(i as i64);
            em.record(a).await.unwrap();
        }

        let filter = EpisodeFilter {
            action_type: Some("create_task".into()),
            ..EpisodeFilter::default()
        };
        let rows = em.list("u1", &filter).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].entity, "Task 2");
        assert!(em.list("u2", &EpisodeFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn semantic_search_prefers_similar_text() {
        let em = EpisodicMemory::new(Arc::new(InMemoryStore::new())).with_embedder(Some(Arc::new(WordEmbedder)));
        em.record(action("create_task", "Write onboarding docs", None)).await.unwrap();
        em.record(action("create_task", "Fix payment webhook", None)).await.unwrap();

        let hits = em.search("u1", "payment webhook", &EpisodeFilter::default(), 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity, "Fix payment webhook");
    }

    #[tokio::test]
    async fn failing_embedder_degrades_to_keyword_search() {
        let em = EpisodicMemory::new(Arc::new(InMemoryStore::new())).with_embedder(Some(Arc::new(FailingEmbedder)));
        em.record(action("create_task", "Write onboarding docs", None)).await.unwrap();
        em.record(action("create_task", "Fix payment webhook", None)).await.unwrap();

        let hits = em.search("u1", "webhook", &EpisodeFilter::default(), 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity, "Fix payment webhook");
    }

    #[tokio::test]
    async fn narrative_aggregates_counts() {
        let em = EpisodicMemory::new(Arc::new(InMemoryStore::new()));
        em.record(action("create_task", "A", Some("Voice Agent"))).await.unwrap();
        em.record(action("create_task", "B", Some("Voice Agent"))).await.unwrap();
        em.record(action("complete_task", "A", Some("Billing")).with_agent("planner")).await.unwrap();

        let n = em.narrative("u1", None).await.unwrap();
        assert_eq!(n.total, 3);
        assert_eq!(n.by_type["create_task"], 2);
        assert_eq!(n.by_project["Voice Agent"], 2);
        assert_eq!(n.by_agent["planner"], 1);
        assert_eq!(n.by_agent["steward"], 2);
        assert_eq!(n.timeline.len(), 3);
    }
}
