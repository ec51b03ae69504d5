//! Semantic memory: confidence-weighted user preferences.
//!
//! One record per `(user, key)`. Writing an existing key merges: confidence
//! becomes the max of old and new, the usage counter increments, and the
//! value is replaced by the latest one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use steward_core::error::MemoryError;
use steward_core::memory::{Collection, MemoryRecord, MemoryStore, RecordFilter};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceSource {
    /// Stated by the user
    Explicit,
    /// Derived from behaviour
    Inferred,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    pub user_id: String,
    pub key: String,
    pub value: String,
    pub source: PreferenceSource,
    pub confidence: f32,
    pub times_used: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct SemanticMemory {
    store: Arc<dyn MemoryStore>,
}

fn preference_key(user_id: &str, key: &str) -> String {
    format!("{user_id}:{key}")
}

impl SemanticMemory {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }

    /// Insert or merge a preference.
    pub async fn upsert(
        &self,
        user_id: &str,
        key: &str,
        value: &str,
        source: PreferenceSource,
        confidence: f32,
    ) -> Result<Preference, MemoryError> {
        let confidence = confidence.clamp(0.0, 1.0);
        let now = Utc::now();

        let preference = match self.get(user_id, key).await? {
            Some(existing) => Preference {
                value: value.to_string(),
                source,
                confidence: existing.confidence.max(confidence),
                times_used: existing.times_used.saturating_add(1),
                updated_at: now,
                ..existing
            },
            None => Preference {
                user_id: user_id.to_string(),
                key: key.to_string(),
                value: value.to_string(),
                source,
                confidence,
                times_used: 1,
                created_at: now,
                updated_at: now,
            },
        };

        let body = serde_json::to_value(&preference)
            .map_err(|e| MemoryError::Storage(format!("Preference serialization: {e}")))?;
        self.store
            .put(
                MemoryRecord::new(Collection::Semantic, preference_key(user_id, key), body)
                    .with_created_at(preference.created_at),
            )
            .await?;

        info!(
            user_id,
            key,
            confidence = preference.confidence,
            times_used = preference.times_used,
            "Preference stored"
        );
        Ok(preference)
    }

    pub async fn get(&self, user_id: &str, key: &str) -> Result<Option<Preference>, MemoryError> {
        match self
            .store
            .get(Collection::Semantic, &preference_key(user_id, key))
            .await?
        {
            Some(record) => Ok(Some(record.decode()?)),
            None => Ok(None),
        }
    }

    /// Preferences at or above `min_confidence`, by confidence then usage.
    pub async fn list(
        &self,
        user_id: &str,
        min_confidence: f32,
        limit: usize,
    ) -> Result<Vec<Preference>, MemoryError> {
        let filter = RecordFilter::new()
            .prefix(format!("{user_id}:"))
            .field_eq("user_id", user_id);
        let mut prefs: Vec<Preference> = self
            .store
            .scan(Collection::Semantic, &filter)
            .await?
            .iter()
            .map(|r| r.decode())
            .collect::<Result<Vec<Preference>, _>>()?
            .into_iter()
            .filter(|p| p.confidence >= min_confidence)
            .collect();

        prefs.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.times_used.cmp(&a.times_used))
                .then_with(|| a.key.cmp(&b.key))
        });
        prefs.truncate(limit);
        Ok(prefs)
    }

    pub async fn forget(&self, user_id: &str, key: &str) -> Result<bool, MemoryError> {
        self.store
            .delete(Collection::Semantic, &preference_key(user_id, key))
            .await
    }
}
