//! Memory store trait: durable keyed JSON records with TTL and embeddings.
//!
//! Every memory manager (working, episodic, semantic, procedural, shared)
//! and the discovery cache persist through this one abstraction. Records are
//! addressed by `(collection, key)`, may carry an expiry and an embedding, and
//! expired records are treated as absent by every read.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use crate::error::MemoryError;

/// The logical collections records live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Working,
    Episodic,
    Semantic,
    Procedural,
    Shared,
    Discovery,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Working => "working",
            Collection::Episodic => "episodic",
            Collection::Semantic => "semantic",
            Collection::Procedural => "procedural",
            Collection::Shared => "shared",
            Collection::Discovery => "discovery",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "working" => Some(Collection::Working),
            "episodic" => Some(Collection::Episodic),
            "semantic" => Some(Collection::Semantic),
            "procedural" => Some(Collection::Procedural),
            "shared" => Some(Collection::Shared),
            "discovery" => Some(Collection::Discovery),
            _ => None,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single stored document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub collection: Collection,

    pub key: String,

    /// The document body
    pub value: serde_json::Value,

    /// Optional embedding vector (stored as blob in DB)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Past this instant the record reads as absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl MemoryRecord {
    pub fn new(collection: Collection, key: impl Into<String>, value: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            collection,
            key: key.into(),
            value,
            embedding: None,
            created_at: now,
            updated_at: now,
            expires_at: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Option<Vec<f32>>) -> Self {
        self.embedding = embedding;
        self
    }

    /// Expire `ttl` after the record's last update.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = Some(self.updated_at + ttl);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// String form of a (dotted-path) field of the document.
    ///
    /// Strings compare by content, everything else by its JSON text.
    pub fn field(&self, path: &str) -> Option<String> {
        let mut current = &self.value;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        match current {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Overwrite a (dotted-path) field, creating intermediate objects.
    pub fn set_field(&mut self, path: &str, value: serde_json::Value) {
        let mut current = &mut self.value;
        for part in path.split('.') {
            if !current.is_object() {
                *current = serde_json::Value::Object(serde_json::Map::new());
            }
            let Some(map) = current.as_object_mut() else {
                return;
            };
            current = map.entry(part.to_string()).or_insert(serde_json::Value::Null);
        }
        *current = value;
    }

    /// Deserialize the document body into a typed record.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, MemoryError> {
        serde_json::from_value(self.value.clone()).map_err(|e| MemoryError::Corrupt {
            collection: self.collection.to_string(),
            key: self.key.clone(),
            reason: e.to_string(),
        })
    }
}

/// A record with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    pub score: f32,
}

/// Narrowing applied by `scan`, `nearest` and `claim`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Only keys starting with this prefix
    #[serde(default)]
    pub key_prefix: Option<String>,

    /// Field equality constraints, compared in string form
    #[serde(default)]
    pub equals: Vec<(String, String)>,

    /// Only records created at or after this instant
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,

    /// Maximum number of records returned
    #[serde(default)]
    pub limit: Option<usize>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn field_eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.push((field.into(), value.into()));
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a record passes every constraint except `limit`.
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        if let Some(prefix) = &self.key_prefix {
            if !record.key.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.created_at < since {
                return false;
            }
        }
        self.equals
            .iter()
            .all(|(field, expected)| record.field(field).as_deref() == Some(expected.as_str()))
    }
}

/// The core MemoryStore trait.
///
/// Implementations: SQLite (durable) and in-memory (tests, ephemeral runs).
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Upsert a record by `(collection, key)`.
    async fn put(&self, record: MemoryRecord) -> std::result::Result<(), MemoryError>;

    /// Fetch one record. Expired records are returned as `None`.
    async fn get(
        &self,
        collection: Collection,
        key: &str,
    ) -> std::result::Result<Option<MemoryRecord>, MemoryError>;

    /// Delete a record; returns whether something was removed.
    async fn delete(&self, collection: Collection, key: &str) -> std::result::Result<bool, MemoryError>;

    /// Unexpired records matching the filter, newest first.
    async fn scan(
        &self,
        collection: Collection,
        filter: &RecordFilter,
    ) -> std::result::Result<Vec<MemoryRecord>, MemoryError>;

    /// Similarity search over records that carry an embedding.
    ///
    /// Backends without a similarity index keep this default.
    async fn nearest(
        &self,
        _collection: Collection,
        _embedding: &[f32],
        _filter: &RecordFilter,
        _limit: usize,
        _min_score: f32,
    ) -> std::result::Result<Vec<ScoredRecord>, MemoryError> {
        Err(MemoryError::IndexUnavailable(format!(
            "backend '{}' has no similarity index",
            self.name()
        )))
    }

    /// Atomically switch the oldest unexpired matching record whose `field`
    /// equals `from` to `to`, returning the updated record.
    ///
    /// Two concurrent claimers can never both receive the same record.
    async fn claim(
        &self,
        collection: Collection,
        filter: &RecordFilter,
        field: &str,
        from: &str,
        to: &str,
    ) -> std::result::Result<Option<MemoryRecord>, MemoryError>;

    /// Physically remove expired records; returns how many were dropped.
    async fn purge_expired(&self) -> std::result::Result<usize, MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_records_are_detected() {
        let record = MemoryRecord::new(Collection::Working, "s1", serde_json::json!({}))
            .with_ttl(Duration::seconds(-1));
        assert!(record.is_expired(Utc::now()));

        let fresh = MemoryRecord::new(Collection::Working, "s1", serde_json::json!({}))
            .with_ttl(Duration::hours(2));
        assert!(!fresh.is_expired(Utc::now()));
    }

    #[test]
    fn field_reads_nested_paths_as_strings() {
        let record = MemoryRecord::new(
            Collection::Shared,
            "h1",
            serde_json::json!({"status": "pending", "meta": {"attempt": 2}}),
        );
        assert_eq!(record.field("status").as_deref(), Some("pending"));
        assert_eq!(record.field("meta.attempt").as_deref(), Some("2"));
        assert_eq!(record.field("missing"), None);
    }

    #[test]
    fn set_field_overwrites_and_creates() {
        let mut record = MemoryRecord::new(Collection::Shared, "h1", serde_json::json!({"status": "pending"}));
        record.set_field("status", serde_json::json!("claimed"));
        record.set_field("meta.by", serde_json::json!("agent-b"));
        assert_eq!(record.field("status").as_deref(), Some("claimed"));
        assert_eq!(record.field("meta.by").as_deref(), Some("agent-b"));
    }

    #[test]
    fn filter_matches_prefix_and_fields() {
        let record = MemoryRecord::new(
            Collection::Semantic,
            "u1:focus",
            serde_json::json!({"user_id": "u1"}),
        );
        assert!(RecordFilter::new().prefix("u1:").field_eq("user_id", "u1").matches(&record));
        assert!(!RecordFilter::new().prefix("u2:").matches(&record));
        assert!(!RecordFilter::new().field_eq("user_id", "u2").matches(&record));
    }

    #[test]
    fn collection_names_round_trip() {
        for c in [
            Collection::Working,
            Collection::Episodic,
            Collection::Semantic,
            Collection::Procedural,
            Collection::Shared,
            Collection::Discovery,
        ] {
            assert_eq!(Collection::parse(c.as_str()), Some(c));
        }
    }
}
