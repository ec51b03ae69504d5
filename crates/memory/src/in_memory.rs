//! In-memory store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use steward_core::error::MemoryError;
use steward_core::memory::{Collection, MemoryRecord, MemoryStore, RecordFilter, ScoredRecord};
use tokio::sync::RwLock;
use crate::vector;

type Key = (Collection, String);

/// An in-memory store keyed by `(collection, key)`.
///
/// Claims run under a single write lock, so concurrent claimers never both
/// see the same record as pending.
pub struct InMemoryStore {
    records: Arc<RwLock<BTreeMap<Key, MemoryRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Total stored records, expired ones included.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Newest first, key as a stable tie-break.
fn newest_first(a: &MemoryRecord, b: &MemoryRecord) -> std::cmp::Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| a.key.cmp(&b.key))
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn put(&self, record: MemoryRecord) -> Result<(), MemoryError> {
        let key = (record.collection, record.key.clone());
        self.records.write().await.insert(key, record);
        Ok(())
    }

    async fn get(&self, collection: Collection, key: &str) -> Result<Option<MemoryRecord>, MemoryError> {
        let now = Utc::now();
        let records = self.records.read().await;
        Ok(records
            .get(&(collection, key.to_string()))
            .filter(|r| !r.is_expired(now))
            .cloned())
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<bool, MemoryError> {
        Ok(self
            .records
            .write()
            .await
            .remove(&(collection, key.to_string()))
            .is_some())
    }

    async fn scan(&self, collection: Collection, filter: &RecordFilter) -> Result<Vec<MemoryRecord>, MemoryError> {
        let now = Utc::now();
        let records = self.records.read().await;
        let mut matched: Vec<MemoryRecord> = records
            .values()
            .filter(|r| r.collection == collection && !r.is_expired(now) && filter.matches(r))
            .cloned()
            .collect();
        matched.sort_by(newest_first);
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn nearest(
        &self,
        collection: Collection,
        embedding: &[f32],
        filter: &RecordFilter,
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredRecord>, MemoryError> {
        let candidates = self
            .scan(
                collection,
                &RecordFilter {
                    limit: None,
                    ..filter.clone()
                },
            )
            .await?;
        Ok(vector::rank_by_similarity(candidates, embedding, limit, min_score))
    }

    async fn claim(
        &self,
        collection: Collection,
        filter: &RecordFilter,
        field: &str,
        from: &str,
        to: &str,
    ) -> Result<Option<MemoryRecord>, MemoryError> {
        let now = Utc::now();
        let mut records = self.records.write().await;

        let oldest = records
            .iter()
            .filter(|(_, r)| {
                r.collection == collection
                    && !r.is_expired(now)
                    && filter.matches(r)
                    && r.field(field).as_deref() == Some(from)
            })
            .min_by(|(_, a), (_, b)| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)))
            .map(|(k, _)| k.clone());

        let Some(key) = oldest else {
            return Ok(None);
        };

        match records.get_mut(&key) {
            Some(record) => {
                record.set_field(field, serde_json::Value::String(to.to_string()));
                record.updated_at = now;
                Ok(Some(record.clone()))
            }
            None => Ok(None),
        }
    }

    async fn purge_expired(&self) -> Result<usize, MemoryError> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| !r.is_expired(now));
        Ok(before - records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(collection: Collection, key: &str, value: serde_json::Value) -> MemoryRecord {
        MemoryRecord::new(collection, key, value)
    }

    #[tokio::test]
    async fn put_get_delete() {
        let store = InMemoryStore::new();
        store
            .put(record(Collection::Semantic, "u1:focus", serde_json::json!({"value": "Voice Agent"})))
            .await
            .unwrap();

        let got = store.get(Collection::Semantic, "u1:focus").await.unwrap().unwrap();
        assert_eq!(got.value["value"], "Voice Agent");
        assert!(store.get(Collection::Working, "u1:focus").await.unwrap().is_none());

        assert!(store.delete(Collection::Semantic, "u1:focus").await.unwrap());
        assert!(!store.delete(Collection::Semantic, "u1:focus").await.unwrap());
    }

    #[tokio::test]
    async fn put_is_an_upsert() {
        let store = InMemoryStore::new();
        store.put(record(Collection::Working, "s1", serde_json::json!({"n": 1}))).await.unwrap();
        store.put(record(Collection::Working, "s1", serde_json::json!({"n": 2}))).await.unwrap();
        assert_eq!(store.len().await, 1);
        let got = store.get(Collection::Working, "s1").await.unwrap().unwrap();
        assert_eq!(got.value["n"], 2);
    }

    #[tokio::test]
    async fn expired_records_read_as_absent() {
        let store = InMemoryStore::new();
        store
            .put(record(Collection::Working, "s1", serde_json::json!({})).with_ttl(Duration::seconds(-5)))
            .await
            .unwrap();
        assert!(store.get(Collection::Working, "s1").await.unwrap().is_none());
        assert!(store.scan(Collection::Working, &RecordFilter::new()).await.unwrap().is_empty());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn scan_is_newest_first_and_limited() {
        let store = InMemoryStore::new();
        let base = Utc::now();
        for i in 0..5 {
            store
                .put(
                    record(Collection::Episodic, &format!("u1:{i}"), serde_json::json!({"user_id": "u1"}))
                        .with_created_at(base + Duration::seconds(i)),
                )
                .await
                .unwrap();
        }
        store
            .put(record(Collection::Episodic, "u2:0", serde_json::json!({"user_id": "u2"})))
            .await
            .unwrap();

        let filter = RecordFilter::new().field_eq("user_id", "u1").limit(3);
        let rows = store.scan(Collection::Episodic, &filter).await.unwrap();
        let keys: Vec<_> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["u1:4", "u1:3", "u1:2"]);
    }

    #[tokio::test]
    async fn nearest_ranks_by_similarity() {
        let store = InMemoryStore::new();
        store
            .put(record(Collection::Discovery, "a", serde_json::json!({})).with_embedding(Some(vec![1.0, 0.0])))
            .await
            .unwrap();
        store
            .put(record(Collection::Discovery, "b", serde_json::json!({})).with_embedding(Some(vec![0.0, 1.0])))
            .await
            .unwrap();

        let hits = store
            .nearest(Collection::Discovery, &[0.9, 0.1], &RecordFilter::new(), 5, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.key, "a");
    }

    #[tokio::test]
    async fn claim_takes_oldest_pending_once() {
        let store = InMemoryStore::new();
        let base = Utc::now();
        store
            .put(
                record(Collection::Shared, "h2", serde_json::json!({"status": "pending"}))
                    .with_created_at(base + Duration::seconds(1)),
            )
            .await
            .unwrap();
        store
            .put(record(Collection::Shared, "h1", serde_json::json!({"status": "pending"})).with_created_at(base))
            .await
            .unwrap();

        let filter = RecordFilter::new();
        let first = store.claim(Collection::Shared, &filter, "status", "pending", "claimed").await.unwrap();
        assert_eq!(first.unwrap().key, "h1");
        let second = store.claim(Collection::Shared, &filter, "status", "pending", "claimed").await.unwrap();
        assert_eq!(second.unwrap().key, "h2");
        let third = store.claim(Collection::Shared, &filter, "status", "pending", "claimed").await.unwrap();
        assert!(third.is_none());
    }

    #[tokio::test]
    async fn concurrent_claims_yield_exactly_one_winner() {
        let store = Arc::new(InMemoryStore::new());
        store
            .put(record(Collection::Shared, "h1", serde_json::json!({"status": "pending"})))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .claim(Collection::Shared, &RecordFilter::new(), "status", "pending", "claimed")
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
