//! SQLite store.
//!
//! One table, `memory_records`, holds every collection. Documents are JSON
//! text, embeddings are little-endian f32 blobs, and timestamps are fixed
//! width RFC 3339 strings so they order lexicographically.
//!
//! Similarity search loads the filtered candidates and ranks them in Rust.
//! Claims are a single `UPDATE … RETURNING` statement.

use crate::vector;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use steward_core::error::MemoryError;
use steward_core::memory::{Collection, MemoryRecord, MemoryStore, RecordFilter, ScoredRecord};
use tracing::{debug, info};

const COLUMNS: &str = "collection, key, value, embedding, created_at, updated_at, expires_at";

/// A durable SQLite memory store.
pub struct SqliteStore {
    pool: SqlitePool,
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(column: &str, raw: &str) -> Result<DateTime<Utc>, MemoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MemoryError::QueryFailed(format!("{column} column: {e}")))
}

/// JSON path for a dotted field name.
fn json_path(field: &str) -> String {
    format!("$.{field}")
}

/// SQL conditions and their bind values for a filter, numbered from `next`.
///
/// Field equality is pre-filtered in SQL on the text form; callers still run
/// `RecordFilter::matches` for exact semantics.
fn filter_sql(filter: &RecordFilter, next: &mut usize) -> (String, Vec<String>) {
    let mut sql = String::new();
    let mut binds = Vec::new();

    if let Some(prefix) = &filter.key_prefix {
        sql.push_str(&format!(" AND substr(key, 1, length(?{n})) = ?{n}", n = *next));
        binds.push(prefix.clone());
        *next += 1;
    }
    if let Some(since) = filter.since {
        sql.push_str(&format!(" AND created_at >= ?{}", *next));
        binds.push(ts(since));
        *next += 1;
    }
    for (field, value) in &filter.equals {
        sql.push_str(&format!(
            " AND CAST(json_extract(value, ?{}) AS TEXT) = ?{}",
            *next,
            *next + 1
        ));
        binds.push(json_path(field));
        binds.push(value.clone());
        *next += 2;
    }

    (sql, binds)
}

impl SqliteStore {
    /// Open (or create) a store at a file path.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, MemoryError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| MemoryError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite memory store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, MemoryError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memory_records (
                iid          INTEGER PRIMARY KEY AUTOINCREMENT,
                collection   TEXT NOT NULL,
                key          TEXT NOT NULL,
                value        TEXT NOT NULL,
                embedding    BLOB,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL,
                expires_at   TEXT,
                UNIQUE(collection, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("memory_records table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_memory_records_created ON memory_records(collection, created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("created_at index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_memory_records_expires ON memory_records(expires_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("expires_at index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<MemoryRecord, MemoryError> {
        let collection_str: String = row
            .try_get("collection")
            .map_err(|e| MemoryError::QueryFailed(format!("collection column: {e}")))?;
        let key: String = row
            .try_get("key")
            .map_err(|e| MemoryError::QueryFailed(format!("key column: {e}")))?;
        let value_str: String = row
            .try_get("value")
            .map_err(|e| MemoryError::QueryFailed(format!("value column: {e}")))?;
        let embedding: Option<Vec<u8>> = row
            .try_get("embedding")
            .map_err(|e| MemoryError::QueryFailed(format!("embedding column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| MemoryError::QueryFailed(format!("created_at column: {e}")))?;
        let updated_at: String = row
            .try_get("updated_at")
            .map_err(|e| MemoryError::QueryFailed(format!("updated_at column: {e}")))?;
        let expires_at: Option<String> = row
            .try_get("expires_at")
            .map_err(|e| MemoryError::QueryFailed(format!("expires_at column: {e}")))?;

        let collection = Collection::parse(&collection_str).ok_or_else(|| MemoryError::Corrupt {
            collection: collection_str.clone(),
            key: key.clone(),
            reason: "unknown collection".into(),
        })?;

        let value = serde_json::from_str(&value_str).map_err(|e| MemoryError::Corrupt {
            collection: collection_str.clone(),
            key: key.clone(),
            reason: e.to_string(),
        })?;

        Ok(MemoryRecord {
            collection,
            key,
            value,
            embedding: embedding.map(|blob| vector::blob_to_embedding(&blob)),
            created_at: parse_ts("created_at", &created_at)?,
            updated_at: parse_ts("updated_at", &updated_at)?,
            expires_at: expires_at.map(|raw| parse_ts("expires_at", &raw)).transpose()?,
        })
    }

    /// Unexpired candidate rows for a filter, newest first, without the limit.
    async fn candidates(
        &self,
        collection: Collection,
        filter: &RecordFilter,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let mut next = 3;
        let (conditions, binds) = filter_sql(filter, &mut next);
        let sql = format!(
            "SELECT {COLUMNS} FROM memory_records \
             WHERE collection = ?1 AND (expires_at IS NULL OR expires_at > ?2){conditions} \
             ORDER BY created_at DESC, key ASC"
        );

        let mut query = sqlx::query(&sql).bind(collection.as_str()).bind(ts(Utc::now()));
        for value in &binds {
            query = query.bind(value);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("Scan {collection}: {e}")))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let record = Self::row_to_record(row)?;
            if filter.matches(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl MemoryStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn put(&self, record: MemoryRecord) -> Result<(), MemoryError> {
        let value = serde_json::to_string(&record.value)
            .map_err(|e| MemoryError::Storage(format!("Value serialization: {e}")))?;
        let embedding_blob: Option<Vec<u8>> = record.embedding.as_deref().map(vector::embedding_to_blob);

        sqlx::query(
            r#"
            INSERT INTO memory_records (collection, key, value, embedding, created_at, updated_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(collection, key) DO UPDATE SET
                value = excluded.value,
                embedding = excluded.embedding,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(record.collection.as_str())
        .bind(&record.key)
        .bind(&value)
        .bind(embedding_blob.as_deref())
        .bind(ts(record.created_at))
        .bind(ts(record.updated_at))
        .bind(record.expires_at.map(ts))
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("INSERT failed: {e}")))?;

        debug!(collection = %record.collection, key = %record.key, "Stored record");
        Ok(())
    }

    async fn get(&self, collection: Collection, key: &str) -> Result<Option<MemoryRecord>, MemoryError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM memory_records \
             WHERE collection = ?1 AND key = ?2 AND (expires_at IS NULL OR expires_at > ?3)"
        );
        let row = sqlx::query(&sql)
            .bind(collection.as_str())
            .bind(key)
            .bind(ts(Utc::now()))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("GET {collection}/{key}: {e}")))?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<bool, MemoryError> {
        let result = sqlx::query("DELETE FROM memory_records WHERE collection = ?1 AND key = ?2")
            .bind(collection.as_str())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("DELETE failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn scan(&self, collection: Collection, filter: &RecordFilter) -> Result<Vec<MemoryRecord>, MemoryError> {
        let mut records = self.candidates(collection, filter).await?;
        if let Some(limit) = filter.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn nearest(
        &self,
        collection: Collection,
        embedding: &[f32],
        filter: &RecordFilter,
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredRecord>, MemoryError> {
        let candidates = self.candidates(collection, filter).await?;
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
        // ?1 path, ?2 new value, ?3 now, ?4 collection, ?5 expected value
        let mut next = 6;
        let (conditions, binds) = filter_sql(filter, &mut next);
        let sql = format!(
            "UPDATE memory_records \
             SET value = json_set(value, ?1, ?2), updated_at = ?3 \
             WHERE iid = ( \
                 SELECT iid FROM memory_records \
                 WHERE collection = ?4 \
                   AND (expires_at IS NULL OR expires_at > ?3) \
                   AND CAST(json_extract(value, ?1) AS TEXT) = ?5{conditions} \
                 ORDER BY created_at ASC, iid ASC LIMIT 1 \
             ) \
             AND CAST(json_extract(value, ?1) AS TEXT) = ?5 \
             RETURNING {COLUMNS}"
        );

        let mut query = sqlx::query(&sql)
            .bind(json_path(field))
            .bind(to)
            .bind(ts(Utc::now()))
            .bind(collection.as_str())
            .bind(from);
        for value in &binds {
            query = query.bind(value);
        }

        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("CLAIM {collection}: {e}")))?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn purge_expired(&self) -> Result<usize, MemoryError> {
        let result = sqlx::query("DELETE FROM memory_records WHERE expires_at IS NOT NULL AND expires_at <= ?1")
            .bind(ts(Utc::now()))
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("PURGE failed: {e}")))?;

        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn record(collection: Collection, key: &str, value: serde_json::Value) -> MemoryRecord {
        MemoryRecord::new(collection, key, value)
    }

    #[tokio::test]
    async fn put_and_get_round_trip() {
        let store = test_store().await;
        let rec = record(Collection::Semantic, "u1:focus", serde_json::json!({"value": "Voice Agent", "confidence": 0.9}))
            .with_embedding(Some(vec![0.5, 0.25]));
        store.put(rec).await.unwrap();

        let got = store.get(Collection::Semantic, "u1:focus").await.unwrap().unwrap();
        assert_eq!(got.value["value"], "Voice Agent");
        assert_eq!(got.embedding, Some(vec![0.5, 0.25]));
        assert!(store.get(Collection::Semantic, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_value() {
        let store = test_store().await;
        store.put(record(Collection::Working, "s1", serde_json::json!({"focus": "A"}))).await.unwrap();
        store.put(record(Collection::Working, "s1", serde_json::json!({"focus": "B"}))).await.unwrap();

        let rows = store.scan(Collection::Working, &RecordFilter::new()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value["focus"], "B");
    }

    #[tokio::test]
    async fn expired_rows_are_hidden_and_purged() {
        let store = test_store().await;
        store
            .put(record(Collection::Shared, "h1", serde_json::json!({"status": "pending"})).with_ttl(Duration::seconds(-1)))
            .await
            .unwrap();

        assert!(store.get(Collection::Shared, "h1").await.unwrap().is_none());
        let claimed = store
            .claim(Collection::Shared, &RecordFilter::new(), "status", "pending", "claimed")
            .await
            .unwrap();
        assert!(claimed.is_none());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn scan_applies_prefix_fields_and_limit() {
        let store = test_store().await;
        let base = Utc::now();
        for (i, user) in ["u1", "u1", "u2", "u1"].iter().enumerate() {
            store
                .put(
                    record(Collection::Episodic, &format!("{user}:{i}"), serde_json::json!({"user_id": user, "action_type": "create"}))
                        .with_created_at(base + Duration::seconds(i as i64)),
                )
                .await
                .unwrap();
        }

        let filter = RecordFilter::new().prefix("u1:").field_eq("action_type", "create").limit(2);
        let rows = store.scan(Collection::Episodic, &filter).await.unwrap();
        let keys: Vec<_> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["u1:3", "u1:1"]);
    }

    #[tokio::test]
    async fn nearest_ranks_stored_embeddings() {
        let store = test_store().await;
        store
            .put(record(Collection::Discovery, "weather", serde_json::json!({})).with_embedding(Some(vec![1.0, 0.0])))
            .await
            .unwrap();
        store
            .put(record(Collection::Discovery, "stocks", serde_json::json!({})).with_embedding(Some(vec![0.0, 1.0])))
            .await
            .unwrap();
        store.put(record(Collection::Discovery, "plain", serde_json::json!({}))).await.unwrap();

        let hits = store
            .nearest(Collection::Discovery, &[1.0, 0.1], &RecordFilter::new(), 5, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.key, "weather");
        assert!(hits[0].score > 0.9);
    }

    #[tokio::test]
    async fn claim_marks_once() {
        let store = test_store().await;
        store
            .put(record(Collection::Shared, "h1", serde_json::json!({"status": "pending", "target_agent": "planner"})))
            .await
            .unwrap();

        let filter = RecordFilter::new().field_eq("target_agent", "planner");
        let first = store
            .claim(Collection::Shared, &filter, "status", "pending", "claimed")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.value["status"], "claimed");
        assert_eq!(first.value["target_agent"], "planner");

        let second = store
            .claim(Collection::Shared, &filter, "status", "pending", "claimed")
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_on_a_file_store_have_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("claims.db").display());
        let store = std::sync::Arc::new(SqliteStore::new(&url).await.unwrap());
        store
            .put(record(Collection::Shared, "h1", serde_json::json!({"status": "pending", "target_agent": "planner"})))
            .await
            .unwrap();

        let claimers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    let filter = RecordFilter::new().field_eq("target_agent", "planner");
                    store
                        .claim(Collection::Shared, &filter, "status", "pending", "claimed")
                        .await
                })
            })
            .collect();

        let mut wins = 0;
        for claimer in claimers {
            if claimer.await.unwrap().unwrap().is_some() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);

        let stored = store.get(Collection::Shared, "h1").await.unwrap().unwrap();
        assert_eq!(stored.value["status"], "claimed");
    }

    #[tokio::test]
    async fn claim_respects_filter() {
        let store = test_store().await;
        store
            .put(record(Collection::Shared, "h1", serde_json::json!({"status": "pending", "target_agent": "writer"})))
            .await
            .unwrap();

        let filter = RecordFilter::new().field_eq("target_agent", "planner");
        let claimed = store
            .claim(Collection::Shared, &filter, "status", "pending", "claimed")
            .await
            .unwrap();
        assert!(claimed.is_none());
    }
}
