//! Vector similarity utilities.
//!
//! Pure-Rust cosine similarity and ranking, shared by both store backends,
//! plus the little-endian blob codec the SQLite backend stores embeddings in.

use steward_core::memory::{MemoryRecord, ScoredRecord};

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length, empty, or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank records by cosine similarity to a query embedding.
///
/// Records without an embedding or below `min_score` are dropped. Ties keep
/// the newer record first.
pub fn rank_by_similarity(
    records: Vec<MemoryRecord>,
    query_embedding: &[f32],
    limit: usize,
    min_score: f32,
) -> Vec<ScoredRecord> {
    let mut scored: Vec<ScoredRecord> = records
        .into_iter()
        .filter_map(|record| {
            let score = cosine_similarity(record.embedding.as_deref()?, query_embedding);
            (score >= min_score).then_some(ScoredRecord { record, score })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.record.created_at.cmp(&a.record.created_at))
    });
    scored.truncate(limit);
    scored
}

/// Serialize an embedding vector to bytes.
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize an embedding blob; trailing partial floats are ignored.
pub fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_core::memory::Collection;

    fn record(key: &str, embedding: Option<Vec<f32>>) -> MemoryRecord {
        MemoryRecord::new(Collection::Discovery, key, serde_json::json!({})).with_embedding(embedding)
    }

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn cosine_known_value() {
        let sim = cosine_similarity(&[1.0, 1.0], &[1.0, 0.0]);
        assert!((sim - 0.7071).abs() < 0.001);
    }

    #[test]
    fn ranking_orders_filters_and_limits() {
        let query = vec![1.0, 0.0, 0.0];
        let records = vec![
            record("a", Some(vec![0.0, 1.0, 0.0])),
            record("b", Some(vec![1.0, 0.0, 0.0])),
            record("c", Some(vec![0.5, 0.5, 0.0])),
            record("d", None),
        ];

        let ranked = rank_by_similarity(records.clone(), &query, 10, 0.0);
        let keys: Vec<_> = ranked.iter().map(|s| s.record.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "c", "a"]);

        let floored = rank_by_similarity(records.clone(), &query, 10, 0.5);
        assert_eq!(floored.len(), 2);

        let limited = rank_by_similarity(records, &query, 1, 0.0);
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].record.key, "b");
    }

    #[test]
    fn blob_codec_preserves_values() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(blob_to_embedding(&embedding_to_blob(&v)), v);
    }
}
