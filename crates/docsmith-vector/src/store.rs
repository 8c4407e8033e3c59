//! In-memory vector store with cosine-similarity search.
//!
//! Brute-force scan over a DashMap. At the target scale (≈10 k doc chunks)
//! a full scan stays well under the latency budget; the public surface is
//! index-agnostic so an ANN backend can replace the internals.

use dashmap::DashMap;
use serde::Serialize;

use crate::error::{Result, VectorError};

/// Logical key of a stored vector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct VectorKey {
    pub tenant_id: String,
    /// Which corpus the vector belongs to, e.g. "docs" or "messages".
    pub source: String,
    /// Stable identifier within the source, e.g. a page path.
    pub key: String,
}

impl VectorKey {
    pub fn new(
        tenant_id: impl Into<String>,
        source: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            source: source.into(),
            key: key.into(),
        }
    }

    fn compound(&self) -> String {
        format!("{}\x1f{}\x1f{}", self.tenant_id, self.source, self.key)
    }
}

/// One search result.
#[derive(Debug, Clone, Serialize)]
pub struct VectorHit {
    pub key: VectorKey,
    /// Cosine similarity in [-1, 1]; higher is closer.
    pub score: f32,
    pub metadata: serde_json::Value,
}

/// Optional search restriction.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub tenant_id: Option<String>,
    pub source: Option<String>,
}

struct Entry {
    key: VectorKey,
    vector: Vec<f32>,
    metadata: serde_json::Value,
}

/// Concurrent vector store. Upserts by logical key, deletes by key,
/// brute-force cosine top-k search.
pub struct VectorStore {
    dimension: usize,
    data: DashMap<String, Entry>,
}

impl VectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn upsert(
        &self,
        key: VectorKey,
        vector: Vec<f32>,
        metadata: serde_json::Value,
    ) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        self.data.insert(
            key.compound(),
            Entry {
                key,
                vector,
                metadata,
            },
        );
        Ok(())
    }

    pub fn delete(&self, key: &VectorKey) -> bool {
        self.data.remove(&key.compound()).is_some()
    }

    /// Top-k nearest neighbours by cosine similarity.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<VectorHit>> {
        if query.len() != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }

        let mut hits: Vec<VectorHit> = self
            .data
            .iter()
            .filter(|entry| {
                let k = &entry.value().key;
                filter
                    .tenant_id
                    .as_ref()
                    .is_none_or(|t| t == &k.tenant_id)
                    && filter.source.as_ref().is_none_or(|s| s == &k.source)
            })
            .map(|entry| VectorHit {
                key: entry.value().key.clone(),
                score: cosine_similarity(query, &entry.value().vector),
                metadata: entry.value().metadata.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }
}

/// Cosine similarity; 0.0 when either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dir: usize, dim: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[dir] = 1.0;
        v
    }

    #[test]
    fn upsert_search_delete() {
        let store = VectorStore::new(4);
        store
            .upsert(
                VectorKey::new("t1", "docs", "rpc.md"),
                unit(0, 4),
                serde_json::json!({"title": "RPC"}),
            )
            .unwrap();
        store
            .upsert(
                VectorKey::new("t1", "docs", "auth.md"),
                unit(1, 4),
                serde_json::json!({"title": "Auth"}),
            )
            .unwrap();

        let hits = store
            .search(&unit(0, 4), 1, &SearchFilter::default())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key.key, "rpc.md");
        assert!((hits[0].score - 1.0).abs() < 1e-6);

        assert!(store.delete(&VectorKey::new("t1", "docs", "rpc.md")));
        assert!(!store.delete(&VectorKey::new("t1", "docs", "rpc.md")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn upsert_replaces_by_logical_key() {
        let store = VectorStore::new(2);
        let key = VectorKey::new("t1", "docs", "page.md");
        store
            .upsert(key.clone(), vec![1.0, 0.0], serde_json::json!({"v": 1}))
            .unwrap();
        store
            .upsert(key, vec![0.0, 1.0], serde_json::json!({"v": 2}))
            .unwrap();
        assert_eq!(store.len(), 1);

        let hits = store
            .search(&[0.0, 1.0], 1, &SearchFilter::default())
            .unwrap();
        assert_eq!(hits[0].metadata["v"], 2);
    }

    #[test]
    fn filter_restricts_source() {
        let store = VectorStore::new(2);
        store
            .upsert(
                VectorKey::new("t1", "docs", "a"),
                vec![1.0, 0.0],
                serde_json::json!({}),
            )
            .unwrap();
        store
            .upsert(
                VectorKey::new("t1", "messages", "b"),
                vec![1.0, 0.0],
                serde_json::json!({}),
            )
            .unwrap();

        let filter = SearchFilter {
            tenant_id: None,
            source: Some("docs".to_string()),
        };
        let hits = store.search(&[1.0, 0.0], 10, &filter).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key.source, "docs");
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let store = VectorStore::new(3);
        let err = store
            .upsert(VectorKey::new("t", "s", "k"), vec![1.0], serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, VectorError::DimensionMismatch { .. }));
        assert!(store.search(&[1.0], 5, &SearchFilter::default()).is_err());
    }

    #[test]
    fn zero_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }
}
