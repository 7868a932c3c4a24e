//! In-memory [`VectorStore`] implementation for tests and embedded setups.
//!
//! Collections live behind `std::sync::RwLock` as immutable `Arc` snapshots.
//! A rebuild assembles the replacement off to the side and swaps the `Arc`
//! under the write lock, so a concurrent reader holds either the old or the
//! new snapshot for the whole search.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use agri_core_common::{Document, EngineError, Result};
use async_trait::async_trait;

use crate::{cosine_similarity, matches_filter, DocRecord, MetadataFilter, SearchHit, VectorStore};

struct CollectionData {
    dim: u64,
    rows: Vec<DocRecord>,
}

impl CollectionData {
    fn check_shapes(&self, name: &str, docs: &[DocRecord]) -> Result<()> {
        for doc in docs {
            if doc.embedding.len() as u64 != self.dim {
                return Err(EngineError::ShapeMismatch {
                    collection: name.to_string(),
                    expected: self.dim,
                    got: doc.embedding.len() as u64,
                });
            }
        }
        Ok(())
    }
}

pub struct MemoryStore {
    collections: RwLock<HashMap<String, Arc<CollectionData>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn snapshot(&self, name: &str) -> Result<Arc<CollectionData>> {
        let collections = self.collections.read().expect("collection lock poisoned");
        collections
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("collection {name}")))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn create_collection(&self, name: &str, dim: u64) -> Result<()> {
        let mut collections = self.collections.write().expect("collection lock poisoned");
        if let Some(existing) = collections.get(name) {
            if existing.dim != dim {
                return Err(EngineError::DimensionConflict {
                    collection: name.to_string(),
                    expected: existing.dim,
                    got: dim,
                });
            }
            return Ok(());
        }
        collections.insert(name.to_string(), Arc::new(CollectionData { dim, rows: vec![] }));
        Ok(())
    }

    async fn upsert(&self, name: &str, docs: Vec<DocRecord>) -> Result<()> {
        let mut collections = self.collections.write().expect("collection lock poisoned");
        let current = collections
            .get(name)
            .ok_or_else(|| EngineError::not_found(format!("collection {name}")))?;
        // Validate the whole batch before touching anything
        current.check_shapes(name, &docs)?;

        let mut rows = current.rows.clone();
        for doc in docs {
            match rows.iter_mut().find(|r| r.id == doc.id) {
                Some(slot) => *slot = doc,
                None => rows.push(doc),
            }
        }
        let dim = current.dim;
        collections.insert(name.to_string(), Arc::new(CollectionData { dim, rows }));
        Ok(())
    }

    async fn search(
        &self,
        name: &str,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        let data = self.snapshot(name)?;
        if k == 0 {
            return Ok(vec![]);
        }

        let mut hits: Vec<SearchHit> = data
            .rows
            .iter()
            .filter(|row| matches_filter(&row.metadata, filter))
            .map(|row| SearchHit {
                score: cosine_similarity(query, &row.embedding),
                doc: Document {
                    id: row.id.clone(),
                    text: row.text.clone(),
                    metadata: row.metadata.clone(),
                },
            })
            .collect();

        // Descending score, id as a deterministic tie-break
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc.id.cmp(&b.doc.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn rebuild(&self, name: &str, dim: u64, docs: Vec<DocRecord>) -> Result<()> {
        let replacement = CollectionData { dim, rows: docs };
        replacement.check_shapes(name, &replacement.rows)?;
        let replacement = Arc::new(replacement);

        let mut collections = self.collections.write().expect("collection lock poisoned");
        collections.insert(name.to_string(), replacement);
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let collections = self.collections.read().expect("collection lock poisoned");
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, embedding: Vec<f32>, text: &str) -> DocRecord {
        DocRecord {
            id: id.to_string(),
            embedding,
            text: text.to_string(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_create_is_idempotent_and_checks_dim() {
        let store = MemoryStore::new();
        store.create_collection("prices", 3).await.unwrap();
        store.create_collection("prices", 3).await.unwrap();

        let err = store.create_collection("prices", 4).await.unwrap_err();
        assert!(matches!(err, EngineError::DimensionConflict { .. }));
    }

    #[tokio::test]
    async fn test_upsert_batch_is_atomic_on_shape_mismatch() {
        let store = MemoryStore::new();
        store.create_collection("prices", 2).await.unwrap();

        let batch = vec![
            record("a", vec![1.0, 0.0], "good"),
            record("b", vec![1.0, 0.0, 0.0], "bad shape"),
        ];
        let err = store.upsert("prices", batch).await.unwrap_err();
        assert!(matches!(err, EngineError::ShapeMismatch { .. }));

        // Nothing from the failed batch landed
        let hits = store.search("prices", &[1.0, 0.0], 10, None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_search_orders_by_descending_score() {
        let store = MemoryStore::new();
        store.create_collection("prices", 2).await.unwrap();
        store
            .upsert(
                "prices",
                vec![
                    record("far", vec![0.0, 1.0], "far"),
                    record("near", vec![1.0, 0.0], "near"),
                    record("mid", vec![1.0, 1.0], "mid"),
                ],
            )
            .await
            .unwrap();

        let hits = store.search("prices", &[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].doc.id, "near");
        assert_eq!(hits[1].doc.id, "mid");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_zero_k_returns_empty() {
        let store = MemoryStore::new();
        store.create_collection("prices", 2).await.unwrap();
        store
            .upsert("prices", vec![record("a", vec![1.0, 0.0], "a")])
            .await
            .unwrap();
        let hits = store.search("prices", &[1.0, 0.0], 0, None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_missing_collection_is_not_found() {
        let store = MemoryStore::new();
        let err = store.search("nope", &[1.0], 5, None).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
