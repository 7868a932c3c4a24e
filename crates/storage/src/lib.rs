//! Durable nearest-neighbor storage with metadata filtering.
//!
//! Two backends implement the same [`VectorStore`] contract: a Qdrant-backed
//! store for deployments and a brute-force in-memory store used by tests and
//! embedded setups. Rebuilds replace a collection wholesale; readers observe
//! either the old or the new contents, never a mix.

pub mod memory;
pub mod qdrant;

use std::collections::HashMap;

use agri_core_common::{Document, Result};
use async_trait::async_trait;

pub use memory::MemoryStore;
pub use qdrant::QdrantStore;

/// One record heading into a collection
#[derive(Debug, Clone)]
pub struct DocRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub text: String,
    pub metadata: HashMap<String, String>,
}

/// A scored search result
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub doc: Document,
    pub score: f32,
}

/// Conjunction of equality predicates over document metadata
pub type MetadataFilter = HashMap<String, String>;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create a collection with the given embedding dimension. Idempotent;
    /// fails with `DimensionConflict` when the collection already exists
    /// with a different dimension.
    async fn create_collection(&self, name: &str, dim: u64) -> Result<()>;

    /// Batch upsert, atomic per batch. Fails with `ShapeMismatch` when any
    /// embedding's length differs from the collection's dimension; on
    /// failure nothing from the batch is written.
    async fn upsert(&self, name: &str, docs: Vec<DocRecord>) -> Result<()>;

    /// Cosine-similarity search returning up to `k` hits ordered by
    /// descending score. `k == 0` returns an empty hit set without error.
    async fn search(
        &self,
        name: &str,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>>;

    /// Replace a collection's contents in one logical step. Concurrent
    /// readers see the previous contents until the swap, the new contents
    /// after it.
    async fn rebuild(&self, name: &str, dim: u64, docs: Vec<DocRecord>) -> Result<()>;

    /// Snapshot of collection names.
    async fn list_collections(&self) -> Result<Vec<String>>;
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

pub(crate) fn matches_filter(
    metadata: &HashMap<String, String>,
    filter: Option<&MetadataFilter>,
) -> bool {
    match filter {
        None => true,
        Some(predicates) => predicates
            .iter()
            .all(|(key, value)| metadata.get(key).is_some_and(|v| v == value)),
    }
}
