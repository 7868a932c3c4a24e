//! Shared fixtures: a deterministic embedder and an engine wired with the
//! in-memory store and the scripted LLM backend.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use agri_core_common::{EngineConfig, Result, RetryConfig};
use agri_core_engine::Engine;
use agri_core_indexing::EmbeddingFunction;
use agri_core_llm::{LlmBackend, LlmClient, StaticBackend};
use agri_core_rag::NoWeather;
use agri_core_storage::MemoryStore;

pub const DIM: usize = 64;

/// Bag-of-words hashing embedder; deterministic, word overlap drives
/// cosine similarity.
pub struct HashEmbedder;

impl EmbeddingFunction for HashEmbedder {
    fn dim(&self) -> u64 {
        DIM as u64
    }

    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; DIM];
                for word in text.to_lowercase().split_whitespace() {
                    let mut hasher = DefaultHasher::new();
                    word.hash(&mut hasher);
                    v[(hasher.finish() % DIM as u64) as usize] += 1.0;
                }
                v
            })
            .collect())
    }
}

pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.llm.retry = RetryConfig {
        max_attempts: 3,
        base_ms: 1,
        cap_ms: 4,
    };
    config
}

/// Engine over an empty in-memory store.
pub fn engine_with_config(config: EngineConfig) -> (Arc<StaticBackend>, Engine) {
    let backend = Arc::new(StaticBackend::new());
    let llm = Arc::new(LlmClient::with_backend(
        LlmBackend::Static(Arc::clone(&backend)),
        config.llm.clone(),
        "static",
    ));
    let engine = Engine::with_components(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(HashEmbedder),
        llm,
        Arc::new(NoWeather),
    );
    (backend, engine)
}

pub fn empty_engine() -> (Arc<StaticBackend>, Engine) {
    engine_with_config(test_config())
}

/// Engine with every collection rebuilt from the reference datasets.
pub async fn seeded_engine() -> (Arc<StaticBackend>, Engine) {
    let (backend, engine) = empty_engine();
    engine.rebuild_index(None).await.unwrap();
    (backend, engine)
}

#[allow(dead_code)]
pub async fn seeded_engine_with_config(config: EngineConfig) -> (Arc<StaticBackend>, Engine) {
    let (backend, engine) = engine_with_config(config);
    engine.rebuild_index(None).await.unwrap();
    (backend, engine)
}
