//! Text embedding behind a process-wide latch.
//!
//! The fastembed model is loaded once at startup; lazy first-use loading
//! would race concurrent requests, so [`shared`] installs the instance into
//! a `OnceLock` and later callers get the same `Arc`.

use std::sync::{Arc, OnceLock};

use agri_core_common::{EmbeddingConfig, EngineError, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::info;

/// Deterministic text to vector map with a fixed output dimension.
pub trait EmbeddingFunction: Send + Sync {
    fn dim(&self) -> u64;

    /// Batch embed. Safe for concurrent callers.
    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(vec![text.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| EngineError::internal("embedder returned no vector"))
    }
}

pub struct FastembedEmbedder {
    inner: TextEmbedding,
    dim: u64,
}

impl FastembedEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = match config.model.as_str() {
            "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
            "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            other => {
                return Err(EngineError::config(format!(
                    "unsupported embedding model: {other}"
                )))
            }
        };
        let inner = TextEmbedding::try_new(InitOptions::new(model))
            .map_err(|e| EngineError::internal(format!("failed to load embedding model: {e}")))?;
        Ok(Self {
            inner,
            dim: config.dimension,
        })
    }

    /// One throwaway embed so the first real query does not pay the
    /// model warm-up cost.
    pub fn warmup(&self) -> Result<()> {
        self.embed_one("warmup").map(|_| ())
    }
}

impl EmbeddingFunction for FastembedEmbedder {
    fn dim(&self) -> u64 {
        self.dim
    }

    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        self.inner
            .embed(texts, None)
            .map_err(|e| EngineError::internal(format!("embedding failed: {e}")))
    }
}

static SHARED: OnceLock<Arc<FastembedEmbedder>> = OnceLock::new();

/// Process-wide embedder, initialized on the first call and reused after.
/// Call once during startup so request handling never loads the model.
pub fn shared(config: &EmbeddingConfig) -> Result<Arc<FastembedEmbedder>> {
    if let Some(embedder) = SHARED.get() {
        return Ok(Arc::clone(embedder));
    }
    let embedder = Arc::new(FastembedEmbedder::new(config)?);
    embedder.warmup()?;
    info!(model = %config.model, dim = config.dimension, "embedding model loaded");
    Ok(Arc::clone(SHARED.get_or_init(|| embedder)))
}
