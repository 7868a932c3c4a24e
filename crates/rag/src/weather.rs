//! Seam for the external weather collaborator.
//!
//! Weather queries never hit the vector store; the collaborator's payload is
//! surfaced directly as the retrieval context. The engine ships only a stub
//! that reports the collaborator as unavailable.

use agri_core_common::{ExtractedEntities, Result};
use async_trait::async_trait;

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Weather payload for the query, or `None` when no data is available.
    async fn lookup(&self, query: &str, entities: &ExtractedEntities) -> Result<Option<String>>;
}

/// Stub provider used when no weather collaborator is wired in.
pub struct NoWeather;

#[async_trait]
impl WeatherProvider for NoWeather {
    async fn lookup(&self, _query: &str, _entities: &ExtractedEntities) -> Result<Option<String>> {
        Ok(None)
    }
}
