//! Evidence assembly for a classified query.
//!
//! Routing is a declarative table from intent to collections. Multi-source
//! retrieval splits the top-k budget, normalizes scores per collection with
//! min-max before merging, and caps the assembled context at a byte budget
//! by dropping the lowest-scored items.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agri_core_common::{
    Collection, Document, EngineConfig, EngineError, ExtractedEntities, IntentDecision,
    IntentLabel, Result, RetrievalContext,
};
use agri_core_indexing::EmbeddingFunction;
use agri_core_storage::{MetadataFilter, SearchHit, VectorStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::weather::WeatherProvider;

/// Share of the top-k budget given to the primary collection.
pub const PRIMARY_SHARE: f32 = 0.6;

const SEPARATOR: &str = "\n---\n";

const ADVISORY_FANOUT: &[Collection] =
    &[Collection::Fertilizers, Collection::Soil, Collection::PestControl];
const ALL_COLLECTIONS: &[Collection] = &[
    Collection::Prices,
    Collection::Soil,
    Collection::PestControl,
    Collection::Fertilizers,
    Collection::Schemes,
];

/// Where an intent's evidence comes from
pub enum Route {
    Single {
        primary: Collection,
        secondary: Option<Collection>,
    },
    FanOut(&'static [Collection]),
    Weather,
}

/// Declarative intent to collection routing.
pub fn route_for(intent: IntentLabel) -> Route {
    match intent {
        IntentLabel::MarketPrice => Route::Single {
            primary: Collection::Prices,
            secondary: Some(Collection::Schemes),
        },
        IntentLabel::Weather => Route::Weather,
        IntentLabel::PestControl => Route::Single {
            primary: Collection::PestControl,
            secondary: None,
        },
        IntentLabel::Fertilizer => Route::Single {
            primary: Collection::Fertilizers,
            secondary: Some(Collection::Soil),
        },
        IntentLabel::Soil => Route::Single {
            primary: Collection::Soil,
            secondary: None,
        },
        IntentLabel::GovernmentScheme => Route::Single {
            primary: Collection::Schemes,
            secondary: None,
        },
        IntentLabel::CropAdvisory => Route::FanOut(ADVISORY_FANOUT),
        IntentLabel::General | IntentLabel::Complex => Route::FanOut(ALL_COLLECTIONS),
    }
}

/// Equality filter for one collection, built from extracted entities.
fn filter_for(collection: Collection, entities: &ExtractedEntities) -> Option<MetadataFilter> {
    let mut filter = MetadataFilter::new();
    match collection {
        Collection::Prices => {
            if let Some(crop) = &entities.crop {
                filter.insert("commodity".to_string(), crop.clone());
            }
            if let Some(market) = &entities.market {
                filter.insert("market".to_string(), market.clone());
            }
        }
        Collection::Soil | Collection::Fertilizers | Collection::PestControl => {
            if let Some(crop) = &entities.crop {
                filter.insert("crop".to_string(), crop.clone());
            }
        }
        Collection::Schemes => {}
    }
    if filter.is_empty() {
        None
    } else {
        Some(filter)
    }
}

pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingFunction>,
    weather: Arc<dyn WeatherProvider>,
    context_byte_budget: usize,
    search_timeout: Duration,
    embed_timeout: Duration,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingFunction>,
        weather: Arc<dyn WeatherProvider>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            weather,
            context_byte_budget: config.retrieval.context_byte_budget,
            search_timeout: Duration::from_millis(config.store.search_timeout_ms),
            embed_timeout: Duration::from_millis(config.embedding.timeout_ms),
        }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        decision: &IntentDecision,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<RetrievalContext> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        match route_for(decision.label) {
            Route::Weather => self.retrieve_weather(query, &decision.entities).await,
            Route::Single { primary, secondary } => {
                let mut targets = vec![(primary, primary_share(top_k))];
                if let Some(secondary) = secondary {
                    let rest = top_k.saturating_sub(primary_share(top_k));
                    if rest > 0 {
                        targets.push((secondary, rest));
                    }
                }
                self.retrieve_from(query, &decision.entities, &targets, top_k, cancel)
                    .await
            }
            Route::FanOut(collections) => {
                let per_source = top_k.div_ceil(collections.len().max(1));
                let targets: Vec<(Collection, usize)> =
                    collections.iter().map(|c| (*c, per_source)).collect();
                self.retrieve_from(query, &decision.entities, &targets, top_k, cancel)
                    .await
            }
        }
    }

    async fn retrieve_weather(
        &self,
        query: &str,
        entities: &ExtractedEntities,
    ) -> Result<RetrievalContext> {
        match self.weather.lookup(query, entities).await? {
            Some(payload) => {
                let mut metadata = HashMap::new();
                metadata.insert("source_collection".to_string(), "weather".to_string());
                Ok(RetrievalContext {
                    assembled_text: payload.clone(),
                    hits: vec![Document {
                        id: "weather".to_string(),
                        text: payload,
                        metadata,
                    }],
                    scores: vec![1.0],
                    sources: vec!["weather".to_string()],
                })
            }
            None => {
                debug!("weather collaborator returned no data");
                Ok(RetrievalContext {
                    sources: vec!["weather".to_string()],
                    ..RetrievalContext::empty()
                })
            }
        }
    }

    async fn embed_query(&self, query: &str, cancel: &CancellationToken) -> Result<Vec<f32>> {
        let embedder = Arc::clone(&self.embedder);
        let text = query.to_string();
        let handle = tokio::task::spawn_blocking(move || embedder.embed_one(&text));

        tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            joined = tokio::time::timeout(self.embed_timeout, handle) => match joined {
                Err(_) => Err(EngineError::UpstreamUnavailable("embedding timed out".to_string())),
                Ok(Err(e)) => Err(EngineError::internal(format!("embedding task failed: {e}"))),
                Ok(Ok(result)) => result,
            },
        }
    }

    async fn retrieve_from(
        &self,
        query: &str,
        entities: &ExtractedEntities,
        targets: &[(Collection, usize)],
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<RetrievalContext> {
        if top_k == 0 {
            return Ok(RetrievalContext::empty());
        }
        let query_vector = self.embed_query(query, cancel).await?;

        let mut per_collection: Vec<(Collection, Vec<SearchHit>)> = Vec::new();
        for (collection, k) in targets {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let filter = filter_for(*collection, entities);
            let search = self
                .store
                .search(collection.name(), &query_vector, *k, filter.as_ref());
            let hits = match tokio::time::timeout(self.search_timeout, search).await {
                Err(_) => {
                    warn!(collection = collection.name(), "vector search timed out");
                    continue;
                }
                Ok(Err(EngineError::NotFound(_))) => {
                    warn!(
                        degraded = true,
                        collection = collection.name(),
                        "collection missing, skipping"
                    );
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(hits)) => hits,
            };
            if !hits.is_empty() {
                per_collection.push((*collection, hits));
            }
        }

        Ok(self.merge(per_collection, top_k))
    }

    fn merge(
        &self,
        mut per_collection: Vec<(Collection, Vec<SearchHit>)>,
        top_k: usize,
    ) -> RetrievalContext {
        // Per-collection min-max normalization stops one collection's score
        // scale from dominating the merge
        if per_collection.len() >= 2 {
            for (_, hits) in per_collection.iter_mut() {
                normalize_scores(hits);
            }
        }

        let sources: Vec<String> = per_collection
            .iter()
            .map(|(c, _)| c.name().to_string())
            .collect();

        let mut merged: Vec<SearchHit> = per_collection
            .into_iter()
            .flat_map(|(_, hits)| hits)
            .collect();
        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc.id.cmp(&b.doc.id))
        });
        merged.truncate(top_k);

        let mut assembled = String::new();
        for hit in &merged {
            let addition = if assembled.is_empty() {
                hit.doc.text.len()
            } else {
                SEPARATOR.len() + hit.doc.text.len()
            };
            if assembled.len() + addition > self.context_byte_budget {
                break;
            }
            if !assembled.is_empty() {
                assembled.push_str(SEPARATOR);
            }
            assembled.push_str(&hit.doc.text);
        }

        let (hits, scores): (Vec<Document>, Vec<f32>) = merged
            .into_iter()
            .map(|h| (h.doc, h.score))
            .unzip();
        RetrievalContext {
            hits,
            scores,
            assembled_text: assembled,
            sources,
        }
    }
}

fn primary_share(top_k: usize) -> usize {
    ((top_k as f32) * PRIMARY_SHARE).ceil() as usize
}

fn normalize_scores(hits: &mut [SearchHit]) {
    let Some(max) = hits.iter().map(|h| h.score).reduce(f32::max) else {
        return;
    };
    let min = hits.iter().map(|h| h.score).reduce(f32::min).unwrap_or(max);
    let range = max - min;
    for hit in hits.iter_mut() {
        hit.score = if range < f32::EPSILON {
            1.0
        } else {
            (hit.score - min) / range
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_share_is_ceiling() {
        assert_eq!(primary_share(5), 3);
        assert_eq!(primary_share(10), 6);
        assert_eq!(primary_share(1), 1);
    }

    #[test]
    fn test_routing_table() {
        assert!(matches!(
            route_for(IntentLabel::MarketPrice),
            Route::Single { primary: Collection::Prices, secondary: Some(Collection::Schemes) }
        ));
        assert!(matches!(route_for(IntentLabel::Weather), Route::Weather));
        assert!(matches!(route_for(IntentLabel::CropAdvisory), Route::FanOut(f) if f.len() == 3));
        assert!(matches!(route_for(IntentLabel::General), Route::FanOut(f) if f.len() == 5));
    }

    #[test]
    fn test_normalize_scores_min_max() {
        let doc = |id: &str| Document {
            id: id.to_string(),
            text: String::new(),
            metadata: HashMap::new(),
        };
        let mut hits = vec![
            SearchHit { doc: doc("a"), score: 0.2 },
            SearchHit { doc: doc("b"), score: 0.6 },
            SearchHit { doc: doc("c"), score: 1.0 },
        ];
        normalize_scores(&mut hits);
        assert_eq!(hits[0].score, 0.0);
        assert_eq!(hits[1].score, 0.5);
        assert_eq!(hits[2].score, 1.0);

        // Equal scores collapse to 1.0 rather than dividing by zero
        let mut flat = vec![
            SearchHit { doc: doc("a"), score: 0.4 },
            SearchHit { doc: doc("b"), score: 0.4 },
        ];
        normalize_scores(&mut flat);
        assert!(flat.iter().all(|h| h.score == 1.0));
    }

    #[test]
    fn test_filter_for_prices_uses_commodity_and_market() {
        let entities = ExtractedEntities {
            crop: Some("tomato".to_string()),
            market: Some("Bargarh".to_string()),
        };
        let filter = filter_for(Collection::Prices, &entities).unwrap();
        assert_eq!(filter.get("commodity").map(String::as_str), Some("tomato"));
        assert_eq!(filter.get("market").map(String::as_str), Some("Bargarh"));

        let filter = filter_for(Collection::Fertilizers, &entities).unwrap();
        assert_eq!(filter.get("crop").map(String::as_str), Some("tomato"));
        assert!(filter.get("market").is_none());

        assert!(filter_for(Collection::Schemes, &entities).is_none());
    }
}
