//! Shared fixtures: a deterministic embedder, a seeded in-memory store and
//! a canned weather provider.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use agri_core_common::{ExtractedEntities, Result};
use agri_core_indexing::EmbeddingFunction;
use agri_core_rag::WeatherProvider;
use agri_core_storage::{DocRecord, MemoryStore, VectorStore};
use async_trait::async_trait;

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

pub struct CannedWeather(pub Option<String>);

#[async_trait]
impl WeatherProvider for CannedWeather {
    async fn lookup(&self, _query: &str, _entities: &ExtractedEntities) -> Result<Option<String>> {
        Ok(self.0.clone())
    }
}

pub fn record(id: &str, text: &str, meta: &[(&str, &str)]) -> DocRecord {
    let mut metadata: HashMap<String, String> = meta
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    metadata
        .entry("source_collection".to_string())
        .or_insert_with(|| "test".to_string());
    DocRecord {
        id: id.to_string(),
        embedding: HashEmbedder.embed_one(text).unwrap(),
        text: text.to_string(),
        metadata,
    }
}

/// Store with small, recognizable corpora in every collection.
pub async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let dim = DIM as u64;

    store
        .rebuild(
            "prices",
            dim,
            vec![
                record(
                    "price_tomato_bargarh",
                    "modal price of tomato in Bargarh market was 1850 per quintal",
                    &[
                        ("commodity", "tomato"),
                        ("market", "Bargarh"),
                        ("modal_price", "1850"),
                        ("source_collection", "prices"),
                    ],
                ),
                record(
                    "price_onion_bargarh",
                    "modal price of onion in Bargarh market was 3100 per quintal",
                    &[
                        ("commodity", "onion"),
                        ("market", "Bargarh"),
                        ("modal_price", "3100"),
                        ("source_collection", "prices"),
                    ],
                ),
            ],
        )
        .await
        .unwrap();

    store
        .rebuild(
            "soil",
            dim,
            vec![record(
                "soil_rice",
                "clay loam soil suits transplanted rice with standing water",
                &[("crop", "rice"), ("source_collection", "soil")],
            )],
        )
        .await
        .unwrap();

    store
        .rebuild(
            "pest_control",
            dim,
            vec![record(
                "pest_rice_borer",
                "stem borer in rice causes dead hearts, install pheromone traps",
                &[("crop", "rice"), ("source_collection", "pest_control")],
            )],
        )
        .await
        .unwrap();

    store
        .rebuild(
            "fertilizers",
            dim,
            vec![
                record(
                    "fert_rice",
                    "fertilizer for rice apply 40 kg nitrogen per acre basal",
                    &[("crop", "rice"), ("source_collection", "fertilizers")],
                ),
                record(
                    "fert_wheat",
                    "fertilizer for wheat apply 50 kg nitrogen per acre at sowing",
                    &[("crop", "wheat"), ("source_collection", "fertilizers")],
                ),
            ],
        )
        .await
        .unwrap();

    store
        .rebuild(
            "schemes",
            dim,
            vec![record(
                "scheme_nbs",
                "Nutrient Based Subsidy reduces retail prices of fertilizers for farmers",
                &[
                    ("scheme_name", "Nutrient Based Subsidy"),
                    ("source_collection", "schemes"),
                ],
            )],
        )
        .await
        .unwrap();

    store
}
