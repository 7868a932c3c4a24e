use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use agri_core_common::{Collection, Result};
use agri_core_indexing::{rebuild_index, EmbeddingFunction};
use agri_core_storage::{MemoryStore, MetadataFilter, VectorStore};

/// Deterministic bag-of-words embedder; word overlap maps to cosine
/// similarity, which is all these tests need.
struct HashEmbedder;

const DIM: usize = 64;

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

#[tokio::test]
async fn test_rebuild_all_collections() {
    let store = MemoryStore::new();
    let rebuilt = rebuild_index(&store, &HashEmbedder, None).await.unwrap();
    assert_eq!(rebuilt.len(), 5);
    assert!(rebuilt.contains(&"prices".to_string()));

    let names = store.list_collections().await.unwrap();
    assert_eq!(
        names,
        vec!["fertilizers", "pest_control", "prices", "schemes", "soil"]
    );
}

#[tokio::test]
async fn test_rebuild_single_collection() {
    let store = MemoryStore::new();
    let rebuilt = rebuild_index(&store, &HashEmbedder, Some(Collection::Prices))
        .await
        .unwrap();
    assert_eq!(rebuilt, vec!["prices".to_string()]);
    assert_eq!(store.list_collections().await.unwrap(), vec!["prices"]);
}

#[tokio::test]
async fn test_filtered_search_finds_bargarh_tomato() {
    let store = MemoryStore::new();
    rebuild_index(&store, &HashEmbedder, Some(Collection::Prices))
        .await
        .unwrap();

    let query = HashEmbedder
        .embed_one("price of tomato in Bargarh market")
        .unwrap();
    let mut filter = MetadataFilter::new();
    filter.insert("commodity".to_string(), "tomato".to_string());
    filter.insert("market".to_string(), "Bargarh".to_string());

    let hits = store
        .search("prices", &query, 5, Some(&filter))
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits[0].doc.metadata.contains_key("modal_price"));
}

#[tokio::test]
async fn test_two_rebuilds_yield_equivalent_results() {
    let store = MemoryStore::new();
    rebuild_index(&store, &HashEmbedder, Some(Collection::Schemes))
        .await
        .unwrap();
    let query = HashEmbedder.embed_one("crop insurance premium").unwrap();
    let first: Vec<String> = store
        .search("schemes", &query, 3, None)
        .await
        .unwrap()
        .into_iter()
        .map(|h| h.doc.id)
        .collect();

    rebuild_index(&store, &HashEmbedder, Some(Collection::Schemes))
        .await
        .unwrap();
    let second: Vec<String> = store
        .search("schemes", &query, 3, None)
        .await
        .unwrap()
        .into_iter()
        .map(|h| h.doc.id)
        .collect();

    assert_eq!(first, second);
}
