//! Qdrant-backed [`VectorStore`].
//!
//! Each logical collection is an alias pointing at a generation-suffixed
//! physical collection. A rebuild indexes the replacement generation off to
//! the side and repoints the alias in a single alias-change request, so
//! searches against the alias never observe a half-built collection.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use agri_core_common::{Document, EngineError, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::{
    Condition, CreateAlias, CreateCollectionBuilder, DeleteAlias, Distance, Filter, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{DocRecord, MetadataFilter, SearchHit, VectorStore};

const UPSERT_BATCH: usize = 256;

#[derive(Clone)]
struct CollectionEntry {
    physical: String,
    dim: u64,
    writer: Arc<tokio::sync::Mutex<()>>,
}

pub struct QdrantStore {
    client: Qdrant,
    registry: RwLock<HashMap<String, CollectionEntry>>,
}

impl QdrantStore {
    /// Connect to Qdrant and recover the alias registry so collections
    /// created by earlier runs stay addressable.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| EngineError::UpstreamUnavailable(format!("qdrant connect: {e}")))?;

        let store = Self {
            client,
            registry: RwLock::new(HashMap::new()),
        };
        store.recover().await?;
        Ok(store)
    }

    async fn recover(&self) -> Result<()> {
        let aliases = self
            .client
            .list_aliases()
            .await
            .map_err(|e| EngineError::UpstreamUnavailable(format!("qdrant list aliases: {e}")))?;

        for alias in aliases.aliases {
            match self.read_dimension(&alias.collection_name).await {
                Ok(Some(dim)) => {
                    debug!(
                        collection = %alias.alias_name,
                        physical = %alias.collection_name,
                        dim,
                        "recovered collection"
                    );
                    let mut registry = self.registry.write().expect("registry lock poisoned");
                    registry.insert(
                        alias.alias_name.clone(),
                        CollectionEntry {
                            physical: alias.collection_name.clone(),
                            dim,
                            writer: Arc::new(tokio::sync::Mutex::new(())),
                        },
                    );
                }
                Ok(None) => {
                    warn!(alias = %alias.alias_name, "alias without readable vector params, skipping");
                }
                Err(e) => {
                    warn!(alias = %alias.alias_name, error = %e, "failed to inspect collection");
                }
            }
        }
        Ok(())
    }

    async fn read_dimension(&self, physical: &str) -> Result<Option<u64>> {
        let info = self
            .client
            .collection_info(physical)
            .await
            .map_err(|e| EngineError::UpstreamUnavailable(format!("qdrant collection info: {e}")))?;

        let dim = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|kind| match kind {
                VectorsConfigKind::Params(params) => Some(params.size),
                _ => None,
            });
        Ok(dim)
    }

    fn entry(&self, name: &str) -> Result<CollectionEntry> {
        let registry = self.registry.read().expect("registry lock poisoned");
        registry
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("collection {name}")))
    }

    fn check_shapes(name: &str, dim: u64, docs: &[DocRecord]) -> Result<()> {
        for doc in docs {
            if doc.embedding.len() as u64 != dim {
                return Err(EngineError::ShapeMismatch {
                    collection: name.to_string(),
                    expected: dim,
                    got: doc.embedding.len() as u64,
                });
            }
        }
        Ok(())
    }

    fn generation_name(name: &str) -> String {
        format!("{name}__{}", Uuid::new_v4().simple())
    }

    async fn create_physical(&self, physical: &str, dim: u64) -> Result<()> {
        self.client
            .create_collection(
                CreateCollectionBuilder::new(physical)
                    .vectors_config(VectorParamsBuilder::new(dim, Distance::Cosine)),
            )
            .await
            .map_err(|e| EngineError::UpstreamUnavailable(format!("qdrant create: {e}")))?;
        Ok(())
    }

    async fn upsert_into(&self, physical: &str, docs: &[DocRecord]) -> Result<()> {
        for batch in docs.chunks(UPSERT_BATCH) {
            let points: Vec<PointStruct> = batch
                .iter()
                .map(|doc| {
                    let mut payload_map = serde_json::Map::new();
                    payload_map.insert("id".to_string(), serde_json::Value::String(doc.id.clone()));
                    payload_map
                        .insert("text".to_string(), serde_json::Value::String(doc.text.clone()));
                    for (key, value) in &doc.metadata {
                        payload_map
                            .insert(key.clone(), serde_json::Value::String(value.clone()));
                    }
                    let payload = Payload::try_from(serde_json::Value::Object(payload_map))
                        .unwrap_or_else(|_| Payload::new());
                    let point_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, doc.id.as_bytes());
                    PointStruct::new(point_id.to_string(), doc.embedding.clone(), payload)
                })
                .collect();

            self.client
                .upsert_points(UpsertPointsBuilder::new(physical, points).wait(true))
                .await
                .map_err(|e| EngineError::UpstreamUnavailable(format!("qdrant upsert: {e}")))?;
        }
        Ok(())
    }

    /// Repoint `name` at `physical`, creating the alias when it does not
    /// exist yet.
    async fn swap_alias(&self, name: &str, physical: &str, had_alias: bool) -> Result<()> {
        if had_alias {
            self.client
                .delete_alias(DeleteAlias {
                    alias_name: name.to_string(),
                })
                .await
                .map_err(|e| EngineError::UpstreamUnavailable(format!("qdrant alias swap: {e}")))?;
        }
        self.client
            .create_alias(CreateAlias {
                collection_name: physical.to_string(),
                alias_name: name.to_string(),
            })
            .await
            .map_err(|e| EngineError::UpstreamUnavailable(format!("qdrant alias swap: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn create_collection(&self, name: &str, dim: u64) -> Result<()> {
        if let Ok(existing) = self.entry(name) {
            if existing.dim != dim {
                return Err(EngineError::DimensionConflict {
                    collection: name.to_string(),
                    expected: existing.dim,
                    got: dim,
                });
            }
            return Ok(());
        }

        let physical = Self::generation_name(name);
        self.create_physical(&physical, dim).await?;
        self.swap_alias(name, &physical, false).await?;

        let mut registry = self.registry.write().expect("registry lock poisoned");
        registry.insert(
            name.to_string(),
            CollectionEntry {
                physical,
                dim,
                writer: Arc::new(tokio::sync::Mutex::new(())),
            },
        );
        info!(collection = name, dim, "created collection");
        Ok(())
    }

    async fn upsert(&self, name: &str, docs: Vec<DocRecord>) -> Result<()> {
        let entry = self.entry(name)?;
        Self::check_shapes(name, entry.dim, &docs)?;

        let _writer = entry.writer.lock().await;
        self.upsert_into(&entry.physical, &docs).await
    }

    async fn search(
        &self,
        name: &str,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        self.entry(name)?;
        if k == 0 {
            return Ok(vec![]);
        }

        let mut request = SearchPointsBuilder::new(name, query.to_vec(), k as u64).with_payload(true);
        if let Some(predicates) = filter {
            if !predicates.is_empty() {
                let conditions: Vec<Condition> = predicates
                    .iter()
                    .map(|(key, value)| Condition::matches(key.clone(), value.clone()))
                    .collect();
                request = request.filter(Filter::must(conditions));
            }
        }

        let response = self
            .client
            .search_points(request)
            .await
            .map_err(|e| EngineError::UpstreamUnavailable(format!("qdrant search: {e}")))?;

        let hits = response
            .result
            .into_iter()
            .map(|point| {
                let mut id = String::new();
                let mut text = String::new();
                let mut metadata = HashMap::new();
                for (key, value) in &point.payload {
                    let Some(s) = value.as_str().map(|s| s.to_string()) else {
                        continue;
                    };
                    match key.as_str() {
                        "id" => id = s,
                        "text" => text = s,
                        _ => {
                            metadata.insert(key.clone(), s);
                        }
                    }
                }
                SearchHit {
                    doc: Document { id, text, metadata },
                    score: point.score,
                }
            })
            .collect();
        Ok(hits)
    }

    async fn rebuild(&self, name: &str, dim: u64, docs: Vec<DocRecord>) -> Result<()> {
        Self::check_shapes(name, dim, &docs)?;

        let (writer, previous) = match self.entry(name) {
            Ok(entry) => {
                if entry.dim != dim {
                    return Err(EngineError::DimensionConflict {
                        collection: name.to_string(),
                        expected: entry.dim,
                        got: dim,
                    });
                }
                (entry.writer.clone(), Some(entry.physical.clone()))
            }
            Err(_) => (Arc::new(tokio::sync::Mutex::new(())), None),
        };
        let _guard = writer.lock().await;

        // Index the replacement generation off to the side, then repoint
        let physical = Self::generation_name(name);
        self.create_physical(&physical, dim).await?;
        if let Err(e) = self.upsert_into(&physical, &docs).await {
            let _ = self.client.delete_collection(physical.as_str()).await;
            return Err(e);
        }
        self.swap_alias(name, &physical, previous.is_some()).await?;

        {
            let mut registry = self.registry.write().expect("registry lock poisoned");
            registry.insert(
                name.to_string(),
                CollectionEntry {
                    physical: physical.clone(),
                    dim,
                    writer: writer.clone(),
                },
            );
        }

        if let Some(old) = previous {
            if let Err(e) = self.client.delete_collection(old.as_str()).await {
                warn!(collection = name, old = %old, error = %e, "failed to drop previous generation");
            }
        }
        info!(collection = name, count = docs.len(), "rebuilt collection");
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let registry = self.registry.read().expect("registry lock poisoned");
        let mut names: Vec<String> = registry.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
