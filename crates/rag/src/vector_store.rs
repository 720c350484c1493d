//! Embedding indexes
//!
//! - [`InMemoryIndex`]: brute-force cosine search over vectors held in memory
//! - [`QdrantIndex`]: Qdrant collection whose points carry the passage id in
//!   the `ref` payload field

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use qdrant_client::{
    qdrant::{
        condition::ConditionOneOf, point_id::PointIdOptions, r#match::MatchValue,
        value::Kind, vectors_output::VectorsOptions, Condition, FieldCondition, Filter, Match,
        RepeatedStrings, RetrievedPoint, ScrollPointsBuilder, SearchPointsBuilder,
    },
    Qdrant,
};
use verso_core::{EmbeddingIndex, Neighbor, SeenIdSet};

use crate::embeddings::{cosine_similarity, HashEmbedder};
use crate::RagError;

/// Payload field holding the passage id
pub const REF_FIELD: &str = "ref";

/// Brute-force cosine index
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    /// Insertion order keeps ties deterministic
    entries: RwLock<Vec<(String, Vec<f32>)>>,
    positions: RwLock<HashMap<String, usize>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a vector
    pub fn insert(&self, id: impl Into<String>, vector: Vec<f32>) {
        let id = id.into();
        let mut entries = self.entries.write();
        let mut positions = self.positions.write();
        match positions.get(&id) {
            Some(&pos) => entries[pos].1 = vector,
            None => {
                positions.insert(id.clone(), entries.len());
                entries.push((id, vector));
            }
        }
    }

    /// Load a JSON object `{ "<id>": [f32, ...], ... }`
    pub fn load(path: impl AsRef<Path>, dim: usize) -> Result<Self, RagError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RagError::NotFound(format!("{}: {}", path.display(), e)))?;
        let map: HashMap<String, Vec<f32>> = serde_json::from_str(&raw)
            .map_err(|e| RagError::Index(format!("{}: {}", path.display(), e)))?;

        let mut ids: Vec<_> = map.keys().cloned().collect();
        ids.sort();

        let index = Self::new();
        for id in ids {
            if let Some(vector) = map.get(&id) {
                if vector.len() != dim {
                    return Err(RagError::Index(format!(
                        "{}: vector for {} has {} dimensions, expected {}",
                        path.display(),
                        id,
                        vector.len(),
                        dim
                    )));
                }
                index.insert(id, vector.clone());
            }
        }

        tracing::info!(path = %path.display(), vectors = index.len(), "Loaded vector index");
        Ok(index)
    }

    /// Embed every passage with a hash embedder
    pub fn from_texts<'a>(
        embedder: &HashEmbedder,
        passages: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Self {
        let mut pairs: Vec<_> = passages.into_iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));

        let index = Self::new();
        for (id, text) in pairs {
            index.insert(id.clone(), embedder.embed(text));
        }
        index
    }
}

#[async_trait]
impl EmbeddingIndex for InMemoryIndex {
    async fn search_excluding(
        &self,
        vector: &[f32],
        k: usize,
        exclude: &SeenIdSet,
    ) -> verso_core::Result<Vec<Neighbor>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let entries = self.entries.read();
        let mut scored: Vec<Neighbor> = entries
            .iter()
            .filter(|(id, _)| !exclude.contains(id))
            .map(|(id, v)| Neighbor {
                id: id.clone(),
                distance: 1.0 - cosine_similarity(vector, v),
            })
            .collect();

        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(k);
        Ok(scored)
    }

    async fn vectors(&self, ids: &[String]) -> verso_core::Result<Vec<(String, Vec<f32>)>> {
        let entries = self.entries.read();
        let positions = self.positions.read();
        Ok(ids
            .iter()
            .filter_map(|id| positions.get(id).map(|&pos| entries[pos].clone()))
            .collect())
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Qdrant connection settings
#[derive(Debug, Clone)]
pub struct QdrantIndexConfig {
    pub endpoint: String,
    pub collection: String,
    pub api_key: Option<String>,
    pub vector_dim: usize,
}

impl From<&verso_config::IndexConfig> for QdrantIndexConfig {
    fn from(c: &verso_config::IndexConfig) -> Self {
        Self {
            endpoint: c.qdrant_endpoint.clone(),
            collection: c.qdrant_collection.clone(),
            api_key: c.qdrant_api_key.clone(),
            vector_dim: c.vector_dim,
        }
    }
}

/// Qdrant-backed index
pub struct QdrantIndex {
    client: Qdrant,
    config: QdrantIndexConfig,
    points: u64,
}

fn ref_condition(ids: Vec<String>) -> Condition {
    Condition {
        condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
            key: REF_FIELD.to_string(),
            r#match: Some(Match {
                match_value: Some(MatchValue::Keywords(RepeatedStrings { strings: ids })),
            }),
            ..Default::default()
        })),
    }
}

fn point_ref(payload: &HashMap<String, qdrant_client::qdrant::Value>) -> Option<String> {
    match payload.get(REF_FIELD).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

#[allow(deprecated)]
fn point_vector(point: &RetrievedPoint) -> Option<Vec<f32>> {
    match point.vectors.as_ref()?.vectors_options.as_ref()? {
        VectorsOptions::Vector(v) => Some(v.data.clone()),
        _ => None,
    }
}

impl QdrantIndex {
    /// Connect and verify the collection exists
    pub async fn connect(config: QdrantIndexConfig) -> Result<Self, RagError> {
        let mut builder = Qdrant::from_url(&config.endpoint);

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
            tracing::info!("Qdrant connection using API key authentication");
        }

        let client = builder
            .build()
            .map_err(|e| RagError::Connection(e.to_string()))?;

        let info = client
            .collection_info(&config.collection)
            .await
            .map_err(|e| RagError::Connection(e.to_string()))?;

        let points = info
            .result
            .and_then(|r| r.points_count)
            .unwrap_or(0);

        tracing::info!(
            collection = %config.collection,
            points,
            "Connected to Qdrant"
        );

        Ok(Self {
            client,
            config,
            points,
        })
    }
}

#[async_trait]
impl EmbeddingIndex for QdrantIndex {
    async fn search_excluding(
        &self,
        vector: &[f32],
        k: usize,
        exclude: &SeenIdSet,
    ) -> verso_core::Result<Vec<Neighbor>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut search = SearchPointsBuilder::new(
            &self.config.collection,
            vector.to_vec(),
            k as u64,
        )
        .with_payload(true);

        if !exclude.is_empty() {
            search = search.filter(Filter {
                must_not: vec![ref_condition(exclude.iter().cloned().collect())],
                ..Default::default()
            });
        }

        let results = self
            .client
            .search_points(search)
            .await
            .map_err(|e| RagError::Search(e.to_string()))?;

        Ok(results
            .result
            .into_iter()
            .filter_map(|point| {
                let id = point_ref(&point.payload).or_else(|| {
                    point.id.and_then(|pid| match pid.point_id_options {
                        Some(PointIdOptions::Uuid(u)) => Some(u),
                        Some(PointIdOptions::Num(n)) => Some(n.to_string()),
                        None => None,
                    })
                })?;
                // Cosine similarity -> distance
                Some(Neighbor {
                    id,
                    distance: 1.0 - point.score,
                })
            })
            .filter(|n| !exclude.contains(&n.id))
            .collect())
    }

    async fn vectors(&self, ids: &[String]) -> verso_core::Result<Vec<(String, Vec<f32>)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let scroll = ScrollPointsBuilder::new(&self.config.collection)
            .filter(Filter {
                must: vec![ref_condition(ids.to_vec())],
                ..Default::default()
            })
            .limit(ids.len() as u32)
            .with_payload(true)
            .with_vectors(true);

        let response = self
            .client
            .scroll(scroll)
            .await
            .map_err(|e| RagError::VectorStore(e.to_string()))?;

        let mut found: HashMap<String, Vec<f32>> = response
            .result
            .iter()
            .filter_map(|p| Some((point_ref(&p.payload)?, point_vector(p)?)))
            .collect();

        // Keep the caller's order
        Ok(ids
            .iter()
            .filter_map(|id| found.remove(id).map(|v| (id.clone(), v)))
            .collect())
    }

    fn len(&self) -> usize {
        self.points as usize
    }
}
