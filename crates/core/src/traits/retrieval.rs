//! Retrieval collaborator traits

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Result, SeenIdSet};

/// A nearest-neighbor hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: String,
    /// Raw distance as reported by the index (lower is closer)
    pub distance: f32,
}

/// Produces query vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a query string
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Vector dimension
    fn dim(&self) -> usize;
}

/// Nearest-neighbor search over precomputed item embeddings
#[async_trait]
pub trait EmbeddingIndex: Send + Sync {
    /// Search for up to `k` neighbors whose ids are not in `exclude`
    ///
    /// Results are ordered closest first.
    async fn search_excluding(
        &self,
        vector: &[f32],
        k: usize,
        exclude: &SeenIdSet,
    ) -> Result<Vec<Neighbor>>;

    /// Search without exclusions
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.search_excluding(vector, k, &SeenIdSet::new()).await
    }

    /// Stored vectors for the given ids; unknown ids are skipped
    async fn vectors(&self, ids: &[String]) -> Result<Vec<(String, Vec<f32>)>>;

    /// Number of indexed items
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pairwise relevance scorer
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score each text against the query; output aligns with `texts`
    async fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>>;

    /// Reranker name for logging
    fn name(&self) -> &str;
}

/// Source text lookup by stable id
pub trait PassageLookup: Send + Sync {
    /// Text for an exact id
    fn text(&self, id: &str) -> Option<&str>;

    /// Resolve a citation to the ordered ids it covers
    ///
    /// `book` is the cited book as written, `chapter` the chapter number and
    /// `verses` an inclusive range.
    fn resolve(&self, book: &str, chapter: u32, verses: (u32, u32)) -> Vec<String>;
}
