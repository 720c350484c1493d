//! Query embedders
//!
//! - [`OllamaEmbedder`]: Ollama `/api/embed`, with an optional instruction
//!   prefix for instruction-tuned models (e5: `"query: "`)
//! - [`HashEmbedder`]: deterministic feature hashing, no model required

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;
use verso_core::Embedder;

use crate::RagError;

/// Ollama embedding configuration
#[derive(Debug, Clone)]
pub struct OllamaEmbeddingConfig {
    /// Ollama API endpoint
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// Embedding dimension
    pub embedding_dim: usize,
    /// Prepended to every query
    pub query_prefix: Option<String>,
}

impl Default for OllamaEmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: verso_config::constants::endpoints::OLLAMA_DEFAULT.to_string(),
            model: verso_config::constants::embedding::MODEL.to_string(),
            embedding_dim: verso_config::constants::embedding::VECTOR_DIM,
            query_prefix: None,
        }
    }
}

impl OllamaEmbeddingConfig {
    pub fn from_settings(
        embedding: &verso_config::EmbeddingConfig,
        index: &verso_config::IndexConfig,
    ) -> Self {
        Self {
            endpoint: embedding.endpoint.clone(),
            model: embedding.model.clone(),
            embedding_dim: index.vector_dim,
            query_prefix: embedding.query_prefix.clone(),
        }
    }
}

/// Request to Ollama embedding API
#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: String,
}

/// Response from Ollama embedding API
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Ollama embedder
pub struct OllamaEmbedder {
    client: Client,
    config: OllamaEmbeddingConfig,
}

impl OllamaEmbedder {
    /// Create a new Ollama embedder
    pub fn new(config: OllamaEmbeddingConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Raw embedding without any formatting
    async fn embed_raw(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let request = EmbedRequest {
            model: self.config.model.clone(),
            input: text.to_string(),
        };

        let url = format!("{}/api/embed", self.config.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Connection(format!("Ollama request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RagError::Embedding(format!(
                "Ollama embedding failed: {} - {}",
                status, text
            )));
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embedding(format!("Failed to parse Ollama response: {}", e)))?;

        let vector = embed_response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Embedding("No embedding returned".to_string()))?;

        if vector.len() != self.config.embedding_dim {
            return Err(RagError::Embedding(format!(
                "Expected {} dimensions, model returned {}",
                self.config.embedding_dim,
                vector.len()
            )));
        }
        Ok(vector)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed_query(&self, text: &str) -> verso_core::Result<Vec<f32>> {
        let formatted = match &self.config.query_prefix {
            Some(prefix) => format!("{}{}", prefix, text),
            None => text.to_string(),
        };
        Ok(self.embed_raw(&formatted).await?)
    }

    fn dim(&self) -> usize {
        self.config.embedding_dim
    }
}

/// Feature-hashing embedder for local corpora and tests
///
/// Each lowercased word adds weight to one bucket (FNV-1a hash); the vector
/// is L2-normalized. Texts sharing words get high cosine similarity.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn bucket(&self, word: &str) -> usize {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in word.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        (hash % self.dim as u64) as usize
    }

    /// Embed synchronously
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dim];
        for word in text.unicode_words() {
            embedding[self.bucket(&word.to_lowercase())] += 1.0;
        }
        normalize(&mut embedding);
        embedding
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_query(&self, text: &str) -> verso_core::Result<Vec<f32>> {
        Ok(self.embed(text))
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// L2-normalize in place; zero vectors stay zero
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity; 0.0 for mismatched or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}
