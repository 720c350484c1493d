//! Pairwise rerankers
//!
//! - [`HttpReranker`]: cross-encoder served behind a text-embeddings-inference
//!   compatible `/rerank` endpoint
//! - [`LexicalReranker`]: term-overlap scorer, used when no model is available

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;
use verso_core::Reranker;

use crate::RagError;

/// TF-weighted term overlap scorer
///
/// Scoring formula:
/// - Term frequency: sqrt(count in doc) for diminishing returns
/// - IDF approximation: ln(1 + word length) favors specific terms
/// - Position boost: earlier query terms weigh slightly more
/// - Coverage bonus: fraction of query terms present
#[derive(Debug, Clone)]
pub struct LexicalReranker {
    stopwords: HashSet<String>,
}

impl LexicalReranker {
    pub fn new<I, S>(stopwords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            stopwords: stopwords
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Score one document against a query, in `[0, 1)`
    pub fn score_one(&self, query: &str, document: &str) -> f32 {
        let query_lower = query.to_lowercase();
        let doc_lower = document.to_lowercase();

        let query_terms: Vec<&str> = query_lower
            .unicode_words()
            .filter(|w| w.chars().count() > 1 && !self.stopwords.contains(*w))
            .collect();

        if query_terms.is_empty() {
            return 0.0;
        }

        let doc_words: Vec<&str> = doc_lower.unicode_words().collect();
        let doc_len = doc_words.len().max(1) as f32;
        let length_norm = 1.0 / (1.0 + (doc_len / 50.0).sqrt());

        let mut total_score = 0.0f32;
        let mut matched_terms = 0usize;

        for (pos, term) in query_terms.iter().enumerate() {
            let tf = doc_words.iter().filter(|w| **w == *term).count() as f32;
            if tf > 0.0 {
                matched_terms += 1;
                let idf_approx = (1.0 + term.chars().count() as f32).ln();
                let position_weight = 1.0 / (1.0 + pos as f32 * 0.1);
                total_score += tf.sqrt() * idf_approx * position_weight * length_norm;
            }
        }

        let coverage = matched_terms as f32 / query_terms.len() as f32;
        let raw_score = total_score + coverage * 0.3;
        raw_score / (raw_score + 1.0)
    }
}

impl Default for LexicalReranker {
    fn default() -> Self {
        Self::new(verso_config::constants::retrieval::STOPWORDS)
    }
}

#[async_trait]
impl Reranker for LexicalReranker {
    async fn score(&self, query: &str, texts: &[&str]) -> verso_core::Result<Vec<f32>> {
        Ok(texts.iter().map(|t| self.score_one(query, t)).collect())
    }

    fn name(&self) -> &str {
        "lexical"
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [&'a str],
    raw_scores: bool,
    truncate: bool,
}

#[derive(Debug, Deserialize)]
struct RerankHit {
    index: usize,
    score: f32,
}

/// Cross-encoder over HTTP
pub struct HttpReranker {
    client: Client,
    endpoint: String,
}

impl HttpReranker {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, RagError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::Reranker(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    async fn rerank(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>, RagError> {
        let url = format!("{}/rerank", self.endpoint.trim_end_matches('/'));
        let request = RerankRequest {
            query,
            texts,
            raw_scores: true,
            truncate: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Connection(format!("Reranker request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::Reranker(format!("{} - {}", status, body)));
        }

        let hits: Vec<RerankHit> = response
            .json()
            .await
            .map_err(|e| RagError::Reranker(format!("Failed to parse response: {}", e)))?;

        // The server returns hits sorted by score; put them back in input order
        let mut scores = vec![f32::NEG_INFINITY; texts.len()];
        for hit in hits {
            if let Some(slot) = scores.get_mut(hit.index) {
                *slot = hit.score;
            }
        }
        if scores.iter().any(|s| *s == f32::NEG_INFINITY) {
            return Err(RagError::Reranker("Response missing scores".to_string()));
        }
        Ok(scores)
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn score(&self, query: &str, texts: &[&str]) -> verso_core::Result<Vec<f32>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.rerank(query, texts).await?)
    }

    fn name(&self) -> &str {
        "http"
    }
}
