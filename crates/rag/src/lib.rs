//! Passage retrieval with hybrid search
//!
//! Features:
//! - Explicit citation extraction; cited passages are mandatory results
//! - Dense vector search via Qdrant or an in-memory index
//! - Cross-encoder reranking over HTTP, with a lexical fallback
//! - Section-title term boosting
//! - Keyword-triggered query expansion with judge-gated applicability
//! - Strategy store with a session overlay and atomic YAML persistence

pub mod corpus;
pub mod domain_boost;
pub mod embeddings;
pub mod query_expansion;
pub mod reference;
pub mod reranker;
pub mod retriever;
pub mod strategy_store;
pub mod vector_store;

pub use corpus::PassageCorpus;
pub use domain_boost::DomainBooster;
pub use embeddings::{cosine_similarity, HashEmbedder, OllamaEmbedder, OllamaEmbeddingConfig};
pub use query_expansion::{expand, super_query, ExpandedQuery};
pub use reference::{extract_citations, normalize_book, resolve_mandatory, Citation};
pub use reranker::{HttpReranker, LexicalReranker};
pub use retriever::{HybridRetriever, RetrievalOutcome, RetrieverConfig};
pub use strategy_store::{StrategyPersistence, StrategyStore, YamlStrategyFile};
pub use vector_store::{InMemoryIndex, QdrantIndex, QdrantIndexConfig};

use thiserror::Error;

/// RAG errors
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Reranker error: {0}")]
    Reranker(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Retrieval timed out after {0} ms")]
    Timeout(u64),
}

impl From<RagError> for verso_core::Error {
    fn from(err: RagError) -> Self {
        match err {
            RagError::Persistence(msg) => verso_core::Error::Persistence(msg),
            RagError::Connection(msg) => verso_core::Error::RetrievalUnavailable(msg),
            RagError::Timeout(ms) => verso_core::Error::Timeout(ms),
            other => verso_core::Error::Rag(other.to_string()),
        }
    }
}
