//! Collaborator traits
//!
//! The engine consumes embeddings, nearest-neighbor search, reranking and
//! judging through these narrow interfaces so backends can be swapped and
//! mocked.
//!
//! ```text
//! Retrieval:
//!   - Embedder: text -> query vector
//!   - EmbeddingIndex: vector -> nearest item ids (with exclusion)
//!   - Reranker: (query, text) -> relevance
//!   - PassageLookup: id -> text, exact citation resolution
//!
//! Judging:
//!   - Judge: item scoring, strategy applicability, strategy proposals
//! ```

mod judge;
mod retrieval;

pub use judge::Judge;
pub use retrieval::{Embedder, EmbeddingIndex, Neighbor, PassageLookup, Reranker};
