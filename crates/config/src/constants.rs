//! Default values shared across crates
//!
//! Settings defaults and fallbacks in the other crates read from here so a
//! tuning change lands in one place.

/// Service endpoints (defaults for local development)
pub mod endpoints {
    /// Ollama chat and embedding endpoint
    pub const OLLAMA_DEFAULT: &str = "http://localhost:11434";

    /// Qdrant vector store endpoint (gRPC port)
    pub const QDRANT_DEFAULT: &str = "http://127.0.0.1:6334";

    /// text-embeddings-inference reranker endpoint
    pub const RERANKER_DEFAULT: &str = "http://127.0.0.1:8081";
}

/// Timeouts (seconds)
pub mod timeouts {
    /// Whole retrieval call
    pub const RETRIEVAL_SECS: u64 = 30;

    /// Single judge call, including retries against one model
    pub const JUDGE_CALL_SECS: u64 = 120;
}

/// Retrieval defaults
pub mod retrieval {
    /// Items per section
    pub const ITEMS_PER_SECTION: usize = 15;

    /// Score added per matched boost term
    pub const BOOST_WEIGHT: f32 = 2.0;

    /// Lower bound of the candidate pool multiplier
    pub const MIN_FETCH_MULTIPLIER: usize = 5;

    /// Upper bound of the candidate pool multiplier (at k = 0)
    pub const MAX_FETCH_MULTIPLIER: usize = 11;

    /// Function words never treated as boost terms
    pub const STOPWORDS: &[&str] = &[
        "ja", "tai", "sekä", "kuin", "on", "ovat", "ei", "se", "ne", "että", "jos", "kun", "mutta",
        "miten", "mitä", "mikä", "miksi", "the", "and", "or", "of", "in", "a", "an", "to", "is",
        "for", "with", "how", "what", "why",
    ];
}

/// Judge defaults
pub mod judge {
    pub const PRIMARY_MODEL: &str = "llama3.1:8b";
    pub const MAX_ATTEMPTS: u32 = 2;
    pub const BATCH_SIZE: usize = 20;
    pub const TEMPERATURE: f32 = 0.1;
    pub const MAX_TOKENS: u32 = 2048;
}

/// Refinement defaults
pub mod refinement {
    /// Target mean score on the 1-10 scale
    pub const QUALITY_TARGET: f32 = 8.0;

    /// Core items needed before centroid refinement is attempted
    pub const CORE_MINIMUM: usize = 3;

    /// Round cap for the non-aggressive loop
    pub const MAX_ROUNDS: usize = 3;

    /// Centroid search batch bounds
    pub const MIN_REFINEMENT_BATCH: usize = 10;
    pub const MAX_REFINEMENT_BATCH: usize = 50;

    /// Extra candidates requested on top of the greedy estimate
    pub const MIN_BUFFER: usize = 3;
    pub const BUFFER_DIVISOR: usize = 2;
}

/// Strategy store defaults
pub mod strategy {
    pub const STORE_PATH: &str = "config/strategies.yaml";
    pub const MAX_PROPOSAL_ATTEMPTS: usize = 3;
}

/// Embedding defaults
pub mod embedding {
    pub const MODEL: &str = "nomic-embed-text";
    pub const VECTOR_DIM: usize = 768;
    pub const QDRANT_COLLECTION: &str = "passages";
}
