//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{embedding, endpoints, judge, refinement, retrieval, strategy, timeouts};
use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Hybrid retrieval
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// LLM judge
    #[serde(default)]
    pub judge: JudgeConfig,

    /// Quality-driven refinement loop
    #[serde(default)]
    pub refinement: RefinementConfig,

    /// Query-expansion strategy store
    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Embedding index backend
    #[serde(default)]
    pub index: IndexConfig,

    /// Query embedder
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Cross-encoder reranker
    #[serde(default)]
    pub reranker: RerankerConfig,

    /// Passage corpus
    #[serde(default)]
    pub corpus: CorpusConfig,

    /// Section pipeline
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Logging
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Hybrid retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Items per section (k)
    #[serde(default = "default_items_per_section")]
    pub items_per_section: usize,

    /// Score added per matched boost term
    #[serde(default = "default_boost_weight")]
    pub boost_weight: f32,

    /// Lower bound of the fetch multiplier
    #[serde(default = "default_min_fetch_multiplier")]
    pub min_fetch_multiplier: usize,

    /// Fetch multiplier at k = 0; decreases by one per 10 items
    #[serde(default = "default_max_fetch_multiplier")]
    pub max_fetch_multiplier: usize,

    /// Words never used as boost terms
    #[serde(default = "default_stopwords")]
    pub stopwords: Vec<String>,

    /// Domain vocabulary; capitalized title tokens found here become boost terms
    #[serde(default)]
    pub vocabulary: Vec<String>,

    /// Timeout for a whole retrieval call
    #[serde(default = "default_retrieval_timeout")]
    pub timeout_secs: u64,
}

fn default_items_per_section() -> usize {
    retrieval::ITEMS_PER_SECTION
}
fn default_boost_weight() -> f32 {
    retrieval::BOOST_WEIGHT
}
fn default_min_fetch_multiplier() -> usize {
    retrieval::MIN_FETCH_MULTIPLIER
}
fn default_max_fetch_multiplier() -> usize {
    retrieval::MAX_FETCH_MULTIPLIER
}
fn default_stopwords() -> Vec<String> {
    retrieval::STOPWORDS.iter().map(|s| s.to_string()).collect()
}
fn default_retrieval_timeout() -> u64 {
    timeouts::RETRIEVAL_SECS
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            items_per_section: default_items_per_section(),
            boost_weight: default_boost_weight(),
            min_fetch_multiplier: default_min_fetch_multiplier(),
            max_fetch_multiplier: default_max_fetch_multiplier(),
            stopwords: default_stopwords(),
            vocabulary: Vec::new(),
            timeout_secs: default_retrieval_timeout(),
        }
    }
}

impl RetrievalConfig {
    /// Candidate pool multiplier for a section of `k` items
    ///
    /// `max(min, max_mult - k / 10)`: small sections fetch a deeper pool
    /// relative to their size.
    pub fn fetch_multiplier(&self, k: usize) -> usize {
        self.max_fetch_multiplier
            .saturating_sub(k / 10)
            .max(self.min_fetch_multiplier)
    }
}

/// Judge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// Ollama-compatible chat endpoint
    #[serde(default = "default_ollama_endpoint")]
    pub endpoint: String,

    /// Ordered model chain: primary first, then fallbacks
    #[serde(default = "default_judge_models")]
    pub models: Vec<String>,

    /// Transport attempts per model
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Timeout for one call to one model
    #[serde(default = "default_judge_timeout")]
    pub call_timeout_secs: u64,

    /// Items per scoring request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// JSONL file receiving logical-failure diagnostics
    #[serde(default)]
    pub diagnostic_log_path: Option<String>,
}

fn default_ollama_endpoint() -> String {
    endpoints::OLLAMA_DEFAULT.to_string()
}
fn default_judge_models() -> Vec<String> {
    vec![judge::PRIMARY_MODEL.to_string()]
}
fn default_max_attempts() -> u32 {
    judge::MAX_ATTEMPTS
}
fn default_judge_timeout() -> u64 {
    timeouts::JUDGE_CALL_SECS
}
fn default_batch_size() -> usize {
    judge::BATCH_SIZE
}
fn default_temperature() -> f32 {
    judge::TEMPERATURE
}
fn default_max_tokens() -> u32 {
    judge::MAX_TOKENS
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_ollama_endpoint(),
            models: default_judge_models(),
            max_attempts: default_max_attempts(),
            call_timeout_secs: default_judge_timeout(),
            batch_size: default_batch_size(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            diagnostic_log_path: None,
        }
    }
}

/// Refinement loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementConfig {
    /// Target mean score
    #[serde(default = "default_quality_target")]
    pub quality_target: f32,

    /// Minimum core items for centroid refinement
    #[serde(default = "default_core_minimum")]
    pub core_minimum: usize,

    /// Round cap for the iterative loop
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Skip the first pass and loop until the target is met
    #[serde(default)]
    pub force_aggressive: bool,

    /// Optional round cap in aggressive mode (unbounded when unset)
    #[serde(default)]
    pub aggressive_round_cap: Option<usize>,

    #[serde(default = "default_min_refinement_batch")]
    pub min_refinement_batch: usize,

    #[serde(default = "default_max_refinement_batch")]
    pub max_refinement_batch: usize,

    #[serde(default = "default_min_buffer")]
    pub min_buffer: usize,

    #[serde(default = "default_buffer_divisor")]
    pub buffer_divisor: usize,
}

fn default_quality_target() -> f32 {
    refinement::QUALITY_TARGET
}
fn default_core_minimum() -> usize {
    refinement::CORE_MINIMUM
}
fn default_max_rounds() -> usize {
    refinement::MAX_ROUNDS
}
fn default_min_refinement_batch() -> usize {
    refinement::MIN_REFINEMENT_BATCH
}
fn default_max_refinement_batch() -> usize {
    refinement::MAX_REFINEMENT_BATCH
}
fn default_min_buffer() -> usize {
    refinement::MIN_BUFFER
}
fn default_buffer_divisor() -> usize {
    refinement::BUFFER_DIVISOR
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            quality_target: default_quality_target(),
            core_minimum: default_core_minimum(),
            max_rounds: default_max_rounds(),
            force_aggressive: false,
            aggressive_round_cap: None,
            min_refinement_batch: default_min_refinement_batch(),
            max_refinement_batch: default_max_refinement_batch(),
            min_buffer: default_min_buffer(),
            buffer_divisor: default_buffer_divisor(),
        }
    }
}

impl RefinementConfig {
    /// Effective round cap for the iterative loop
    pub fn round_cap(&self) -> Option<usize> {
        if self.force_aggressive {
            self.aggressive_round_cap
        } else {
            Some(self.max_rounds)
        }
    }
}

/// Strategy store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// YAML file holding learned strategies
    #[serde(default = "default_store_path")]
    pub store_path: String,

    /// Persist confirmed strategies to `store_path`
    #[serde(default)]
    pub learning_enabled: bool,

    /// Proposal attempts before giving up on a round
    #[serde(default = "default_max_proposal_attempts")]
    pub max_proposal_attempts: usize,
}

fn default_store_path() -> String {
    strategy::STORE_PATH.to_string()
}
fn default_max_proposal_attempts() -> usize {
    strategy::MAX_PROPOSAL_ATTEMPTS
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            learning_enabled: false,
            max_proposal_attempts: default_max_proposal_attempts(),
        }
    }
}

/// Index backend choice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// Vectors loaded from a JSON file (or embedded from the corpus)
    #[default]
    Memory,
    /// Qdrant collection
    Qdrant,
}

/// Embedding index settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub backend: IndexBackend,

    /// JSON map id -> vector for the memory backend
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default = "default_qdrant_endpoint")]
    pub qdrant_endpoint: String,

    #[serde(default = "default_qdrant_collection")]
    pub qdrant_collection: String,

    #[serde(default)]
    pub qdrant_api_key: Option<String>,

    #[serde(default = "default_vector_dim")]
    pub vector_dim: usize,
}

fn default_qdrant_endpoint() -> String {
    endpoints::QDRANT_DEFAULT.to_string()
}
fn default_qdrant_collection() -> String {
    embedding::QDRANT_COLLECTION.to_string()
}
fn default_vector_dim() -> usize {
    embedding::VECTOR_DIM
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::default(),
            path: None,
            qdrant_endpoint: default_qdrant_endpoint(),
            qdrant_collection: default_qdrant_collection(),
            qdrant_api_key: None,
            vector_dim: default_vector_dim(),
        }
    }
}

/// Embedder backend choice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderBackend {
    /// Ollama `/api/embeddings`
    #[default]
    Ollama,
    /// Deterministic feature hashing, no model required
    Hashed,
}

/// Query embedder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub backend: EmbedderBackend,

    #[serde(default = "default_ollama_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Instruction prefix for query embeddings (e.g. `"query: "`)
    #[serde(default)]
    pub query_prefix: Option<String>,
}

fn default_embedding_model() -> String {
    embedding::MODEL.to_string()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbedderBackend::default(),
            endpoint: default_ollama_endpoint(),
            model: default_embedding_model(),
            query_prefix: None,
        }
    }
}

/// Reranker backend choice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankerBackend {
    /// Term-overlap scorer, no model required
    #[default]
    Lexical,
    /// text-embeddings-inference compatible `/rerank`
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    #[serde(default)]
    pub backend: RerankerBackend,

    #[serde(default = "default_reranker_endpoint")]
    pub endpoint: String,
}

fn default_reranker_endpoint() -> String {
    endpoints::RERANKER_DEFAULT.to_string()
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            backend: RerankerBackend::default(),
            endpoint: default_reranker_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Flat JSON map id -> text
    #[serde(default = "default_corpus_path")]
    pub path: String,
}

fn default_corpus_path() -> String {
    "data/corpus.json".to_string()
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: default_corpus_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Sections processed concurrently; 1 keeps strict document order
    #[serde(default = "default_max_concurrent_sections")]
    pub max_concurrent_sections: usize,
}

fn default_max_concurrent_sections() -> usize {
    1
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sections: default_max_concurrent_sections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_retrieval()?;
        self.validate_judge()?;
        self.validate_refinement()?;
        self.validate_strategy()?;

        if self.pipeline.max_concurrent_sections == 0 {
            return Err(invalid(
                "pipeline.max_concurrent_sections",
                "Must be at least 1",
            ));
        }

        if self.index.vector_dim == 0 {
            return Err(invalid("index.vector_dim", "Must be at least 1"));
        }

        Ok(())
    }

    fn validate_retrieval(&self) -> Result<(), ConfigError> {
        let r = &self.retrieval;

        if r.items_per_section == 0 {
            return Err(invalid("retrieval.items_per_section", "Must be at least 1"));
        }

        if !r.boost_weight.is_finite() || r.boost_weight < 0.0 {
            return Err(invalid(
                "retrieval.boost_weight",
                format!("Must be a non-negative number, got {}", r.boost_weight),
            ));
        }

        if r.min_fetch_multiplier == 0 {
            return Err(invalid("retrieval.min_fetch_multiplier", "Must be at least 1"));
        }

        if r.min_fetch_multiplier > r.max_fetch_multiplier {
            return Err(invalid(
                "retrieval.min_fetch_multiplier",
                format!(
                    "Must not exceed max_fetch_multiplier ({} > {})",
                    r.min_fetch_multiplier, r.max_fetch_multiplier
                ),
            ));
        }

        if r.timeout_secs == 0 {
            return Err(invalid("retrieval.timeout_secs", "Timeout must be at least 1 second"));
        }

        Ok(())
    }

    fn validate_judge(&self) -> Result<(), ConfigError> {
        let j = &self.judge;

        if j.models.is_empty() || j.models.iter().any(|m| m.trim().is_empty()) {
            return Err(ConfigError::MissingField("judge.models".to_string()));
        }

        if j.max_attempts == 0 {
            return Err(invalid("judge.max_attempts", "Must be at least 1"));
        }

        if j.call_timeout_secs == 0 {
            return Err(invalid("judge.call_timeout_secs", "Timeout must be at least 1 second"));
        }

        if j.batch_size == 0 {
            return Err(invalid("judge.batch_size", "Must be at least 1"));
        }

        if !(0.0..=2.0).contains(&j.temperature) {
            return Err(invalid(
                "judge.temperature",
                format!("Must be between 0.0 and 2.0, got {}", j.temperature),
            ));
        }

        Ok(())
    }

    fn validate_refinement(&self) -> Result<(), ConfigError> {
        let r = &self.refinement;

        if !(verso_core::MIN_SCORE..=verso_core::MAX_SCORE).contains(&r.quality_target) {
            return Err(invalid(
                "refinement.quality_target",
                format!(
                    "Must be between {} and {}, got {}",
                    verso_core::MIN_SCORE,
                    verso_core::MAX_SCORE,
                    r.quality_target
                ),
            ));
        }

        if r.core_minimum == 0 {
            return Err(invalid("refinement.core_minimum", "Must be at least 1"));
        }

        if r.min_refinement_batch == 0 || r.min_refinement_batch > r.max_refinement_batch {
            return Err(invalid(
                "refinement.min_refinement_batch",
                format!(
                    "Must be between 1 and max_refinement_batch ({}), got {}",
                    r.max_refinement_batch, r.min_refinement_batch
                ),
            ));
        }

        if r.buffer_divisor == 0 {
            return Err(invalid("refinement.buffer_divisor", "Must be at least 1"));
        }

        if r.aggressive_round_cap == Some(0) {
            return Err(invalid(
                "refinement.aggressive_round_cap",
                "Must be at least 1 when set",
            ));
        }

        Ok(())
    }

    fn validate_strategy(&self) -> Result<(), ConfigError> {
        if self.strategy.max_proposal_attempts == 0 {
            return Err(invalid("strategy.max_proposal_attempts", "Must be at least 1"));
        }

        if self.strategy.learning_enabled && self.strategy.store_path.trim().is_empty() {
            return Err(ConfigError::MissingField("strategy.store_path".to_string()));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Load settings from `config/` relative to the working directory
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Load settings from a config directory
///
/// Layers `default.*`, then `<env>.*` (both optional), then `VERSO__*`
/// environment variables.
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    // Load default config
    let default_path = dir.join("default");
    builder = builder.add_source(File::with_name(&default_path.to_string_lossy()).required(false));

    // Load environment-specific config
    if let Some(env_name) = env {
        let env_path = dir.join(env_name);
        builder =
            builder.add_source(File::with_name(&env_path.to_string_lossy()).required(false));
    }

    // Load from environment variables
    builder = builder.add_source(
        Environment::with_prefix("VERSO")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("judge.models")
            .with_list_parse_key("retrieval.vocabulary")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    // Validate
    settings.validate()?;

    tracing::debug!(
        dir = %dir.display(),
        env = env.unwrap_or("default"),
        "Loaded settings"
    );

    Ok(settings)
}
