//! Configuration management for the retrieval-refinement engine
//!
//! Supports loading configuration from:
//! - YAML files (`config/default.yaml`, `config/<env>.yaml`)
//! - Environment variables (`VERSO__` prefix, `__` separator)
//!
//! Every field carries a serde default so a missing file is never fatal;
//! `Settings::validate()` rejects inconsistent combinations.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, load_settings_from, CorpusConfig, EmbedderBackend, EmbeddingConfig, IndexBackend, IndexConfig,
    JudgeConfig, ObservabilityConfig, PipelineConfig, RefinementConfig, RerankerBackend,
    RerankerConfig, RetrievalConfig, Settings, StrategyConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for verso_core::Error {
    fn from(err: ConfigError) -> Self {
        verso_core::Error::Config(err.to_string())
    }
}
