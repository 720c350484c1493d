//! LLM judge
//!
//! Features:
//! - Ollama chat backend with transport retry and backoff
//! - Ordered model chain with one self-correction round-trip per model
//! - Logical-failure escalation and an append-only diagnostic log
//! - Batched item scoring merged into a single verdict

pub mod backend;
pub mod diagnostics;
pub mod judge;
pub mod prompt;

pub use backend::{FinishReason, GenerationResult, LlmBackend, LlmConfig, OllamaBackend};
pub use diagnostics::{DiagnosticLog, DiagnosticRecord};
pub use judge::{extract_json, parse_verdict, JudgeProtocol, LlmJudge};
pub use prompt::{Message, Role};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Network(err.to_string())
    }
}

impl From<LlmError> for verso_core::Error {
    fn from(err: LlmError) -> Self {
        verso_core::Error::Llm(err.to_string())
    }
}

/// Judge protocol errors
#[derive(Error, Debug)]
pub enum JudgeError {
    /// Every model in the chain failed; `last` describes the final failure
    #[error("Judge chain exhausted after {attempts} model(s): {last}")]
    Exhausted { attempts: usize, last: String },

    #[error("Judge call timed out after {0} ms")]
    Timeout(u64),

    #[error(transparent)]
    Backend(#[from] LlmError),
}

impl From<JudgeError> for verso_core::Error {
    fn from(err: JudgeError) -> Self {
        match err {
            JudgeError::Exhausted { .. } => verso_core::Error::JudgeUnparseable(err.to_string()),
            JudgeError::Timeout(ms) => verso_core::Error::Timeout(ms),
            JudgeError::Backend(e) => e.into(),
        }
    }
}
