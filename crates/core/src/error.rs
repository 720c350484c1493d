//! Error types shared across crates

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias using the core error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error
///
/// Crate-local errors (`RagError`, `LlmError`, `JudgeError`, ...) convert into
/// this type at crate boundaries.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("Judge response unusable: {0}")]
    JudgeUnparseable(String),

    #[error("Strategy proposal failed: {0}")]
    StrategyProposalFailed(String),

    #[error("No new candidates available")]
    NoNewCandidates,

    #[error("RAG error: {0}")]
    Rag(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of failures, recorded per section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A retrieval collaborator (embedder, index, reranker) is down
    RetrievalUnavailable,
    /// The judge chain was exhausted without a usable answer
    JudgeUnparseable,
    /// No strategy could be proposed for a failing section
    StrategyProposalFailed,
    /// Refinement search returned nothing unseen (a convergence signal)
    NoNewCandidates,
    /// Anything else
    Other,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::RetrievalUnavailable(_) | Error::Rag(_) => ErrorKind::RetrievalUnavailable,
            Error::JudgeUnparseable(_) | Error::Llm(_) => ErrorKind::JudgeUnparseable,
            Error::StrategyProposalFailed(_) => ErrorKind::StrategyProposalFailed,
            Error::NoNewCandidates => ErrorKind::NoNewCandidates,
            Error::Timeout(_)
            | Error::Config(_)
            | Error::Persistence(_)
            | Error::Cancelled
            | Error::Internal(_) => ErrorKind::Other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            Error::Rag("index down".into()).kind(),
            ErrorKind::RetrievalUnavailable
        );
        assert_eq!(
            Error::JudgeUnparseable("no json".into()).kind(),
            ErrorKind::JudgeUnparseable
        );
        assert_eq!(Error::NoNewCandidates.kind(), ErrorKind::NoNewCandidates);
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Other);
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::StrategyProposalFailed).unwrap();
        assert_eq!(json, "\"strategy_proposal_failed\"");
    }
}
