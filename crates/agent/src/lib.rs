//! Section refinement
//!
//! Features:
//! - Numbered-section document parsing
//! - Dynamic-threshold refinement (centroid search, strategy proposal,
//!   iterative quality pursuit)
//! - Strategy proposal with collision-free trigger keywords
//! - Ordered section runner with per-section fault isolation and
//!   cooperative cancellation

pub mod document;
pub mod proposer;
pub mod refinement;
pub mod runner;

pub use document::{parse_document, Document, Section};
pub use proposer::{Proposal, StrategyProposer};
pub use refinement::{
    average, partition, threshold, RefinementEngine, RefinementMode, RefinementStats, SectionFlag,
    SectionResult,
};
pub use runner::{RunReport, SectionOutcome, SectionRunner};

pub use tokio_util::sync::CancellationToken;

use thiserror::Error;

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Judge error: {0}")]
    Judge(String),

    #[error("Strategy proposal failed: {0}")]
    Proposal(String),

    #[error("Document error: {0}")]
    Document(String),

    #[error("Section task failed: {0}")]
    Task(String),

    #[error("Cancelled")]
    Cancelled,
}

impl From<verso_rag::RagError> for AgentError {
    fn from(err: verso_rag::RagError) -> Self {
        AgentError::Retrieval(err.to_string())
    }
}

impl From<AgentError> for verso_core::Error {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Retrieval(msg) => verso_core::Error::RetrievalUnavailable(msg),
            AgentError::Judge(msg) => verso_core::Error::JudgeUnparseable(msg),
            AgentError::Proposal(msg) => verso_core::Error::StrategyProposalFailed(msg),
            AgentError::Cancelled => verso_core::Error::Cancelled,
            other => verso_core::Error::Internal(other.to_string()),
        }
    }
}
