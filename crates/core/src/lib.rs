//! Core traits and types for passage retrieval and refinement
//!
//! This crate provides foundational types used across all other crates:
//! - The item data model (items, candidate sets, seen-id tracking)
//! - Strategies and judge verdicts
//! - Collaborator traits (embedding, index, reranker, passage lookup, judge)
//! - Error types

pub mod error;
pub mod item;
pub mod strategy;
pub mod traits;
pub mod verdict;

pub use error::{Error, ErrorKind, Result};
pub use item::{CandidateSet, Item, ItemOrigin, SeenIdSet};
pub use strategy::Strategy;
pub use verdict::{ItemScore, QualityVerdict};

pub use traits::{Embedder, EmbeddingIndex, Judge, Neighbor, PassageLookup, Reranker};

/// Lowest score a judge may assign to an item.
pub const MIN_SCORE: f32 = 1.0;

/// Highest score a judge may assign to an item.
pub const MAX_SCORE: f32 = 10.0;
