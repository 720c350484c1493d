//! Judge trait

use async_trait::async_trait;

use crate::{Item, QualityVerdict, Result, Strategy};

/// External quality evaluator
///
/// Implementations wrap an unreliable model behind a robust call protocol;
/// every method either returns a validated answer or an error, never a
/// half-filled value.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Score items against a topic
    ///
    /// Batch size is an implementation choice; the verdict covers all
    /// items the judge could score.
    async fn score_items(&self, topic: &str, items: &[Item]) -> Result<QualityVerdict>;

    /// Yes/no: does this strategy fit this specific query?
    async fn is_applicable(&self, query: &str, strategy: &Strategy) -> Result<bool>;

    /// Propose a short, concrete expansion description for a failing query
    async fn propose_expansion(
        &self,
        query: &str,
        rationale: &str,
        previous: Option<&str>,
    ) -> Result<String>;

    /// Derive one or two trigger keywords from an expansion description
    async fn derive_keywords(&self, expansion: &str) -> Result<Vec<String>>;

    /// A more specific variant of a keyword that already names another strategy
    async fn disambiguate_keyword(&self, keyword: &str, expansion: &str) -> Result<String>;
}
