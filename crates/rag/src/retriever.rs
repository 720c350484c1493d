//! Hybrid retriever
//!
//! Combines:
//! - explicit citations (mandatory, never evicted)
//! - strategy-expanded dense search that skips already seen ids
//! - cross-encoder reranking against the expanded query
//! - additive whole-word boosting from section title terms
//!
//! A collaborator failure or timeout yields an empty result with the
//! failure recorded; it never propagates past the section.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use verso_core::{
    CandidateSet, Embedder, EmbeddingIndex, Item, ItemOrigin, Judge, PassageLookup, Reranker,
    SeenIdSet,
};

use crate::domain_boost::DomainBooster;
use crate::query_expansion::{self, ExpandedQuery};
use crate::reference;
use crate::strategy_store::StrategyStore;
use crate::RagError;

/// Retriever configuration
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub min_fetch_multiplier: usize,
    pub max_fetch_multiplier: usize,
    /// Bound on embed + search + rerank
    pub timeout: Duration,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self::from(&verso_config::RetrievalConfig::default())
    }
}

impl From<&verso_config::RetrievalConfig> for RetrieverConfig {
    fn from(c: &verso_config::RetrievalConfig) -> Self {
        Self {
            min_fetch_multiplier: c.min_fetch_multiplier,
            max_fetch_multiplier: c.max_fetch_multiplier,
            timeout: Duration::from_secs(c.timeout_secs),
        }
    }
}

impl RetrieverConfig {
    /// Raw neighbors to request: `max(min, max_mult - k/10) * remaining`
    pub fn fetch_size(&self, k: usize, remaining: usize) -> usize {
        let multiplier = self
            .max_fetch_multiplier
            .saturating_sub(k / 10)
            .max(self.min_fetch_multiplier);
        multiplier * remaining
    }
}

/// Result of one retrieval call
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    /// Mandatory items first, then ranked retrieved items
    pub items: CandidateSet,
    /// Boost terms that matched at least one returned item
    pub boost_terms: BTreeSet<String>,
    /// Trigger of the applied strategy
    pub strategy: Option<String>,
    /// Set when a collaborator failed; `items` is then empty
    pub failure: Option<String>,
}

impl RetrievalOutcome {
    fn failed(reason: String) -> Self {
        Self {
            failure: Some(reason),
            ..Default::default()
        }
    }
}

/// Hybrid retriever
pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn EmbeddingIndex>,
    reranker: Arc<dyn Reranker>,
    lookup: Arc<dyn PassageLookup>,
    judge: Arc<dyn Judge>,
    strategies: Arc<StrategyStore>,
    booster: DomainBooster,
    config: RetrieverConfig,
}

impl HybridRetriever {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn EmbeddingIndex>,
        reranker: Arc<dyn Reranker>,
        lookup: Arc<dyn PassageLookup>,
        judge: Arc<dyn Judge>,
        strategies: Arc<StrategyStore>,
        booster: DomainBooster,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            reranker,
            lookup,
            judge,
            strategies,
            booster,
            config,
        }
    }

    pub fn strategies(&self) -> &Arc<StrategyStore> {
        &self.strategies
    }

    pub fn lookup(&self) -> &Arc<dyn PassageLookup> {
        &self.lookup
    }

    /// Initial retrieval for a section
    ///
    /// Cited passages come first; the remaining `k - |mandatory|` slots are
    /// filled from the index. Every returned id is added to `seen`.
    pub async fn retrieve(
        &self,
        query: &str,
        section_title: &str,
        k: usize,
        seen: &mut SeenIdSet,
    ) -> RetrievalOutcome {
        let mandatory = reference::resolve_mandatory(query, self.lookup.as_ref(), seen);
        let remaining = k.saturating_sub(mandatory.len());

        let mut outcome = RetrievalOutcome::default();
        outcome.items.extend(mandatory);

        if remaining == 0 {
            tracing::debug!(query = %query, k, "Mandatory citations fill the section");
            return outcome;
        }

        let expanded = query_expansion::expand(
            query,
            &self.strategies,
            self.judge.as_ref(),
            self.lookup.as_ref(),
        )
        .await;

        match self
            .ranked(&expanded, section_title, k, remaining, seen, ItemOrigin::Retrieved)
            .await
        {
            Ok((items, boost_terms)) => {
                tracing::info!(
                    query = %query,
                    mandatory = outcome.items.len(),
                    retrieved = items.len(),
                    strategy = ?expanded.strategy,
                    "Retrieved candidates"
                );
                outcome.items.extend(items);
                outcome.boost_terms = boost_terms;
                outcome.strategy = expanded.strategy;
                outcome
            }
            Err(e) => {
                tracing::error!(
                    query = %query,
                    error = %e,
                    "Retrieval unavailable"
                );
                RetrievalOutcome::failed(e.to_string())
            }
        }
    }

    /// Exactly `count` fresh items for a query, skipping everything in `seen`
    ///
    /// Used after a new strategy has been added: citations are not
    /// re-resolved and the strategy store is consulted again.
    pub async fn retrieve_replacements(
        &self,
        query: &str,
        section_title: &str,
        count: usize,
        seen: &mut SeenIdSet,
    ) -> RetrievalOutcome {
        if count == 0 {
            return RetrievalOutcome::default();
        }

        let expanded = query_expansion::expand(
            query,
            &self.strategies,
            self.judge.as_ref(),
            self.lookup.as_ref(),
        )
        .await;

        match self
            .ranked(&expanded, section_title, count, count, seen, ItemOrigin::Retrieved)
            .await
        {
            Ok((items, boost_terms)) => RetrievalOutcome {
                items,
                boost_terms,
                strategy: expanded.strategy,
                failure: None,
            },
            Err(e) => {
                tracing::error!(query = %query, error = %e, "Replacement retrieval unavailable");
                RetrievalOutcome::failed(e.to_string())
            }
        }
    }

    async fn ranked(
        &self,
        expanded: &ExpandedQuery,
        section_title: &str,
        k: usize,
        remaining: usize,
        seen: &mut SeenIdSet,
        origin: ItemOrigin,
    ) -> Result<(CandidateSet, BTreeSet<String>), RagError> {
        let fetch = self.config.fetch_size(k, remaining);
        let terms = self.booster.boost_terms(section_title);

        let pool = tokio::time::timeout(self.config.timeout, self.candidate_pool(expanded, fetch, seen))
            .await
            .map_err(|_| RagError::Timeout(self.config.timeout.as_millis() as u64))??;

        let mut scored: Vec<(f32, Item)> = pool
            .into_iter()
            .map(|(rerank, item)| (rerank + self.booster.boost(&terms, &item.text), item))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(remaining);

        let mut used_terms = BTreeSet::new();
        let mut items = CandidateSet::new();
        for (_, mut item) in scored {
            for t in self.booster.matched(&terms, &item.text) {
                used_terms.insert(t.to_string());
            }
            item.origin = origin;
            seen.insert(item.id.clone());
            items.push(item);
        }

        Ok((items, used_terms))
    }

    /// Embed, search and rerank; returns (rerank score, item) pairs
    async fn candidate_pool(
        &self,
        expanded: &ExpandedQuery,
        fetch: usize,
        seen: &SeenIdSet,
    ) -> Result<Vec<(f32, Item)>, RagError> {
        let vector = self
            .embedder
            .embed_query(&expanded.text)
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        let neighbors = self
            .index
            .search_excluding(&vector, fetch, seen)
            .await
            .map_err(|e| RagError::Search(e.to_string()))?;

        let candidates: Vec<Item> = neighbors
            .into_iter()
            .filter(|n| !seen.contains(&n.id))
            .filter_map(|n| {
                let text = self.lookup.text(&n.id)?;
                Some(Item::new(n.id, text, ItemOrigin::Retrieved))
            })
            .collect();

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<&str> = candidates.iter().map(|c| c.text.as_str()).collect();
        let scores = self
            .reranker
            .score(&expanded.text, &texts)
            .await
            .map_err(|e| RagError::Reranker(e.to_string()))?;

        if scores.len() != candidates.len() {
            return Err(RagError::Reranker(format!(
                "{} returned {} scores for {} candidates",
                self.reranker.name(),
                scores.len(),
                candidates.len()
            )));
        }

        Ok(scores.into_iter().zip(candidates).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::PassageCorpus;
    use crate::embeddings::HashEmbedder;
    use crate::reranker::LexicalReranker;
    use crate::vector_store::InMemoryIndex;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use verso_core::{QualityVerdict, Strategy};

    /// Judge that approves every strategy and counts the checks
    #[derive(Default)]
    struct ApprovingJudge {
        checks: AtomicUsize,
    }

    #[async_trait]
    impl Judge for ApprovingJudge {
        async fn score_items(&self, _: &str, _: &[Item]) -> verso_core::Result<QualityVerdict> {
            Err(verso_core::Error::Internal("unused".into()))
        }
        async fn is_applicable(&self, _: &str, _: &Strategy) -> verso_core::Result<bool> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
        async fn propose_expansion(
            &self,
            _: &str,
            _: &str,
            _: Option<&str>,
        ) -> verso_core::Result<String> {
            Err(verso_core::Error::Internal("unused".into()))
        }
        async fn derive_keywords(&self, _: &str) -> verso_core::Result<Vec<String>> {
            Err(verso_core::Error::Internal("unused".into()))
        }
        async fn disambiguate_keyword(&self, _: &str, _: &str) -> verso_core::Result<String> {
            Err(verso_core::Error::Internal("unused".into()))
        }
    }

    struct DownIndex;

    #[async_trait]
    impl EmbeddingIndex for DownIndex {
        async fn search_excluding(
            &self,
            _: &[f32],
            _: usize,
            _: &SeenIdSet,
        ) -> verso_core::Result<Vec<verso_core::Neighbor>> {
            Err(verso_core::Error::Rag("connection refused".into()))
        }
        async fn vectors(&self, _: &[String]) -> verso_core::Result<Vec<(String, Vec<f32>)>> {
            Ok(Vec::new())
        }
        fn len(&self) -> usize {
            0
        }
    }

    fn corpus() -> Arc<PassageCorpus> {
        Arc::new(PassageCorpus::from_pairs([
            ("Room. 12:1", "present your bodies as a living sacrifice"),
            ("Room. 12:2", "be transformed by the renewing of your mind"),
            ("Room. 12:6", "we have different gifts according to grace"),
            ("1. Piet. 4:10", "each has received a gift, use it to serve one another"),
            ("1. Kor. 12:4", "there are varieties of gifts but the same Spirit"),
            ("Ps. 23:1", "the Lord is my shepherd"),
            ("Ps. 23:2", "he makes me lie down in green pastures"),
            ("Miika 6:8", "do justice, love kindness, walk humbly"),
        ]))
    }

    fn retriever_with(index: Arc<dyn EmbeddingIndex>, strategies: StrategyStore) -> HybridRetriever {
        let corpus = corpus();
        HybridRetriever::new(
            Arc::new(HashEmbedder::new(128)),
            index,
            Arc::new(LexicalReranker::default()),
            corpus,
            Arc::new(ApprovingJudge::default()),
            Arc::new(strategies),
            DomainBooster::new(Vec::<String>::new(), ["gifts"], 2.0),
            RetrieverConfig::default(),
        )
    }

    fn retriever() -> HybridRetriever {
        let corpus = corpus();
        let embedder = HashEmbedder::new(128);
        let index = Arc::new(InMemoryIndex::from_texts(&embedder, corpus.iter()));
        retriever_with(index, StrategyStore::new())
    }

    #[test]
    fn test_fetch_size_formula() {
        let c = RetrieverConfig::default();
        assert_eq!(c.fetch_size(15, 13), 10 * 13);
        assert_eq!(c.fetch_size(5, 5), 11 * 5);
        assert_eq!(c.fetch_size(100, 100), 5 * 100);
    }

    #[tokio::test]
    async fn test_mandatory_first_then_ranked() {
        let r = retriever();
        let mut seen = SeenIdSet::new();
        let out = r
            .retrieve("Gifts for service (Room. 12:1-2)", "Gifts", 4, &mut seen)
            .await;

        assert!(out.failure.is_none());
        assert_eq!(out.items.len(), 4);
        let items = out.items.as_slice();
        assert_eq!(items[0].id, "Room. 12:1-2");
        assert!(items[0].is_mandatory());
        // Constituent verses never come back as retrieved items
        assert!(items[1..].iter().all(|i| i.id != "Room. 12:1" && i.id != "Room. 12:2"));
        assert!(items[1..].iter().all(|i| i.origin == ItemOrigin::Retrieved));
        // Boosted passages mentioning "gifts" lead the retrieved block
        assert!(items[1].text.contains("gifts"));
        assert!(out.boost_terms.contains("gifts"));
        for i in items {
            assert!(seen.contains(&i.id));
        }
    }

    #[tokio::test]
    async fn test_mandatory_fills_k() {
        let r = retriever();
        let mut seen = SeenIdSet::new();
        let out = r.retrieve("Miika 6:8", "", 1, &mut seen).await;
        assert_eq!(out.items.ids(), vec!["Miika 6:8"]);
    }

    #[tokio::test]
    async fn test_replacements_skip_seen() {
        let r = retriever();
        let mut seen = SeenIdSet::new();
        let first = r.retrieve("gifts", "", 3, &mut seen).await;
        let more = r.retrieve_replacements("gifts", "", 3, &mut seen).await;

        assert_eq!(more.items.len(), 3);
        for item in more.items.iter() {
            assert!(!first.items.contains(&item.id));
        }
    }

    #[tokio::test]
    async fn test_index_down_returns_empty_with_failure() {
        let r = retriever_with(Arc::new(DownIndex), StrategyStore::new());
        let mut seen = SeenIdSet::new();
        let out = r.retrieve("Room. 12:1 gifts", "", 5, &mut seen).await;
        assert!(out.items.is_empty());
        assert!(out.failure.is_some());
    }

    #[tokio::test]
    async fn test_applicable_strategy_is_reported() {
        let corpus = corpus();
        let embedder = HashEmbedder::new(128);
        let index = Arc::new(InMemoryIndex::from_texts(&embedder, corpus.iter()));
        let store = StrategyStore::with_strategies([
            Strategy::new("kyvyt", "gifts given to serve one another").with_anchor("1. Piet. 4:10"),
        ]);
        let r = retriever_with(index, store);

        let mut seen = SeenIdSet::new();
        let out = r.retrieve("Kyvyt ja palvelu", "", 3, &mut seen).await;
        assert_eq!(out.strategy.as_deref(), Some("kyvyt"));
        assert_eq!(out.items.len(), 3);
    }
}
