//! Deterministic collaborators for engine tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use verso_agent::RefinementEngine;
use verso_config::{RefinementConfig, StrategyConfig};
use verso_core::{
    EmbeddingIndex, Error, Item, ItemScore, Judge, Neighbor, QualityVerdict, Result, SeenIdSet,
    Strategy,
};
use verso_rag::{
    DomainBooster, HashEmbedder, HybridRetriever, LexicalReranker, PassageCorpus, RetrieverConfig,
    StrategyStore,
};

/// Judge that scores items from a fixed table
pub struct TableJudge {
    scores: HashMap<String, f32>,
    default_score: f32,
    expansion: String,
    keywords: Vec<String>,
    panic_on: Option<String>,
    fail: bool,
    fail_proposals: bool,
    unscorable: HashSet<String>,
    pub score_calls: AtomicUsize,
}

impl TableJudge {
    pub fn new(scores: &[(&str, f32)], default_score: f32) -> Self {
        Self {
            scores: scores.iter().map(|(id, s)| (id.to_string(), *s)).collect(),
            default_score,
            expansion: "Endurance that grows through trials".to_string(),
            keywords: vec!["toivo".to_string()],
            panic_on: None,
            fail: false,
            fail_proposals: false,
            unscorable: HashSet::new(),
            score_calls: AtomicUsize::new(0),
        }
    }

    /// Every call fails, as if the whole model chain were exhausted
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(&[], 1.0)
        }
    }

    /// Scores fine, but every proposal call fails
    pub fn failing_proposals(mut self) -> Self {
        self.fail_proposals = true;
        self
    }

    /// These ids sit in a batch the model chain could not score
    pub fn unscorable(mut self, ids: &[&str]) -> Self {
        self.unscorable = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    pub fn panicking_on(mut self, topic_fragment: &str) -> Self {
        self.panic_on = Some(topic_fragment.to_string());
        self
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    fn exhausted() -> Error {
        Error::JudgeUnparseable("chain exhausted after 2 model(s)".to_string())
    }
}

#[async_trait]
impl Judge for TableJudge {
    async fn score_items(&self, topic: &str, items: &[Item]) -> Result<QualityVerdict> {
        self.score_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fragment) = &self.panic_on {
            if topic.contains(fragment.as_str()) {
                panic!("judge crashed on '{}'", topic);
            }
        }
        if self.fail {
            return Err(Self::exhausted());
        }

        let failed_batches = usize::from(items.iter().any(|i| self.unscorable.contains(&i.id)));
        let item_scores: HashMap<String, ItemScore> = items
            .iter()
            .filter(|i| !self.unscorable.contains(&i.id))
            .map(|i| {
                let score = self.scores.get(&i.id).copied().unwrap_or(self.default_score);
                (
                    i.id.clone(),
                    ItemScore {
                        score,
                        rationale: format!("table score {}", score),
                    },
                )
            })
            .collect();
        let overall = item_scores.values().map(|s| s.score).sum::<f32>()
            / item_scores.len().max(1) as f32;

        Ok(QualityVerdict {
            overall_score: overall,
            overall_rationale: "results drift away from the topic".to_string(),
            item_scores,
            failed_batches,
        })
    }

    async fn is_applicable(&self, _: &str, _: &Strategy) -> Result<bool> {
        if self.fail {
            return Err(Self::exhausted());
        }
        Ok(true)
    }

    async fn propose_expansion(&self, _: &str, _: &str, _: Option<&str>) -> Result<String> {
        if self.fail || self.fail_proposals {
            return Err(Self::exhausted());
        }
        Ok(self.expansion.clone())
    }

    async fn derive_keywords(&self, _: &str) -> Result<Vec<String>> {
        if self.fail {
            return Err(Self::exhausted());
        }
        Ok(self.keywords.clone())
    }

    async fn disambiguate_keyword(&self, keyword: &str, _: &str) -> Result<String> {
        Ok(format!("{}_variant", keyword))
    }
}

/// Index that returns ids in a fixed order, skipping excluded ones
pub struct ScriptedIndex {
    order: Vec<String>,
    pub searches: Mutex<Vec<Vec<String>>>,
    pub vector_calls: AtomicUsize,
}

impl ScriptedIndex {
    pub fn new(order: impl IntoIterator<Item = String>) -> Self {
        Self {
            order: order.into_iter().collect(),
            searches: Mutex::new(Vec::new()),
            vector_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingIndex for ScriptedIndex {
    async fn search_excluding(
        &self,
        _vector: &[f32],
        k: usize,
        exclude: &SeenIdSet,
    ) -> Result<Vec<Neighbor>> {
        let hits: Vec<Neighbor> = self
            .order
            .iter()
            .filter(|id| !exclude.contains(id))
            .take(k)
            .enumerate()
            .map(|(i, id)| Neighbor {
                id: id.clone(),
                distance: i as f32,
            })
            .collect();
        self.searches
            .lock()
            .push(hits.iter().map(|h| h.id.clone()).collect());
        Ok(hits)
    }

    async fn vectors(&self, ids: &[String]) -> Result<Vec<(String, Vec<f32>)>> {
        self.vector_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ids
            .iter()
            .filter(|id| self.order.contains(id))
            .map(|id| (id.clone(), vec![1.0, 0.0]))
            .collect())
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Collaborators wired around a scripted index of `p1..pN`
pub struct Fixture {
    pub retriever: Arc<HybridRetriever>,
    pub engine: RefinementEngine,
    pub index: Arc<ScriptedIndex>,
    pub judge: Arc<TableJudge>,
    pub store: Arc<StrategyStore>,
}

pub fn passage_ids(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("p{}", i)).collect()
}

/// Texts share no words with test queries, so reranking keeps index order
pub fn scripted_fixture(
    passages: usize,
    judge: TableJudge,
    store: StrategyStore,
    refinement: RefinementConfig,
    strategy: StrategyConfig,
) -> Fixture {
    let ids = passage_ids(passages);
    let corpus = Arc::new(PassageCorpus::from_pairs(
        ids.iter().map(|id| (id.clone(), format!("passage {}", id))),
    ));
    let index = Arc::new(ScriptedIndex::new(ids));
    let judge = Arc::new(judge);
    let store = Arc::new(store);

    let retriever = Arc::new(HybridRetriever::new(
        Arc::new(HashEmbedder::new(8)),
        index.clone(),
        Arc::new(LexicalReranker::default()),
        corpus,
        judge.clone(),
        store.clone(),
        DomainBooster::new(Vec::<String>::new(), Vec::<String>::new(), 2.0),
        RetrieverConfig::default(),
    ));

    let engine = RefinementEngine::new(
        judge.clone(),
        index.clone(),
        retriever.clone(),
        refinement,
        &strategy,
    );

    Fixture {
        retriever,
        engine,
        index,
        judge,
        store,
    }
}

/// Collaborators over a real in-memory corpus and hashed embeddings
pub fn corpus_retriever(
    corpus: PassageCorpus,
    judge: Arc<dyn Judge>,
) -> (Arc<HybridRetriever>, Arc<dyn EmbeddingIndex>) {
    let embedder = HashEmbedder::new(64);
    let index: Arc<dyn EmbeddingIndex> =
        Arc::new(verso_rag::InMemoryIndex::from_texts(&embedder, corpus.iter()));
    let retriever = Arc::new(HybridRetriever::new(
        Arc::new(embedder),
        index.clone(),
        Arc::new(LexicalReranker::default()),
        Arc::new(corpus),
        judge,
        Arc::new(StrategyStore::new()),
        DomainBooster::new(Vec::<String>::new(), Vec::<String>::new(), 2.0),
        RetrieverConfig::default(),
    ));
    (retriever, index)
}

pub fn scripture_corpus() -> PassageCorpus {
    PassageCorpus::from_pairs([
        ("Room. 12:1", "present your bodies as a living sacrifice"),
        ("Room. 12:2", "be transformed by the renewing of your mind"),
        ("Room. 12:3", "think with sober judgment"),
        ("Room. 12:6", "we have different gifts according to grace"),
        ("1. Piet. 4:10", "each has received a gift, use it to serve"),
        ("1. Kor. 12:4", "there are varieties of gifts"),
        ("Ps. 23:1", "the Lord is my shepherd"),
        ("Ps. 23:2", "he makes me lie down in green pastures"),
        ("Miika 6:8", "do justice, love kindness, walk humbly"),
        ("Hebr. 11:1", "faith is the assurance of things hoped for"),
        ("Hebr. 11:6", "without faith it is impossible to please him"),
        ("Jaak. 1:2", "count it all joy when you meet trials"),
    ])
}
