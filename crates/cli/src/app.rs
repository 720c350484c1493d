//! Collaborator wiring from settings

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use verso_agent::{RefinementEngine, SectionRunner};
use verso_config::{EmbedderBackend, IndexBackend, RerankerBackend, Settings};
use verso_core::{Embedder, EmbeddingIndex, Judge, Reranker};
use verso_llm::LlmJudge;
use verso_rag::{
    DomainBooster, HashEmbedder, HttpReranker, HybridRetriever, InMemoryIndex, LexicalReranker,
    OllamaEmbedder, OllamaEmbeddingConfig, PassageCorpus, QdrantIndex, QdrantIndexConfig,
    RetrieverConfig, StrategyStore, YamlStrategyFile,
};

/// Everything a run needs
pub struct App {
    pub runner: SectionRunner,
    pub strategies: Arc<StrategyStore>,
}

impl App {
    pub async fn build(settings: &Settings) -> anyhow::Result<Self> {
        let corpus = PassageCorpus::load(&settings.corpus.path)
            .with_context(|| format!("loading corpus {}", settings.corpus.path))?;
        if corpus.is_empty() {
            tracing::warn!(path = %settings.corpus.path, "Passage corpus is empty");
        }

        let dim = settings.index.vector_dim;
        let embedder: Arc<dyn Embedder> = match settings.embedding.backend {
            EmbedderBackend::Ollama => Arc::new(OllamaEmbedder::new(
                OllamaEmbeddingConfig::from_settings(&settings.embedding, &settings.index),
            )),
            EmbedderBackend::Hashed => Arc::new(HashEmbedder::new(dim)),
        };

        let index: Arc<dyn EmbeddingIndex> = match settings.index.backend {
            IndexBackend::Qdrant => Arc::new(
                QdrantIndex::connect(QdrantIndexConfig::from(&settings.index))
                    .await
                    .context("connecting to qdrant")?,
            ),
            IndexBackend::Memory => match (&settings.index.path, settings.embedding.backend) {
                (Some(path), _) => Arc::new(
                    InMemoryIndex::load(path, dim)
                        .with_context(|| format!("loading vectors {}", path))?,
                ),
                (None, EmbedderBackend::Hashed) => Arc::new(InMemoryIndex::from_texts(
                    &HashEmbedder::new(dim),
                    corpus.iter(),
                )),
                (None, EmbedderBackend::Ollama) => {
                    bail!("index.path is required for the memory index with ollama embeddings")
                }
            },
        };

        let reranker: Arc<dyn Reranker> = match settings.reranker.backend {
            RerankerBackend::Lexical => {
                Arc::new(LexicalReranker::new(&settings.retrieval.stopwords))
            }
            RerankerBackend::Http => Arc::new(
                HttpReranker::new(
                    settings.reranker.endpoint.clone(),
                    Duration::from_secs(settings.retrieval.timeout_secs),
                )
                .context("building reranker client")?,
            ),
        };

        let judge: Arc<dyn Judge> =
            Arc::new(LlmJudge::from_config(&settings.judge).context("building judge")?);

        let strategies = Arc::new(
            StrategyStore::open(Arc::new(YamlStrategyFile::new(&settings.strategy.store_path)))
                .with_context(|| format!("loading strategies {}", settings.strategy.store_path))?,
        );

        tracing::info!(
            passages = corpus.len(),
            vectors = index.len(),
            strategies = strategies.len(),
            "Collaborators ready"
        );

        let retriever = Arc::new(HybridRetriever::new(
            embedder,
            index.clone(),
            reranker,
            Arc::new(corpus),
            judge.clone(),
            strategies.clone(),
            DomainBooster::from_config(&settings.retrieval),
            RetrieverConfig::from(&settings.retrieval),
        ));

        let engine = RefinementEngine::new(
            judge,
            index,
            retriever.clone(),
            settings.refinement.clone(),
            &settings.strategy,
        )
        .with_search_timeout(Duration::from_secs(settings.retrieval.timeout_secs));

        let runner = SectionRunner::new(
            retriever,
            Arc::new(engine),
            settings.retrieval.items_per_section,
        )
        .with_max_concurrent(settings.pipeline.max_concurrent_sections);

        Ok(Self { runner, strategies })
    }
}
