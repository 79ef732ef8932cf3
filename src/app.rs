//! Component wiring: configuration in, ready-to-use index and pipeline out.
//!
//! Every external capability is wrapped in its deadline decorator here, so
//! nothing downstream has to think about timeouts.

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;

use rag_support_core::chunk::MarkdownProcessor;
use rag_support_core::embedding::Embedder;
use rag_support_core::generation::Generator;
use rag_support_core::index::CorpusIndex;
use rag_support_core::retrieve::Retriever;
use rag_support_core::scoring::HeuristicScorer;
use rag_support_core::store::memory::InMemoryVectorStore;
use rag_support_core::store::VectorStore;

use crate::config::Config;
use crate::deadline::{DeadlineEmbedder, DeadlineGenerator, DeadlineStore};
use crate::embedding::create_embedder;
use crate::llm::OllamaGenerator;
use crate::pipeline::RagPipeline;
use crate::session::{SessionManager, SystemClock};
use crate::sqlite_store::SqliteVectorStore;
use crate::{db, migrate};

/// Secrets read from the environment by `main`.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub openai_api_key: Option<String>,
}

pub async fn open_store(config: &Config) -> Result<Arc<dyn VectorStore>> {
    let vs = &config.vector_store;
    let store: Arc<dyn VectorStore> = match vs.backend.as_str() {
        "memory" => Arc::new(InMemoryVectorStore::new(vs.distance)),
        "sqlite" => {
            let pool = db::connect(&vs.path).await?;
            migrate::run_migrations(&pool).await?;
            Arc::new(SqliteVectorStore::new(pool, &vs.collection, vs.distance))
        }
        other => bail!("Unknown vector store backend: {}", other),
    };
    Ok(Arc::new(DeadlineStore::new(
        store,
        Duration::from_secs(config.vector_store.timeout_secs),
    )))
}

pub fn open_embedder(config: &Config, secrets: &Secrets) -> Result<Arc<dyn Embedder>> {
    let embedder = create_embedder(&config.embedding, secrets.openai_api_key.as_deref())?;
    Ok(Arc::new(DeadlineEmbedder::new(
        embedder,
        Duration::from_secs(config.embedding.timeout_secs),
    )))
}

pub async fn build_index(config: &Config, secrets: &Secrets) -> Result<Arc<CorpusIndex>> {
    let store = open_store(config).await?;
    let embedder = open_embedder(config, secrets)?;
    Ok(Arc::new(CorpusIndex::new(
        embedder,
        store,
        config.embedding.batch_size,
    )))
}

pub fn processor(config: &Config) -> MarkdownProcessor {
    MarkdownProcessor::new(config.chunking_params())
}

pub fn build_pipeline(config: &Config, index: Arc<CorpusIndex>) -> Result<RagPipeline> {
    let retriever = Arc::new(Retriever::new(index, config.retrieval_params()?));
    let generator: Arc<dyn Generator> = Arc::new(DeadlineGenerator::new(
        Arc::new(OllamaGenerator::new(&config.llm)?),
        Duration::from_secs(config.llm.timeout_secs),
    ));
    let scorer = Arc::new(HeuristicScorer::new(config.scoring_params()));
    let sessions = Arc::new(SessionManager::new(
        config.session_params(),
        Arc::new(SystemClock),
    ));
    Ok(RagPipeline::new(config, retriever, generator, scorer, sessions))
}
