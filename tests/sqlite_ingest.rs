//! Filesystem ingestion into the SQLite vector store.

mod common;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use common::{VocabularyEmbedder, ACCOUNT_GUIDE};
use rag_support::config::IngestConfig;
use rag_support::sqlite_store::SqliteVectorStore;
use rag_support::{db, ingest, migrate};
use rag_support_core::chunk::{ChunkingParams, MarkdownProcessor};
use rag_support_core::embedding::{DistanceMetric, Embedder};
use rag_support_core::index::CorpusIndex;
use rag_support_core::store::VectorStore;

async fn sqlite_store(dir: &std::path::Path, collection: &str) -> Arc<SqliteVectorStore> {
    let pool = db::connect(&dir.join("db/vectors.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    Arc::new(SqliteVectorStore::new(pool, collection, DistanceMetric::Cosine))
}

fn write(root: &std::path::Path, rel: &str, body: impl AsRef<[u8]>) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

/// Refuses any batch containing the word "unembeddable".
struct PickyEmbedder;

#[async_trait]
impl Embedder for PickyEmbedder {
    fn model_name(&self) -> &str {
        "picky"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.contains("unembeddable")) {
            anyhow::bail!("embedding service rejected the batch");
        }
        VocabularyEmbedder.embed(texts).await
    }
}

#[tokio::test]
async fn test_ingest_reingest_and_prune() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("raw");
    write(
        &root,
        "guide/account.md",
        &format!("{}\n<https://docs.example.com/account>\n", ACCOUNT_GUIDE),
    );
    write(&root, "guide/login.md", "# Login\n\nUse your email to login.\n");

    let store = sqlite_store(tmp.path(), "support_docs").await;
    let index = CorpusIndex::new(Arc::new(VocabularyEmbedder), store.clone(), 2);
    let processor = MarkdownProcessor::new(ChunkingParams::default());
    let config = IngestConfig::default();

    let stats = ingest::run_ingest(&index, &processor, &config, &root, false)
        .await
        .unwrap();
    assert_eq!(stats.files, 2);
    assert!(stats.failed.is_empty());
    let total = store.len().await.unwrap();
    assert_eq!(stats.chunks, total);
    assert_eq!(
        store.sources().await.unwrap(),
        vec!["guide/account.md", "guide/login.md"]
    );

    let account = store.source_chunks("guide/account.md").await.unwrap();
    assert!(account
        .iter()
        .all(|c| c.source_url.as_deref() == Some("https://docs.example.com/account")));
    assert!(account.iter().all(|c| !c.text.contains("<https://")));
    let indices: Vec<usize> = account.iter().map(|c| c.sequence_index).collect();
    assert_eq!(indices, (0..account.len()).collect::<Vec<_>>());

    // unchanged corpus: identical chunk set
    ingest::run_ingest(&index, &processor, &config, &root, false)
        .await
        .unwrap();
    assert_eq!(store.source_chunks("guide/account.md").await.unwrap(), account);
    assert_eq!(store.len().await.unwrap(), total);

    // a vanished file is removed from the index
    std::fs::remove_file(root.join("guide/login.md")).unwrap();
    let stats = ingest::run_ingest(&index, &processor, &config, &root, false)
        .await
        .unwrap();
    assert_eq!(stats.sources_removed, 1);
    assert_eq!(store.sources().await.unwrap(), vec!["guide/account.md"]);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("raw");
    write(&root, "account.md", ACCOUNT_GUIDE);

    let store = sqlite_store(tmp.path(), "support_docs").await;
    let index = CorpusIndex::new(Arc::new(VocabularyEmbedder), store.clone(), 32);
    let processor = MarkdownProcessor::new(ChunkingParams::default());

    let stats = ingest::run_ingest(&index, &processor, &IngestConfig::default(), &root, true)
        .await
        .unwrap();
    assert_eq!(stats.files, 1);
    assert!(stats.chunks > 0);
    assert_eq!(store.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_query_ranks_and_scopes_by_collection() {
    let tmp = tempfile::tempdir().unwrap();
    let docs = sqlite_store(tmp.path(), "support_docs").await;
    let other = sqlite_store(tmp.path(), "other").await;
    let processor = MarkdownProcessor::new(ChunkingParams::default());

    let index = CorpusIndex::new(Arc::new(VocabularyEmbedder), docs.clone(), 32);
    index
        .upsert("account.md", processor.process("account.md", ACCOUNT_GUIDE))
        .await
        .unwrap();

    let query = index.embed_query("reset password").await.unwrap();
    let matches = index.query(&query, 10).await.unwrap();
    assert_eq!(
        matches[0].chunk.heading_path,
        vec!["Account".to_string(), "Reset your password".to_string()]
    );
    assert!(matches[0].similarity > 0.9);
    assert!(matches
        .windows(2)
        .all(|w| w[0].similarity >= w[1].similarity));

    assert_eq!(other.len().await.unwrap(), 0);
    assert!(other.query(&query, 10).await.unwrap().is_empty());
    assert_eq!(docs.delete_source("account.md").await.unwrap(), matches.len());
}

#[tokio::test]
async fn test_unreadable_file_keeps_indexed_version() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("raw");
    write(&root, "guide/account.md", ACCOUNT_GUIDE);
    write(&root, "guide/login.md", "# Login\n\nUse your email to login.\n");

    let store = sqlite_store(tmp.path(), "support_docs").await;
    let index = CorpusIndex::new(Arc::new(VocabularyEmbedder), store.clone(), 32);
    let processor = MarkdownProcessor::new(ChunkingParams::default());
    let config = IngestConfig::default();

    ingest::run_ingest(&index, &processor, &config, &root, false)
        .await
        .unwrap();
    let login = store.source_chunks("guide/login.md").await.unwrap();
    assert!(!login.is_empty());

    write(&root, "guide/login.md", b"# Login\n\xff\xfe not utf-8\n");
    let stats = ingest::run_ingest(&index, &processor, &config, &root, false)
        .await
        .unwrap();

    assert_eq!(stats.files, 2);
    assert_eq!(stats.sources_removed, 0);
    assert_eq!(stats.failed.len(), 1);
    assert_eq!(stats.failed[0].0, "guide/login.md");
    assert_eq!(store.source_chunks("guide/login.md").await.unwrap(), login);
    assert_eq!(
        store.sources().await.unwrap(),
        vec!["guide/account.md", "guide/login.md"]
    );
}

#[tokio::test]
async fn test_embedding_failure_keeps_previous_version() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("raw");
    write(&root, "guide/account.md", ACCOUNT_GUIDE);
    write(&root, "guide/login.md", "# Login\n\nUse your email to login.\n");

    let store = sqlite_store(tmp.path(), "support_docs").await;
    let index = CorpusIndex::new(Arc::new(PickyEmbedder), store.clone(), 32);
    let processor = MarkdownProcessor::new(ChunkingParams::default());
    let config = IngestConfig::default();

    ingest::run_ingest(&index, &processor, &config, &root, false)
        .await
        .unwrap();
    let login = store.source_chunks("guide/login.md").await.unwrap();

    write(
        &root,
        "guide/login.md",
        "# Login\n\nThis page is unembeddable now.\n",
    );
    write(
        &root,
        "guide/account.md",
        format!("{}\n## Delete account\n\nWrite to support by email.\n", ACCOUNT_GUIDE),
    );
    let stats = ingest::run_ingest(&index, &processor, &config, &root, false)
        .await
        .unwrap();

    assert_eq!(stats.failed.len(), 1);
    assert_eq!(stats.failed[0].0, "guide/login.md");
    assert!(stats.failed[0].1.contains("rejected"));
    assert_eq!(stats.sources_removed, 0);
    // the failed document is untouched, the other one was updated
    assert_eq!(store.source_chunks("guide/login.md").await.unwrap(), login);
    assert!(store
        .source_chunks("guide/account.md")
        .await
        .unwrap()
        .iter()
        .any(|c| c.text.contains("Delete account")));
}
