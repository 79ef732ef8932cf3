//! Vector store capability for RAG Support.
//!
//! The [`VectorStore`] trait is the only way the corpus index and the
//! retriever touch stored chunks, enabling pluggable backends (SQLite in the
//! app crate, in-memory here).
//!
//! Implementations must be `Send + Sync` to work with async runtimes. Reads
//! may overlap writes; a query is not guaranteed to observe an ingestion that
//! completes concurrently.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Chunk;

/// A chunk together with its embedding, as written to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// A stored chunk matched by a nearest-neighbour query.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub chunk: Chunk,
    /// Similarity under the store's distance metric (larger is closer).
    pub similarity: f64,
    pub embedding: Vec<f32>,
}

/// Abstract nearest-neighbour store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Insert or overwrite records by chunk id |
/// | [`replace_source`](VectorStore::replace_source) | Swap all records of one document |
/// | [`delete_source`](VectorStore::delete_source) | Remove all records of one document |
/// | [`query`](VectorStore::query) | `k` nearest records, most similar first |
/// | [`source_chunks`](VectorStore::source_chunks) | Stored chunks of one document |
/// | [`sources`](VectorStore::sources) | Indexed document ids |
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    /// Returns the number of records removed.
    async fn delete_source(&self, source_id: &str) -> Result<usize>;

    /// Replace every record of `source_id` with `records`.
    ///
    /// The default implementation deletes then upserts; backends that can do
    /// better (a transaction, a single lock) should override it so readers
    /// never see a half-replaced document.
    async fn replace_source(&self, source_id: &str, records: &[VectorRecord]) -> Result<()> {
        self.delete_source(source_id).await?;
        self.upsert(records).await
    }

    /// Up to `k` records ordered by descending similarity.
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorMatch>>;

    /// Stored chunks of `source_id`, ordered by sequence index.
    async fn source_chunks(&self, source_id: &str) -> Result<Vec<Chunk>>;

    /// Distinct source documents with at least one stored chunk, sorted.
    async fn sources(&self) -> Result<Vec<String>>;

    async fn len(&self) -> Result<usize>;
}

/// Order matches by descending similarity, then by earlier sequence index,
/// then by source and id so equal scores always come back in the same order.
pub fn sort_matches(matches: &mut [VectorMatch]) {
    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk.sequence_index.cmp(&b.chunk.sequence_index))
            .then(a.chunk.source_document.cmp(&b.chunk.source_document))
            .then(a.chunk.id.cmp(&b.chunk.id))
    });
}
