//! Corpus index: chunk embeddings in, nearest neighbours out.
//!
//! A thin adapter over an [`Embedder`] and a [`VectorStore`]. Ingestion is
//! all-or-nothing per document: every chunk is embedded before anything is
//! written, and the document's previous records are swapped out in a single
//! [`VectorStore::replace_source`] call. A failure at any point leaves the
//! previously indexed version of the document intact.

use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::RagError;
use crate::models::Chunk;
use crate::store::{VectorMatch, VectorRecord, VectorStore};

/// Outcome of indexing one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub source_id: String,
    pub chunks_written: usize,
    pub chunks_removed: usize,
}

pub struct CorpusIndex {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    batch_size: usize,
}

impl CorpusIndex {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>, batch_size: usize) -> Self {
        Self {
            embedder,
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Index the full chunk set of one document, replacing whatever was
    /// stored for it before. An empty chunk set removes the document.
    pub async fn upsert(&self, source_id: &str, chunks: Vec<Chunk>) -> Result<IndexReport, RagError> {
        if let Some(stray) = chunks.iter().find(|c| c.source_document != source_id) {
            return Err(RagError::validation(format!(
                "chunk {} belongs to '{}', not '{}'",
                stray.id, stray.source_document, source_id
            )));
        }

        let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self
                .embedder
                .embed(&texts)
                .await
                .map_err(|e| unavailable(source_id, "embedding", e))?;
            if vectors.len() != texts.len() {
                return Err(RagError::IndexUnavailable(format!(
                    "{}: embedder returned {} vectors for {} chunks",
                    source_id,
                    vectors.len(),
                    texts.len()
                )));
            }
            embeddings.extend(vectors);
        }

        let previous = self
            .store
            .source_chunks(source_id)
            .await
            .map_err(|e| unavailable(source_id, "vector store", e))?
            .len();

        let records: Vec<VectorRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorRecord { chunk, embedding })
            .collect();
        let written = records.len();

        self.store
            .replace_source(source_id, &records)
            .await
            .map_err(|e| unavailable(source_id, "vector store", e))?;

        tracing::debug!(source = source_id, written, previous, "indexed document");
        Ok(IndexReport {
            source_id: source_id.to_string(),
            chunks_written: written,
            chunks_removed: previous,
        })
    }

    pub async fn delete(&self, source_id: &str) -> Result<usize, RagError> {
        self.store
            .delete_source(source_id)
            .await
            .map_err(|e| unavailable(source_id, "vector store", e))
    }

    /// Embed a question with the same model used for the chunks.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, RagError> {
        self.embedder
            .embed_one(text)
            .await
            .map_err(|e| RagError::classify(e, |m| RagError::IndexUnavailable(format!("embedding: {}", m))))
    }

    pub async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorMatch>, RagError> {
        self.store
            .query(embedding, k)
            .await
            .map_err(|e| RagError::classify(e, |m| RagError::IndexUnavailable(format!("vector store: {}", m))))
    }
}

fn unavailable(source_id: &str, what: &str, err: anyhow::Error) -> RagError {
    RagError::classify(err, |m| {
        RagError::IndexUnavailable(format!("{}: {} failed: {}", source_id, what, m))
    })
}
