//! In-memory [`VectorStore`] implementation for tests and the `memory`
//! backend.
//!
//! Records live in a `HashMap` behind a `std::sync::RwLock`. Queries are
//! brute-force similarity over every stored vector.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::DistanceMetric;
use crate::models::Chunk;

use super::{sort_matches, VectorMatch, VectorRecord, VectorStore};

pub struct InMemoryVectorStore {
    metric: DistanceMetric,
    records: RwLock<HashMap<String, VectorRecord>>,
}

impl InMemoryVectorStore {
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new(DistanceMetric::Cosine)
    }
}

fn poisoned() -> anyhow::Error {
    anyhow::anyhow!("in-memory vector store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        let mut stored = self.records.write().map_err(|_| poisoned())?;
        for r in records {
            stored.insert(r.chunk.id.clone(), r.clone());
        }
        Ok(())
    }

    async fn delete_source(&self, source_id: &str) -> Result<usize> {
        let mut stored = self.records.write().map_err(|_| poisoned())?;
        let before = stored.len();
        stored.retain(|_, r| r.chunk.source_document != source_id);
        Ok(before - stored.len())
    }

    async fn replace_source(&self, source_id: &str, records: &[VectorRecord]) -> Result<()> {
        let mut stored = self.records.write().map_err(|_| poisoned())?;
        stored.retain(|_, r| r.chunk.source_document != source_id);
        for r in records {
            stored.insert(r.chunk.id.clone(), r.clone());
        }
        Ok(())
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        let stored = self.records.read().map_err(|_| poisoned())?;
        let mut matches: Vec<VectorMatch> = stored
            .values()
            .map(|r| VectorMatch {
                chunk: r.chunk.clone(),
                similarity: self.metric.similarity(embedding, &r.embedding),
                embedding: r.embedding.clone(),
            })
            .collect();
        sort_matches(&mut matches);
        matches.truncate(k);
        Ok(matches)
    }

    async fn source_chunks(&self, source_id: &str) -> Result<Vec<Chunk>> {
        let stored = self.records.read().map_err(|_| poisoned())?;
        let mut chunks: Vec<Chunk> = stored
            .values()
            .filter(|r| r.chunk.source_document == source_id)
            .map(|r| r.chunk.clone())
            .collect();
        chunks.sort_by_key(|c| c.sequence_index);
        Ok(chunks)
    }

    async fn sources(&self) -> Result<Vec<String>> {
        let stored = self.records.read().map_err(|_| poisoned())?;
        let sources: BTreeSet<String> = stored
            .values()
            .map(|r| r.chunk.source_document.clone())
            .collect();
        Ok(sources.into_iter().collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.records.read().map_err(|_| poisoned())?.len())
    }
}
