//! Deadline decorators for the external capabilities.
//!
//! Each wrapper races the inner call against `tokio::time::timeout`. An
//! elapsed deadline surfaces as [`RagError::DownstreamTimeout`] inside the
//! `anyhow::Error`, so [`RagError::classify`] keeps it intact and the
//! orchestrator can tell a timeout from any other failure. Dropping the
//! inner future is the only cancellation.

use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rag_support_core::embedding::Embedder;
use rag_support_core::generation::{GenerationRequest, Generator, SamplingParams};
use rag_support_core::models::Chunk;
use rag_support_core::store::{VectorMatch, VectorRecord, VectorStore};
use rag_support_core::RagError;

async fn within<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, timeout_ms = limit.as_millis() as u64, "deadline exceeded");
            Err(anyhow::Error::new(RagError::DownstreamTimeout {
                operation: operation.to_string(),
                timeout_ms: limit.as_millis() as u64,
            }))
        }
    }
}

pub struct DeadlineEmbedder {
    inner: Arc<dyn Embedder>,
    limit: Duration,
}

impl DeadlineEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl Embedder for DeadlineEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        within("embedding", self.limit, self.inner.embed(texts)).await
    }
}

/// Only `query` is bounded; ingestion writes run to completion so a
/// document is never left half-replaced by a client-side deadline.
pub struct DeadlineStore {
    inner: Arc<dyn VectorStore>,
    limit: Duration,
}

impl DeadlineStore {
    pub fn new(inner: Arc<dyn VectorStore>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl VectorStore for DeadlineStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        self.inner.upsert(records).await
    }

    async fn delete_source(&self, source_id: &str) -> Result<usize> {
        self.inner.delete_source(source_id).await
    }

    async fn replace_source(&self, source_id: &str, records: &[VectorRecord]) -> Result<()> {
        self.inner.replace_source(source_id, records).await
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        within("vector query", self.limit, self.inner.query(embedding, k)).await
    }

    async fn source_chunks(&self, source_id: &str) -> Result<Vec<Chunk>> {
        self.inner.source_chunks(source_id).await
    }

    async fn sources(&self) -> Result<Vec<String>> {
        self.inner.sources().await
    }

    async fn len(&self) -> Result<usize> {
        self.inner.len().await
    }
}

pub struct DeadlineGenerator {
    inner: Arc<dyn Generator>,
    limit: Duration,
}

impl DeadlineGenerator {
    pub fn new(inner: Arc<dyn Generator>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl Generator for DeadlineGenerator {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn generate(&self, request: &GenerationRequest, params: &SamplingParams) -> Result<String> {
        within("generation", self.limit, self.inner.generate(request, params)).await
    }

    async fn health_check(&self) -> Result<()> {
        within("generator health check", self.limit, self.inner.health_check()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowGenerator;

    #[async_trait]
    impl Generator for SlowGenerator {
        fn model_name(&self) -> &str {
            "slow"
        }

        async fn generate(&self, _: &GenerationRequest, _: &SamplingParams) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_downstream_timeout() {
        let generator = DeadlineGenerator::new(Arc::new(SlowGenerator), Duration::from_millis(250));
        let err = generator
            .generate(&GenerationRequest { messages: vec![] }, &SamplingParams::default())
            .await
            .unwrap_err();
        let classified = RagError::classify(err, RagError::GenerationUnavailable);
        assert_eq!(
            classified,
            RagError::DownstreamTimeout {
                operation: "generation".to_string(),
                timeout_ms: 250,
            }
        );
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let result = within("noop", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
