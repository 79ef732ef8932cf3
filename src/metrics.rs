//! Request metrics and component health.
//!
//! [`PipelineMetrics`] keeps lifetime counters plus the last hour of request
//! and generation samples. Averages, requests per minute and the success
//! rate are derived from that window when a snapshot is taken.
//! [`component_report`] checks the vector store and the generator for
//! `/health` and `/api/v1/metrics`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use rag_support_core::generation::Generator;
use rag_support_core::store::VectorStore;

use crate::session::Clock;

const WINDOW_SECS: i64 = 3600;
const RATE_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: DateTime<Utc>,
    millis: f64,
    ok: bool,
}

#[derive(Debug, Default)]
struct Window {
    requests: VecDeque<Sample>,
    generations: VecDeque<Sample>,
}

impl Window {
    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::seconds(WINDOW_SECS);
        for samples in [&mut self.requests, &mut self.generations] {
            while samples.front().is_some_and(|s| s.at <= cutoff) {
                samples.pop_front();
            }
        }
    }
}

/// Point-in-time view of [`PipelineMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub failures_total: u64,
    /// Requests answered in the last hour.
    pub window_requests: usize,
    pub avg_response_ms: f64,
    pub requests_per_minute: usize,
    /// Percentage of last-hour requests that succeeded; 100 when idle.
    pub success_rate: f64,
    pub avg_generation_ms: f64,
    pub timestamp: DateTime<Utc>,
}

pub struct PipelineMetrics {
    clock: Arc<dyn Clock>,
    requests_total: AtomicU64,
    failures_total: AtomicU64,
    window: Mutex<Window>,
}

impl PipelineMetrics {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            requests_total: AtomicU64::new(0),
            failures_total: AtomicU64::new(0),
            window: Mutex::new(Window::default()),
        }
    }

    fn push(&self, sample: Sample, generation: bool) {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.prune(sample.at);
        if generation {
            window.generations.push_back(sample);
        } else {
            window.requests.push_back(sample);
        }
    }

    pub fn record_request(&self, elapsed: Duration, ok: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failures_total.fetch_add(1, Ordering::Relaxed);
        }
        let sample = Sample {
            at: self.clock.now(),
            millis: elapsed.as_secs_f64() * 1000.0,
            ok,
        };
        self.push(sample, false);
    }

    /// Latency of one successful model call.
    pub fn record_generation(&self, elapsed: Duration) {
        let sample = Sample {
            at: self.clock.now(),
            millis: elapsed.as_secs_f64() * 1000.0,
            ok: true,
        };
        self.push(sample, true);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = self.clock.now();
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.prune(now);

        let rate_cutoff = now - chrono::Duration::seconds(RATE_WINDOW_SECS);
        let succeeded = window.requests.iter().filter(|s| s.ok).count();
        let success_rate = if window.requests.is_empty() {
            100.0
        } else {
            succeeded as f64 * 100.0 / window.requests.len() as f64
        };

        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            failures_total: self.failures_total.load(Ordering::Relaxed),
            window_requests: window.requests.len(),
            avg_response_ms: mean(&window.requests),
            requests_per_minute: window.requests.iter().filter(|s| s.at > rate_cutoff).count(),
            success_rate,
            avg_generation_ms: mean(&window.generations),
            timestamp: now,
        }
    }
}

fn mean(samples: &VecDeque<Sample>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.millis).sum::<f64>() / samples.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Healthy,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStatus {
    pub status: ComponentState,
    pub documents: usize,
    pub chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratorStatus {
    pub status: ComponentState,
    pub model: String,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentReport {
    pub index: IndexStatus,
    pub generator: GeneratorStatus,
}

impl ComponentReport {
    pub fn is_healthy(&self) -> bool {
        self.index.status == ComponentState::Healthy
            && self.generator.status == ComponentState::Healthy
    }
}

async fn index_status(store: &dyn VectorStore) -> IndexStatus {
    let counts = async {
        let documents = store.sources().await?.len();
        let chunks = store.len().await?;
        anyhow::Ok((documents, chunks))
    };
    match counts.await {
        Ok((documents, chunks)) => IndexStatus {
            status: ComponentState::Healthy,
            documents,
            chunks,
            error: None,
        },
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "vector store health check failed");
            IndexStatus {
                status: ComponentState::Down,
                documents: 0,
                chunks: 0,
                error: Some(format!("{:#}", e)),
            }
        }
    }
}

async fn generator_status(generator: &dyn Generator) -> GeneratorStatus {
    let started = tokio::time::Instant::now();
    let result = generator.health_check().await;
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
    let (status, error) = match result {
        Ok(()) => (ComponentState::Healthy, None),
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "generator health check failed");
            (ComponentState::Down, Some(format!("{:#}", e)))
        }
    };
    GeneratorStatus {
        status,
        model: generator.model_name().to_string(),
        latency_ms,
        error,
    }
}

/// Check the vector store (document and chunk counts) and the generator
/// (reachability) concurrently.
pub async fn component_report(store: &dyn VectorStore, generator: &dyn Generator) -> ComponentReport {
    let (index, generator) = tokio::join!(index_status(store), generator_status(generator));
    ComponentReport { index, generator }
}
