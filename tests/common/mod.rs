//! Deterministic fakes shared by the integration tests.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::TimeZone;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rag_support::config::Config;
use rag_support::deadline::DeadlineGenerator;
use rag_support::pipeline::RagPipeline;
use rag_support::session::{ManualClock, SessionManager};
use rag_support_core::chunk::MarkdownProcessor;
use rag_support_core::embedding::Embedder;
use rag_support_core::generation::{GenerationRequest, Generator, SamplingParams};
use rag_support_core::index::CorpusIndex;
use rag_support_core::models::{Dimension, DimensionScores, ScoredAnswer};
use rag_support_core::retrieve::Retriever;
use rag_support_core::scoring::{verdict, AnswerScorer, ScoringInput, ScoringParams};
use rag_support_core::store::memory::InMemoryVectorStore;

pub const VOCABULARY: &[&str] = &[
    "password", "reset", "invoice", "export", "billing", "settings", "email", "login",
];

pub const ACCOUNT_GUIDE: &str = "# Account\n\n\
## Reset your password\n\n\
To reset your password, open **Settings** and click `Reset password`. \
A reset link is sent by email within 5 minutes.\n\n\
## Export invoices\n\n\
Open the Billing page and click **Export** to download invoices as CSV.\n";

/// Counts vocabulary words; texts sharing no vocabulary are orthogonal.
pub struct VocabularyEmbedder;

#[async_trait]
impl Embedder for VocabularyEmbedder {
    fn model_name(&self) -> &str {
        "vocabulary"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                VOCABULARY
                    .iter()
                    .map(|w| lower.matches(w).count() as f32)
                    .collect()
            })
            .collect())
    }
}

pub enum Step {
    Reply(String),
    /// Sleep, then reply; trips a deadline shorter than the sleep.
    Stall(Duration),
    Fail(String),
}

/// Plays back a script of generation outcomes, then repeats `fallback`.
pub struct ScriptedGenerator {
    steps: Mutex<VecDeque<Step>>,
    fallback: String,
    requests: Mutex<Vec<GenerationRequest>>,
    reachable: AtomicBool,
}

impl ScriptedGenerator {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback: "Open **Settings** and click `Reset password`.".to_string(),
            requests: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(true),
        }
    }

    /// Make the health check fail (or pass again).
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest, _: &SamplingParams) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(text)) => Ok(text),
            Some(Step::Stall(d)) => {
                tokio::time::sleep(d).await;
                Ok("too late".to_string())
            }
            Some(Step::Fail(msg)) => Err(anyhow::anyhow!(msg)),
            None => Ok(self.fallback.clone()),
        }
    }

    async fn health_check(&self) -> Result<()> {
        if !self.reachable.load(Ordering::SeqCst) {
            anyhow::bail!("model server unreachable");
        }
        Ok(())
    }
}

/// Scores attempts from a fixed list: every dimension gets the scripted
/// value, so the aggregate equals it. Scores 0.9 once the list runs out.
pub struct ScriptedScorer {
    scores: Mutex<VecDeque<f64>>,
    params: ScoringParams,
    answers: Mutex<Vec<String>>,
}

impl ScriptedScorer {
    pub fn new(scores: Vec<f64>) -> Self {
        Self {
            scores: Mutex::new(scores.into()),
            params: ScoringParams::default(),
            answers: Mutex::new(Vec::new()),
        }
    }

    /// Every answer text handed to the scorer, in order.
    pub fn answers(&self) -> Vec<String> {
        self.answers.lock().unwrap().clone()
    }
}

impl AnswerScorer for ScriptedScorer {
    fn score(&self, input: &ScoringInput<'_>) -> ScoredAnswer {
        self.answers.lock().unwrap().push(input.answer.to_string());
        let score = self.scores.lock().unwrap().pop_front().unwrap_or(0.9);
        let dims: DimensionScores = Dimension::ALL.iter().map(|d| (*d, score)).collect();
        verdict(input.answer, dims, vec![], &self.params)
    }

    fn params(&self) -> &ScoringParams {
        &self.params
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.vector_store.backend = "memory".to_string();
    config.retrieval.similarity_threshold = 0.3;
    config.llm.timeout_secs = 1;
    config
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        chrono::Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
    ))
}

pub async fn indexed_corpus(config: &Config) -> Arc<CorpusIndex> {
    let index = Arc::new(CorpusIndex::new(
        Arc::new(VocabularyEmbedder),
        Arc::new(InMemoryVectorStore::new(config.vector_store.distance)),
        config.embedding.batch_size,
    ));
    let chunks = MarkdownProcessor::new(config.chunking_params()).process("account.md", ACCOUNT_GUIDE);
    index.upsert("account.md", chunks).await.unwrap();
    index
}

pub struct Harness {
    pub pipeline: Arc<RagPipeline>,
    pub generator: Arc<ScriptedGenerator>,
    pub scorer: Arc<ScriptedScorer>,
    pub clock: Arc<ManualClock>,
}

pub async fn harness(config: &Config, steps: Vec<Step>, scores: Vec<f64>) -> Harness {
    let index = indexed_corpus(config).await;
    let generator = Arc::new(ScriptedGenerator::new(steps));
    let scorer = Arc::new(ScriptedScorer::new(scores));
    let clock = manual_clock();
    let pipeline = RagPipeline::new(
        config,
        Arc::new(Retriever::new(index, config.retrieval_params().unwrap())),
        Arc::new(DeadlineGenerator::new(
            generator.clone(),
            Duration::from_secs(config.llm.timeout_secs),
        )),
        scorer.clone(),
        Arc::new(SessionManager::new(config.session_params(), clock.clone())),
    );
    Harness {
        pipeline: Arc::new(pipeline),
        generator,
        scorer,
        clock,
    }
}
