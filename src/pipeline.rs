//! The RAG orchestrator.
//!
//! One [`RagPipeline::ask`] call runs, in order:
//!
//! 1. question validation (length bounds)
//! 2. session acquisition (locks the session for the whole turn)
//! 3. retrieval; no sufficient context short-circuits to the fixed
//!    cannot-answer reply, which is still recorded in the history
//! 4. prompt fusion, generation and scoring inside a bounded attempt loop
//! 5. history update and response assembly
//!
//! The attempt loop carries an explicit [`AttemptState`]. Downstream
//! timeouts are retried up to `llm.max_retries` times; rejected answers are
//! regenerated up to `scoring.max_retries` times with the scorer's
//! objections appended to the system instruction. When the budget runs out
//! the best-scoring attempt is returned with `low_confidence` set.
//!
//! Generated text is cut to `api.max_answer_length` before it is scored, so
//! the answer that is scored is the answer that is returned and recorded.
//!
//! Every turn except a rejected question is counted in [`PipelineMetrics`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use rag_support_core::answer::{parse_answer, StructuredAnswer};
use rag_support_core::generation::{Generator, SamplingParams};
use rag_support_core::models::{DimensionScores, Quality, RetrievalCandidate, ScoredAnswer};
use rag_support_core::prompt::{build_prompt, PromptTemplates};
use rag_support_core::retrieve::{Retrieval, Retriever};
use rag_support_core::scoring::{retry_instructions, AnswerScorer, ScoringInput};
use rag_support_core::text::truncate_chars;
use rag_support_core::RagError;

use crate::config::Config;
use crate::metrics::{component_report, ComponentReport, PipelineMetrics};
use crate::session::{SessionGuard, SessionManager};

/// Limits applied by the orchestrator, taken from `[api]`, `[conversation]`,
/// `[llm]` and `[scoring]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineLimits {
    pub min_question_length: usize,
    pub max_question_length: usize,
    pub max_answer_length: usize,
    pub max_sources: usize,
    pub max_contradictions: usize,
    pub prompt_history: usize,
    pub timeout_retries: u32,
    pub rejection_retries: u32,
}

impl PipelineLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_question_length: config.api.min_question_length,
            max_question_length: config.api.max_question_length,
            max_answer_length: config.api.max_answer_length,
            max_sources: config.api.max_sources,
            max_contradictions: config.api.max_contradictions,
            prompt_history: config.conversation.prompt_history,
            timeout_retries: config.llm.max_retries,
            rejection_retries: config.scoring.max_retries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub chunk_id: String,
    pub source_document: String,
    pub heading_path: Vec<String>,
    pub source_url: Option<String>,
    pub similarity: f64,
}

impl SourceRef {
    fn from_candidate(c: &RetrievalCandidate) -> Self {
        Self {
            chunk_id: c.chunk.id.clone(),
            source_document: c.chunk.source_document.clone(),
            heading_path: c.chunk.heading_path.clone(),
            source_url: c.chunk.source_url.clone(),
            similarity: c.similarity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Confidence {
    pub score: f64,
    pub level: Quality,
    pub accepted: bool,
    pub high_confidence: bool,
    /// Set whenever the returned answer was not accepted by the scorer.
    pub low_confidence: bool,
    /// Generations scored for this turn (0 for the cannot-answer reply).
    pub attempts: u32,
    pub details: DimensionScores,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseMetadata {
    pub question: String,
    pub timestamp: DateTime<Utc>,
    /// Messages in the session after this turn.
    pub history_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub answer: StructuredAnswer,
    pub sources: Vec<SourceRef>,
    pub contradictions: Vec<String>,
    pub confidence: Confidence,
    pub metadata: ResponseMetadata,
}

/// State carried between generation attempts of one turn.
#[derive(Debug, Default)]
struct AttemptState {
    /// Scored generations so far.
    scored: u32,
    timeouts: u32,
    rejections: u32,
    /// Instructions for the next generation, from the last rejection.
    amendments: Vec<String>,
    best: Option<ScoredAnswer>,
}

impl AttemptState {
    fn keep_best(&mut self, scored: ScoredAnswer) {
        let better = match &self.best {
            Some(best) => scored.aggregate_score > best.aggregate_score,
            None => true,
        };
        if better {
            self.best = Some(scored);
        }
    }
}

pub struct RagPipeline {
    limits: PipelineLimits,
    templates: PromptTemplates,
    sampling: SamplingParams,
    retriever: Arc<Retriever>,
    generator: Arc<dyn Generator>,
    scorer: Arc<dyn AnswerScorer>,
    sessions: Arc<SessionManager>,
    metrics: Arc<PipelineMetrics>,
}

impl RagPipeline {
    pub fn new(
        config: &Config,
        retriever: Arc<Retriever>,
        generator: Arc<dyn Generator>,
        scorer: Arc<dyn AnswerScorer>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        let metrics = Arc::new(PipelineMetrics::new(sessions.clock().clone()));
        Self {
            limits: PipelineLimits::from_config(config),
            templates: config.prompt_templates(),
            sampling: config.sampling_params(),
            retriever,
            generator,
            scorer,
            sessions,
            metrics,
        }
    }

    pub fn limits(&self) -> &PipelineLimits {
        &self.limits
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Check the vector store and the generator.
    pub async fn check_components(&self) -> ComponentReport {
        component_report(
            self.retriever.index().store().as_ref(),
            self.generator.as_ref(),
        )
        .await
    }

    pub fn create_session(&self) -> String {
        self.sessions.create()
    }

    pub async fn end_session(&self, session_id: &str) -> Result<(), RagError> {
        self.sessions.delete(session_id).await
    }

    /// Answer one question within a session.
    ///
    /// With `session_id = None` a new session is started; its id is in the
    /// response.
    pub async fn ask(&self, session_id: Option<&str>, question: &str) -> Result<ChatResponse, RagError> {
        let question = self.validate_question(question)?;
        let started = tokio::time::Instant::now();
        let result = self.run_turn(session_id, question).await;
        self.metrics.record_request(started.elapsed(), result.is_ok());
        result
    }

    async fn run_turn(&self, session_id: Option<&str>, question: String) -> Result<ChatResponse, RagError> {
        let mut session = self.sessions.acquire(session_id).await?;

        let retrieval = self.retrieve(&question).await?;
        let candidates = match retrieval {
            Retrieval::Context(candidates) => candidates,
            Retrieval::NoSufficientContext { best_similarity } => {
                tracing::info!(
                    session_id = session.id(),
                    best = ?best_similarity,
                    "no sufficient context; returning the cannot-answer reply"
                );
                return Ok(self.cannot_answer(&mut session, &question));
            }
        };

        let (scored, attempts) = self.answer(&session, &question, &candidates).await?;
        session.record_turn(&question, &scored.answer_text);

        let fallback_title = candidates
            .first()
            .and_then(|c| c.chunk.heading_path.first().cloned())
            .unwrap_or_else(|| "Answer".to_string());

        tracing::info!(
            session_id = session.id(),
            score = scored.aggregate_score,
            accepted = scored.accepted,
            attempts,
            sources = candidates.len(),
            "answered question"
        );

        Ok(ChatResponse {
            session_id: session.id().to_string(),
            answer: parse_answer(&scored.answer_text, &fallback_title),
            sources: candidates
                .iter()
                .take(self.limits.max_sources)
                .map(SourceRef::from_candidate)
                .collect(),
            contradictions: scored
                .contradictions
                .iter()
                .take(self.limits.max_contradictions)
                .map(|c| c.to_string())
                .collect(),
            confidence: Confidence {
                score: scored.aggregate_score,
                level: scored.quality,
                accepted: scored.accepted,
                high_confidence: scored.high_confidence,
                low_confidence: !scored.accepted,
                attempts,
                details: scored.dimension_scores.clone(),
            },
            metadata: ResponseMetadata {
                question,
                timestamp: self.sessions.clock().now(),
                history_length: session.history_len(),
            },
        })
    }

    fn validate_question(&self, question: &str) -> Result<String, RagError> {
        let trimmed = question.trim();
        let len = trimmed.chars().count();
        if len < self.limits.min_question_length {
            return Err(RagError::validation(format!(
                "question must be at least {} characters",
                self.limits.min_question_length
            )));
        }
        if len > self.limits.max_question_length {
            return Err(RagError::validation(format!(
                "question must be at most {} characters",
                self.limits.max_question_length
            )));
        }
        Ok(trimmed.to_string())
    }

    async fn retrieve(&self, question: &str) -> Result<Retrieval, RagError> {
        let mut timeouts = 0;
        loop {
            match self.retriever.retrieve(question).await {
                Err(e) if e.is_timeout() && timeouts < self.limits.timeout_retries => {
                    timeouts += 1;
                    tracing::warn!(error = %e, retry = timeouts, "retrieval timed out; retrying");
                }
                other => return other,
            }
        }
    }

    /// Generate and score until an answer is accepted or the budget is spent.
    async fn answer(
        &self,
        session: &SessionGuard,
        question: &str,
        candidates: &[RetrievalCandidate],
    ) -> Result<(ScoredAnswer, u32), RagError> {
        let prompt_history = session.recent(self.limits.prompt_history);
        let full_history = session.history();
        let mut state = AttemptState::default();

        loop {
            let request = build_prompt(
                &self.templates,
                &prompt_history,
                candidates,
                question,
                &state.amendments,
            );

            tracing::trace!(prompt = %request.render(), "generation prompt");

            let started = tokio::time::Instant::now();
            let text = match self.generator.generate(&request, &self.sampling).await {
                Ok(text) => {
                    self.metrics.record_generation(started.elapsed());
                    self.limit_answer(text)
                }
                Err(e) => {
                    let err = RagError::classify(e, RagError::GenerationUnavailable);
                    if err.is_timeout() && state.timeouts < self.limits.timeout_retries {
                        state.timeouts += 1;
                        tracing::warn!(error = %err, retry = state.timeouts, "generation timed out; retrying");
                        continue;
                    }
                    // An earlier attempt beats an error.
                    if let Some(best) = state.best.take() {
                        tracing::warn!(error = %err, "generation failed; returning best earlier attempt");
                        return Ok((best, state.scored));
                    }
                    return Err(err);
                }
            };

            let scored = self.scorer.score(&ScoringInput {
                question,
                answer: &text,
                candidates,
                history: &full_history,
            });
            state.scored += 1;
            tracing::debug!(
                attempt = state.scored,
                score = scored.aggregate_score,
                contradictions = scored.contradictions.len(),
                accepted = scored.accepted,
                "scored generation"
            );

            if scored.accepted {
                return Ok((scored, state.scored));
            }

            let amendments = retry_instructions(&scored);
            state.keep_best(scored);

            if state.rejections >= self.limits.rejection_retries {
                tracing::warn!(attempts = state.scored, "retry budget spent; returning best attempt with low confidence");
                break;
            }
            state.rejections += 1;
            state.amendments = amendments;
            tracing::warn!(retry = state.rejections, "answer rejected; regenerating");
        }

        match state.best {
            Some(best) => Ok((best, state.scored)),
            None => Err(RagError::GenerationUnavailable(
                "no answer was generated".to_string(),
            )),
        }
    }

    fn limit_answer(&self, text: String) -> String {
        let limited = truncate_chars(&text, self.limits.max_answer_length);
        if limited.len() == text.len() {
            return text;
        }
        tracing::warn!(
            chars = text.chars().count(),
            max = self.limits.max_answer_length,
            "answer cut to the maximum length"
        );
        limited.to_string()
    }

    fn cannot_answer(&self, session: &mut SessionGuard, question: &str) -> ChatResponse {
        let text = truncate_chars(self.templates.cannot_answer.trim(), self.limits.max_answer_length);
        session.record_turn(question, text);
        ChatResponse {
            session_id: session.id().to_string(),
            answer: StructuredAnswer::plain("Information not found", text),
            sources: Vec::new(),
            contradictions: Vec::new(),
            confidence: Confidence {
                score: 0.0,
                level: Quality::NoContext,
                accepted: false,
                high_confidence: false,
                low_confidence: true,
                attempts: 0,
                details: DimensionScores::new(),
            },
            metadata: ResponseMetadata {
                question: question.to_string(),
                timestamp: self.sessions.clock().now(),
                history_length: session.history_len(),
            },
        }
    }
}
