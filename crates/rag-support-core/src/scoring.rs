//! Answer scoring: six weighted dimensions, contradictions, and the
//! accept/reject decision.
//!
//! # Aggregate
//!
//! ```text
//! aggregate = clamp( Σ wᵢ·sᵢ / Σ wᵢ  −  penalty · n_contradictions , 0, 1 )
//! ```
//!
//! Weights need not sum to 1; they are normalised by their sum, which must be
//! positive. Each contradiction subtracts `contradiction_penalty` after
//! normalisation. An answer is accepted when `aggregate >=
//! min_acceptable_score` and no contradiction was found.
//!
//! # Contradictions
//!
//! An answer sentence and a reference sentence (from the retrieved context or
//! a previous assistant turn) are *about the same thing* when they share at
//! least two content terms covering half of the shorter sentence. Such a
//! pair conflicts when exactly one side is negated, or when both state
//! figures and no figure is common to both.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::answer::interface_elements;
use crate::error::RagError;
use crate::models::{
    Contradiction, ContradictionKind, ContradictionOrigin, Dimension, DimensionScores, Message,
    Quality, RetrievalCandidate, Role, ScoredAnswer,
};
use crate::text;

/// Covering this many key facts of the context counts as full coverage.
const FULL_COVERAGE_FACTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub similarity: f64,
    pub relevance: f64,
    pub coverage: f64,
    pub coherence: f64,
    pub completeness: f64,
    pub consistency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            similarity: 0.3,
            relevance: 0.2,
            coverage: 0.1,
            coherence: 0.2,
            completeness: 0.1,
            consistency: 0.1,
        }
    }
}

impl ScoreWeights {
    pub fn get(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Similarity => self.similarity,
            Dimension::Relevance => self.relevance,
            Dimension::Coverage => self.coverage,
            Dimension::Coherence => self.coherence,
            Dimension::Completeness => self.completeness,
            Dimension::Consistency => self.consistency,
        }
    }

    /// Normalisation basis of the weighted sum.
    pub fn total(&self) -> f64 {
        Dimension::ALL.iter().map(|d| self.get(*d)).sum()
    }
}

/// Scoring policy, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringParams {
    pub weights: ScoreWeights,
    pub min_acceptable_score: f64,
    pub excellent_score: f64,
    pub contradiction_penalty: f64,
    pub question_keywords_weight: f64,
    pub context_match_weight: f64,
    /// Answer length (chars) below which completeness drops.
    pub min_answer_length: usize,
    pub optimal_answer_length: usize,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            min_acceptable_score: 0.4,
            excellent_score: 0.8,
            contradiction_penalty: 0.3,
            question_keywords_weight: 0.6,
            context_match_weight: 0.4,
            min_answer_length: 50,
            optimal_answer_length: 200,
        }
    }
}

impl ScoringParams {
    pub fn validate(&self) -> Result<(), RagError> {
        for d in Dimension::ALL {
            let w = self.weights.get(d);
            if !(0.0..=1.0).contains(&w) {
                return Err(RagError::validation(format!(
                    "{} weight must be within [0, 1], got {}",
                    d, w
                )));
            }
        }
        if self.weights.total() <= 0.0 {
            return Err(RagError::validation("scoring weights must not all be zero"));
        }
        for (name, v) in [
            ("min_acceptable_score", self.min_acceptable_score),
            ("excellent_score", self.excellent_score),
            ("contradiction_penalty", self.contradiction_penalty),
            ("question_keywords_weight", self.question_keywords_weight),
            ("context_match_weight", self.context_match_weight),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(RagError::validation(format!(
                    "{} must be within [0, 1], got {}",
                    name, v
                )));
            }
        }
        if self.excellent_score < self.min_acceptable_score {
            return Err(RagError::validation(
                "excellent_score must be >= min_acceptable_score",
            ));
        }
        if self.optimal_answer_length < self.min_answer_length {
            return Err(RagError::validation(
                "optimal_answer_length must be >= min_answer_length",
            ));
        }
        Ok(())
    }
}

/// Everything a scorer may look at for one attempt.
#[derive(Debug, Clone, Copy)]
pub struct ScoringInput<'a> {
    pub question: &'a str,
    pub answer: &'a str,
    pub candidates: &'a [RetrievalCandidate],
    /// Session history before this turn.
    pub history: &'a [Message],
}

/// Judges one generated answer. Implementations must be deterministic.
pub trait AnswerScorer: Send + Sync {
    fn score(&self, input: &ScoringInput<'_>) -> ScoredAnswer;

    fn params(&self) -> &ScoringParams;
}

/// Weighted, normalised and penalised aggregate of the dimension scores.
///
/// Missing dimensions count as `0.0`; each score is clamped to `[0, 1]`
/// first. Returns `0.0` when the weights sum to zero.
pub fn aggregate(
    scores: &DimensionScores,
    weights: &ScoreWeights,
    contradictions: usize,
    penalty: f64,
) -> f64 {
    let total = weights.total();
    if total <= 0.0 {
        return 0.0;
    }
    let weighted: f64 = Dimension::ALL
        .iter()
        .map(|d| weights.get(*d) * scores.get(d).copied().unwrap_or(0.0).clamp(0.0, 1.0))
        .sum();
    (weighted / total - penalty * contradictions as f64).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub accepted: bool,
    pub high_confidence: bool,
    pub quality: Quality,
}

pub fn decide(aggregate: f64, contradictions: &[Contradiction], params: &ScoringParams) -> Decision {
    let accepted = aggregate >= params.min_acceptable_score && contradictions.is_empty();
    let quality = if !contradictions.is_empty() || aggregate < params.min_acceptable_score {
        Quality::NeedsImprovement
    } else if aggregate >= params.excellent_score {
        Quality::Excellent
    } else {
        Quality::Acceptable
    };
    Decision {
        accepted,
        high_confidence: aggregate >= params.excellent_score,
        quality,
    }
}

/// Assemble a [`ScoredAnswer`] from dimension scores and contradictions.
pub fn verdict(
    answer_text: &str,
    dimension_scores: DimensionScores,
    contradictions: Vec<Contradiction>,
    params: &ScoringParams,
) -> ScoredAnswer {
    let aggregate_score = aggregate(
        &dimension_scores,
        &params.weights,
        contradictions.len(),
        params.contradiction_penalty,
    );
    let decision = decide(aggregate_score, &contradictions, params);
    ScoredAnswer {
        answer_text: answer_text.to_string(),
        dimension_scores,
        contradictions,
        aggregate_score,
        accepted: decision.accepted,
        high_confidence: decision.high_confidence,
        quality: decision.quality,
    }
}

/// Extra instructions for regenerating a rejected answer.
pub fn retry_instructions(scored: &ScoredAnswer) -> Vec<String> {
    let mut out: Vec<String> = scored
        .contradictions
        .iter()
        .map(|c| match c.origin {
            ContradictionOrigin::Context => format!(
                "Do not state \"{}\"; the documentation says \"{}\".",
                c.answer_claim, c.conflicting_claim
            ),
            ContradictionOrigin::History => format!(
                "Do not reverse your earlier statement \"{}\" unless the documentation requires it.",
                c.conflicting_claim
            ),
        })
        .collect();

    let weakest = scored
        .dimension_scores
        .iter()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal));
    if let Some((dimension, _)) = weakest {
        let hint = match dimension {
            Dimension::Similarity => "Stay closer to the wording of the documentation excerpts.",
            Dimension::Relevance => "Answer the question that was asked, directly.",
            Dimension::Coverage => {
                "Include the relevant steps, values and interface labels from the excerpts."
            }
            Dimension::Coherence => "Write short, clear sentences without repeating yourself.",
            Dimension::Completeness => "Address every part of the question.",
            Dimension::Consistency => "Stay consistent with your previous answers.",
        };
        out.push(hint.to_string());
    }
    out
}

/// Deterministic lexical scorer.
#[derive(Debug, Clone, Default)]
pub struct HeuristicScorer {
    params: ScoringParams,
}

impl HeuristicScorer {
    pub fn new(params: ScoringParams) -> Self {
        Self { params }
    }
}

impl AnswerScorer for HeuristicScorer {
    fn params(&self) -> &ScoringParams {
        &self.params
    }

    fn score(&self, input: &ScoringInput<'_>) -> ScoredAnswer {
        let context: String = input
            .candidates
            .iter()
            .map(|c| c.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let answer_terms = text::terms(input.answer);
        let question_terms = text::terms(input.question);
        let context_terms = text::terms(&context);

        let context_claims: Vec<String> = input
            .candidates
            .iter()
            .flat_map(|c| text::sentences(&c.chunk.text))
            .collect();
        let history_claims: Vec<String> = input
            .history
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .flat_map(|m| text::sentences(&m.text))
            .collect();

        let mut contradictions =
            detect_contradictions(input.answer, &context_claims, ContradictionOrigin::Context);
        let from_history =
            detect_contradictions(input.answer, &history_claims, ContradictionOrigin::History);
        let consistency =
            (1.0 - self.params.contradiction_penalty * from_history.len() as f64).max(0.0);
        contradictions.extend(from_history);

        let mut scores = DimensionScores::new();
        scores.insert(
            Dimension::Similarity,
            similarity_score(&answer_terms, &context_terms, input.candidates),
        );
        scores.insert(
            Dimension::Relevance,
            self.relevance_score(&answer_terms, &question_terms, &context_terms, input.candidates),
        );
        scores.insert(
            Dimension::Coverage,
            coverage_score(input.answer, &answer_terms, &context, &context_terms, input.candidates),
        );
        scores.insert(Dimension::Coherence, coherence_score(input.answer));
        scores.insert(
            Dimension::Completeness,
            self.completeness_score(input.question, input.answer, &answer_terms),
        );
        scores.insert(Dimension::Consistency, consistency);

        let scored = verdict(input.answer, scores, contradictions, &self.params);
        tracing::debug!(
            aggregate = scored.aggregate_score,
            accepted = scored.accepted,
            contradictions = scored.contradictions.len(),
            "scored answer"
        );
        scored
    }
}

impl HeuristicScorer {
    fn relevance_score(
        &self,
        answer_terms: &BTreeSet<String>,
        question_terms: &BTreeSet<String>,
        context_terms: &BTreeSet<String>,
        candidates: &[RetrievalCandidate],
    ) -> f64 {
        let keyword = text::containment(question_terms, answer_terms);
        let heading_terms: BTreeSet<String> = candidates
            .iter()
            .flat_map(|c| c.chunk.heading_path.iter())
            .flat_map(|h| text::terms(h))
            .collect();
        let context_match = if heading_terms.is_empty() {
            text::containment(question_terms, context_terms)
        } else {
            text::containment(&heading_terms, answer_terms)
        };
        let kw = self.params.question_keywords_weight;
        let cm = self.params.context_match_weight;
        if kw + cm <= 0.0 {
            return 0.0;
        }
        ((kw * keyword + cm * context_match) / (kw + cm)).clamp(0.0, 1.0)
    }

    fn completeness_score(&self, question: &str, answer: &str, answer_terms: &BTreeSet<String>) -> f64 {
        let len = answer.trim().chars().count();
        let min = self.params.min_answer_length;
        let length = if len == 0 {
            0.0
        } else if len < min {
            0.3 + 0.4 * len as f64 / min as f64
        } else if len <= self.params.optimal_answer_length {
            1.0
        } else {
            0.8
        };

        let parts = question_parts(question);
        let addressed = parts
            .iter()
            .filter(|p| p.is_empty() || text::containment(p, answer_terms) >= 0.5)
            .count();
        let parts_score = if parts.is_empty() {
            1.0
        } else {
            addressed as f64 / parts.len() as f64
        };

        0.5 * length + 0.5 * parts_score
    }
}

/// Grounding of the answer in the context, blended with retrieval confidence.
fn similarity_score(
    answer_terms: &BTreeSet<String>,
    context_terms: &BTreeSet<String>,
    candidates: &[RetrievalCandidate],
) -> f64 {
    let lexical = text::containment(answer_terms, context_terms);
    let retrieval = candidates
        .iter()
        .map(|c| c.similarity)
        .fold(0.0f64, f64::max)
        .clamp(0.0, 1.0);
    0.5 * lexical + 0.5 * retrieval
}

/// Fraction of the context's key facts (headings, figures, interface labels)
/// that reappear in the answer.
fn coverage_score(
    answer: &str,
    answer_terms: &BTreeSet<String>,
    context: &str,
    context_terms: &BTreeSet<String>,
    candidates: &[RetrievalCandidate],
) -> f64 {
    let mut labels: BTreeSet<String> = candidates
        .iter()
        .flat_map(|c| c.chunk.heading_path.iter())
        .map(|h| h.to_lowercase())
        .collect();
    labels.extend(interface_elements(context).into_iter().map(|e| e.to_lowercase()));
    let figures = text::numbers(context);

    let facts = labels.len() + figures.len();
    if facts == 0 {
        let smaller = answer_terms.len().min(context_terms.len());
        if smaller == 0 {
            return 0.0;
        }
        return answer_terms.intersection(context_terms).count() as f64 / smaller as f64;
    }

    let answer_lower = answer.to_lowercase();
    let answer_figures = text::numbers(answer);
    let covered = labels.iter().filter(|l| answer_lower.contains(l.as_str())).count()
        + figures.iter().filter(|f| answer_figures.contains(*f)).count();
    (covered as f64 / facts.min(FULL_COVERAGE_FACTS) as f64).min(1.0)
}

/// Readability: sensible sentence lengths and no repeated sentences.
fn coherence_score(answer: &str) -> f64 {
    let sentences = text::sentences(answer);
    if sentences.is_empty() {
        return 0.0;
    }
    let word_counts: Vec<usize> = sentences.iter().map(|s| text::words(s).len()).collect();
    let avg = word_counts.iter().sum::<usize>() as f64 / word_counts.len() as f64;
    let length = if avg < 3.0 {
        avg / 3.0
    } else if avg > 40.0 {
        40.0 / avg
    } else {
        1.0
    };
    let distinct: BTreeSet<String> = sentences.iter().map(|s| s.to_lowercase()).collect();
    let variety = distinct.len() as f64 / sentences.len() as f64;
    0.5 * length + 0.5 * variety
}

/// Content terms of each part of a possibly multi-part question.
fn question_parts(question: &str) -> Vec<BTreeSet<String>> {
    let mut parts = Vec::new();
    for sentence in text::sentences(question) {
        let lower = sentence.to_lowercase();
        let pieces: Vec<&str> = lower.split(" and ").flat_map(|p| p.split(" et ")).collect();
        let piece_terms: Vec<BTreeSet<String>> = pieces.iter().map(|p| text::terms(p)).collect();
        if piece_terms.len() > 1 && piece_terms.iter().all(|t| t.len() >= 2) {
            parts.extend(piece_terms);
        } else {
            parts.push(text::terms(&sentence));
        }
    }
    parts
}

struct Claim {
    text: String,
    terms: BTreeSet<String>,
    negated: bool,
    figures: BTreeSet<String>,
}

impl Claim {
    fn new(sentence: &str) -> Self {
        Self {
            text: sentence.to_string(),
            terms: text::terms(sentence)
                .into_iter()
                .filter(|t| !text::is_negation(t))
                .collect(),
            negated: text::is_negated(sentence),
            figures: text::numbers(sentence),
        }
    }

    fn same_subject(&self, other: &Claim) -> bool {
        let shared = self.terms.intersection(&other.terms).count();
        let smaller = self.terms.len().min(other.terms.len());
        shared >= 2 && smaller > 0 && shared * 2 >= smaller
    }

    fn conflict(&self, other: &Claim) -> Option<ContradictionKind> {
        if !self.same_subject(other) {
            return None;
        }
        if self.negated != other.negated {
            return Some(ContradictionKind::Negation);
        }
        if !self.figures.is_empty()
            && !other.figures.is_empty()
            && self.figures.is_disjoint(&other.figures)
        {
            return Some(ContradictionKind::Numeric);
        }
        None
    }
}

/// Compare each answer sentence against `references`. At most one
/// contradiction is reported per answer sentence: the first reference it
/// conflicts with.
pub fn detect_contradictions(
    answer: &str,
    references: &[String],
    origin: ContradictionOrigin,
) -> Vec<Contradiction> {
    let references: Vec<Claim> = references.iter().map(|r| Claim::new(r)).collect();
    text::sentences(answer)
        .iter()
        .map(|s| Claim::new(s))
        .filter_map(|claim| {
            references.iter().find_map(|r| {
                claim.conflict(r).map(|kind| Contradiction {
                    kind,
                    origin,
                    answer_claim: claim.text.clone(),
                    conflicting_claim: r.text.clone(),
                })
            })
        })
        .collect()
}
