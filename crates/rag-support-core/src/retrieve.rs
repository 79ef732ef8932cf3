//! Retriever: fetch a superset, filter by confidence, truncate.
//!
//! The retriever operates entirely through [`CorpusIndex`]; it never talks to
//! an embedding model or a store directly. The selection step is a pure
//! function, [`select_candidates`], so the ordering rules are testable
//! without any I/O.
//!
//! # Selection Algorithm
//!
//! 1. Query the index for `fetch_k` nearest chunks.
//! 2. Sort by similarity (desc), sequence index (asc), source, id.
//! 3. Drop every candidate below `threshold`.
//! 4. If nothing survives, report [`Retrieval::NoSufficientContext`].
//! 5. Otherwise keep `top_k`, either by rank (similarity) or by maximal
//!    marginal relevance (mmr).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embedding::cosine_similarity;
use crate::error::RagError;
use crate::index::CorpusIndex;
use crate::models::RetrievalCandidate;
use crate::store::{sort_matches, VectorMatch};

/// How the final `top_k` are picked from the candidates that passed the
/// threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum RetrievalStrategy {
    /// Highest similarity first.
    Similarity,
    /// Maximal marginal relevance: `λ·relevance − (1−λ)·redundancy`.
    Mmr { lambda: f64 },
}

impl RetrievalStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStrategy::Similarity => "similarity",
            RetrievalStrategy::Mmr { .. } => "mmr",
        }
    }
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    /// Number of nearest chunks requested from the index.
    pub fetch_k: usize,
    /// Maximum chunks passed on to prompt fusion.
    pub top_k: usize,
    /// Minimum similarity a chunk needs to be used as context.
    pub threshold: f64,
    pub strategy: RetrievalStrategy,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            fetch_k: 6,
            top_k: 3,
            threshold: 0.5,
            strategy: RetrievalStrategy::Similarity,
        }
    }
}

impl RetrievalParams {
    pub fn validate(&self) -> Result<(), RagError> {
        if self.top_k == 0 {
            return Err(RagError::validation("retrieval top_k must be at least 1"));
        }
        if self.fetch_k < self.top_k {
            return Err(RagError::validation(format!(
                "retrieval fetch_k ({}) must be >= top_k ({})",
                self.fetch_k, self.top_k
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(RagError::validation(format!(
                "similarity threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        if let RetrievalStrategy::Mmr { lambda } = self.strategy {
            if !(0.0..=1.0).contains(&lambda) {
                return Err(RagError::validation(format!(
                    "mmr lambda must be within [0, 1], got {}",
                    lambda
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of a retrieval.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    /// At least one chunk passed the threshold. Never empty.
    Context(Vec<RetrievalCandidate>),
    /// No chunk met the threshold. Carries the best similarity seen, if the
    /// index returned anything at all.
    NoSufficientContext { best_similarity: Option<f64> },
}

impl Retrieval {
    pub fn candidates(&self) -> &[RetrievalCandidate] {
        match self {
            Retrieval::Context(c) => c,
            Retrieval::NoSufficientContext { .. } => &[],
        }
    }

    pub fn is_sufficient(&self) -> bool {
        matches!(self, Retrieval::Context(_))
    }
}

/// Apply the fetch, threshold and truncate steps to raw index matches.
pub fn select_candidates(mut matches: Vec<VectorMatch>, params: &RetrievalParams) -> Retrieval {
    sort_matches(&mut matches);
    matches.truncate(params.fetch_k);

    let best_similarity = matches.first().map(|m| m.similarity);
    matches.retain(|m| m.similarity >= params.threshold);
    if matches.is_empty() {
        return Retrieval::NoSufficientContext { best_similarity };
    }

    let selected = match params.strategy {
        RetrievalStrategy::Similarity => {
            matches.truncate(params.top_k);
            matches
        }
        RetrievalStrategy::Mmr { lambda } => mmr(matches, params.top_k, lambda),
    };

    Retrieval::Context(
        selected
            .into_iter()
            .map(|m| RetrievalCandidate {
                chunk: m.chunk,
                similarity: m.similarity,
            })
            .collect(),
    )
}

/// Greedy maximal-marginal-relevance selection over matches already sorted
/// by similarity. Ties keep the earlier (better ranked) match.
fn mmr(pool: Vec<VectorMatch>, k: usize, lambda: f64) -> Vec<VectorMatch> {
    let mut remaining: Vec<Option<VectorMatch>> = pool.into_iter().map(Some).collect();
    let mut selected: Vec<VectorMatch> = Vec::with_capacity(k);

    while selected.len() < k {
        let mut best: Option<(usize, f64)> = None;
        for (i, slot) in remaining.iter().enumerate() {
            let Some(candidate) = slot else { continue };
            let redundancy = selected
                .iter()
                .map(|s| cosine_similarity(&candidate.embedding, &s.embedding) as f64)
                .fold(0.0f64, f64::max);
            let score = lambda * candidate.similarity - (1.0 - lambda) * redundancy;
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((i, score));
            }
        }
        match best.and_then(|(i, _)| remaining[i].take()) {
            Some(m) => selected.push(m),
            None => break,
        }
    }

    selected
}

pub struct Retriever {
    index: Arc<CorpusIndex>,
    params: RetrievalParams,
}

impl Retriever {
    pub fn new(index: Arc<CorpusIndex>, params: RetrievalParams) -> Self {
        Self { index, params }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    pub fn index(&self) -> &Arc<CorpusIndex> {
        &self.index
    }

    /// Embed the question and select its context chunks.
    pub async fn retrieve(&self, question: &str) -> Result<Retrieval, RagError> {
        let embedding = self.index.embed_query(question).await?;
        let matches = self.index.query(&embedding, self.params.fetch_k).await?;
        let fetched = matches.len();
        let retrieval = select_candidates(matches, &self.params);

        match &retrieval {
            Retrieval::Context(c) => tracing::debug!(
                fetched,
                selected = c.len(),
                top = c[0].similarity,
                strategy = self.params.strategy.as_str(),
                "retrieved context"
            ),
            Retrieval::NoSufficientContext { best_similarity } => tracing::info!(
                fetched,
                best = ?best_similarity,
                threshold = self.params.threshold,
                "no chunk met the similarity threshold"
            ),
        }
        Ok(retrieval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CharSpan, Chunk};

    fn make_match(source: &str, seq: usize, similarity: f64, embedding: Vec<f32>) -> VectorMatch {
        VectorMatch {
            chunk: Chunk::new(source, seq, "text", Vec::new(), CharSpan::new(0, 4)),
            similarity,
            embedding,
        }
    }

    fn params(fetch_k: usize, top_k: usize, threshold: f64) -> RetrievalParams {
        RetrievalParams {
            fetch_k,
            top_k,
            threshold,
            strategy: RetrievalStrategy::Similarity,
        }
    }

    fn similarities(r: &Retrieval) -> Vec<f64> {
        r.candidates().iter().map(|c| c.similarity).collect()
    }

    #[test]
    fn test_fetch_filter_truncate() {
        let scores = [0.9, 0.82, 0.75, 0.71, 0.68, 0.6, 0.5, 0.4];
        // Shuffled on purpose: the store order must not matter.
        let order = [5, 0, 7, 2, 1, 6, 3, 4];
        let matches = order
            .iter()
            .map(|&i| make_match("doc.md", i, scores[i], vec![1.0]))
            .collect();

        let r = select_candidates(matches, &params(8, 4, 0.7));
        assert_eq!(similarities(&r), vec![0.9, 0.82, 0.75, 0.71]);
    }

    #[test]
    fn test_threshold_leaves_fewer_than_top_k() {
        let matches = vec![
            make_match("a.md", 0, 0.72, vec![1.0]),
            make_match("a.md", 1, 0.65, vec![1.0]),
        ];
        let r = select_candidates(matches, &params(8, 4, 0.7));
        assert_eq!(similarities(&r), vec![0.72]);
    }

    #[test]
    fn test_nothing_above_threshold() {
        let matches = vec![
            make_match("a.md", 0, 0.69, vec![1.0]),
            make_match("a.md", 1, 0.2, vec![1.0]),
        ];
        let r = select_candidates(matches, &params(8, 4, 0.7));
        assert_eq!(
            r,
            Retrieval::NoSufficientContext {
                best_similarity: Some(0.69)
            }
        );
        assert!(!r.is_sufficient());
        assert!(r.candidates().is_empty());
    }

    #[test]
    fn test_empty_index() {
        let r = select_candidates(Vec::new(), &params(8, 4, 0.0));
        assert_eq!(r, Retrieval::NoSufficientContext { best_similarity: None });
    }

    #[test]
    fn test_ties_break_on_sequence_index() {
        let matches = vec![
            make_match("a.md", 7, 0.8, vec![1.0]),
            make_match("a.md", 2, 0.8, vec![1.0]),
            make_match("a.md", 4, 0.8, vec![1.0]),
        ];
        let r = select_candidates(matches, &params(8, 2, 0.5));
        let seqs: Vec<usize> = r.candidates().iter().map(|c| c.chunk.sequence_index).collect();
        assert_eq!(seqs, vec![2, 4]);
    }

    #[test]
    fn test_fetch_k_caps_before_threshold() {
        let matches = (0..5)
            .map(|i| make_match("a.md", i, 0.9 - i as f64 * 0.01, vec![1.0]))
            .collect();
        let r = select_candidates(matches, &params(2, 4, 0.5));
        assert_eq!(r.candidates().len(), 2);
    }

    #[test]
    fn test_mmr_prefers_diverse_chunks() {
        let matches = vec![
            make_match("a.md", 0, 0.90, vec![1.0, 0.0]),
            make_match("a.md", 1, 0.89, vec![1.0, 0.0]),
            make_match("b.md", 0, 0.80, vec![0.0, 1.0]),
        ];
        let p = RetrievalParams {
            strategy: RetrievalStrategy::Mmr { lambda: 0.5 },
            ..params(8, 2, 0.5)
        };
        let r = select_candidates(matches, &p);
        let sources: Vec<&str> = r
            .candidates()
            .iter()
            .map(|c| c.chunk.source_document.as_str())
            .collect();
        assert_eq!(sources, vec!["a.md", "b.md"]);
    }

    #[test]
    fn test_mmr_lambda_one_is_plain_ranking() {
        let matches = vec![
            make_match("a.md", 0, 0.90, vec![1.0, 0.0]),
            make_match("a.md", 1, 0.89, vec![1.0, 0.0]),
            make_match("b.md", 0, 0.80, vec![0.0, 1.0]),
        ];
        let p = RetrievalParams {
            strategy: RetrievalStrategy::Mmr { lambda: 1.0 },
            ..params(8, 2, 0.5)
        };
        assert_eq!(similarities(&select_candidates(matches, &p)), vec![0.90, 0.89]);
    }

    #[test]
    fn test_validate() {
        assert!(params(8, 4, 0.7).validate().is_ok());
        assert!(params(2, 4, 0.7).validate().is_err());
        assert!(params(8, 0, 0.7).validate().is_err());
        assert!(params(8, 4, 1.5).validate().is_err());
        let bad_mmr = RetrievalParams {
            strategy: RetrievalStrategy::Mmr { lambda: -0.1 },
            ..params(8, 4, 0.7)
        };
        assert!(bad_mmr.validate().is_err());
    }
}
