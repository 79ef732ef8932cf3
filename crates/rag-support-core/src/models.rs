//! Core data models that flow through the ingestion and query pipelines.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Byte range of a chunk inside its source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharSpan {
    pub start: usize,
    pub end: usize,
}

impl CharSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// A bounded span of source text plus its positional and heading metadata.
///
/// Chunks are immutable once created. The `id` is derived from the source
/// identifier and the sequence index so that re-ingesting a document upserts
/// the same rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub source_document: String,
    /// Active heading titles, outermost first.
    pub heading_path: Vec<String>,
    pub sequence_index: usize,
    pub char_span: CharSpan,
    pub source_url: Option<String>,
    /// SHA-256 of `text`.
    pub content_hash: String,
}

impl Chunk {
    pub fn new(
        source_document: &str,
        sequence_index: usize,
        text: &str,
        heading_path: Vec<String>,
        char_span: CharSpan,
    ) -> Self {
        Self {
            id: chunk_id(source_document, sequence_index),
            text: text.to_string(),
            source_document: source_document.to_string(),
            heading_path,
            sequence_index,
            char_span,
            source_url: None,
            content_hash: content_hash(text),
        }
    }

    /// Heading path rendered as `"Title > Section > Subsection"`.
    pub fn heading_label(&self) -> String {
        self.heading_path.join(" > ")
    }
}

/// Stable chunk identifier: first 32 hex chars of `sha256(source ␟ index)`.
pub fn chunk_id(source_document: &str, sequence_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_document.as_bytes());
    hasher.update([0x1f]);
    hasher.update(sequence_index.to_string().as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A chunk matched by the retriever for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalCandidate {
    pub chunk: Chunk,
    pub similarity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One entry of a conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            role,
            text: text.into(),
            at,
        }
    }
}

/// A named scoring dimension, each scored in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Similarity,
    Relevance,
    Coverage,
    Coherence,
    Completeness,
    Consistency,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::Similarity,
        Dimension::Relevance,
        Dimension::Coverage,
        Dimension::Coherence,
        Dimension::Completeness,
        Dimension::Consistency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Similarity => "similarity",
            Dimension::Relevance => "relevance",
            Dimension::Coverage => "coverage",
            Dimension::Coherence => "coherence",
            Dimension::Completeness => "completeness",
            Dimension::Consistency => "consistency",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type DimensionScores = BTreeMap<Dimension, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionKind {
    /// One claim negates the other.
    Negation,
    /// Both claims talk about the same thing with different figures.
    Numeric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionOrigin {
    Context,
    History,
}

/// A pair of claims that assert incompatible facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    pub kind: ContradictionKind,
    pub origin: ContradictionOrigin,
    pub answer_claim: String,
    pub conflicting_claim: String,
}

impl fmt::Display for Contradiction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            ContradictionKind::Negation => "negation",
            ContradictionKind::Numeric => "numeric mismatch",
        };
        let against = match self.origin {
            ContradictionOrigin::Context => "documentation",
            ContradictionOrigin::History => "earlier answer",
        };
        write!(
            f,
            "{} with {}: \"{}\" vs \"{}\"",
            what, against, self.answer_claim, self.conflicting_claim
        )
    }
}

/// Qualitative band of an aggregate score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Excellent,
    Acceptable,
    NeedsImprovement,
    /// Fixed "cannot answer" response; nothing was generated.
    NoContext,
}

/// Scorer verdict for a single generation attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredAnswer {
    pub answer_text: String,
    pub dimension_scores: DimensionScores,
    pub contradictions: Vec<Contradiction>,
    pub aggregate_score: f64,
    pub accepted: bool,
    pub high_confidence: bool,
    pub quality: Quality,
}
