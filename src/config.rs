//! Configuration parsing and validation.
//!
//! RAG Support is configured via a TOML file (default:
//! `config/rag-support.toml`). Every section is optional and falls back to
//! the defaults below; [`load_config`] parses the file once, validates it,
//! and the resulting [`Config`] is passed explicitly to each component.
//!
//! # Example Configuration
//!
//! ```toml
//! [chunking]
//! chunk_size = 512
//! chunk_overlap = 200
//!
//! [retrieval]
//! top_k = 4
//! fetch_k = 8
//! similarity_threshold = 0.7
//!
//! [llm]
//! url = "http://localhost:11434"
//! model = "llama3.1:latest"
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [vector_store]
//! backend = "sqlite"
//! path = "./data/rag-support.sqlite"
//! collection = "support_docs"
//! ```
//!
//! # Validation
//!
//! [`load_config`] rejects:
//! - `chunk_overlap >= chunk_size`, or a zero `chunk_size`
//! - `top_k` outside `1..=20`, `fetch_k` outside `1..=50` or below `top_k`
//! - thresholds and weights outside `[0, 1]`, or weights summing to zero
//! - `max_history` outside `1..=100`, `session_timeout_secs` outside
//!   `300..=86400`
//! - a fusion template without `{context}` and `{question}`
//! - an API key shorter than 32 characters or with characters outside
//!   `[A-Za-z0-9_-]`
//! - unknown provider, backend, distance or strategy names

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rag_support_core::chunk::{ChunkingParams, HeaderLevel, SplitMethod};
use rag_support_core::embedding::DistanceMetric;
use rag_support_core::generation::SamplingParams;
use rag_support_core::prompt::PromptTemplates;
use rag_support_core::retrieve::{RetrievalParams, RetrievalStrategy};
use rag_support_core::scoring::{ScoreWeights, ScoringParams};

use crate::session::SessionParams;

pub const DEFAULT_CONFIG_PATH: &str = "config/rag-support.toml";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub chunking: ChunkingConfig,
    pub markdown: MarkdownConfig,
    pub retrieval: RetrievalConfig,
    pub scoring: ScoringConfig,
    pub conversation: ConversationConfig,
    pub api: ApiConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub vector_store: VectorStoreConfig,
    pub ingest: IngestConfig,
    pub templates: TemplatesConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub split_method: SplitMethod,
    pub separators: Vec<String>,
    pub keep_separator: bool,
    pub strip_whitespace: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        let p = ChunkingParams::default();
        Self {
            chunk_size: p.chunk_size,
            chunk_overlap: p.chunk_overlap,
            split_method: p.split_method,
            separators: p.separators,
            keep_separator: p.keep_separator,
            strip_whitespace: p.strip_whitespace,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarkdownConfig {
    /// `[marker, name]` pairs, e.g. `["##", "h2"]`.
    pub headers: Vec<(String, String)>,
    pub strip_headers: bool,
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            headers: vec![
                ("#".to_string(), "h1".to_string()),
                ("##".to_string(), "h2".to_string()),
                ("###".to_string(), "h3".to_string()),
            ],
            strip_headers: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    /// `"similarity"` or `"mmr"`.
    pub strategy: String,
    pub top_k: usize,
    pub fetch_k: usize,
    pub similarity_threshold: f64,
    pub mmr_lambda: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            strategy: "similarity".to_string(),
            top_k: 3,
            fetch_k: 6,
            similarity_threshold: 0.5,
            mmr_lambda: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoreWeights,
    pub min_acceptable_score: f64,
    pub excellent_score: f64,
    pub contradiction_penalty: f64,
    pub question_keywords_weight: f64,
    pub context_match_weight: f64,
    pub min_answer_length: usize,
    pub optimal_answer_length: usize,
    /// Regenerations allowed after a rejected answer.
    pub max_retries: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let p = ScoringParams::default();
        Self {
            weights: p.weights,
            min_acceptable_score: p.min_acceptable_score,
            excellent_score: p.excellent_score,
            contradiction_penalty: p.contradiction_penalty,
            question_keywords_weight: p.question_keywords_weight,
            context_match_weight: p.context_match_weight,
            min_answer_length: p.min_answer_length,
            optimal_answer_length: p.optimal_answer_length,
            max_retries: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConversationConfig {
    /// Messages kept per session (a turn adds two).
    pub max_history: usize,
    pub session_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
    /// Most recent messages replayed into the prompt.
    pub prompt_history: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_history: 20,
            session_timeout_secs: 3600,
            cleanup_interval_secs: 300,
            prompt_history: 12,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub min_question_length: usize,
    pub max_question_length: usize,
    pub max_answer_length: usize,
    pub max_sources: usize,
    pub max_contradictions: usize,
    pub api_key_header: String,
    /// When unset, the chat API is open.
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            min_question_length: 3,
            max_question_length: 1000,
            max_answer_length: 8000,
            max_sources: 10,
            max_contradictions: 5,
            api_key_header: "X-API-Key".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub url: String,
    pub model: String,
    pub temperature: f32,
    pub num_ctx: u32,
    pub top_k: u32,
    pub top_p: f32,
    pub stop: Vec<String>,
    pub seed: Option<i64>,
    pub timeout_secs: u64,
    /// Retries after a generation or retrieval timeout.
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let s = SamplingParams::default();
        Self {
            url: "http://localhost:11434".to_string(),
            model: "llama3.1:latest".to_string(),
            temperature: s.temperature,
            num_ctx: s.num_ctx,
            top_k: s.top_k,
            top_p: s.top_p,
            stop: s.stop,
            seed: s.seed,
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `"ollama"`, `"openai"` or `"disabled"`.
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    pub url: Option<String>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: None,
            url: None,
            batch_size: 32,
            max_retries: 3,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VectorStoreConfig {
    /// `"sqlite"` or `"memory"`.
    pub backend: String,
    pub path: PathBuf,
    pub collection: String,
    pub distance: DistanceMetric,
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            path: PathBuf::from("./data/rag-support.sqlite"),
            collection: "support_docs".to_string(),
            distance: DistanceMetric::Cosine,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    pub root: PathBuf,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub follow_symlinks: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/raw"),
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TemplatesConfig {
    pub system: Option<String>,
    pub fusion: Option<String>,
    pub cannot_answer: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn chunking_params(&self) -> ChunkingParams {
        ChunkingParams {
            chunk_size: self.chunking.chunk_size,
            chunk_overlap: self.chunking.chunk_overlap,
            split_method: self.chunking.split_method,
            separators: self.chunking.separators.clone(),
            keep_separator: self.chunking.keep_separator,
            strip_whitespace: self.chunking.strip_whitespace,
            headers: self
                .markdown
                .headers
                .iter()
                .map(|(marker, name)| HeaderLevel::new(marker, name))
                .collect(),
            strip_headers: self.markdown.strip_headers,
        }
    }

    pub fn retrieval_params(&self) -> Result<RetrievalParams> {
        let strategy = match self.retrieval.strategy.as_str() {
            "similarity" => RetrievalStrategy::Similarity,
            "mmr" => RetrievalStrategy::Mmr {
                lambda: self.retrieval.mmr_lambda,
            },
            other => bail!(
                "Unknown retrieval strategy: '{}'. Must be similarity or mmr.",
                other
            ),
        };
        Ok(RetrievalParams {
            fetch_k: self.retrieval.fetch_k,
            top_k: self.retrieval.top_k,
            threshold: self.retrieval.similarity_threshold,
            strategy,
        })
    }

    pub fn scoring_params(&self) -> ScoringParams {
        ScoringParams {
            weights: self.scoring.weights.clone(),
            min_acceptable_score: self.scoring.min_acceptable_score,
            excellent_score: self.scoring.excellent_score,
            contradiction_penalty: self.scoring.contradiction_penalty,
            question_keywords_weight: self.scoring.question_keywords_weight,
            context_match_weight: self.scoring.context_match_weight,
            min_answer_length: self.scoring.min_answer_length,
            optimal_answer_length: self.scoring.optimal_answer_length,
        }
    }

    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.llm.temperature,
            num_ctx: self.llm.num_ctx,
            top_k: self.llm.top_k,
            top_p: self.llm.top_p,
            stop: self.llm.stop.clone(),
            seed: self.llm.seed,
        }
    }

    pub fn prompt_templates(&self) -> PromptTemplates {
        let defaults = PromptTemplates::default();
        PromptTemplates {
            system: self.templates.system.clone().unwrap_or(defaults.system),
            fusion: self.templates.fusion.clone().unwrap_or(defaults.fusion),
            cannot_answer: self
                .templates
                .cannot_answer
                .clone()
                .unwrap_or(defaults.cannot_answer),
        }
    }

    pub fn session_params(&self) -> SessionParams {
        SessionParams {
            max_history: self.conversation.max_history,
            timeout: Duration::from_secs(self.conversation.session_timeout_secs),
        }
    }

    /// Run every check [`load_config`] applies.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
        }
        if self.chunking.separators.is_empty() {
            bail!("chunking.separators must not be empty");
        }
        if self.markdown.headers.iter().any(|(m, _)| m.is_empty()) {
            bail!("markdown.headers markers must not be empty");
        }

        if !(1..=20).contains(&self.retrieval.top_k) {
            bail!("retrieval.top_k must be in [1, 20]");
        }
        if !(1..=50).contains(&self.retrieval.fetch_k) {
            bail!("retrieval.fetch_k must be in [1, 50]");
        }
        self.retrieval_params()?.validate()?;
        self.scoring_params().validate()?;

        if !(1..=100).contains(&self.conversation.max_history) {
            bail!("conversation.max_history must be in [1, 100]");
        }
        if !(300..=86_400).contains(&self.conversation.session_timeout_secs) {
            bail!("conversation.session_timeout_secs must be in [300, 86400]");
        }
        if self.conversation.cleanup_interval_secs == 0 {
            bail!("conversation.cleanup_interval_secs must be > 0");
        }

        if self.api.min_question_length == 0
            || self.api.min_question_length > self.api.max_question_length
        {
            bail!("api.min_question_length must be in [1, api.max_question_length]");
        }
        if self.api.max_answer_length == 0 {
            bail!("api.max_answer_length must be > 0");
        }
        if self.api.api_key_header.trim().is_empty() {
            bail!("api.api_key_header must not be empty");
        }
        if let Some(key) = &self.api.api_key {
            validate_api_key(key)?;
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            bail!("llm.temperature must be in [0.0, 2.0]");
        }
        if !(512..=32_768).contains(&self.llm.num_ctx) {
            bail!("llm.num_ctx must be in [512, 32768]");
        }
        if !(0.0..=1.0).contains(&self.llm.top_p) {
            bail!("llm.top_p must be in [0.0, 1.0]");
        }
        if self.llm.timeout_secs == 0 {
            bail!("llm.timeout_secs must be > 0");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "ollama" | "openai" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, ollama, or openai.",
                other
            ),
        }
        if self.embedding.is_enabled() && self.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                self.embedding.provider
            );
        }
        if self.embedding.provider == "openai" && matches!(self.embedding.dims, None | Some(0)) {
            bail!("embedding.dims must be > 0 when provider is 'openai'");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }

        match self.vector_store.backend.as_str() {
            "sqlite" | "memory" => {}
            other => bail!(
                "Unknown vector store backend: '{}'. Must be sqlite or memory.",
                other
            ),
        }
        if self.vector_store.collection.is_empty()
            || !self
                .vector_store
                .collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            bail!("vector_store.collection must be non-empty [A-Za-z0-9_-]");
        }

        let missing = self.prompt_templates().missing_placeholders();
        if !missing.is_empty() {
            bail!("templates.fusion must contain {}", missing.join(" and "));
        }
        if self.prompt_templates().system.trim().is_empty() {
            bail!("templates.system must not be empty");
        }

        Ok(())
    }
}

pub fn validate_api_key(key: &str) -> Result<()> {
    if key.len() < 32 {
        bail!("api.api_key must be at least 32 characters long");
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        bail!("api.api_key may only contain [A-Za-z0-9_-]");
    }
    Ok(())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.conversation.session_timeout_secs, 3600);
        assert_eq!(config.vector_store.distance, DistanceMetric::Cosine);
        assert_eq!(config.chunking_params(), ChunkingParams::default());
        assert_eq!(config.scoring_params(), ScoringParams::default());
        assert_eq!(config.sampling_params(), SamplingParams::default());
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = parse_config(
            r###"
            [chunking]
            chunk_size = 512
            chunk_overlap = 200
            split_method = "fixed"

            [markdown]
            headers = [["#", "title"], ["##", "section"]]

            [retrieval]
            strategy = "mmr"
            top_k = 4
            fetch_k = 8
            similarity_threshold = 0.7
            mmr_lambda = 0.3

            [scoring.weights]
            similarity = 0.5

            [vector_store]
            backend = "memory"
            distance = "euclidean"
            "###,
        )
        .unwrap();

        let chunking = config.chunking_params();
        assert_eq!(chunking.chunk_size, 512);
        assert_eq!(chunking.split_method, SplitMethod::Fixed);
        assert_eq!(chunking.headers[1], HeaderLevel::new("##", "section"));

        let retrieval = config.retrieval_params().unwrap();
        assert_eq!(retrieval.fetch_k, 8);
        assert_eq!(retrieval.strategy, RetrievalStrategy::Mmr { lambda: 0.3 });

        assert_eq!(config.scoring.weights.similarity, 0.5);
        assert_eq!(config.scoring.weights.relevance, 0.2);
        assert_eq!(config.vector_store.distance, DistanceMetric::Euclidean);
    }

    #[test]
    fn test_rejects_overlap_not_below_size() {
        let err = parse_config("[chunking]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_rejects_fetch_k_below_top_k() {
        assert!(parse_config("[retrieval]\ntop_k = 5\nfetch_k = 4\n").is_err());
    }

    #[test]
    fn test_rejects_session_timeout_out_of_range() {
        assert!(parse_config("[conversation]\nsession_timeout_secs = 60\n").is_err());
    }

    #[test]
    fn test_rejects_fusion_template_without_placeholders() {
        let err = parse_config("[templates]\nfusion = \"Q: {question}\"\n").unwrap_err();
        assert!(err.to_string().contains("{context}"));
    }

    #[test]
    fn test_api_key_rules() {
        assert!(validate_api_key("short").is_err());
        assert!(validate_api_key(&"a".repeat(31)).is_err());
        assert!(validate_api_key(&format!("{}!", "a".repeat(32))).is_err());
        assert!(validate_api_key("abcdefghij_ABCDEFGHIJ-0123456789").is_ok());
    }

    #[test]
    fn test_rejects_unknown_names() {
        assert!(parse_config("[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse_config("[vector_store]\nbackend = \"chroma\"\n").is_err());
        assert!(parse_config("[retrieval]\nstrategy = \"bm25\"\n").is_err());
        assert!(parse_config("[vector_store]\ndistance = \"hamming\"\n").is_err());
    }
}
