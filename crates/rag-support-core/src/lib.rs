//! # RAG Support Core
//!
//! Runtime-agnostic logic for RAG Support: data models, Markdown chunking,
//! capability traits for the embedding model, vector store and generation
//! model, the corpus index, retriever, prompt fusion and answer scoring.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Timeouts, HTTP providers and persistence live
//! in the `rag-support` app crate.
//!
//! ## Query-time flow
//!
//! ```text
//! question ─▶ Retriever ─▶ build_prompt ─▶ Generator ─▶ AnswerScorer
//!               │                                        │
//!               ▼                                        ▼
//!          CorpusIndex ─▶ VectorStore            accept / retry
//! ```

pub mod answer;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod models;
pub mod prompt;
pub mod retrieve;
pub mod scoring;
pub mod store;
pub mod text;

pub use error::RagError;
