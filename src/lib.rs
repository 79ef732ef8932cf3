//! # RAG Support
//!
//! A retrieval-augmented support assistant over a corpus of Markdown
//! documentation.
//!
//! Markdown files are chunked along their heading structure, embedded and
//! stored in a vector store. At query time the pipeline retrieves the
//! closest chunks, fuses them with the conversation history into a prompt,
//! asks the language model for an answer, scores it, and regenerates a
//! bounded number of times when the answer is rejected.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Markdown   │──▶│ Chunk+Embed │──▶│ Vector store │
//! │ files      │   │             │   │ SQLite/memory│
//! └────────────┘   └─────────────┘   └──────┬───────┘
//!                                           │
//!                    ┌──────────────────────┤
//!                    ▼                      ▼
//!              ┌──────────┐          ┌────────────┐
//!              │   CLI    │          │  Chat API  │
//!              │  (ask)   │          │   (HTTP)   │
//!              └──────────┘          └────────────┘
//! ```
//!
//! The algorithmic pieces (chunking, retrieval, prompt fusion, scoring) live
//! in the runtime-agnostic `rag-support-core` crate; this crate adds
//! configuration, providers, persistence, sessions and the front ends.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | Tracing subscriber setup |
//! | [`embedding`] | Ollama / OpenAI embedding providers |
//! | [`llm`] | Ollama chat generator |
//! | [`deadline`] | Timeout decorators for external calls |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`session`] | Conversation sessions |
//! | [`pipeline`] | The RAG orchestrator |
//! | [`metrics`] | Request metrics and component health |
//! | [`ingest`] | Filesystem ingestion |
//! | [`server`] | HTTP chat API |
//! | [`app`] | Component wiring |

pub mod app;
pub mod config;
pub mod db;
pub mod deadline;
pub mod embedding;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod metrics;
pub mod migrate;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod sqlite_store;
