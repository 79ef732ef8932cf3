//! # RAG Support CLI (`rag-support`)
//!
//! ## Usage
//!
//! ```bash
//! rag-support --config ./config/rag-support.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag-support init` | Create the vector database and run schema migrations |
//! | `rag-support ingest` | Chunk, embed and index the Markdown corpus |
//! | `rag-support delete <source>` | Remove one document from the index |
//! | `rag-support chunk <file>` | Print how a Markdown file would be chunked |
//! | `rag-support ask [question]` | Ask once, or start an interactive session |
//! | `rag-support serve` | Start the HTTP chat API |
//!
//! ## Environment
//!
//! - `RUST_LOG` overrides `[logging].level`.
//! - `OPENAI_API_KEY` is required when `embedding.provider = "openai"`.
//! - `RAG_SUPPORT_API_KEY` overrides `[api].api_key`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rag_support::app::{self, Secrets};
use rag_support::config::{self, Config};
use rag_support::pipeline::{ChatResponse, RagPipeline};
use rag_support::{db, ingest, logging, migrate, server};

/// RAG Support: answers questions from Markdown documentation with a
/// retrieval-augmented language model.
#[derive(Parser)]
#[command(name = "rag-support", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When the default path does not exist, built-in defaults are used.
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the vector database schema. Idempotent.
    Init,

    /// Ingest the Markdown corpus into the index.
    ///
    /// Every matching file is chunked, embedded and stored; documents that
    /// disappeared from the root are removed.
    Ingest {
        /// Override `[ingest].root`.
        #[arg(long)]
        root: Option<PathBuf>,

        /// Show file and chunk counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Remove a document (by source id, its path relative to the root).
    Delete { source_id: String },

    /// Print the chunks a Markdown file would produce.
    Chunk { file: PathBuf },

    /// Ask a question. Without a question, reads questions from stdin in one
    /// session until EOF.
    Ask {
        question: Option<String>,

        /// Session id to use (a fresh one by default).
        #[arg(long)]
        session: Option<String>,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP chat API on `[server].bind`.
    Serve,
}

fn read_config(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new(config::DEFAULT_CONFIG_PATH) {
        return Ok(Config::default());
    }
    config::load_config(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = read_config(&cli.config)?;
    logging::init(&cfg.logging);

    if let Ok(key) = std::env::var("RAG_SUPPORT_API_KEY") {
        if !key.trim().is_empty() {
            config::validate_api_key(key.trim()).context("RAG_SUPPORT_API_KEY")?;
            cfg.api.api_key = Some(key.trim().to_string());
        }
    }
    let secrets = Secrets {
        openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
    };

    match cli.command {
        Commands::Init => {
            if cfg.vector_store.backend != "sqlite" {
                bail!("init only applies to the sqlite backend");
            }
            let pool = db::connect(&cfg.vector_store.path).await?;
            migrate::run_migrations(&pool).await?;
            println!("initialized {}", cfg.vector_store.path.display());
        }
        Commands::Ingest { root, dry_run } => {
            let root = root.unwrap_or_else(|| cfg.ingest.root.clone());
            let index = app::build_index(&cfg, &secrets).await?;
            let stats = ingest::run_ingest(
                &index,
                &app::processor(&cfg),
                &cfg.ingest,
                &root,
                dry_run,
            )
            .await?;

            if dry_run {
                println!("ingest {} (dry-run)", root.display());
                println!("  files found: {}", stats.files);
                println!("  estimated chunks: {}", stats.chunks);
                for (source, err) in &stats.failed {
                    println!("  unreadable: {} ({})", source, err);
                }
                return Ok(());
            }
            println!("ingest {}", root.display());
            println!("  files: {}", stats.files);
            println!("  chunks written: {}", stats.chunks);
            println!("  chunks removed: {}", stats.chunks_removed);
            println!("  documents removed: {}", stats.sources_removed);
            for (source, err) in &stats.failed {
                println!("  failed: {} ({})", source, err);
            }
            if !stats.failed.is_empty() {
                bail!("{} document(s) could not be indexed", stats.failed.len());
            }
            println!("ok");
        }
        Commands::Delete { source_id } => {
            let index = app::build_index(&cfg, &secrets).await?;
            let removed = index.delete(&source_id).await?;
            println!("removed {} chunk(s) of {}", removed, source_id);
        }
        Commands::Chunk { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let (body, url) = ingest::extract_source_url(&raw);
            let source_id = file.to_string_lossy().to_string();
            for chunk in app::processor(&cfg).process(&source_id, &body) {
                println!(
                    "#{} [{}..{}] {}",
                    chunk.sequence_index,
                    chunk.char_span.start,
                    chunk.char_span.end,
                    chunk.heading_label()
                );
                println!("{}\n", chunk.text);
            }
            if let Some(url) = url {
                println!("source url: {}", url);
            }
        }
        Commands::Ask {
            question,
            session,
            json,
        } => {
            let index = app::build_index(&cfg, &secrets).await?;
            let pipeline = app::build_pipeline(&cfg, index)?;
            match question {
                Some(q) => {
                    let response = pipeline.ask(session.as_deref(), &q).await?;
                    print_response(&response, json)?;
                }
                None => interactive(&pipeline, session, json).await?,
            }
        }
        Commands::Serve => {
            let index = app::build_index(&cfg, &secrets).await?;
            let pipeline = Arc::new(app::build_pipeline(&cfg, index)?);
            server::run_server(&cfg, pipeline).await?;
        }
    }

    Ok(())
}

async fn interactive(pipeline: &RagPipeline, session: Option<String>, json: bool) -> Result<()> {
    let mut session_id = session.unwrap_or_else(|| pipeline.create_session());
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        match pipeline.ask(Some(&session_id), question).await {
            Ok(response) => {
                session_id = response.session_id.clone();
                print_response(&response, json)?;
            }
            Err(e) => eprintln!("error: {}", e),
        }
    }
    Ok(())
}

fn print_response(response: &ChatResponse, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }

    println!("{}\n", response.answer.content);
    let c = &response.confidence;
    println!(
        "confidence: {:.2} ({:?}){}",
        c.score,
        c.level,
        if c.low_confidence { " [low confidence]" } else { "" }
    );
    for s in &response.sources {
        println!(
            "  source: {} > {} ({:.2})",
            s.source_document,
            s.heading_path.join(" > "),
            s.similarity
        );
    }
    for contradiction in &response.contradictions {
        println!("  contradiction: {}", contradiction);
    }
    println!();
    Ok(())
}
