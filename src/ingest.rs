//! Filesystem ingestion: Markdown files under a root → corpus index.
//!
//! Files are matched with include/exclude globs relative to the root and
//! identified by their relative path (forward slashes), which is the stable
//! source id chunk ids derive from. Each document is indexed all-or-nothing;
//! a failure is reported for that document and the run continues.
//! Documents that disappeared from the root are removed from the index.
//!
//! A file that is present but cannot be read (bad UTF-8, permissions) counts
//! as a failed document: it is reported and its last indexed version stays.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use rag_support_core::chunk::MarkdownProcessor;
use rag_support_core::index::CorpusIndex;
use rag_support_core::models::Chunk;

use crate::config::IngestConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct MarkdownFile {
    pub source_id: String,
    pub path: PathBuf,
    pub body: String,
    pub source_url: Option<String>,
}

/// Result of walking the ingest root.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MarkdownScan {
    pub files: Vec<MarkdownFile>,
    /// `(source_id, error)` for matching files that could not be read.
    pub unreadable: Vec<(String, String)>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestStats {
    pub files: usize,
    pub chunks: usize,
    pub chunks_removed: usize,
    pub sources_removed: usize,
    /// `(source_id, error)` for documents that could not be indexed.
    pub failed: Vec<(String, String)>,
}

/// Split off a trailing `<http…>` line, the documents' source link.
pub fn extract_source_url(text: &str) -> (String, Option<String>) {
    let trimmed = text.trim_end();
    let (head, last) = match trimmed.rfind('\n') {
        Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
        None => ("", trimmed),
    };
    let last = last.trim();
    if last.starts_with("<http") && last.ends_with('>') && !last.contains(char::is_whitespace) {
        let url = last[1..last.len() - 1].to_string();
        (head.trim_end().to_string(), Some(url))
    } else {
        (text.to_string(), None)
    }
}

pub fn scan_markdown(config: &IngestConfig, root: &Path) -> Result<MarkdownScan> {
    if !root.exists() {
        bail!("Ingest root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut excludes = vec!["**/.git/**".to_string(), "**/node_modules/**".to_string()];
    excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let mut scan = MarkdownScan::default();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable file");
                scan.unreadable.push((rel_str, e.to_string()));
                continue;
            }
        };
        let (body, source_url) = extract_source_url(&raw);
        scan.files.push(MarkdownFile {
            source_id: rel_str,
            path: path.to_path_buf(),
            body,
            source_url,
        });
    }

    scan.files.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    scan.unreadable.sort();
    Ok(scan)
}

/// Chunk a scanned file, attaching its source link to every chunk.
pub fn chunk_file(processor: &MarkdownProcessor, file: &MarkdownFile) -> Vec<Chunk> {
    let mut chunks = processor.process(&file.source_id, &file.body);
    for chunk in &mut chunks {
        chunk.source_url = file.source_url.clone();
    }
    chunks
}

pub async fn run_ingest(
    index: &CorpusIndex,
    processor: &MarkdownProcessor,
    config: &IngestConfig,
    root: &Path,
    dry_run: bool,
) -> Result<IngestStats> {
    let MarkdownScan { files, unreadable } = scan_markdown(config, root)?;
    let mut stats = IngestStats {
        files: files.len() + unreadable.len(),
        failed: unreadable.clone(),
        ..IngestStats::default()
    };

    if dry_run {
        stats.chunks = files.iter().map(|f| chunk_file(processor, f).len()).sum();
        return Ok(stats);
    }

    // unreadable files still exist; keep what was indexed for them
    let mut seen: BTreeSet<String> = unreadable.into_iter().map(|(id, _)| id).collect();
    for file in &files {
        seen.insert(file.source_id.clone());
        let chunks = chunk_file(processor, file);
        match index.upsert(&file.source_id, chunks).await {
            Ok(report) => {
                stats.chunks += report.chunks_written;
                stats.chunks_removed += report.chunks_removed;
            }
            Err(e) => {
                tracing::warn!(source = %file.source_id, error = %e, "document not indexed");
                stats.failed.push((file.source_id.clone(), e.to_string()));
            }
        }
    }

    let stored = index
        .store()
        .sources()
        .await
        .map_err(|e| anyhow::anyhow!("listing indexed sources: {:#}", e))?;
    for source in stored.iter().filter(|s| !seen.contains(*s)) {
        let removed = index.delete(source).await?;
        tracing::info!(source = %source, removed, "removed vanished document");
        stats.sources_removed += 1;
        stats.chunks_removed += removed;
    }

    Ok(stats)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
