//! Markdown document processor.
//!
//! Splits raw Markdown into [`Chunk`]s in two passes:
//!
//! 1. **Header sections.** Lines starting with a configured header marker
//!    (`#`, `##`, `###` by default) followed by whitespace and a title open a
//!    new section. The active heading path is tracked as a stack so that a
//!    `##` closes any open `##`/`###` entries. Header-looking lines inside
//!    fenced code blocks, unconfigured levels (`####`) and malformed headers
//!    (`#NoSpace`, `# ` with no title) are ordinary body text.
//! 2. **Windows.** Each section is split into windows of at most
//!    `chunk_size` characters with `chunk_overlap` characters of overlap.
//!    The recursive strategy tries separators in priority order (paragraph,
//!    line, space, then individual characters) and only descends to the next
//!    separator for pieces that are still too large.
//!
//! Every chunk is a trimmed byte range of the original text, so
//! `&text[chunk.char_span.start..chunk.char_span.end] == chunk.text`.
//!
//! # Example
//!
//! ```rust
//! use rag_support_core::chunk::{ChunkingParams, MarkdownProcessor};
//!
//! let processor = MarkdownProcessor::new(ChunkingParams::default());
//! let chunks = processor.process("guide.md", "# Setup\n\nInstall the app.");
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].heading_path, vec!["Setup".to_string()]);
//! ```

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::models::{CharSpan, Chunk};

/// A header marker and the metadata name it is recorded under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderLevel {
    pub marker: String,
    pub name: String,
}

impl HeaderLevel {
    pub fn new(marker: &str, name: &str) -> Self {
        Self {
            marker: marker.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMethod {
    #[default]
    Recursive,
    Fixed,
}

/// Chunking tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkingParams {
    /// Target window size in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive windows of a section.
    pub chunk_overlap: usize,
    pub split_method: SplitMethod,
    /// Separators in priority order. `""` means "split between characters".
    pub separators: Vec<String>,
    /// Keep the separator at the start of the following piece.
    pub keep_separator: bool,
    pub strip_whitespace: bool,
    pub headers: Vec<HeaderLevel>,
    /// Exclude header lines from chunk text (the path is still recorded).
    pub strip_headers: bool,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            split_method: SplitMethod::Recursive,
            separators: default_separators(),
            keep_separator: true,
            strip_whitespace: true,
            headers: default_headers(),
            strip_headers: false,
        }
    }
}

pub fn default_separators() -> Vec<String> {
    ["\n\n", "\n", " ", ""].iter().map(|s| s.to_string()).collect()
}

pub fn default_headers() -> Vec<HeaderLevel> {
    vec![
        HeaderLevel::new("#", "h1"),
        HeaderLevel::new("##", "h2"),
        HeaderLevel::new("###", "h3"),
    ]
}

/// A header-delimited region of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub heading_path: Vec<String>,
    pub span: CharSpan,
}

pub struct MarkdownProcessor {
    params: ChunkingParams,
}

impl MarkdownProcessor {
    pub fn new(params: ChunkingParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ChunkingParams {
        &self.params
    }

    /// Split a Markdown document into chunks with contiguous sequence
    /// indices starting at 0. Empty or whitespace-only input yields no
    /// chunks.
    pub fn process(&self, source_id: &str, text: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for section in self.split_sections(text) {
            for span in self.split_spans(text, section.span) {
                let index = chunks.len();
                chunks.push(Chunk::new(
                    source_id,
                    index,
                    &text[span.start..span.end],
                    section.heading_path.clone(),
                    span,
                ));
            }
        }
        tracing::debug!(source = source_id, chunks = chunks.len(), "processed document");
        chunks
    }

    /// First pass: split on configured header lines.
    pub fn split_sections(&self, text: &str) -> Vec<Section> {
        let mut sections = Vec::new();
        let mut path: Vec<(usize, String)> = Vec::new();
        let mut section_start = 0;
        let mut in_fence = false;
        let mut offset = 0;

        for line in text.split_inclusive('\n') {
            let line_start = offset;
            offset += line.len();
            let content = line.trim_end_matches(['\n', '\r']);

            if is_fence(content) {
                in_fence = !in_fence;
                continue;
            }
            if in_fence {
                continue;
            }

            if let Some((level, title)) = self.parse_header(content) {
                push_section(&mut sections, text, &path, section_start, line_start);
                path.retain(|(l, _)| *l < level);
                path.push((level, title));
                section_start = if self.params.strip_headers {
                    offset
                } else {
                    line_start
                };
            }
        }
        push_section(&mut sections, text, &path, section_start, text.len());
        sections
    }

    /// Second pass: split one section into overlapping windows.
    pub fn split_spans(&self, text: &str, span: CharSpan) -> Vec<CharSpan> {
        match self.params.split_method {
            SplitMethod::Recursive => self.recursive_spans(text, span, &self.params.separators),
            SplitMethod::Fixed => self.fixed_spans(text, span),
        }
    }

    /// Returns the header level (marker length) and title when `line` is a
    /// configured header.
    fn parse_header(&self, line: &str) -> Option<(usize, String)> {
        let hashes = line.bytes().take_while(|b| *b == b'#').count();
        if hashes == 0 {
            return None;
        }
        let marker = &line[..hashes];
        if !self.params.headers.iter().any(|h| h.marker == marker) {
            return None;
        }
        let rest = &line[hashes..];
        if !rest.starts_with([' ', '\t']) {
            return None;
        }
        let title = rest.trim().trim_end_matches('#').trim();
        if title.is_empty() {
            return None;
        }
        Some((hashes, title.to_string()))
    }

    fn recursive_spans(&self, text: &str, span: CharSpan, separators: &[String]) -> Vec<CharSpan> {
        let slice = &text[span.start..span.end];

        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut remaining: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = "";
                break;
            }
            if slice.contains(sep.as_str()) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let pieces = split_on(text, span, separator, self.params.keep_separator);
        let merge_sep_len = if self.params.keep_separator {
            0
        } else {
            separator.chars().count()
        };

        let mut out = Vec::new();
        let mut good: Vec<CharSpan> = Vec::new();
        for piece in pieces {
            if char_len(text, piece) < self.params.chunk_size {
                good.push(piece);
                continue;
            }
            if !good.is_empty() {
                out.extend(self.merge_spans(text, &good, merge_sep_len));
                good.clear();
            }
            if remaining.is_empty() {
                out.extend(self.finish(text, piece));
            } else {
                out.extend(self.recursive_spans(text, piece, remaining));
            }
        }
        if !good.is_empty() {
            out.extend(self.merge_spans(text, &good, merge_sep_len));
        }
        out
    }

    /// Greedily pack consecutive pieces into windows, carrying up to
    /// `chunk_overlap` characters of trailing pieces into the next window.
    fn merge_spans(&self, text: &str, pieces: &[CharSpan], sep_len: usize) -> Vec<CharSpan> {
        let size = self.params.chunk_size;
        let overlap = self.params.chunk_overlap;
        let mut out = Vec::new();
        let mut current: VecDeque<(CharSpan, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(text, piece);
            let joiner = if current.is_empty() { 0 } else { sep_len };
            if total + len + joiner > size && !current.is_empty() {
                out.extend(self.finish(text, window(&current)));
                loop {
                    let joiner = if current.is_empty() { 0 } else { sep_len };
                    let must_shrink = total > overlap || (total + len + joiner > size && total > 0);
                    if !must_shrink {
                        break;
                    }
                    let Some((_, first_len)) = current.pop_front() else {
                        total = 0;
                        break;
                    };
                    let dropped_joiner = if current.is_empty() { 0 } else { sep_len };
                    total = total.saturating_sub(first_len + dropped_joiner);
                }
            }
            current.push_back((piece, len));
            total += len + if current.len() > 1 { sep_len } else { 0 };
        }
        if !current.is_empty() {
            out.extend(self.finish(text, window(&current)));
        }
        out
    }

    /// Fixed-size windows that back off to the last whitespace in the window
    /// so tokens are only cut when a window contains no whitespace at all.
    fn fixed_spans(&self, text: &str, span: CharSpan) -> Vec<CharSpan> {
        let slice = &text[span.start..span.end];
        let chars: Vec<(usize, char)> = slice.char_indices().collect();
        let n = chars.len();
        let size = self.params.chunk_size.max(1);
        let byte_at = |i: usize| {
            if i < n {
                span.start + chars[i].0
            } else {
                span.end
            }
        };

        let mut out = Vec::new();
        let mut start = 0;
        while start < n {
            let mut end = (start + size).min(n);
            if end < n {
                if let Some(ws) = (start + 1..end).rev().find(|&i| chars[i].1.is_whitespace()) {
                    end = ws;
                }
            }
            out.extend(self.finish(text, CharSpan::new(byte_at(start), byte_at(end))));
            if end >= n {
                break;
            }
            let back = end.saturating_sub(self.params.chunk_overlap);
            let next = (back..end)
                .find(|&i| chars[i].1.is_whitespace())
                .map(|i| i + 1)
                .unwrap_or(end);
            start = if next > start && next <= end { next } else { end };
        }
        out
    }

    /// Apply whitespace trimming; whitespace-only windows are dropped.
    fn finish(&self, text: &str, span: CharSpan) -> Option<CharSpan> {
        let slice = &text[span.start..span.end];
        if slice.trim().is_empty() {
            return None;
        }
        if !self.params.strip_whitespace {
            return Some(span);
        }
        let lead = slice.len() - slice.trim_start().len();
        let tail = slice.len() - slice.trim_end().len();
        Some(CharSpan::new(span.start + lead, span.end - tail))
    }
}

fn push_section(
    sections: &mut Vec<Section>,
    text: &str,
    path: &[(usize, String)],
    start: usize,
    end: usize,
) {
    if start >= end || text[start..end].trim().is_empty() {
        return;
    }
    sections.push(Section {
        heading_path: path.iter().map(|(_, t)| t.clone()).collect(),
        span: CharSpan::new(start, end),
    });
}

fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

fn char_len(text: &str, span: CharSpan) -> usize {
    text[span.start..span.end].chars().count()
}

fn window(current: &VecDeque<(CharSpan, usize)>) -> CharSpan {
    match (current.front(), current.back()) {
        (Some((first, _)), Some((last, _))) => CharSpan::new(first.start, last.end),
        _ => CharSpan::new(0, 0),
    }
}

/// Split a span on `separator`. Kept separators stay attached to the start
/// of the following piece, so kept pieces tile the span exactly.
fn split_on(text: &str, span: CharSpan, separator: &str, keep: bool) -> Vec<CharSpan> {
    let slice = &text[span.start..span.end];
    let mut pieces = Vec::new();

    if separator.is_empty() {
        for (i, c) in slice.char_indices() {
            let start = span.start + i;
            pieces.push(CharSpan::new(start, start + c.len_utf8()));
        }
        return pieces;
    }

    let mut piece_start = span.start;
    for (pos, _) in slice.match_indices(separator) {
        let at = span.start + pos;
        pieces.push(CharSpan::new(piece_start, at));
        piece_start = if keep { at } else { at + separator.len() };
    }
    pieces.push(CharSpan::new(piece_start, span.end));
    pieces.retain(|p| !p.is_empty());
    pieces
}
