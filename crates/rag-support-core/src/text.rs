//! Small lexical helpers shared by the scorer and the answer parser.
//!
//! Everything here is deterministic: term sets are `BTreeSet`s so that any
//! iteration over them has a stable order.

use std::collections::BTreeSet;

/// Function words ignored when comparing content. English and French, the
/// two languages the support corpus is written in.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "your", "with", "this", "that", "from",
    "they", "will", "would", "there", "their", "what", "which", "when", "where", "how", "why",
    "can", "could", "should", "into", "then", "than", "them", "these", "those", "have", "has",
    "had", "was", "were", "been", "being", "its", "our", "all", "any", "also", "only", "just",
    "about", "over", "under", "does", "did", "doing", "each", "other", "some", "such", "very",
    "les", "des", "une", "pour", "dans", "sur", "est", "sont", "que", "qui", "quoi", "avec",
    "pas", "vous", "votre", "vos", "nous", "mais", "par", "aux", "ces", "cette", "son", "ses",
    "comment", "pourquoi", "quand",
];

/// Markers that flip the polarity of a claim.
const NEGATIONS: &[&str] = &[
    "not", "no", "never", "cannot", "can't", "don't", "doesn't", "isn't", "aren't", "won't",
    "shouldn't", "mustn't", "impossible", "unable", "disabled", "ne", "pas", "jamais",
    "aucun", "aucune",
];

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

pub fn is_negation(word: &str) -> bool {
    NEGATIONS.contains(&word)
}

/// Lower-cased alphanumeric words, apostrophes kept inside words.
pub fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Content terms: words of three or more characters that are not stopwords
/// and not pure numbers.
pub fn terms(text: &str) -> BTreeSet<String> {
    words(text)
        .into_iter()
        .filter(|w| w.chars().count() >= 3)
        .filter(|w| !is_stopword(w))
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .collect()
}

/// Fraction of `needles` present in `haystack`. Empty `needles` ⇒ `0.0`.
pub fn containment(needles: &BTreeSet<String>, haystack: &BTreeSet<String>) -> f64 {
    if needles.is_empty() {
        return 0.0;
    }
    let hits = needles.iter().filter(|t| haystack.contains(*t)).count();
    hits as f64 / needles.len() as f64
}

/// Split text into sentence-like claims on `.`, `!`, `?`, `;` and newlines.
///
/// A period between two digits (`2.5`) does not end a sentence.
pub fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = text.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        let decimal_point = c == '.'
            && i > 0
            && chars[i - 1].is_ascii_digit()
            && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
        let list_marker = c == '.' && is_list_number(&current);
        let boundary =
            matches!(c, '!' | '?' | ';' | '\n') || (c == '.' && !decimal_point && !list_marker);
        if boundary {
            push_sentence(&mut out, &current);
            current.clear();
        } else {
            current.push(c);
        }
    }
    push_sentence(&mut out, &current);
    out
}

fn is_list_number(current: &str) -> bool {
    let t = current.trim();
    !t.is_empty() && t.len() <= 3 && t.chars().all(|d| d.is_ascii_digit())
}

/// Drops bullets, heading markers and a leading `1.` / `1)` list number.
fn push_sentence(out: &mut Vec<String>, raw: &str) {
    let mut trimmed = raw
        .trim()
        .trim_start_matches(|c: char| c == '-' || c == '#' || c.is_whitespace());
    if let Some(rest) = trimmed.strip_prefix("* ") {
        trimmed = rest.trim();
    }
    let digits = trimmed.len() - trimmed.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 && digits <= 3 {
        let rest = &trimmed[digits..];
        if let Some(after) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            if after.starts_with(char::is_whitespace) {
                trimmed = after.trim();
            }
        }
    }
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Numeric tokens (integers, decimals, and `12/05/2024`-style dates).
pub fn numbers(text: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() || ((c == '.' || c == ',' || c == '/' || c == '-') && !current.is_empty()) {
            current.push(c);
        } else {
            flush_number(&mut out, &mut current);
        }
    }
    flush_number(&mut out, &mut current);
    out
}

fn flush_number(out: &mut BTreeSet<String>, current: &mut String) {
    let token = current.trim_end_matches(['.', ',', '/', '-']);
    if !token.is_empty() {
        out.insert(token.replace(',', "."));
    }
    current.clear();
}

/// Whether a claim is phrased negatively.
pub fn is_negated(claim: &str) -> bool {
    words(claim)
        .iter()
        .any(|w| is_negation(w) || w.starts_with("n'") || w.ends_with("n't"))
}

/// Truncate to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
