// src/analyze/text.rs
//! Text normalization and tokenization shared by the local heuristics.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

/// Normalize feedback text: decode entities, strip tags, unify quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags (rich-text editors leave them behind)
    static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = RE_TAGS.replace_all(&out, " ").to_string();

    // 3) Normalize curly quotes to ASCII
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));
    out = RE_WS.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Alphanumeric (plus apostrophe) tokens, lower-cased.
pub fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|t| t.trim_matches('\''))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "for", "from", "has", "have",
    "i", "if", "in", "is", "it", "its", "me", "my", "of", "on", "or", "please", "should", "so",
    "that", "the", "this", "to", "us", "was", "we", "when", "with", "would", "you", "your",
];

/// Distinct content words (stopwords and 1-char tokens removed).
pub fn keywords(s: &str) -> BTreeSet<String> {
    tokenize(s)
        .filter(|t| t.chars().count() > 1 && !STOPWORDS.contains(&t.as_str()))
        .collect()
}
