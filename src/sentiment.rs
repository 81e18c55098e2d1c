//! # Sentiment / urgency estimator
//! Fully local lexicon heuristics, so it keeps working when the external service is down.
//!
//! intensity = 50 + 8·positive − 8·negative + 4·urgency, clamped to 0–100.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::analyze::text::{normalize_text, tokenize};
use crate::model::{Emotion, SentimentLabel, SentimentReading, TagLevel};

static LEXICON: Lazy<HashMap<String, i32>> = Lazy::new(|| {
    let raw = include_str!("../sentiment_lexicon.json");
    serde_json::from_str::<HashMap<String, i32>>(raw).unwrap_or_else(|e| {
        tracing::error!(error = %e, "sentiment lexicon is not valid JSON; running without it");
        HashMap::new()
    })
});

const URGENCY_TERMS: &[&str] = &[
    "urgent", "urgently", "asap", "immediately", "blocker", "blocking", "blocked", "critical",
    "outage", "deadline", "showstopper", "emergency", "production",
];

const CONFUSION_TERMS: &[&str] = &[
    "confusing", "confused", "unclear", "understand", "lost", "figure",
];

const POSITIVE_WEIGHT: i32 = 8;
const NEGATIVE_WEIGHT: i32 = 8;
const URGENCY_WEIGHT: i32 = 4;

/// Raw term tallies behind a reading (exposed for traces).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermCounts {
    pub positive_terms: u32,
    pub negative_terms: u32,
    pub positive_weight: i32,
    pub negative_weight: i32,
    pub urgency_terms: u32,
    pub confusion_terms: u32,
    pub tokens: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SentimentAnalyzer;

impl SentimentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Lexicon score for a word (0 if absent).
    #[inline]
    fn word_score(&self, w: &str) -> i32 {
        *LEXICON.get(w).unwrap_or(&0)
    }

    /// Tally lexicon and urgency terms.
    /// Negation: a negator in the previous 1..=3 tokens inverts a word's sign.
    pub fn count_terms(&self, text: &str) -> TermCounts {
        let normalized = normalize_text(text);
        let tokens: Vec<String> = tokenize(&normalized).collect();
        let mut c = TermCounts {
            tokens: tokens.len(),
            ..TermCounts::default()
        };

        for i in 0..tokens.len() {
            let w = tokens[i].as_str();
            if URGENCY_TERMS.contains(&w) {
                c.urgency_terms += 1;
            }
            if CONFUSION_TERMS.contains(&w) {
                c.confusion_terms += 1;
            }

            let base = self.word_score(w);
            if base == 0 {
                continue;
            }
            let negated = (1..=3).any(|k| i >= k && is_negator(tokens[i - k].as_str()));
            let adj = if negated { -base } else { base };
            if adj > 0 {
                c.positive_terms += 1;
                c.positive_weight += adj;
            } else {
                c.negative_terms += 1;
                c.negative_weight += -adj;
            }
        }
        c
    }

    /// Full reading: label, intensity, emotion, impact (from `votes`), urgency.
    pub fn read(&self, text: &str, votes: u32) -> SentimentReading {
        self.read_with_counts(text, votes).0
    }

    pub fn read_with_counts(&self, text: &str, votes: u32) -> (SentimentReading, TermCounts) {
        let c = self.count_terms(text);

        let raw = 50 + POSITIVE_WEIGHT * c.positive_weight - NEGATIVE_WEIGHT * c.negative_weight
            + URGENCY_WEIGHT * c.urgency_terms as i32;
        let intensity = raw.clamp(0, 100) as u8;

        let label = classify_label(&c, intensity);
        let emotion = if c.confusion_terms > 0 && label != SentimentLabel::Positive {
            Emotion::Confused
        } else {
            match label {
                SentimentLabel::Negative => Emotion::Frustrated,
                SentimentLabel::Mixed if c.urgency_terms > 0 => Emotion::Frustrated,
                SentimentLabel::Positive if intensity >= 70 => Emotion::Excited,
                SentimentLabel::Positive => Emotion::Satisfied,
                _ => Emotion::Calm,
            }
        };

        let reading = SentimentReading {
            label,
            intensity,
            emotion,
            impact: impact_tag(votes),
            urgency: urgency_tag(c.urgency_terms),
        };
        (reading, c)
    }
}

fn classify_label(c: &TermCounts, intensity: u8) -> SentimentLabel {
    let (p, n) = (c.positive_weight, c.negative_weight);
    if p > 0 && n > 0 {
        let (lo, hi) = (p.min(n), p.max(n));
        // Comparable weight on both sides reads as mixed.
        if lo * 2 >= hi {
            return SentimentLabel::Mixed;
        }
    }
    if p > n && intensity > 55 {
        SentimentLabel::Positive
    } else if n > p && intensity < 45 {
        SentimentLabel::Negative
    } else {
        SentimentLabel::Neutral
    }
}

/// Engagement breakpoints: <10 votes low, <50 medium, otherwise high.
pub fn impact_tag(votes: u32) -> TagLevel {
    match votes {
        0..=9 => TagLevel::Low,
        10..=49 => TagLevel::Medium,
        _ => TagLevel::High,
    }
}

/// 0 urgency terms low, 1–2 medium, 3+ high.
pub fn urgency_tag(terms: u32) -> TagLevel {
    match terms {
        0 => TagLevel::Low,
        1 | 2 => TagLevel::Medium,
        _ => TagLevel::High,
    }
}

/// Simple negator set (single-token; "no longer" is already covered by "no").
fn is_negator(tok: &str) -> bool {
    matches!(
        tok,
        "not"
            | "no"
            | "never"
            | "isn't"
            | "wasn't"
            | "aren't"
            | "won't"
            | "can't"
            | "cannot"
            | "doesn't"
            | "don't"
            | "without"
    )
}
