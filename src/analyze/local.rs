// src/analyze/local.rs
//! Local heuristic provider: keyword cues for classification, keyword overlap plus
//! `strsim::normalized_levenshtein` for similarity. No network, fully deterministic.
//! The scoring runs on Tokio's blocking pool, so the metered per-call timeout applies.

use std::collections::BTreeSet;

use async_trait::async_trait;
use strsim::normalized_levenshtein;

use crate::analyze::ai_adapter::{
    ClassificationProvider, PriorityHints, RawClassification, SimilarityScore,
};
use crate::analyze::text::{keywords, normalize_text, tokenize};
use crate::error::ProviderError;
use crate::model::{BusinessContext, Category};

/// Cue table, most specific category first (earlier rows win ties).
/// Multi-word phrases weigh 2, single words 1.
const CUES: &[(Category, &[&str])] = &[
    (
        Category::Bug,
        &[
            "bug", "crash", "crashes", "crashed", "error", "errors", "broken", "fails",
            "failing", "exception", "glitch", "not working", "doesn't work", "stopped working",
        ],
    ),
    (
        Category::Performance,
        &[
            "slow", "lag", "laggy", "latency", "performance", "speed", "timeout", "freezes",
            "memory", "cpu", "faster", "takes forever",
        ],
    ),
    (
        Category::UiUx,
        &[
            "dark mode", "light mode", "theme", "ui", "ux", "design", "layout", "button",
            "color", "colour", "font", "responsive", "navigation", "mobile view", "contrast",
        ],
    ),
    (
        Category::Integration,
        &[
            "integration", "integrate", "slack", "discord", "zapier", "webhook", "webhooks",
            "api", "jira", "github", "sso", "salesforce", "hubspot",
        ],
    ),
    (
        Category::Documentation,
        &[
            "docs", "documentation", "guide", "tutorial", "readme", "typo", "help article",
            "example",
        ],
    ),
    (
        Category::Improvement,
        &[
            "improve", "improvement", "better", "enhance", "tweak", "easier", "simplify",
            "cleaner", "clearer",
        ],
    ),
    (
        Category::FeatureRequest,
        &[
            "add", "support", "feature", "wish", "allow", "ability", "option", "would like",
            "new", "want",
        ],
    ),
];

const LARGE_EFFORT_CUES: &[&str] = &[
    "integration", "migrate", "migration", "redesign", "rewrite", "api", "sso", "offline",
    "sync", "architecture",
];
const SMALL_EFFORT_CUES: &[&str] = &["typo", "color", "colour", "label", "copy", "text", "icon", "tooltip"];

/// Wording similarity (edit distance) only compares this many leading chars.
const WORDING_CHARS: usize = 512;

#[derive(Debug, Clone, Default)]
pub struct LocalProvider;

impl LocalProvider {
    pub fn new() -> Self {
        Self
    }

    /// Weighted cue hits per category, in table order.
    fn cue_hits(text: &str) -> Vec<(Category, u32, Vec<&'static str>)> {
        let padded = format!(" {} ", tokenize(text).collect::<Vec<_>>().join(" "));
        CUES.iter()
            .map(|(cat, cues)| {
                let mut weight = 0;
                let mut matched = Vec::new();
                for cue in cues.iter() {
                    if padded.contains(&format!(" {cue} ")) {
                        weight += if cue.contains(' ') { 2 } else { 1 };
                        matched.push(*cue);
                    }
                }
                (*cat, weight, matched)
            })
            .collect()
    }

    fn classify_text(title: &str, description: &str) -> RawClassification {
        let text = normalize_text(&format!("{title} {description}"));
        let hits = Self::cue_hits(&text);
        let total: u32 = hits.iter().map(|(_, w, _)| *w).sum();

        let mut best: Option<&(Category, u32, Vec<&'static str>)> = None;
        for h in hits.iter() {
            if h.1 > 0 && best.map_or(true, |b| h.1 > b.1) {
                best = Some(h);
            }
        }

        let Some((category, weight, matched)) = best else {
            return RawClassification {
                label: Category::Other.as_str().to_string(),
                confidence: 0.25,
                reasoning: "No category cues found in title or description".to_string(),
            };
        };

        let share = *weight as f32 / total as f32;
        let confidence = (0.35 + 0.35 * share + 0.08 * (*weight).min(4) as f32).min(0.95);
        let mut reasoning = format!("Matched {} cues: {}", category, matched.join(", "));
        let runners_up: Vec<String> = hits
            .iter()
            .filter(|(c, w, _)| c != category && *w > 0)
            .map(|(c, _, m)| format!("{c} ({})", m.join(", ")))
            .collect();
        if !runners_up.is_empty() {
            reasoning.push_str(&format!("; also {}", runners_up.join(", ")));
        }

        RawClassification {
            label: category.as_str().to_string(),
            confidence,
            reasoning,
        }
    }

    fn score_candidates(target: &str, candidates: &[String]) -> Vec<SimilarityScore> {
        let target_norm = normalize_text(target).to_lowercase();
        let target_kw = keywords(&target_norm);
        candidates
            .iter()
            .map(|c| {
                let cand_norm = normalize_text(c).to_lowercase();
                let cand_kw = keywords(&cand_norm);
                let shared: BTreeSet<&String> = target_kw.intersection(&cand_kw).collect();
                let union = target_kw.union(&cand_kw).count().max(1);
                let jaccard = shared.len() as f32 / union as f32;
                let wording = normalized_levenshtein(
                    wording_prefix(&target_norm),
                    wording_prefix(&cand_norm),
                ) as f32;
                let score = (0.6 * jaccard + 0.4 * wording).clamp(0.0, 1.0);
                let reason = if shared.is_empty() {
                    format!("Wording similarity {:.2}, no shared terms", wording)
                } else {
                    let terms: Vec<&str> = shared.iter().take(5).map(|s| s.as_str()).collect();
                    format!("Shared terms: {}", terms.join(", "))
                };
                SimilarityScore { score, reason }
            })
            .collect()
    }

    fn hints_for(text: &str, business: &BusinessContext) -> PriorityHints {
        let item_kw = keywords(&normalize_text(text));
        let strategy_kw = keywords(&format!(
            "{} {}",
            business.company_strategy, business.upcoming_milestone
        ));

        let (strategic_alignment, alignment_note) = if strategy_kw.is_empty() {
            (5.0, "no strategy on file".to_string())
        } else {
            let shared: Vec<&String> = item_kw.intersection(&strategy_kw).collect();
            let fit = (shared.len() as f32 / 2.0).min(1.0);
            let note = if shared.is_empty() {
                "no overlap with strategy".to_string()
            } else {
                format!(
                    "overlaps strategy on {}",
                    shared.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
                )
            };
            (2.0 + 8.0 * fit, note)
        };

        let large = LARGE_EFFORT_CUES.iter().any(|c| item_kw.contains(*c));
        let small = SMALL_EFFORT_CUES.iter().any(|c| item_kw.contains(*c));
        let (effort, effort_note) = match (large, small) {
            (true, _) => (7.5, "large-effort cues"),
            (false, true) => (2.5, "small-effort cues"),
            _ => (5.0, "no effort cues"),
        };

        PriorityHints {
            strategic_alignment,
            effort,
            rationale: format!("{alignment_note}; {effort_note}"),
        }
    }
}

/// Prefix of `s` at most `WORDING_CHARS` characters long, cut on a char boundary.
fn wording_prefix(s: &str) -> &str {
    match s.char_indices().nth(WORDING_CHARS) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// Runs scoring on the blocking pool so the caller's timeout can still fire.
async fn offload<T, F>(work: F) -> Result<T, ProviderError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ProviderError::Worker(e.to_string()))
}

#[async_trait]
impl ClassificationProvider for LocalProvider {
    async fn classify(
        &self,
        title: &str,
        description: &str,
    ) -> Result<RawClassification, ProviderError> {
        let (title, description) = (title.to_owned(), description.to_owned());
        offload(move || Self::classify_text(&title, &description)).await
    }

    async fn similarity(
        &self,
        target: &str,
        candidates: &[String],
    ) -> Result<Vec<SimilarityScore>, ProviderError> {
        let (target, candidates) = (target.to_owned(), candidates.to_vec());
        offload(move || Self::score_candidates(&target, &candidates)).await
    }

    async fn priority_hints(
        &self,
        text: &str,
        business: &BusinessContext,
    ) -> Result<PriorityHints, ProviderError> {
        let (text, business) = (text.to_owned(), business.clone());
        offload(move || Self::hints_for(&text, &business)).await
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
