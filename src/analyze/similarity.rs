// src/analyze/similarity.rs
//! Similarity scorer: rank a bounded candidate set against a target item.
//!
//! - Candidates exclude the target itself and items already archived as duplicates,
//!   and are capped at `candidate_limit` (callers pass most-recent first).
//! - Hits with `score >= threshold` are sorted descending and truncated to `max_results`.
//! - With `include_related`, hits in `[related_floor, threshold)` are returned separately;
//!   they never appear in the duplicate list.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analyze::ai_adapter::DynProvider;
use crate::config::DuplicateConfig;
use crate::error::{Result, TriageError};
use crate::model::{DuplicateCandidate, FeedbackItem};

/// Minimal view of the item being checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetItem {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl From<&FeedbackItem> for TargetItem {
    fn from(it: &FeedbackItem) -> Self {
        Self {
            id: it.id,
            title: it.title.clone(),
            description: it.description.clone(),
        }
    }
}

impl TargetItem {
    fn text(&self) -> String {
        if self.description.trim().is_empty() {
            self.title.clone()
        } else {
            format!("{}\n{}", self.title, self.description)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCheck {
    pub duplicates: Vec<DuplicateCandidate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<DuplicateCandidate>,
    /// How many candidates were actually scored.
    pub candidates_scored: usize,
}

#[derive(Clone)]
pub struct SimilarityScorer {
    provider: DynProvider,
}

impl SimilarityScorer {
    pub fn new(provider: DynProvider) -> Self {
        Self { provider }
    }

    pub async fn find_duplicates(
        &self,
        target: &TargetItem,
        candidates: &[FeedbackItem],
        cfg: &DuplicateConfig,
    ) -> Result<DuplicateCheck> {
        validate_config(cfg)?;

        let pool: Vec<&FeedbackItem> = candidates
            .iter()
            .filter(|c| c.id != target.id && c.duplicate_of.is_none())
            .take(cfg.candidate_limit)
            .collect();
        if pool.is_empty() {
            return Ok(DuplicateCheck::default());
        }

        let texts: Vec<String> = pool.iter().map(|c| c.combined_text()).collect();
        let scores = self
            .provider
            .similarity(&target.text(), &texts)
            .await
            .map_err(|e| TriageError::DuplicateCheckUnavailable(e.to_string()))?;
        if scores.len() != pool.len() {
            return Err(TriageError::DuplicateCheckUnavailable(format!(
                "expected {} scores, got {}",
                pool.len(),
                scores.len()
            )));
        }

        let mut duplicates = Vec::new();
        let mut related = Vec::new();
        for (cand, s) in pool.iter().zip(scores) {
            let score = if s.score.is_finite() {
                s.score.clamp(0.0, 1.0)
            } else {
                0.0
            };
            let hit = DuplicateCandidate {
                target_id: target.id,
                candidate_id: cand.id,
                score,
                reason: s.reason,
            };
            if score >= cfg.threshold {
                duplicates.push(hit);
            } else if cfg.include_related && score >= cfg.related_floor {
                related.push(hit);
            }
        }

        rank(&mut duplicates, cfg.max_results);
        rank(&mut related, cfg.max_results);

        Ok(DuplicateCheck {
            duplicates,
            related,
            candidates_scored: pool.len(),
        })
    }
}

/// Rejects a threshold outside [0, 1] and a zero result cap.
pub fn validate_config(cfg: &DuplicateConfig) -> Result<()> {
    if !(0.0..=1.0).contains(&cfg.threshold) {
        return Err(TriageError::InvalidInput(format!(
            "threshold {} outside [0, 1]",
            cfg.threshold
        )));
    }
    if cfg.max_results == 0 {
        return Err(TriageError::InvalidInput("max_results must be >= 1".into()));
    }
    Ok(())
}

/// Sort descending by score (stable: equal scores keep candidate order) and truncate.
fn rank(hits: &mut Vec<DuplicateCandidate>, max: usize) {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(max);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::ai_adapter::{FailingProvider, MockProvider};
    use crate::error::ProviderError;
    use std::sync::Arc;

    fn item(title: &str) -> FeedbackItem {
        FeedbackItem::new("ws", title)
    }

    #[tokio::test]
    async fn excludes_target_and_archived_duplicates() {
        let target_item = item("Dark mode");
        let mut archived = item("dark mode again");
        archived.duplicate_of = Some(Uuid::new_v4());
        let fresh = item("Dark mode for reports");
        let cands = vec![target_item.clone(), archived, fresh.clone()];

        let scorer = SimilarityScorer::new(Arc::new(
            MockProvider::default().with_similarity("dark", 0.95),
        ));
        let out = scorer
            .find_duplicates(&(&target_item).into(), &cands, &DuplicateConfig::default())
            .await
            .unwrap();
        assert_eq!(out.candidates_scored, 1);
        assert_eq!(out.duplicates.len(), 1);
        assert_eq!(out.duplicates[0].candidate_id, fresh.id);
    }

    #[tokio::test]
    async fn related_list_only_when_requested() {
        let target = item("Dark mode");
        let cands = vec![item("Theme settings")];
        let scorer = SimilarityScorer::new(Arc::new(
            MockProvider::default().with_similarity("theme", 0.6),
        ));

        let off = scorer
            .find_duplicates(&(&target).into(), &cands, &DuplicateConfig::default())
            .await
            .unwrap();
        assert!(off.duplicates.is_empty() && off.related.is_empty());

        let cfg = DuplicateConfig {
            include_related: true,
            ..DuplicateConfig::default()
        };
        let on = scorer
            .find_duplicates(&(&target).into(), &cands, &cfg)
            .await
            .unwrap();
        assert!(on.duplicates.is_empty());
        assert_eq!(on.related.len(), 1);
    }

    #[tokio::test]
    async fn candidate_pool_is_bounded() {
        let target = item("Dark mode");
        let cands: Vec<_> = (0..30).map(|i| item(&format!("dark item {i}"))).collect();
        let scorer = SimilarityScorer::new(Arc::new(
            MockProvider::default().with_similarity("dark", 0.9),
        ));
        let out = scorer
            .find_duplicates(&(&target).into(), &cands, &DuplicateConfig::default())
            .await
            .unwrap();
        assert_eq!(out.candidates_scored, 15);
        assert_eq!(out.duplicates.len(), 4);
    }

    #[tokio::test]
    async fn empty_pool_skips_external_call() {
        let target = item("Dark mode");
        let scorer = SimilarityScorer::new(Arc::new(FailingProvider::new(ProviderError::Disabled)));
        let out = scorer
            .find_duplicates(&(&target).into(), &[], &DuplicateConfig::default())
            .await
            .unwrap();
        assert!(out.duplicates.is_empty());
    }

    #[tokio::test]
    async fn provider_error_is_duplicate_check_unavailable() {
        let target = item("Dark mode");
        let scorer = SimilarityScorer::new(Arc::new(FailingProvider::new(ProviderError::Disabled)));
        let res = scorer
            .find_duplicates(&(&target).into(), &[item("x")], &DuplicateConfig::default())
            .await;
        assert!(matches!(res, Err(TriageError::DuplicateCheckUnavailable(_))));
    }
}
