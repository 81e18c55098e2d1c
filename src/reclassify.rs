//! # Batch Reclassification Job
//! Re-runs the classifier over unclassified / low-confidence items, oldest first.
//!
//! Items are processed one at a time; a failing item is recorded in `errors` and the
//! batch moves on. Selection is a pure function of the stored fields, so two runs with
//! no writes in between pick the same ordered ids.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use crate::analyze::classifier::Classifier;
use crate::config::{ReclassifyConfig, MAX_BATCH_SIZE};
use crate::error::{Result, TriageError};
use crate::orchestrator::classification_trace;
use crate::store::FeedbackStore;
use crate::trace::TraceRecorder;

/// Optional trigger parameters; unset fields fall back to configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReclassifyParams {
    #[serde(default, alias = "confidenceThreshold")]
    pub confidence_threshold: Option<f32>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default, alias = "workspaceId")]
    pub workspace_id: Option<String>,
}

/// Items still matching the selection after the batch, or unknown if the recount failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Count(usize),
    Unknown,
}

impl Serialize for Remaining {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Remaining::Count(n) => s.serialize_u64(*n as u64),
            Remaining::Unknown => s.serialize_str("unknown"),
        }
    }
}

impl fmt::Display for Remaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Remaining::Count(n) => write!(f, "{n}"),
            Remaining::Unknown => f.write_str("unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub id: Uuid,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReclassifySummary {
    pub processed_count: usize,
    pub updated_count: usize,
    pub skipped_count: usize,
    pub remaining: Remaining,
    pub errors: Vec<ItemError>,
    /// Ids selected for this run, in processing order.
    pub selected: Vec<Uuid>,
}

pub struct ReclassifyJob {
    store: Arc<dyn FeedbackStore>,
    traces: TraceRecorder,
    classifier: Classifier,
    cfg: ReclassifyConfig,
}

impl ReclassifyJob {
    pub fn new(
        store: Arc<dyn FeedbackStore>,
        traces: TraceRecorder,
        classifier: Classifier,
        cfg: ReclassifyConfig,
    ) -> Self {
        Self {
            store,
            traces,
            classifier,
            cfg,
        }
    }

    pub async fn run(&self, params: &ReclassifyParams) -> Result<ReclassifySummary> {
        let threshold = params
            .confidence_threshold
            .unwrap_or(self.cfg.confidence_threshold);
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(TriageError::InvalidInput(format!(
                "confidence_threshold {threshold} outside [0, 1]"
            )));
        }
        let limit = match params.limit {
            Some(0) => return Err(TriageError::InvalidInput("limit must be >= 1".into())),
            Some(n) => n.min(MAX_BATCH_SIZE),
            None => self.cfg.batch_size.clamp(1, MAX_BATCH_SIZE),
        };
        let scope = self.scope(params.workspace_id.as_deref()).await?;

        counter!("reclassify_runs_total").increment(1);
        let selected = self
            .store
            .reclassification_candidates(&scope, threshold, limit)
            .await?;

        let mut summary = ReclassifySummary {
            processed_count: 0,
            updated_count: 0,
            skipped_count: 0,
            remaining: Remaining::Unknown,
            errors: Vec::new(),
            selected: selected.iter().map(|it| it.id).collect(),
        };

        for candidate in selected {
            summary.processed_count += 1;

            // Re-read: a human or the triage worker may have classified it meanwhile.
            let item = match self.store.get_item(candidate.id).await {
                Ok(Some(it)) if it.needs_reclassification(threshold) => it,
                Ok(_) => {
                    summary.skipped_count += 1;
                    counter!("reclassify_items_total", "outcome" => "skipped").increment(1);
                    continue;
                }
                Err(e) => {
                    self.item_failed(&mut summary, candidate.id, &e);
                    continue;
                }
            };

            let started = Instant::now();
            let result = match self.classifier.classify(&item.title, &item.description).await {
                Ok(c) => self
                    .store
                    .apply_classification(item.id, &c)
                    .await
                    .map(|_| c),
                Err(e) => Err(e),
            };
            let draft = classification_trace(&item, &result, self.classifier.provider_name(), "batch")
                .elapsed_since(started);
            self.traces.record_or_log(draft).await;

            match result {
                Ok(c) => {
                    tracing::debug!(item_id = %item.id, category = %c.category, confidence = c.confidence, "reclassified");
                    summary.updated_count += 1;
                    counter!("reclassify_items_total", "outcome" => "updated").increment(1);
                }
                Err(e) => self.item_failed(&mut summary, item.id, &e),
            }
        }

        summary.remaining = match self
            .store
            .count_reclassification_candidates(&scope, threshold)
            .await
        {
            Ok(n) => Remaining::Count(n),
            Err(e) => {
                tracing::warn!(error = %e, "remaining count unavailable");
                Remaining::Unknown
            }
        };

        tracing::info!(
            processed = summary.processed_count,
            updated = summary.updated_count,
            skipped = summary.skipped_count,
            errors = summary.errors.len(),
            remaining = %summary.remaining,
            "reclassification batch finished"
        );
        Ok(summary)
    }

    /// Workspaces the run covers: the named one, or every entitled workspace.
    async fn scope(&self, workspace_id: Option<&str>) -> Result<Vec<String>> {
        match workspace_id {
            Some(id) => {
                let ws = self
                    .store
                    .get_workspace(id)
                    .await?
                    .ok_or_else(|| TriageError::NotFound(format!("workspace {id}")))?;
                if ws.enrichment_enabled() {
                    Ok(vec![ws.id])
                } else {
                    tracing::info!(workspace_id = id, "workspace not entitled; nothing to reclassify");
                    Ok(Vec::new())
                }
            }
            None => Ok(self
                .store
                .list_workspaces()
                .await?
                .into_iter()
                .filter(|ws| ws.enrichment_enabled())
                .map(|ws| ws.id)
                .collect()),
        }
    }

    fn item_failed(&self, summary: &mut ReclassifySummary, id: Uuid, e: &TriageError) {
        tracing::warn!(item_id = %id, error = %e, "reclassification failed for item");
        counter!("reclassify_items_total", "outcome" => "error").increment(1);
        summary.errors.push(ItemError {
            id,
            message: e.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::ai_adapter::{DynProvider, FailingProvider, MockProvider};
    use crate::error::ProviderError;
    use crate::model::{Category, FeedbackItem, Plan, Workspace};
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};

    fn job(store: &Arc<MemoryStore>, provider: DynProvider) -> ReclassifyJob {
        ReclassifyJob::new(
            store.clone(),
            TraceRecorder::new(store.clone()),
            Classifier::new(provider),
            ReclassifyConfig::default(),
        )
    }

    async fn seed(store: &MemoryStore, confidences: &[Option<f32>]) -> Vec<Uuid> {
        let base = Utc::now() - Duration::hours(1);
        let mut ids = Vec::new();
        for (i, conf) in confidences.iter().enumerate() {
            let mut it = FeedbackItem::new("ws", format!("item {i}"));
            it.created_at = base + Duration::seconds(i as i64);
            if let Some(c) = conf {
                it.category = Some(Category::Improvement);
                it.classification_confidence = Some(*c);
                it.machine_classified = true;
            }
            ids.push(it.id);
            store.insert_item(it).await.unwrap();
        }
        ids
    }

    #[tokio::test]
    async fn respects_limit_and_reports_remaining() {
        let store = Arc::new(MemoryStore::with_workspaces([Workspace::new("ws", Plan::Pro)]));
        let ids = seed(&store, &[Some(0.3), Some(0.5), None]).await;
        let j = job(&store, Arc::new(MockProvider::classifying("Bug", 0.9)));

        let params = ReclassifyParams {
            confidence_threshold: Some(0.6),
            limit: Some(2),
            workspace_id: None,
        };
        let s = j.run(&params).await.unwrap();
        assert_eq!(s.selected, ids[..2].to_vec());
        assert_eq!(s.processed_count, 2);
        assert_eq!(s.updated_count, 2);
        assert_eq!(s.remaining, Remaining::Count(1));
    }

    #[tokio::test]
    async fn failures_are_isolated_per_item() {
        let store = Arc::new(MemoryStore::with_workspaces([Workspace::new("ws", Plan::Pro)]));
        seed(&store, &[None, None]).await;
        let j = job(&store, Arc::new(FailingProvider::new(ProviderError::Timeout(5))));

        let s = j.run(&ReclassifyParams::default()).await.unwrap();
        assert_eq!(s.processed_count, 2);
        assert_eq!(s.errors.len(), 2);
        assert_eq!(s.updated_count, 0);
        assert_eq!(s.remaining, Remaining::Count(2));
    }

    #[tokio::test]
    async fn skips_human_set_categories() {
        let store = Arc::new(MemoryStore::with_workspaces([Workspace::new("ws", Plan::Pro)]));
        let ids = seed(&store, &[None, None]).await;
        store.set_category_by_human(ids[0], Category::Performance).await.unwrap();
        let j = job(&store, Arc::new(MockProvider::classifying("Bug", 0.9)));

        let s = j.run(&ReclassifyParams::default()).await.unwrap();
        assert_eq!(s.selected, vec![ids[1]]);
        assert_eq!(s.processed_count, 1);
        let kept = store.get_item(ids[0]).await.unwrap().unwrap();
        assert_eq!(kept.category, Some(Category::Performance));
    }

    #[tokio::test]
    async fn rejects_malformed_parameters() {
        let store = Arc::new(MemoryStore::new());
        let j = job(&store, Arc::new(MockProvider::default()));
        let zero = ReclassifyParams {
            limit: Some(0),
            ..Default::default()
        };
        assert!(matches!(j.run(&zero).await, Err(TriageError::InvalidInput(_))));
        let bad = ReclassifyParams {
            confidence_threshold: Some(1.5),
            ..Default::default()
        };
        assert!(matches!(j.run(&bad).await, Err(TriageError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn free_workspaces_are_out_of_scope() {
        let store = Arc::new(MemoryStore::with_workspaces([Workspace::new("ws", Plan::Free)]));
        seed(&store, &[None]).await;
        let j = job(&store, Arc::new(MockProvider::default()));
        let s = j.run(&ReclassifyParams::default()).await.unwrap();
        assert_eq!(s.processed_count, 0);
        assert_eq!(s.remaining, Remaining::Count(0));
    }

    #[test]
    fn remaining_serializes_as_number_or_unknown() {
        assert_eq!(serde_json::to_value(Remaining::Count(3)).unwrap(), serde_json::json!(3));
        assert_eq!(
            serde_json::to_value(Remaining::Unknown).unwrap(),
            serde_json::json!("unknown")
        );
    }
}
