//! # Triage Orchestrator
//! Runs classify → dedupe → score → sentiment for one item as an explicit state machine.
//!
//! Each step has its own failure domain: a failed step moves to its `*Skipped` state,
//! is logged at warn and traced, and never reverts or blocks the steps around it.
//! Workspaces without the enrichment entitlement go straight through the skipped states
//! and nothing is traced for them.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::analyze::ai_adapter::{DynProvider, PriorityHints};
use crate::analyze::classifier::{Classification, Classifier};
use crate::analyze::priority::{PriorityModel, PrioritySignals};
use crate::analyze::similarity::{validate_config, DuplicateCheck, SimilarityScorer, TargetItem};
use crate::analyze::weights::HotReloadWeights;
use crate::config::DuplicateConfig;
use crate::error::{Result, TriageError};
use crate::model::{DuplicateCandidate, FeedbackItem, PriorityAssessment, Workspace};
use crate::sentiment::SentimentAnalyzer;
use crate::store::FeedbackStore;
use crate::trace::{Feature, NewTrace, TraceRecorder};

pub const ENTITY_FEEDBACK_ITEM: &str = "feedback_item";

/// Why a step did not produce a result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    NotEntitled,
    Failed { kind: &'static str, message: String },
}

impl From<&TriageError> for SkipReason {
    fn from(e: &TriageError) -> Self {
        SkipReason::Failed {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TriageState {
    Created,
    Classifying,
    Classified(Classification),
    ClassificationSkipped(SkipReason),
    DuplicateChecking,
    DuplicatesFound(Vec<DuplicateCandidate>),
    NoDuplicates,
    DuplicateCheckSkipped(SkipReason),
    PriorityScoring,
    Scored(Box<PriorityAssessment>),
    ScoringSkipped(SkipReason),
    Traced,
}

impl TriageState {
    pub fn name(&self) -> &'static str {
        match self {
            TriageState::Created => "created",
            TriageState::Classifying => "classifying",
            TriageState::Classified(_) => "classified",
            TriageState::ClassificationSkipped(_) => "classification_skipped",
            TriageState::DuplicateChecking => "duplicate_checking",
            TriageState::DuplicatesFound(_) => "duplicates_found",
            TriageState::NoDuplicates => "no_duplicates",
            TriageState::DuplicateCheckSkipped(_) => "duplicate_check_skipped",
            TriageState::PriorityScoring => "priority_scoring",
            TriageState::Scored(_) => "scored",
            TriageState::ScoringSkipped(_) => "scoring_skipped",
            TriageState::Traced => "traced",
        }
    }
}

impl fmt::Display for TriageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The enrichment steps a run reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Classification,
    DuplicateCheck,
    Priority,
    Sentiment,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Classification => "classification",
            Step::DuplicateCheck => "duplicate_check",
            Step::Priority => "priority",
            Step::Sentiment => "sentiment",
        }
    }
}

/// Outcome of a single step, as reported back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Done,
    Skipped(SkipReason),
}

impl StepOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, StepOutcome::Done)
    }

    fn label(&self) -> &'static str {
        match self {
            StepOutcome::Done => "done",
            StepOutcome::Skipped(SkipReason::NotEntitled) => "not_entitled",
            StepOutcome::Skipped(SkipReason::Failed { .. }) => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TriageReport {
    pub item_id: Uuid,
    pub workspace_id: String,
    pub classification: StepOutcome,
    pub duplicates: StepOutcome,
    pub priority: StepOutcome,
    pub sentiment: StepOutcome,
    /// State names in the order they were entered.
    pub path: Vec<&'static str>,
    pub trace_ids: Vec<Uuid>,
    pub duplicates_found: Vec<DuplicateCandidate>,
    pub assessment: Option<PriorityAssessment>,
}

impl TriageReport {
    fn new(item: &FeedbackItem) -> Self {
        let pending = StepOutcome::Skipped(SkipReason::NotEntitled);
        Self {
            item_id: item.id,
            workspace_id: item.workspace_id.clone(),
            classification: pending.clone(),
            duplicates: pending.clone(),
            priority: pending.clone(),
            sentiment: pending,
            path: Vec::new(),
            trace_ids: Vec::new(),
            duplicates_found: Vec::new(),
            assessment: None,
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn FeedbackStore>,
    traces: TraceRecorder,
    classifier: Classifier,
    scorer: SimilarityScorer,
    priority: PriorityModel,
    sentiment: SentimentAnalyzer,
    weights: Arc<HotReloadWeights>,
    duplicates: DuplicateConfig,
}

/// Mutable context of one run; the state enum carries step results forward.
struct Run {
    item: FeedbackItem,
    workspace: Workspace,
    entitled: bool,
    report: TriageReport,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn FeedbackStore>,
        traces: TraceRecorder,
        provider: DynProvider,
        weights: Arc<HotReloadWeights>,
        duplicates: DuplicateConfig,
    ) -> Self {
        Self {
            store,
            traces,
            classifier: Classifier::new(provider.clone()),
            scorer: SimilarityScorer::new(provider.clone()),
            priority: PriorityModel::new(provider),
            sentiment: SentimentAnalyzer::new(),
            weights,
            duplicates,
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn traces(&self) -> &TraceRecorder {
        &self.traces
    }

    pub fn duplicate_defaults(&self) -> DuplicateConfig {
        self.duplicates
    }

    /// Full triage of a stored item. Only a missing item/workspace or an unreadable
    /// store is an error; step failures end up in the report.
    pub async fn run(&self, item_id: Uuid) -> Result<TriageReport> {
        let item = self
            .store
            .get_item(item_id)
            .await?
            .ok_or_else(|| TriageError::NotFound(format!("feedback item {item_id}")))?;
        let workspace = self.workspace(&item.workspace_id).await?;
        let entitled = workspace.enrichment_enabled();

        let mut run = Run {
            report: TriageReport::new(&item),
            item,
            workspace,
            entitled,
        };

        let mut state = TriageState::Created;
        loop {
            run.report.path.push(state.name());
            if matches!(state, TriageState::Traced) {
                break;
            }
            state = self.step(state, &mut run).await;
        }

        tracing::info!(
            item_id = %run.report.item_id,
            workspace_id = %run.report.workspace_id,
            classification = run.report.classification.label(),
            duplicates = run.report.duplicates.label(),
            priority = run.report.priority.label(),
            traces = run.report.trace_ids.len(),
            "triage finished"
        );
        Ok(run.report)
    }

    async fn step(&self, state: TriageState, run: &mut Run) -> TriageState {
        match state {
            TriageState::Created if run.entitled => TriageState::Classifying,
            TriageState::Created => {
                tracing::debug!(item_id = %run.item.id, plan = ?run.workspace.plan, "workspace not entitled; triage skipped");
                TriageState::ClassificationSkipped(SkipReason::NotEntitled)
            }

            TriageState::Classifying => self.classify_step(run).await,

            TriageState::Classified(_) | TriageState::ClassificationSkipped(_) if run.entitled => {
                TriageState::DuplicateChecking
            }
            TriageState::Classified(_) | TriageState::ClassificationSkipped(_) => {
                TriageState::DuplicateCheckSkipped(SkipReason::NotEntitled)
            }

            TriageState::DuplicateChecking => self.duplicate_step(run).await,

            TriageState::DuplicatesFound(_)
            | TriageState::NoDuplicates
            | TriageState::DuplicateCheckSkipped(_)
                if run.entitled =>
            {
                TriageState::PriorityScoring
            }
            TriageState::DuplicatesFound(_)
            | TriageState::NoDuplicates
            | TriageState::DuplicateCheckSkipped(_) => {
                TriageState::ScoringSkipped(SkipReason::NotEntitled)
            }

            TriageState::PriorityScoring => self.priority_step(run).await,

            TriageState::Scored(_) | TriageState::ScoringSkipped(_) => {
                if run.entitled {
                    self.sentiment_step(run).await;
                }
                TriageState::Traced
            }

            TriageState::Traced => TriageState::Traced,
        }
    }

    async fn classify_step(&self, run: &mut Run) -> TriageState {
        let started = Instant::now();
        let item = &run.item;
        let result = match self.classifier.classify(&item.title, &item.description).await {
            Ok(c) => self
                .store
                .apply_classification(item.id, &c)
                .await
                .map(|_| c),
            Err(e) => Err(e),
        };

        let draft = classification_trace(item, &result, self.classifier.provider_name(), "triage")
            .elapsed_since(started);
        self.push_trace(run, draft).await;

        match result {
            Ok(c) => {
                run.item.category = Some(c.category);
                run.item.classification_confidence = Some(c.confidence);
                run.item.machine_classified = true;
                self.finish(run, Step::Classification, StepOutcome::Done);
                TriageState::Classified(c)
            }
            Err(e) => {
                tracing::warn!(item_id = %run.item.id, step = Step::Classification.as_str(), error = %e, "triage step failed");
                let reason = SkipReason::from(&e);
                self.finish(run, Step::Classification, StepOutcome::Skipped(reason.clone()));
                TriageState::ClassificationSkipped(reason)
            }
        }
    }

    async fn duplicate_step(&self, run: &mut Run) -> TriageState {
        let result = self
            .traced_duplicate_check(&run.item, &self.duplicates)
            .await;
        if let Some(id) = result.1 {
            run.report.trace_ids.push(id);
        }
        match result.0 {
            Ok(check) => {
                self.finish(run, Step::DuplicateCheck, StepOutcome::Done);
                run.report.duplicates_found = check.duplicates.clone();
                if check.duplicates.is_empty() {
                    TriageState::NoDuplicates
                } else {
                    TriageState::DuplicatesFound(check.duplicates)
                }
            }
            Err(e) => {
                tracing::warn!(item_id = %run.item.id, step = Step::DuplicateCheck.as_str(), error = %e, "triage step failed");
                let reason = SkipReason::from(&e);
                self.finish(run, Step::DuplicateCheck, StepOutcome::Skipped(reason.clone()));
                TriageState::DuplicateCheckSkipped(reason)
            }
        }
    }

    async fn priority_step(&self, run: &mut Run) -> TriageState {
        let similar = run.report.duplicates_found.len() as u32;
        let (result, trace_id) = self
            .traced_priority(&run.item, &run.workspace, similar)
            .await;
        if let Some(id) = trace_id {
            run.report.trace_ids.push(id);
        }
        match result {
            Ok(assessment) => {
                self.finish(run, Step::Priority, StepOutcome::Done);
                run.report.assessment = Some(assessment.clone());
                TriageState::Scored(Box::new(assessment))
            }
            Err(e) => {
                tracing::warn!(item_id = %run.item.id, step = Step::Priority.as_str(), error = %e, "triage step failed");
                let reason = SkipReason::from(&e);
                self.finish(run, Step::Priority, StepOutcome::Skipped(reason.clone()));
                TriageState::ScoringSkipped(reason)
            }
        }
    }

    /// Local heuristic; the only failure is losing the store write.
    async fn sentiment_step(&self, run: &mut Run) {
        let started = Instant::now();
        let text = run.item.combined_text();
        let (reading, counts) = self.sentiment.read_with_counts(&text, run.item.vote_count);
        let stored = self.store.set_sentiment(run.item.id, reading).await;

        let summary = format!(
            "Sentiment {:?} ({}/100), {:?}, urgency {:?}",
            reading.label, reading.intensity, reading.emotion, reading.urgency
        )
        .to_lowercase();
        let draft = NewTrace::new(
            run.item.workspace_id.clone(),
            Feature::SentimentAnalysis,
            ENTITY_FEEDBACK_ITEM,
            run.item.id,
        )
        .inputs(json!({ "text": text, "votes": run.item.vote_count }))
        .outputs(json!({ "reading": reading }), Some(reading.intensity as f32 / 100.0))
        .steps(vec![
            format!(
                "{} positive terms (weight {}), {} negative terms (weight {})",
                counts.positive_terms, counts.positive_weight, counts.negative_terms, counts.negative_weight
            ),
            format!("{} urgency terms → urgency {:?}", counts.urgency_terms, reading.urgency),
            format!("{} votes → impact {:?}", run.item.vote_count, reading.impact),
        ])
        .summary(summary)
        .elapsed_since(started);
        self.push_trace(run, draft).await;

        match stored {
            Ok(()) => {
                run.item.sentiment = Some(reading);
                self.finish(run, Step::Sentiment, StepOutcome::Done);
            }
            Err(e) => {
                tracing::warn!(item_id = %run.item.id, step = Step::Sentiment.as_str(), error = %e, "triage step failed");
                self.finish(run, Step::Sentiment, StepOutcome::Skipped(SkipReason::from(&e)));
            }
        }
    }

    // ------------------------------------------------------------
    // On-demand entry points (HTTP)
    // ------------------------------------------------------------

    /// Duplicate check for an existing item. Bad parameters are rejected before anything
    /// runs; otherwise errors are returned and the trace is written.
    pub async fn check_duplicates(
        &self,
        workspace_id: &str,
        item_id: Uuid,
        cfg: &DuplicateConfig,
    ) -> Result<DuplicateCheck> {
        let (item, _) = self.entitled_item(workspace_id, item_id).await?;
        validate_config(cfg)?;
        self.traced_duplicate_check(&item, cfg).await.0
    }

    /// Priority assessment for an existing item. The similar-posts signal comes from a
    /// fresh duplicate check; if that check fails the signal is zero.
    pub async fn assess_priority(
        &self,
        workspace_id: &str,
        item_id: Uuid,
    ) -> Result<PriorityAssessment> {
        let (item, workspace) = self.entitled_item(workspace_id, item_id).await?;
        let similar = match self.traced_duplicate_check(&item, &self.duplicates).await.0 {
            Ok(check) => check.duplicates.len() as u32,
            Err(e) => {
                tracing::warn!(item_id = %item.id, error = %e, "similar-post count unavailable; using 0");
                0
            }
        };
        self.traced_priority(&item, &workspace, similar).await.0
    }

    async fn entitled_item(&self, workspace_id: &str, item_id: Uuid) -> Result<(FeedbackItem, Workspace)> {
        let workspace = self.workspace(workspace_id).await?;
        let item = self
            .store
            .get_item(item_id)
            .await?
            .filter(|it| it.workspace_id == workspace_id)
            .ok_or_else(|| TriageError::NotFound(format!("feedback item {item_id}")))?;
        if !workspace.enrichment_enabled() {
            return Err(TriageError::InvalidInput(format!(
                "plan {:?} of workspace {workspace_id} does not include automated enrichment",
                workspace.plan
            )));
        }
        Ok((item, workspace))
    }

    async fn workspace(&self, id: &str) -> Result<Workspace> {
        self.store
            .get_workspace(id)
            .await?
            .ok_or_else(|| TriageError::NotFound(format!("workspace {id}")))
    }

    // ------------------------------------------------------------
    // Step bodies shared by the pipeline and on-demand calls
    // ------------------------------------------------------------

    async fn traced_duplicate_check(
        &self,
        item: &FeedbackItem,
        cfg: &DuplicateConfig,
    ) -> (Result<DuplicateCheck>, Option<Uuid>) {
        let started = Instant::now();
        let target = TargetItem::from(item);
        let candidates = self
            .store
            .duplicate_candidates(&item.workspace_id, item.id, cfg.candidate_limit)
            .await;
        let candidate_ids: Vec<Uuid> = candidates
            .as_ref()
            .map(|c| c.iter().map(|i| i.id).collect())
            .unwrap_or_default();

        let result = match candidates {
            Ok(c) => self.scorer.find_duplicates(&target, &c, cfg).await,
            Err(e) => Err(e),
        };

        let draft = NewTrace::new(
            item.workspace_id.clone(),
            Feature::DuplicateDetection,
            ENTITY_FEEDBACK_ITEM,
            item.id,
        )
        .inputs(json!({
            "target_id": item.id,
            "title": item.title,
            "candidate_ids": candidate_ids,
            "threshold": cfg.threshold,
            "max_results": cfg.max_results,
            "include_related": cfg.include_related,
        }));
        let draft = match &result {
            Ok(check) => {
                let top = check.duplicates.first().map(|d| d.score);
                let mut steps = vec![format!(
                    "Scored {} candidates against threshold {:.2}",
                    check.candidates_scored, cfg.threshold
                )];
                steps.extend(
                    check
                        .duplicates
                        .iter()
                        .map(|d| format!("{} scored {:.2}: {}", d.candidate_id, d.score, d.reason)),
                );
                let summary = match check.duplicates.len() {
                    0 => format!("No duplicates for \"{}\"", item.title),
                    n => format!("{n} possible duplicate(s) for \"{}\"", item.title),
                };
                draft
                    .outputs(json!({ "duplicates": check.duplicates, "related": check.related }), top)
                    .steps(steps)
                    .summary(summary)
            }
            Err(e) => draft
                .failed(e)
                .steps(vec![format!("Duplicate check failed: {e}")])
                .summary(format!("Duplicate check unavailable for \"{}\"", item.title)),
        };
        let trace_id = self.traces.record_or_log(draft.elapsed_since(started)).await;
        (result, trace_id)
    }

    async fn traced_priority(
        &self,
        item: &FeedbackItem,
        workspace: &Workspace,
        similar_posts: u32,
    ) -> (Result<PriorityAssessment>, Option<Uuid>) {
        let started = Instant::now();
        let signals = signals_for(item, workspace, similar_posts);
        let weights = self.weights.current();
        let result = self
            .priority
            .assess(
                &item.combined_text(),
                &signals,
                item.requester.as_ref(),
                &workspace.business,
                &weights,
            )
            .await;

        let draft = NewTrace::new(
            item.workspace_id.clone(),
            Feature::PriorityScoring,
            ENTITY_FEEDBACK_ITEM,
            item.id,
        )
        .inputs(json!({
            "signals": signals,
            "requester": item.requester,
            "business": workspace.business,
            "weights": weights,
        }));
        let draft = match &result {
            Ok((a, hints)) => draft
                .outputs(json!({ "assessment": a, "hints": hints }), None)
                .steps(priority_steps(a, hints))
                .summary(format!("\"{}\": {}", item.title, a.justification)),
            Err(e) => draft
                .failed(e)
                .steps(vec![format!("Priority scoring failed: {e}")])
                .summary(format!("Priority scoring unavailable for \"{}\"", item.title)),
        };
        let trace_id = self.traces.record_or_log(draft.elapsed_since(started)).await;
        (result.map(|(a, _)| a), trace_id)
    }

    async fn push_trace(&self, run: &mut Run, draft: NewTrace) {
        if let Some(id) = self.traces.record_or_log(draft).await {
            run.report.trace_ids.push(id);
        }
    }

    fn finish(&self, run: &mut Run, step: Step, outcome: StepOutcome) {
        counter!("triage_steps_total", "step" => step.as_str(), "outcome" => outcome.label())
            .increment(1);
        let slot = match step {
            Step::Classification => &mut run.report.classification,
            Step::DuplicateCheck => &mut run.report.duplicates,
            Step::Priority => &mut run.report.priority,
            Step::Sentiment => &mut run.report.sentiment,
        };
        *slot = outcome;
    }
}

/// Engagement signals; reach share is unique voters over the workspace's active users.
pub fn signals_for(item: &FeedbackItem, workspace: &Workspace, similar_posts: u32) -> PrioritySignals {
    let pct = if workspace.active_users == 0 {
        0.0
    } else {
        (item.unique_voters as f32 / workspace.active_users as f32 * 100.0).min(100.0)
    };
    PrioritySignals {
        vote_count: item.vote_count,
        comment_count: item.comment_count,
        unique_voters: item.unique_voters,
        percentage_of_active_users: pct,
        similar_posts_count: similar_posts,
    }
}

fn priority_steps(a: &PriorityAssessment, hints: &PriorityHints) -> Vec<String> {
    let mut steps: Vec<String> = a
        .factors
        .iter()
        .map(|f| {
            format!(
                "{}: {:.1}/10 × {:.2}",
                f.factor.label(),
                f.score,
                f.weight
            )
        })
        .collect();
    steps.push(format!(
        "Model hints: alignment {:.1}, effort {:.1}",
        hints.strategic_alignment, hints.effort
    ));
    steps.push(format!(
        "Composite {:.2}/10 → {:?} → {}",
        a.composite, a.level, a.suggested_action
    ));
    steps
}

/// Trace for one classification attempt (pipeline or batch `trigger`).
pub fn classification_trace(
    item: &FeedbackItem,
    result: &Result<Classification>,
    provider: &str,
    trigger: &str,
) -> NewTrace {
    let draft = NewTrace::new(
        item.workspace_id.clone(),
        Feature::Classification,
        ENTITY_FEEDBACK_ITEM,
        item.id,
    )
    .inputs(json!({
        "title": item.title,
        "description": item.description,
        "previous_category": item.category,
        "previous_confidence": item.classification_confidence,
        "provider": provider,
        "trigger": trigger,
    }));
    match result {
        Ok(c) => {
            let mut steps = vec![format!("Service label \"{}\"", c.raw_label)];
            if c.category.as_str() != c.raw_label.trim() {
                steps.push(format!("Mapped to category {}", c.category));
            }
            steps.push(format!("Confidence {:.2}", c.confidence));
            if !c.reasoning.is_empty() {
                steps.push(c.reasoning.clone());
            }
            draft
                .outputs(
                    json!({
                        "category": c.category,
                        "confidence": c.confidence,
                        "reasoning": c.reasoning,
                        "raw_label": c.raw_label,
                    }),
                    Some(c.confidence),
                )
                .steps(steps)
                .summary(format!(
                    "Classified \"{}\" as {} ({:.0}%)",
                    item.title,
                    c.category,
                    c.confidence * 100.0
                ))
        }
        Err(e) => draft
            .failed(e)
            .steps(vec![format!("Classification failed: {e}")])
            .summary(format!("Classification unavailable for \"{}\"", item.title)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::ai_adapter::{FailingProvider, MockProvider};
    use crate::analyze::weights::PriorityWeights;
    use crate::error::ProviderError;
    use crate::model::Plan;
    use crate::store::{MemoryStore, TraceStore};
    use crate::trace::TraceQuery;

    async fn setup(plan: Plan, provider: DynProvider) -> (Arc<MemoryStore>, Orchestrator) {
        let store = Arc::new(MemoryStore::with_workspaces([Workspace::new("ws", plan)]));
        let orch = Orchestrator::new(
            store.clone(),
            TraceRecorder::new(store.clone()),
            provider,
            Arc::new(HotReloadWeights::fixed(PriorityWeights::default())),
            DuplicateConfig::default(),
        );
        (store, orch)
    }

    #[tokio::test]
    async fn entitled_run_walks_every_state_and_traces_each_step() {
        let (store, orch) = setup(Plan::Pro, Arc::new(MockProvider::classifying("Bug", 0.9))).await;
        let it = FeedbackItem::new("ws", "Export crashes");
        store.insert_item(it.clone()).await.unwrap();

        let report = orch.run(it.id).await.unwrap();
        assert_eq!(
            report.path,
            vec![
                "created",
                "classifying",
                "classified",
                "duplicate_checking",
                "no_duplicates",
                "priority_scoring",
                "scored",
                "traced"
            ]
        );
        assert_eq!(report.trace_ids.len(), 4);
        let traces = store.list_traces(&TraceQuery::workspace("ws")).await.unwrap();
        assert_eq!(traces.len(), 4);
        assert!(store.get_item(it.id).await.unwrap().unwrap().sentiment.is_some());
    }

    #[tokio::test]
    async fn not_entitled_skips_everything_without_traces() {
        let (store, orch) = setup(Plan::Free, Arc::new(MockProvider::default())).await;
        let it = FeedbackItem::new("ws", "Add dark mode");
        store.insert_item(it.clone()).await.unwrap();

        let report = orch.run(it.id).await.unwrap();
        assert_eq!(
            report.path,
            vec![
                "created",
                "classification_skipped",
                "duplicate_check_skipped",
                "scoring_skipped",
                "traced"
            ]
        );
        assert!(report.trace_ids.is_empty());
        assert_eq!(report.classification, StepOutcome::Skipped(SkipReason::NotEntitled));
        assert!(store.get_item(it.id).await.unwrap().unwrap().category.is_none());
    }

    #[tokio::test]
    async fn failing_steps_do_not_stop_the_pipeline() {
        let (store, orch) = setup(
            Plan::Business,
            Arc::new(FailingProvider::new(ProviderError::Http("503".into()))),
        )
        .await;
        let other = FeedbackItem::new("ws", "Older post");
        let it = FeedbackItem::new("ws", "Add SSO");
        store.insert_item(other).await.unwrap();
        store.insert_item(it.clone()).await.unwrap();

        let report = orch.run(it.id).await.unwrap();
        assert!(report.path.contains(&"classification_skipped"));
        assert!(report.path.contains(&"duplicate_check_skipped"));
        assert!(report.path.contains(&"scoring_skipped"));
        assert_eq!(report.path.last(), Some(&"traced"));
        assert!(report.sentiment.is_done());
        let kind_of = |o: &StepOutcome| match o {
            StepOutcome::Skipped(SkipReason::Failed { kind, .. }) => *kind,
            _ => "",
        };
        assert_eq!(kind_of(&report.classification), "classification_unavailable");
        assert_eq!(kind_of(&report.duplicates), "duplicate_check_unavailable");
        assert_eq!(kind_of(&report.priority), "priority_scoring_unavailable");
        // classification + duplicates + priority failures, plus sentiment
        assert_eq!(report.trace_ids.len(), 4);

        let failed = store
            .list_traces(&TraceQuery {
                feature: Some(Feature::Classification),
                ..TraceQuery::workspace("ws")
            })
            .await
            .unwrap();
        assert_eq!(failed[0].outputs["error"], "classification_unavailable");
        assert!(failed[0].confidence.is_none());
    }

    #[tokio::test]
    async fn similar_posts_feed_priority_signal() {
        let provider = MockProvider::default().with_similarity("reports", 0.9);
        let (store, orch) = setup(Plan::Pro, Arc::new(provider)).await;
        store
            .insert_item(FeedbackItem::new("ws", "Dark mode for reports"))
            .await
            .unwrap();
        let it = FeedbackItem::new("ws", "Dark reports please");
        store.insert_item(it.clone()).await.unwrap();

        let report = orch.run(it.id).await.unwrap();
        assert!(report.path.contains(&"duplicates_found"));
        assert_eq!(report.duplicates_found.len(), 1);
        let traces = store
            .list_traces(&TraceQuery {
                feature: Some(Feature::PriorityScoring),
                ..TraceQuery::workspace("ws")
            })
            .await
            .unwrap();
        assert_eq!(traces[0].inputs["signals"]["similar_posts_count"], 1);
    }

    #[test]
    fn reach_share_uses_active_users() {
        let mut ws = Workspace::new("ws", Plan::Pro);
        ws.active_users = 200;
        let it = FeedbackItem::new("ws", "x").with_votes(30, 20);
        let s = signals_for(&it, &ws, 2);
        assert!((s.percentage_of_active_users - 10.0).abs() < 1e-4);
        assert_eq!(s.similar_posts_count, 2);

        ws.active_users = 0;
        assert_eq!(signals_for(&it, &ws, 0).percentage_of_active_users, 0.0);
    }
}
