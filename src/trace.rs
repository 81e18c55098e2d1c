//! trace.rs: append-only audit log of automated decisions.
//!
//! One `DecisionTrace` per executed decision, failures included: a failed step records
//! `{"error": <kind>, "message": ...}` as outputs and no confidence.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{Result, TriageError};
use crate::store::TraceStore;

pub const DEFAULT_TRACE_LIMIT: usize = 50;
pub const MAX_TRACE_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Feature {
    Classification,
    DuplicateDetection,
    PriorityScoring,
    SentimentAnalysis,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Classification => "classification",
            Feature::DuplicateDetection => "duplicate-detection",
            Feature::PriorityScoring => "priority-scoring",
            Feature::SentimentAnalysis => "sentiment-analysis",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTrace {
    pub id: Uuid,
    pub workspace_id: String,
    pub feature: Feature,
    pub entity_type: String,
    pub entity_id: String,
    pub inputs: Value,
    pub outputs: Value,
    pub confidence: Option<f32>,
    pub reasoning_steps: Vec<String>,
    /// One-line human summary; the free-text search runs over it.
    pub summary: String,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Everything the caller knows about a decision; id and timestamp are assigned on record.
#[derive(Debug, Clone)]
pub struct NewTrace {
    pub workspace_id: String,
    pub feature: Feature,
    pub entity_type: String,
    pub entity_id: String,
    pub inputs: Value,
    pub outputs: Value,
    pub confidence: Option<f32>,
    pub reasoning_steps: Vec<String>,
    pub summary: String,
    pub latency_ms: u64,
}

impl NewTrace {
    pub fn new(
        workspace_id: impl Into<String>,
        feature: Feature,
        entity_type: impl Into<String>,
        entity_id: impl ToString,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            feature,
            entity_type: entity_type.into(),
            entity_id: entity_id.to_string(),
            inputs: Value::Null,
            outputs: Value::Null,
            confidence: None,
            reasoning_steps: Vec::new(),
            summary: String::new(),
            latency_ms: 0,
        }
    }

    pub fn inputs(mut self, inputs: Value) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn outputs(mut self, outputs: Value, confidence: Option<f32>) -> Self {
        self.outputs = outputs;
        self.confidence = confidence.filter(|c| c.is_finite());
        self
    }

    /// Outputs for a failed step: error kind + message, confidence absent.
    pub fn failed(mut self, err: &TriageError) -> Self {
        self.outputs = json!({ "error": err.kind(), "message": err.to_string() });
        self.confidence = None;
        self
    }

    pub fn steps(mut self, steps: Vec<String>) -> Self {
        self.reasoning_steps = steps;
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn elapsed_since(mut self, started: Instant) -> Self {
        self.latency_ms = started.elapsed().as_millis() as u64;
        self
    }
}

/// Read filter: workspace is mandatory, the rest optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceQuery {
    #[serde(default)]
    pub workspace_id: String,
    #[serde(default)]
    pub feature: Option<Feature>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl TraceQuery {
    pub fn workspace(id: impl Into<String>) -> Self {
        Self {
            workspace_id: id.into(),
            ..Self::default()
        }
    }

    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_TRACE_LIMIT)
            .clamp(1, MAX_TRACE_LIMIT)
    }

    pub fn matches(&self, t: &DecisionTrace) -> bool {
        if t.workspace_id != self.workspace_id {
            return false;
        }
        if self.feature.is_some_and(|f| f != t.feature) {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => t
                .summary
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            _ => true,
        }
    }
}

#[derive(Clone)]
pub struct TraceRecorder {
    store: Arc<dyn TraceStore>,
}

impl TraceRecorder {
    pub fn new(store: Arc<dyn TraceStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, draft: NewTrace) -> Result<Uuid> {
        let trace = DecisionTrace {
            id: Uuid::new_v4(),
            workspace_id: draft.workspace_id,
            feature: draft.feature,
            entity_type: draft.entity_type,
            entity_id: draft.entity_id,
            inputs: draft.inputs,
            outputs: draft.outputs,
            confidence: draft.confidence,
            reasoning_steps: draft.reasoning_steps,
            summary: draft.summary,
            latency_ms: draft.latency_ms,
            created_at: Utc::now(),
        };
        let id = trace.id;
        let feature = trace.feature.as_str();
        self.store.append(trace).await?;
        counter!("decision_traces_total", "feature" => feature).increment(1);
        Ok(id)
    }

    /// Record without failing the caller; a lost trace is logged.
    pub async fn record_or_log(&self, draft: NewTrace) -> Option<Uuid> {
        let entity = draft.entity_id.clone();
        let feature = draft.feature.as_str();
        match self.record(draft).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(entity_id = %entity, feature, error = %e, "decision trace not written");
                None
            }
        }
    }

    pub async fn list(&self, query: &TraceQuery) -> Result<Vec<DecisionTrace>> {
        self.store.list_traces(query).await
    }
}
