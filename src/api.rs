//! HTTP boundary: a thin axum layer over the triage engine.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::analyze::ai_adapter::{build_provider, DynProvider};
use crate::analyze::similarity::DuplicateCheck;
use crate::analyze::weights::HotReloadWeights;
use crate::config::TriageConfig;
use crate::error::{Result, TriageError};
use crate::metrics::Metrics;
use crate::model::{
    Category, FeedbackItem, NewFeedback, PriorityAssessment, SentimentReading, MAX_DESCRIPTION_CHARS,
    MAX_TITLE_CHARS,
};
use crate::orchestrator::Orchestrator;
use crate::queue::{TriageJob, TriageQueue};
use crate::reclassify::{ReclassifyJob, ReclassifyParams, ReclassifySummary};
use crate::sentiment::SentimentAnalyzer;
use crate::store::{load_workspaces_file, FeedbackStore, MemoryStore};
use crate::trace::{DecisionTrace, Feature, TraceQuery, TraceRecorder};

pub const DEFAULT_WORKSPACES_PATH: &str = "config/workspaces.json";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn FeedbackStore>,
    pub engine: Arc<Orchestrator>,
    pub queue: TriageQueue,
    pub reclassify: Arc<ReclassifyJob>,
    sentiment: SentimentAnalyzer,
    secret_digest: Option<[u8; 32]>,
    metrics: Option<Metrics>,
}

impl AppState {
    /// Production wiring: provider from config/env, store seeded from the workspaces file.
    /// Must run inside a Tokio runtime (spawns the triage worker).
    pub fn from_config(cfg: &TriageConfig) -> anyhow::Result<Self> {
        let workspaces_path = cfg
            .workspaces_path
            .clone()
            .or_else(|| Some(PathBuf::from(DEFAULT_WORKSPACES_PATH)).filter(|p| p.exists()));
        let store = match workspaces_path {
            Some(p) => {
                let seeded = load_workspaces_file(&p)?;
                tracing::info!(path = %p.display(), count = seeded.len(), "workspaces loaded");
                MemoryStore::with_workspaces(seeded)
            }
            None => MemoryStore::new(),
        };
        let weights = Arc::new(HotReloadWeights::new(&cfg.priority.weights_path));
        let mut state = Self::build(cfg, Arc::new(store), build_provider(&cfg.ai), weights);
        state.metrics = Metrics::from_env();
        Ok(state)
    }

    /// Explicit wiring (tests, tools).
    pub fn build(
        cfg: &TriageConfig,
        store: Arc<MemoryStore>,
        provider: DynProvider,
        weights: Arc<HotReloadWeights>,
    ) -> Self {
        let traces = TraceRecorder::new(store.clone());
        let engine = Arc::new(Orchestrator::new(
            store.clone(),
            traces.clone(),
            provider,
            weights,
            cfg.duplicates,
        ));
        let reclassify = Arc::new(ReclassifyJob::new(
            store.clone(),
            traces,
            engine.classifier().clone(),
            cfg.reclassify.clone(),
        ));
        let queue = TriageQueue::start(engine.clone(), cfg.queue.capacity);
        let secret = cfg.reclassify.secret.trim();
        let secret_digest = (!secret.is_empty()).then(|| digest(secret));
        if secret_digest.is_none() {
            tracing::warn!("no reclassify secret configured; POST /jobs/reclassify will reject every call");
        }

        Self {
            store,
            engine,
            queue,
            reclassify,
            sentiment: SentimentAnalyzer::new(),
            secret_digest,
            metrics: None,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/workspaces/{workspace_id}/feedback", post(create_feedback))
        .route("/workspaces/{workspace_id}/feedback/{id}", get(get_feedback))
        .route(
            "/workspaces/{workspace_id}/feedback/{id}/category",
            put(set_category),
        )
        .route(
            "/workspaces/{workspace_id}/feedback/{id}/duplicates",
            get(feedback_duplicates),
        )
        .route(
            "/workspaces/{workspace_id}/feedback/{id}/priority",
            get(feedback_priority),
        )
        .route("/workspaces/{workspace_id}/traces", get(list_traces))
        .route("/analyze/sentiment", post(analyze_sentiment))
        .route("/jobs/reclassify", post(run_reclassify));

    if let Some(m) = &state.metrics {
        app = app.merge(m.router());
    }

    app.layer(CorsLayer::very_permissive()).with_state(state)
}

async fn create_feedback(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
    Json(body): Json<NewFeedback>,
) -> Result<(StatusCode, Json<FeedbackItem>)> {
    let title = body.title.trim();
    let description = body.description.trim();
    if title.is_empty() {
        return Err(TriageError::InvalidInput("title must not be empty".into()));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(TriageError::InvalidInput(format!(
            "title longer than {MAX_TITLE_CHARS} chars"
        )));
    }
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(TriageError::InvalidInput(format!(
            "description longer than {MAX_DESCRIPTION_CHARS} chars"
        )));
    }
    if state.store.get_workspace(&workspace_id).await?.is_none() {
        return Err(TriageError::NotFound(format!("workspace {workspace_id}")));
    }

    let mut item = FeedbackItem::new(workspace_id.clone(), title)
        .with_description(description)
        .with_votes(body.vote_count, body.unique_voters);
    item.comment_count = body.comment_count;
    item.requester = body.requester;
    state.store.insert_item(item.clone()).await?;

    // Enrichment runs after the response; a full queue only delays it to the next batch.
    state.queue.enqueue(TriageJob {
        item_id: item.id,
        workspace_id,
    });
    Ok((StatusCode::CREATED, Json(item)))
}

async fn get_feedback(
    State(state): State<AppState>,
    Path((workspace_id, id)): Path<(String, Uuid)>,
) -> Result<Json<FeedbackItem>> {
    state
        .store
        .get_item(id)
        .await?
        .filter(|it| it.workspace_id == workspace_id)
        .map(Json)
        .ok_or_else(|| TriageError::NotFound(format!("feedback item {id}")))
}

#[derive(Debug, Deserialize)]
struct CategoryOverride {
    category: Category,
}

/// Human override; the item stops being a reclassification candidate.
async fn set_category(
    State(state): State<AppState>,
    Path((workspace_id, id)): Path<(String, Uuid)>,
    Json(body): Json<CategoryOverride>,
) -> Result<Json<FeedbackItem>> {
    let owned = state
        .store
        .get_item(id)
        .await?
        .filter(|it| it.workspace_id == workspace_id);
    if owned.is_none() {
        return Err(TriageError::NotFound(format!("feedback item {id}")));
    }
    state.store.set_category_by_human(id, body.category).await?;
    tracing::info!(%workspace_id, %id, category = ?body.category, "category set by human");
    get_feedback(State(state), Path((workspace_id, id))).await
}

#[derive(Debug, Default, Deserialize)]
struct DuplicateParams {
    threshold: Option<f32>,
    max_results: Option<usize>,
    include_related: Option<bool>,
}

async fn feedback_duplicates(
    State(state): State<AppState>,
    Path((workspace_id, id)): Path<(String, Uuid)>,
    Query(q): Query<DuplicateParams>,
) -> Result<Json<DuplicateCheck>> {
    let mut cfg = state.engine.duplicate_defaults();
    if let Some(t) = q.threshold {
        cfg.threshold = t;
        cfg.related_floor = cfg.related_floor.min(t);
    }
    if let Some(n) = q.max_results {
        cfg.max_results = n;
    }
    if let Some(r) = q.include_related {
        cfg.include_related = r;
    }
    let check = state.engine.check_duplicates(&workspace_id, id, &cfg).await?;
    Ok(Json(check))
}

async fn feedback_priority(
    State(state): State<AppState>,
    Path((workspace_id, id)): Path<(String, Uuid)>,
) -> Result<Json<PriorityAssessment>> {
    Ok(Json(state.engine.assess_priority(&workspace_id, id).await?))
}

#[derive(Debug, Deserialize)]
struct TraceParams {
    feature: Option<Feature>,
    search: Option<String>,
    limit: Option<usize>,
}

async fn list_traces(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
    Query(q): Query<TraceParams>,
) -> Result<Json<Vec<DecisionTrace>>> {
    if state.store.get_workspace(&workspace_id).await?.is_none() {
        return Err(TriageError::NotFound(format!("workspace {workspace_id}")));
    }
    let query = TraceQuery {
        workspace_id,
        feature: q.feature,
        search: q.search,
        limit: q.limit,
    };
    Ok(Json(state.engine.traces().list(&query).await?))
}

#[derive(Debug, Deserialize)]
struct SentimentReq {
    text: String,
    #[serde(default)]
    votes: u32,
}

async fn analyze_sentiment(
    State(state): State<AppState>,
    Json(body): Json<SentimentReq>,
) -> Result<Json<SentimentReading>> {
    if body.text.trim().is_empty() {
        return Err(TriageError::InvalidInput("text must not be empty".into()));
    }
    Ok(Json(state.sentiment.read(&body.text, body.votes)))
}

async fn run_reclassify(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReclassifySummary>> {
    authorize(&headers, state.secret_digest.as_ref())?;
    let params: ReclassifyParams = if body.iter().all(u8::is_ascii_whitespace) {
        ReclassifyParams::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| TriageError::InvalidInput(format!("malformed batch parameters: {e}")))?
    };
    Ok(Json(state.reclassify.run(&params).await?))
}

/// Bearer check against the configured secret; no secret configured rejects everything.
fn authorize(headers: &HeaderMap, expected: Option<&[u8; 32]>) -> Result<()> {
    let expected = expected.ok_or(TriageError::Unauthorized)?;
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(TriageError::Unauthorized)?;
    if digest(presented) == *expected {
        Ok(())
    } else {
        Err(TriageError::Unauthorized)
    }
}

fn digest(s: &str) -> [u8; 32] {
    Sha256::digest(s.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_secret_must_match() {
        let expected = digest("s3cret");
        let mut h = HeaderMap::new();
        assert!(authorize(&h, Some(&expected)).is_err());

        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer nope"));
        assert!(authorize(&h, Some(&expected)).is_err());

        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert!(authorize(&h, Some(&expected)).is_ok());
        assert!(authorize(&h, None).is_err());
    }
}
