// tests/common/mod.rs
//
// Shared harness: an in-memory app with two workspaces ("pro" entitled, "free" not),
// a known batch secret and a caller-chosen provider. Requests go through the router
// via tower::ServiceExt::oneshot, no sockets.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt as _;

use feedback_triage::ai_adapter::DynProvider;
use feedback_triage::analyze::weights::{HotReloadWeights, PriorityWeights};
use feedback_triage::model::{Plan, Workspace};
use feedback_triage::store::MemoryStore;
use feedback_triage::{router, AppState, TriageConfig};

pub const SECRET: &str = "test-secret";
pub const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub router: Router,
}

pub fn workspaces() -> Vec<Workspace> {
    let mut pro = Workspace::new("pro", Plan::Pro);
    pro.active_users = 500;
    pro.business.current_period_label = "Q4 2026".into();
    pro.business.company_strategy = "Grow through integrations".into();
    vec![pro, Workspace::new("free", Plan::Free)]
}

/// Must be called from inside a Tokio runtime (the triage worker is spawned).
pub fn test_app(provider: DynProvider) -> TestApp {
    let mut cfg = TriageConfig::default();
    cfg.reclassify.secret = SECRET.to_string();
    let store = Arc::new(MemoryStore::with_workspaces(workspaces()));
    let state = AppState::build(
        &cfg,
        store.clone(),
        provider,
        Arc::new(HotReloadWeights::fixed(PriorityWeights::default())),
    );
    TestApp {
        router: router(state.clone()),
        state,
        store,
    }
}

impl TestApp {
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        bearer: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            req = req.header("authorization", format!("Bearer {token}"));
        }
        let req = match body {
            Some(v) => req
                .header("content-type", "application/json")
                .body(Body::from(v.to_string())),
            None => req.body(Body::empty()),
        }
        .expect("build request");

        let resp = self
            .router
            .clone()
            .oneshot(req)
            .await
            .expect("router response");
        let status = resp.status();
        let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
            .await
            .expect("read body");
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send("GET", uri, None, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send("POST", uri, Some(body), None).await
    }

    /// Create an item and wait for its background triage to finish.
    pub async fn create_and_triage(&self, workspace: &str, body: Value) -> Value {
        let (status, item) = self
            .post(&format!("/workspaces/{workspace}/feedback"), body)
            .await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {item}");
        self.state.queue.flush().await;
        let id = item["id"].as_str().expect("id").to_string();
        let (status, fresh) = self.get(&format!("/workspaces/{workspace}/feedback/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        fresh
    }
}
