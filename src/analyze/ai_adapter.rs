//! AI adapter: provider abstraction over the external classification service,
//! plus a metering wrapper (per-call timeout + daily limit).

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::analyze::local::LocalProvider;
use crate::config::AiSection;
use crate::error::ProviderError;
use crate::model::BusinessContext;

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// Unvalidated classifier reply; the label may fall outside the category set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawClassification {
    pub label: String,
    pub confidence: f32,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScore {
    pub score: f32,
    pub reason: String,
}

/// Model-judged inputs to the priority model that cannot be derived from counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityHints {
    /// 0–10, how well the item fits the stated strategy / milestone.
    pub strategic_alignment: f32,
    /// 0–10, estimated implementation effort (10 = very large).
    pub effort: f32,
    #[serde(default)]
    pub rationale: String,
}

/// The external classification/similarity service contract.
#[async_trait]
pub trait ClassificationProvider: Send + Sync {
    async fn classify(
        &self,
        title: &str,
        description: &str,
    ) -> Result<RawClassification, ProviderError>;

    /// One score per candidate, in candidate order.
    async fn similarity(
        &self,
        target: &str,
        candidates: &[String],
    ) -> Result<Vec<SimilarityScore>, ProviderError>;

    async fn priority_hints(
        &self,
        text: &str,
        business: &BusinessContext,
    ) -> Result<PriorityHints, ProviderError>;

    /// Provider name for diagnostics/traces.
    fn name(&self) -> &'static str;
}

pub type DynProvider = Arc<dyn ClassificationProvider>;

/// Factory: build a provider according to config and environment variables.
///
/// * `AI_TEST_MODE=mock` → deterministic mock provider.
/// * `AI_TEST_MODE=error` → every call fails.
/// * `enabled == false` → disabled provider (every call fails with `Disabled`).
/// * `provider = "openai"` with a key → OpenAI, metered with the daily limit.
/// * otherwise the local heuristic provider.
///
/// Every variant is wrapped with the per-call timeout.
pub fn build_provider(cfg: &AiSection) -> DynProvider {
    let timeout = Duration::from_millis(cfg.timeout_ms);
    match std::env::var("AI_TEST_MODE").ok().as_deref() {
        Some("mock") => {
            return Arc::new(MeteredClient::new(MockProvider::default(), timeout, None))
        }
        Some("error") => {
            return Arc::new(MeteredClient::new(
                FailingProvider::new(ProviderError::Http("forced by AI_TEST_MODE".into())),
                timeout,
                None,
            ))
        }
        _ => {}
    }

    if !cfg.enabled {
        return Arc::new(DisabledProvider);
    }

    let provider: DynProvider = match cfg.provider.as_str() {
        "openai" if !cfg.api_key.is_empty() => {
            let openai = OpenAiProvider::new(cfg.api_key.clone(), &cfg.model, timeout);
            Arc::new(MeteredClient::new(openai, timeout, Some(cfg.daily_limit)))
        }
        "openai" => {
            tracing::warn!("openai provider configured without an API key; using local heuristics");
            Arc::new(MeteredClient::new(LocalProvider::new(), timeout, None))
        }
        _ => Arc::new(MeteredClient::new(LocalProvider::new(), timeout, None)),
    };
    provider
}

// ------------------------------------------------------------
// Concrete providers
// ------------------------------------------------------------

/// OpenAI provider (Chat Completions API, JSON replies).
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: &str, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("feedback-triage/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_key,
            model: model.to_string(),
        }
    }

    async fn ask<T: serde::de::DeserializeOwned>(
        &self,
        system: &str,
        user: &str,
    ) -> Result<T, ProviderError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.1,
            max_tokens: 400,
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ProviderError::Http(format!("status {}", resp.status())));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("");
        parse_json_reply(content)
    }
}

#[async_trait]
impl ClassificationProvider for OpenAiProvider {
    async fn classify(
        &self,
        title: &str,
        description: &str,
    ) -> Result<RawClassification, ProviderError> {
        let sys = "You categorize product feedback. Allowed labels: Feature Request, Bug, \
Improvement, UI/UX, Integration, Performance, Documentation, Other. Reply with JSON only: \
{\"label\": string, \"confidence\": number 0..1, \"reasoning\": one short sentence}.";
        let user = format!("Title: {title}\nDescription: {description}");
        self.ask(sys, &user).await
    }

    async fn similarity(
        &self,
        target: &str,
        candidates: &[String],
    ) -> Result<Vec<SimilarityScore>, ProviderError> {
        #[derive(Deserialize)]
        struct Scores {
            scores: Vec<SimilarityScore>,
        }
        let sys = "You detect duplicate product feedback. For each numbered candidate, rate how \
likely it describes the same request as the target. Reply with JSON only: {\"scores\": \
[{\"score\": number 0..1, \"reason\": short sentence}]} with one entry per candidate, in order.";
        let mut user = format!("Target: {target}\n");
        for (i, c) in candidates.iter().enumerate() {
            user.push_str(&format!("{}. {}\n", i + 1, c));
        }
        let out: Scores = self.ask(sys, &user).await?;
        if out.scores.len() != candidates.len() {
            return Err(ProviderError::Decode(format!(
                "expected {} scores, got {}",
                candidates.len(),
                out.scores.len()
            )));
        }
        Ok(out.scores)
    }

    async fn priority_hints(
        &self,
        text: &str,
        business: &BusinessContext,
    ) -> Result<PriorityHints, ProviderError> {
        let sys = "You assess product feedback for a roadmap. Reply with JSON only: \
{\"strategic_alignment\": number 0..10, \"effort\": number 0..10, \"rationale\": short sentence}.";
        let user = format!(
            "Feedback: {text}\nPeriod: {}\nStrategy: {}\nUpcoming milestone: {}",
            business.current_period_label, business.company_strategy, business.upcoming_milestone
        );
        self.ask(sys, &user).await
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Every call fails with `Disabled`; used when AI is switched off.
pub struct DisabledProvider;

#[async_trait]
impl ClassificationProvider for DisabledProvider {
    async fn classify(&self, _: &str, _: &str) -> Result<RawClassification, ProviderError> {
        Err(ProviderError::Disabled)
    }
    async fn similarity(&self, _: &str, _: &[String]) -> Result<Vec<SimilarityScore>, ProviderError> {
        Err(ProviderError::Disabled)
    }
    async fn priority_hints(
        &self,
        _: &str,
        _: &BusinessContext,
    ) -> Result<PriorityHints, ProviderError> {
        Err(ProviderError::Disabled)
    }
    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Every call fails with the configured error.
pub struct FailingProvider {
    error: ProviderError,
}

impl FailingProvider {
    pub fn new(error: ProviderError) -> Self {
        Self { error }
    }
}

#[async_trait]
impl ClassificationProvider for FailingProvider {
    async fn classify(&self, _: &str, _: &str) -> Result<RawClassification, ProviderError> {
        Err(self.error.clone())
    }
    async fn similarity(&self, _: &str, _: &[String]) -> Result<Vec<SimilarityScore>, ProviderError> {
        Err(self.error.clone())
    }
    async fn priority_hints(
        &self,
        _: &str,
        _: &BusinessContext,
    ) -> Result<PriorityHints, ProviderError> {
        Err(self.error.clone())
    }
    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Deterministic provider for tests/local runs.
///
/// Similarity is scripted by substring: a candidate containing a registered needle
/// (case-insensitive) gets that needle's score, anything else `default_similarity`.
#[derive(Debug, Clone)]
pub struct MockProvider {
    pub classification: RawClassification,
    pub hints: PriorityHints,
    pub similarity_rules: Vec<(String, f32)>,
    pub default_similarity: f32,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            classification: RawClassification {
                label: "Feature Request".to_string(),
                confidence: 0.8,
                reasoning: "Mock classification".to_string(),
            },
            hints: PriorityHints {
                strategic_alignment: 5.0,
                effort: 5.0,
                rationale: "Mock hints".to_string(),
            },
            similarity_rules: Vec::new(),
            default_similarity: 0.1,
        }
    }
}

impl MockProvider {
    pub fn classifying(label: &str, confidence: f32) -> Self {
        Self {
            classification: RawClassification {
                label: label.to_string(),
                confidence,
                reasoning: format!("Mock: looks like {label}"),
            },
            ..Self::default()
        }
    }

    pub fn with_similarity(mut self, needle: &str, score: f32) -> Self {
        self.similarity_rules.push((needle.to_lowercase(), score));
        self
    }

    pub fn with_hints(mut self, strategic_alignment: f32, effort: f32) -> Self {
        self.hints.strategic_alignment = strategic_alignment;
        self.hints.effort = effort;
        self
    }
}

#[async_trait]
impl ClassificationProvider for MockProvider {
    async fn classify(&self, _: &str, _: &str) -> Result<RawClassification, ProviderError> {
        Ok(self.classification.clone())
    }

    async fn similarity(
        &self,
        _target: &str,
        candidates: &[String],
    ) -> Result<Vec<SimilarityScore>, ProviderError> {
        Ok(candidates
            .iter()
            .map(|c| {
                let lower = c.to_lowercase();
                let hit = self
                    .similarity_rules
                    .iter()
                    .find(|(needle, _)| lower.contains(needle.as_str()));
                match hit {
                    Some((needle, score)) => SimilarityScore {
                        score: *score,
                        reason: format!("Both mention \"{needle}\""),
                    },
                    None => SimilarityScore {
                        score: self.default_similarity,
                        reason: "No overlap".to_string(),
                    },
                }
            })
            .collect())
    }

    async fn priority_hints(
        &self,
        _: &str,
        _: &BusinessContext,
    ) -> Result<PriorityHints, ProviderError> {
        Ok(self.hints.clone())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Metering wrapper (timeout + daily limit)
// ------------------------------------------------------------

/// Wraps a provider with a per-call timeout, an optional per-day call limit and reply
/// sanitization. Failed calls do not count toward the limit; nothing is retried.
pub struct MeteredClient<P> {
    inner: P,
    timeout: Duration,
    daily_limit: Option<u32>,
    counter: Mutex<DailyCounter>,
}

impl<P: ClassificationProvider> MeteredClient<P> {
    pub fn new(inner: P, timeout: Duration, daily_limit: Option<u32>) -> Self {
        Self {
            inner,
            timeout,
            daily_limit,
            counter: Mutex::new(DailyCounter::default()),
        }
    }

    /// Take one slot of today's budget under the lock; returns the day it was taken on.
    fn reserve(&self) -> Result<Option<NaiveDate>, ProviderError> {
        let Some(max) = self.daily_limit else {
            return Ok(None);
        };
        let mut g = self.counter.lock();
        if g.is_expired() {
            g.reset_to_today();
        }
        if g.count >= max {
            counter!("provider_limited_total", "provider" => self.inner.name()).increment(1);
            return Err(ProviderError::RateLimited(max));
        }
        g.count += 1;
        Ok(Some(g.date))
    }

    /// Give back a slot taken by a call that failed. A slot from a previous day is gone.
    fn release(&self, reserved_on: NaiveDate) {
        let mut g = self.counter.lock();
        if g.date == reserved_on {
            g.count = g.count.saturating_sub(1);
        }
    }

    async fn timed<T, F>(&self, call: &'static str, fut: F) -> Result<T, ProviderError>
    where
        F: std::future::Future<Output = Result<T, ProviderError>> + Send,
    {
        let reserved = self.reserve()?;
        let started = Instant::now();
        let out = match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(ProviderError::Timeout(self.timeout.as_millis() as u64)),
        };
        histogram!("provider_call_ms", "provider" => self.inner.name(), "call" => call)
            .record(started.elapsed().as_secs_f64() * 1000.0);
        if let Err(e) = &out {
            if let Some(day) = reserved {
                self.release(day);
            }
            tracing::debug!(provider = self.inner.name(), call, error = %e, "provider call failed");
            counter!("provider_errors_total", "provider" => self.inner.name(), "call" => call)
                .increment(1);
        }
        out
    }

    /// Calls made today (diagnostics).
    pub fn calls_today(&self) -> u32 {
        let g = self.counter.lock();
        if g.is_expired() {
            0
        } else {
            g.count
        }
    }
}

#[async_trait]
impl<P: ClassificationProvider> ClassificationProvider for MeteredClient<P> {
    async fn classify(
        &self,
        title: &str,
        description: &str,
    ) -> Result<RawClassification, ProviderError> {
        let mut raw = self
            .timed("classify", self.inner.classify(title, description))
            .await?;
        raw.reasoning = sanitize_reason(&raw.reasoning);
        Ok(raw)
    }

    async fn similarity(
        &self,
        target: &str,
        candidates: &[String],
    ) -> Result<Vec<SimilarityScore>, ProviderError> {
        let mut scores = self
            .timed("similarity", self.inner.similarity(target, candidates))
            .await?;
        for s in scores.iter_mut() {
            s.reason = sanitize_reason(&s.reason);
        }
        Ok(scores)
    }

    async fn priority_hints(
        &self,
        text: &str,
        business: &BusinessContext,
    ) -> Result<PriorityHints, ProviderError> {
        let mut hints = self
            .timed("priority_hints", self.inner.priority_hints(text, business))
            .await?;
        hints.rationale = sanitize_reason(&hints.rationale);
        Ok(hints)
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

#[derive(Debug, Clone)]
struct DailyCounter {
    date: NaiveDate,
    count: u32,
}

impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            date: Utc::now().date_naive(),
            count: 0,
        }
    }
}

impl DailyCounter {
    fn is_expired(&self) -> bool {
        self.date != Utc::now().date_naive()
    }
    fn reset_to_today(&mut self) {
        self.date = Utc::now().date_naive();
        self.count = 0;
    }
}

// ------------------------------------------------------------
// Reply parsing & sanitization
// ------------------------------------------------------------

/// Models sometimes wrap JSON in prose or code fences; take the outermost object.
pub fn parse_json_reply<T: serde::de::DeserializeOwned>(content: &str) -> Result<T, ProviderError> {
    static RE_OBJECT: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("json object regex"));
    let json = RE_OBJECT
        .find(content)
        .map(|m| m.as_str())
        .ok_or_else(|| ProviderError::Decode("no JSON object in reply".into()))?;
    serde_json::from_str(json).map_err(|e| ProviderError::Decode(e.to_string()))
}

/// Ensure ASCII-only, single line, and <=160 chars. Collapses whitespace.
pub fn sanitize_reason(input: &str) -> String {
    let mut out = String::with_capacity(160);
    let mut prev_space = false;
    for ch in input.chars() {
        let c = match ch {
            '\r' | '\n' | '\t' => ' ',
            c if c.is_ascii() => c,
            _ => ' ',
        };
        if c == ' ' {
            if !prev_space && !out.is_empty() {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
        if out.len() >= 160 {
            break;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowProvider;

    #[async_trait]
    impl ClassificationProvider for SlowProvider {
        async fn classify(&self, _: &str, _: &str) -> Result<RawClassification, ProviderError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(MockProvider::default().classification)
        }
        async fn similarity(
            &self,
            _: &str,
            _: &[String],
        ) -> Result<Vec<SimilarityScore>, ProviderError> {
            Ok(Vec::new())
        }
        async fn priority_hints(
            &self,
            _: &str,
            _: &BusinessContext,
        ) -> Result<PriorityHints, ProviderError> {
            Ok(MockProvider::default().hints)
        }
        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn slow_call_degrades_to_timeout() {
        let client = MeteredClient::new(SlowProvider, Duration::from_millis(20), None);
        let err = client.classify("t", "").await.unwrap_err();
        assert_eq!(err, ProviderError::Timeout(20));
    }

    #[tokio::test]
    async fn long_local_similarity_stays_within_timebox() {
        let client = MeteredClient::new(LocalProvider::new(), Duration::from_millis(50), None);
        let target = "alpha beta gamma ".repeat(2000);
        let candidates = vec!["delta epsilon zeta ".repeat(2000)];

        let started = Instant::now();
        let out = client.similarity(&target, &candidates).await;
        let elapsed = started.elapsed();
        assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
        match out {
            Ok(scores) => {
                assert_eq!(scores.len(), 1);
                assert!(scores[0].score < 0.5);
            }
            Err(e) => assert_eq!(e, ProviderError::Timeout(50)),
        }
    }

    struct DelayedProvider {
        fail: bool,
    }

    #[async_trait]
    impl ClassificationProvider for DelayedProvider {
        async fn classify(&self, _: &str, _: &str) -> Result<RawClassification, ProviderError> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.fail {
                Err(ProviderError::Http("503".into()))
            } else {
                Ok(MockProvider::default().classification)
            }
        }
        async fn similarity(
            &self,
            _: &str,
            _: &[String],
        ) -> Result<Vec<SimilarityScore>, ProviderError> {
            Ok(Vec::new())
        }
        async fn priority_hints(
            &self,
            _: &str,
            _: &BusinessContext,
        ) -> Result<PriorityHints, ProviderError> {
            Ok(MockProvider::default().hints)
        }
        fn name(&self) -> &'static str {
            "delayed"
        }
    }

    #[tokio::test]
    async fn concurrent_calls_never_exceed_daily_limit() {
        let client = MeteredClient::new(
            DelayedProvider { fail: false },
            Duration::from_secs(1),
            Some(2),
        );
        let (a, b, c, d) = tokio::join!(
            client.classify("a", ""),
            client.classify("b", ""),
            client.classify("c", ""),
            client.classify("d", ""),
        );
        let results = [a, b, c, d];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(ProviderError::RateLimited(2))))
                .count(),
            2
        );
        assert_eq!(client.calls_today(), 2);
    }

    #[tokio::test]
    async fn failed_calls_give_their_slot_back() {
        let client = MeteredClient::new(
            DelayedProvider { fail: true },
            Duration::from_secs(1),
            Some(1),
        );
        let (a, b) = tokio::join!(client.classify("a", ""), client.classify("b", ""));
        assert_eq!(a.unwrap_err(), ProviderError::Http("503".into()));
        assert_eq!(b.unwrap_err(), ProviderError::RateLimited(1));
        assert_eq!(client.calls_today(), 0);
        assert_eq!(
            client.classify("c", "").await.unwrap_err(),
            ProviderError::Http("503".into())
        );
    }

    #[tokio::test]
    async fn daily_limit_blocks_after_max_calls() {
        let client = MeteredClient::new(MockProvider::default(), Duration::from_secs(1), Some(2));
        assert!(client.classify("a", "").await.is_ok());
        assert!(client.classify("b", "").await.is_ok());
        assert_eq!(
            client.classify("c", "").await.unwrap_err(),
            ProviderError::RateLimited(2)
        );
        assert_eq!(client.calls_today(), 2);
    }

    #[tokio::test]
    async fn disabled_provider_always_fails() {
        assert_eq!(
            DisabledProvider.classify("x", "").await.unwrap_err(),
            ProviderError::Disabled
        );
    }

    #[test]
    fn json_reply_is_extracted_from_fences() {
        let reply = "```json\n{\"label\":\"Bug\",\"confidence\":0.9,\"reasoning\":\"crash\"}\n```";
        let raw: RawClassification = parse_json_reply(reply).unwrap();
        assert_eq!(raw.label, "Bug");
        assert!(parse_json_reply::<RawClassification>("no json here").is_err());
    }

    #[test]
    fn sanitize_collapses_and_truncates() {
        assert_eq!(sanitize_reason("  a\n\tb  c "), "a b c");
        let long = "x".repeat(400);
        assert_eq!(sanitize_reason(&long).len(), 160);
    }
}
