use axum::{routing::get, Router};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub const ENV_METRICS_ENABLED: &str = "METRICS_ENABLED";

static HANDLE: OnceCell<Option<PrometheusHandle>> = OnceCell::new();

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder at most once per process.
    /// Returns None if another recorder is already installed.
    pub fn init() -> Option<Self> {
        HANDLE
            .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
                Ok(handle) => {
                    describe();
                    Some(handle)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "prometheus recorder not installed");
                    None
                }
            })
            .clone()
            .map(|handle| Self { handle })
    }

    /// `METRICS_ENABLED=1` turns the exporter on.
    pub fn from_env() -> Option<Self> {
        let on = std::env::var(ENV_METRICS_ENABLED).is_ok_and(|v| v == "1");
        if on {
            Self::init()
        } else {
            None
        }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router<S: Clone + Send + Sync + 'static>(&self) -> Router<S> {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe() {
    describe_counter!("triage_steps_total", "Triage steps by step and outcome");
    describe_counter!("triage_jobs_enqueued_total", "Items handed to the triage queue");
    describe_counter!("reclassify_runs_total", "Batch reclassification invocations");
    describe_counter!("reclassify_items_total", "Batch items by outcome");
    describe_counter!("decision_traces_total", "Decision traces written by feature");
    describe_counter!("provider_errors_total", "Failed calls to the classification service");
    describe_counter!("provider_limited_total", "Calls refused by the daily limit");
    describe_histogram!("provider_call_ms", "Classification service call latency (ms)");
}
