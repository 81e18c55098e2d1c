// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod analyze;
pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod queue;
pub mod reclassify;
pub mod sentiment;
pub mod store;
pub mod trace;

// ---- Re-exports for stable public API ----
pub use analyze::ai_adapter;
pub use crate::api::{router, AppState};
pub use crate::config::TriageConfig;
pub use crate::error::{ProviderError, Result, TriageError};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";

/// Install the global subscriber: `RUST_LOG` filter, compact output or JSON lines
/// when `LOG_FORMAT=json`. A second call is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("feedback_triage=info,warn"));
    let json = std::env::var(ENV_LOG_FORMAT).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer().compact()))
        .try_init();
}

/// Load configuration and build the full application router.
pub fn app() -> anyhow::Result<axum::Router> {
    let cfg = TriageConfig::load_default()?;
    tracing::info!(
        provider = %cfg.ai.provider,
        ai_enabled = cfg.ai.enabled,
        batch_size = cfg.reclassify.batch_size,
        "triage config loaded"
    );
    let state = AppState::from_config(&cfg)?;
    Ok(router(state))
}
