//! Feedback Triage Service: binary entrypoint.
//! Boots the Axum HTTP server with the triage engine, queue worker and batch trigger.

use shuttle_axum::ShuttleAxum;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    feedback_triage::init_tracing();

    let router = feedback_triage::app()?;
    Ok(router.into())
}
