//! In-process triage queue: item creation hands off here and returns immediately.
//!
//! A single worker drains a bounded channel and runs the orchestrator per job. A failed
//! or dropped job leaves the item unclassified, which the batch job picks up later.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::orchestrator::Orchestrator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriageJob {
    pub item_id: Uuid,
    pub workspace_id: String,
}

enum Msg {
    Triage(TriageJob),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct TriageQueue {
    tx: mpsc::Sender<Msg>,
}

impl TriageQueue {
    /// Spawn the worker on the current Tokio runtime.
    pub fn start(orchestrator: Arc<Orchestrator>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Msg>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    Msg::Triage(job) => process(&orchestrator, job).await,
                    Msg::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            tracing::debug!("triage queue closed");
        });
        Self { tx }
    }

    /// Non-blocking hand-off. Returns false when the job could not be queued.
    pub fn enqueue(&self, job: TriageJob) -> bool {
        let item_id = job.item_id;
        match self.tx.try_send(Msg::Triage(job)) {
            Ok(()) => {
                counter!("triage_jobs_enqueued_total").increment(1);
                true
            }
            Err(e) => {
                tracing::warn!(item_id = %item_id, error = %e, "triage job not queued; batch run will pick the item up");
                false
            }
        }
    }

    /// Resolves once every job queued before this call has been processed.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Msg::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn process(orchestrator: &Orchestrator, job: TriageJob) {
    if let Err(e) = orchestrator.run(job.item_id).await {
        tracing::warn!(
            item_id = %job.item_id,
            workspace_id = %job.workspace_id,
            error = %e,
            "triage job failed"
        );
    }
}
