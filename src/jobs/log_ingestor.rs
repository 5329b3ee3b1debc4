//! Bridges a dispatched job's worker-side SSE log feed into the repository
//! and event bus (spec.md §4.3, §4.5): log lines are fanned out live and
//! tailed, progress updates call back into the repository, and the
//! worker's terminal `job_status` event is the authoritative end of the
//! job's life.

use tracing::warn;

use crate::events::EventBus;
use crate::ids::{JobId, WorkerId};
use crate::model::Worker;
use crate::queues::DispatchWakeup;
use crate::repository::{codec, Repository};
use crate::transport::{WorkerLogEvent, WorkerTransportClient};
use futures::StreamExt;
use std::sync::Arc;

/// Consumes one job's worker log stream end to end. Spawned by the
/// dispatch loop immediately after a successful `execute` post; exits once
/// the worker's stream closes (normally right after the terminal
/// `job_status` event).
#[derive(Clone)]
pub struct JobLogIngestor {
    repo: Arc<dyn Repository>,
    events: EventBus,
    transport: WorkerTransportClient,
    wakeup: DispatchWakeup,
}

impl JobLogIngestor {
    pub fn new(
        repo: Arc<dyn Repository>,
        events: EventBus,
        transport: WorkerTransportClient,
        wakeup: DispatchWakeup,
    ) -> Self {
        Self {
            repo,
            events,
            transport,
            wakeup,
        }
    }

    /// Runs to completion on the current task. Callers spawn this with
    /// `tokio::spawn` right after dispatch so the ingestor's lifetime is
    /// independent of the dispatch loop's tick.
    pub async fn ingest(&self, worker: Worker, job_id: JobId) {
        let worker_id = worker.id;
        let mut stream = Box::pin(self.transport.log_stream(&worker, job_id));

        while let Some(event) = stream.next().await {
            match event {
                Ok(WorkerLogEvent::Log { line }) => {
                    self.events.publish_job_log_line(job_id, line).await;
                }
                Ok(WorkerLogEvent::Progress { progress }) => {
                    if let Err(e) = self.repo.update_job_progress(job_id, progress).await {
                        warn!(job_id = %job_id, error = %e, "failed to persist job progress");
                    }
                    self.events
                        .publish_job_update(job_id, serde_json::json!({ "progress": progress }))
                        .await;
                }
                Ok(WorkerLogEvent::JobStatus {
                    status,
                    result,
                    error_message,
                }) => {
                    self.handle_terminal(worker_id, job_id, &status, result, error_message).await;
                    return;
                }
                Err(e) => {
                    warn!(job_id = %job_id, worker_id = %worker_id, error = %e, "worker log stream failed");
                    return;
                }
            }
        }
    }

    async fn handle_terminal(
        &self,
        worker_id: WorkerId,
        job_id: JobId,
        status: &str,
        result: Option<serde_json::Value>,
        error_message: Option<String>,
    ) {
        let status = match codec::job_status_parse(status) {
            Ok(s) => s,
            Err(e) => {
                warn!(job_id = %job_id, status, error = %e, "worker sent an unrecognized terminal status");
                return;
            }
        };

        match self
            .repo
            .complete_job(job_id, worker_id, status, result.clone(), error_message.clone())
            .await
        {
            Ok(true) => {
                self.events
                    .publish_job_update(
                        job_id,
                        serde_json::json!({
                            "status": status,
                            "result": result,
                            "error_message": error_message,
                        }),
                    )
                    .await;
                self.events
                    .publish_job_status_terminal(job_id, codec::job_status_str(status), error_message.as_deref())
                    .await;
                self.events
                    .publish_worker_update(worker_id, serde_json::json!({ "current_jobs_delta": -1 }))
                    .await;
                self.wakeup.notify();
            }
            Ok(false) => {
                // Job was already terminal (e.g. cancelled concurrently) -
                // the repository rejected the late update, nothing to do.
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "failed to persist job terminal status");
            }
        }
    }
}
