//! Dispatch-selection algorithm and the long-lived dispatch loop
//! (spec.md §4.1 steps 1-6).
//!
//! Grounded on the teacher's `kernel::jobs::worker::JobWorker` service
//! loop shape (claim -> process -> sleep-or-wake), generalized from
//! polling a single job queue to scanning every `started` queue each tick
//! and picking a worker per the queue's configured strategy.

use std::sync::Arc;

use rand::seq::SliceRandom;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::events::EventBus;
use crate::ids::QueueId;
use crate::jobs::JobLogIngestor;
use crate::model::{Job, Queue, QueueStrategy, Worker, WorkerStatus, WorkerType};
use crate::repository::Repository;
use crate::transport::WorkerTransportClient;

use super::wakeup::DispatchWakeup;

/// Bounds how many reservation attempts one queue gets within a single
/// tick before the loop moves on and waits for the next wakeup — a
/// concurrent dispatcher racing us on the same job is expected to be rare
/// enough that this never engages in practice.
const MAX_RESERVE_ATTEMPTS_PER_TICK: u32 = 8;
/// Retry policy for posting the execute command (spec.md §4.1 step 6):
/// 3 attempts, 250 ms / 1 s / 4 s backoff. `WorkerTransportClient` already
/// implements this schedule internally, so the dispatch loop calls it once
/// and only handles the final outcome.
const EXECUTE_RETRY_ATTEMPTS: u32 = 3;

pub struct DispatchLoop {
    repo: Arc<dyn Repository>,
    events: EventBus,
    transport: WorkerTransportClient,
    wakeup: DispatchWakeup,
}

impl DispatchLoop {
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

    pub async fn run(self, shutdown: CancellationToken) {
        info!("dispatch loop starting");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.wakeup.wait() => {}
            }
            if shutdown.is_cancelled() {
                break;
            }

            let queues = match self.repo.list_started_queues().await {
                Ok(q) => q,
                Err(e) => {
                    warn!(error = %e, "dispatch loop failed to list started queues");
                    continue;
                }
            };
            for queue in queues {
                self.dispatch_queue(&queue).await;
            }
        }
        info!("dispatch loop stopped");
    }

    /// Runs steps 1-6 of spec.md §4.1 for one queue, repeating while there
    /// is still a Pending job and an eligible worker.
    async fn dispatch_queue(&self, queue: &Queue) {
        for _ in 0..MAX_RESERVE_ATTEMPTS_PER_TICK {
            let eligible = match self.repo.list_eligible_workers(queue.id).await {
                Ok(w) if !w.is_empty() => w,
                Ok(_) => return,
                Err(e) => {
                    warn!(queue_id = %queue.id, error = %e, "failed to list eligible workers");
                    return;
                }
            };

            let job = match self.repo.oldest_pending_job(queue.id).await {
                Ok(Some(j)) => j,
                Ok(None) => return,
                Err(e) => {
                    warn!(queue_id = %queue.id, error = %e, "failed to fetch oldest pending job");
                    return;
                }
            };

            let Some(worker) = self.select_worker(queue, &eligible).await else {
                return;
            };

            match self.repo.reserve_dispatch(job.id, worker.id).await {
                Ok(true) => {}
                Ok(false) => continue, // lost the race; restart from step 1
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "dispatch reservation failed");
                    return;
                }
            }

            self.events
                .publish_job_update(job.id, json!({ "status": "Running", "assigned_worker": worker.id }))
                .await;
            self.events
                .publish_worker_update(worker.id, json!({ "current_jobs_delta": 1 }))
                .await;
            self.events
                .publish_queue_log_line(queue.id, format!("dispatched job {} to worker {}", job.id, worker.id))
                .await;

            self.post_execute(queue.id, &job, &worker).await;
        }
    }

    async fn post_execute(&self, queue_id: QueueId, job: &Job, worker: &Worker) {
        let mut last_err = None;
        for attempt in 0..EXECUTE_RETRY_ATTEMPTS {
            match self
                .transport
                .execute(worker, job.id, job.command.clone(), job.runtime_args.clone())
                .await
            {
                Ok(()) => {
                    let ingestor = JobLogIngestor::new(
                        self.repo.clone(),
                        self.events.clone(),
                        self.transport.clone(),
                        self.wakeup.clone(),
                    );
                    let worker = worker.clone();
                    let job_id = job.id;
                    tokio::spawn(async move { ingestor.ingest(worker, job_id).await });
                    return;
                }
                Err(e) => {
                    warn!(job_id = %job.id, worker_id = %worker.id, attempt, error = %e, "execute post failed");
                    last_err = Some(e.to_string());
                }
            }
        }

        // Transport failure after retries: revert the job to Pending and
        // quarantine the worker (spec.md §4.1 step 6, §7).
        let reason = last_err.unwrap_or_else(|| "transport error".to_string());
        if let Err(e) = self.repo.release_reservation(job.id, worker.id).await {
            warn!(job_id = %job.id, error = %e, "failed to release reservation after transport failure");
        }
        if let Err(e) = self
            .repo
            .set_worker_status(worker.id, WorkerStatus::Error, Some(reason.clone()))
            .await
        {
            warn!(worker_id = %worker.id, error = %e, "failed to mark worker errored");
        }
        self.events
            .publish_job_update(job.id, json!({ "status": "Pending" }))
            .await;
        self.events
            .publish_worker_update(worker.id, json!({ "status": "error", "error_message": reason }))
            .await;
        // Another worker on this queue might still be eligible; wake
        // ourselves again immediately rather than waiting for the next
        // watchdog tick.
        let _ = queue_id;
        self.wakeup.notify();
    }

    /// Step 4 of spec.md §4.1: picks a worker from `eligible` per the
    /// queue's strategy.
    async fn select_worker<'a>(&self, queue: &Queue, eligible: &'a [Worker]) -> Option<&'a Worker> {
        match queue.strategy {
            QueueStrategy::RoundRobin => {
                let mut sorted: Vec<&Worker> = eligible.iter().collect();
                sorted.sort_by_key(|w| w.id);
                let index = (queue.round_robin_cursor as usize) % sorted.len();
                let chosen = sorted[index];
                let new_cursor = (queue.round_robin_cursor + 1) % sorted.len() as i64;
                if let Err(e) = self.repo.advance_round_robin_cursor(queue.id, new_cursor).await {
                    warn!(queue_id = %queue.id, error = %e, "failed to advance round-robin cursor");
                }
                Some(chosen)
            }
            QueueStrategy::LeastLoaded => least_loaded(eligible),
            QueueStrategy::Random => eligible.choose(&mut rand::thread_rng()),
            QueueStrategy::Priority => {
                let locals: Vec<&Worker> = eligible.iter().filter(|w| w.worker_type == WorkerType::Local).collect();
                if !locals.is_empty() {
                    least_loaded(locals)
                } else {
                    least_loaded(eligible)
                }
            }
        }
    }
}

fn least_loaded<'a>(workers: impl IntoIterator<Item = &'a Worker>) -> Option<&'a Worker> {
    workers
        .into_iter()
        .min_by(|a, b| a.current_jobs.cmp(&b.current_jobs).then(a.id.cmp(&b.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::WorkerId;
    use crate::model::{WorkerState, WorkerType};

    fn worker(current_jobs: u32, worker_type: WorkerType) -> Worker {
        Worker {
            id: WorkerId::new(),
            name: "w".to_string(),
            worker_type,
            hostname: "h".to_string(),
            ip_address: None,
            port: 1,
            ssh: None,
            max_jobs: 10,
            current_jobs,
            status: WorkerStatus::Online,
            state: WorkerState::Started,
            last_seen: None,
            error_message: None,
            consecutive_health_misses: 0,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn least_loaded_picks_smallest_current_jobs() {
        let w1 = worker(2, WorkerType::Local);
        let w2 = worker(0, WorkerType::Local);
        let workers = vec![w1.clone(), w2.clone()];
        let chosen = least_loaded(&workers).unwrap();
        assert_eq!(chosen.id, w2.id);
    }

    #[test]
    fn least_loaded_tie_breaks_by_id_ascending() {
        let mut w1 = worker(1, WorkerType::Local);
        let mut w2 = worker(1, WorkerType::Local);
        if w1.id > w2.id {
            std::mem::swap(&mut w1, &mut w2);
        }
        let workers = vec![w2.clone(), w1.clone()];
        let chosen = least_loaded(&workers).unwrap();
        assert_eq!(chosen.id, w1.id);
    }
}
