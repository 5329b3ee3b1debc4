//! Job lifecycle operations: `run`, `cancel`, `retry`, `move`, `delete`
//! (spec.md §4.3).

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::warn;

use crate::error::{DispatchError, DispatchResult};
use crate::events::EventBus;
use crate::ids::{JobId, QueueId};
use crate::model::{Job, JobStatus};
use crate::queues::DispatchWakeup;
use crate::repository::{JobStatistics, Page, Repository};
use crate::transport::WorkerTransportClient;

pub struct JobLifecycleController {
    repo: Arc<dyn Repository>,
    events: EventBus,
    transport: WorkerTransportClient,
    wakeup: DispatchWakeup,
}

impl JobLifecycleController {
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

    /// Creates a Pending job bound to `queue` (or the default queue if
    /// `None`). Fails with `Unavailable` if no queue is given and no
    /// default queue exists.
    pub async fn run(
        &self,
        spec_name: &str,
        runtime_args: Value,
        created_by: String,
        queue_name: Option<&str>,
    ) -> DispatchResult<Job> {
        let spec = self
            .repo
            .get_spec_by_name(spec_name)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("spec '{spec_name}'")))?;

        let queue = match queue_name {
            Some(name) => self
                .repo
                .get_queue_by_name(name)
                .await?
                .ok_or_else(|| DispatchError::NotFound(format!("queue '{name}'")))?,
            None => self
                .repo
                .get_default_queue()
                .await?
                .ok_or_else(|| DispatchError::Unavailable("no default queue configured".to_string()))?,
        };

        let job = Job::new_pending(
            spec.id,
            spec.name,
            spec.command,
            created_by,
            queue.id,
            runtime_args,
        );
        let job = self.repo.create_job(job).await?;
        self.publish(&job).await;
        self.wakeup.notify();
        Ok(job)
    }

    /// Pending jobs cancel immediately. Running jobs get a best-effort
    /// cancel request forwarded to their worker; the worker's subsequent
    /// terminal status is authoritative (spec.md §4.3) — this call does
    /// not itself flip a Running job's status.
    pub async fn cancel(&self, job_id: JobId) -> DispatchResult<Job> {
        let job = self.require_job(job_id).await?;
        match job.status {
            JobStatus::Pending => {
                let cancelled = self
                    .repo
                    .cancel_pending_job(job_id)
                    .await?
                    .ok_or_else(|| DispatchError::Conflict("job is no longer pending".to_string()))?;
                self.publish(&cancelled).await;
                Ok(cancelled)
            }
            JobStatus::Running => {
                if let Some(worker_id) = job.assigned_worker {
                    if let Some(worker) = self.repo.get_worker(worker_id).await? {
                        if let Err(e) = self.transport.cancel(&worker, job_id).await {
                            warn!(job_id = %job_id, error = %e, "cancel request to worker failed");
                        }
                    }
                }
                Ok(job)
            }
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => {
                Err(DispatchError::Conflict("job is already terminal".to_string()))
            }
        }
    }

    /// Only terminal, non-Completed jobs can be retried. Creates a new
    /// Pending job with the same spec and `runtime_args` verbatim
    /// (spec.md §9 open question #4); the original job is untouched.
    pub async fn retry(&self, job_id: JobId) -> DispatchResult<Job> {
        let job = self.require_job(job_id).await?;
        if job.status == JobStatus::Completed || !job.status.is_terminal() {
            return Err(DispatchError::Conflict(
                "only a terminal, non-Completed job can be retried".to_string(),
            ));
        }
        let new_job = Job::new_pending(
            job.spec_id,
            job.spec_name.clone(),
            job.command.clone(),
            job.created_by.clone(),
            job.queue_id,
            job.runtime_args.clone(),
        );
        let new_job = self.repo.create_job(new_job).await?;
        self.publish(&new_job).await;
        self.wakeup.notify();
        Ok(new_job)
    }

    pub async fn move_to_queue(&self, job_id: JobId, new_queue_name: &str) -> DispatchResult<Job> {
        let new_queue = self
            .repo
            .get_queue_by_name(new_queue_name)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("queue '{new_queue_name}'")))?;
        let moved = self
            .repo
            .move_pending_job(job_id, new_queue.id)
            .await?
            .ok_or_else(|| DispatchError::Conflict("job is not Pending".to_string()))?;
        self.publish(&moved).await;
        self.wakeup.notify();
        Ok(moved)
    }

    pub async fn delete(&self, job_id: JobId) -> DispatchResult<()> {
        if !self.repo.delete_job(job_id).await? {
            return Err(DispatchError::Conflict(
                "only a terminal job can be deleted".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn get(&self, job_id: JobId) -> DispatchResult<Job> {
        self.require_job(job_id).await
    }

    pub async fn list(&self, page: u32, per_page: u32, exclude_status: &[JobStatus]) -> DispatchResult<Page<Job>> {
        self.repo.list_jobs(page, per_page, exclude_status).await
    }

    pub async fn statistics(&self) -> DispatchResult<JobStatistics> {
        self.repo.job_statistics().await
    }

    /// Runs once at startup: any job left `Running` from an ungraceful
    /// shutdown is marked `Failed` with `OrchestratorShutdown` (spec.md
    /// §5).
    pub async fn recover_from_ungraceful_shutdown(&self) -> DispatchResult<u64> {
        self.repo.fail_stale_running_jobs("OrchestratorShutdown").await
    }

    async fn require_job(&self, job_id: JobId) -> DispatchResult<Job> {
        self.repo
            .get_job(job_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound("job".to_string()))
    }

    async fn publish(&self, job: &Job) {
        self.events
            .publish_job_update(job.id, serde_json::to_value(job).unwrap_or_default())
            .await;
    }
}
