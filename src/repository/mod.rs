//! The abstract persistence boundary. The orchestration core (queues,
//! workers, jobs, dispatch loop) depends only on `dyn Repository` — never
//! on sqlx types directly — so the concrete backend is swappable without
//! touching any state-machine code.

pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::DispatchError;
use crate::ids::{JobId, QueueId, SpecId, UserId, WorkerId};
use crate::model::{Job, JobSpecification, JobStatus, Queue, QueueState, QueueWorkerAssignment, Worker, WorkerState, WorkerStatus};

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct JobStatistics {
    pub total: u64,
    pub by_status: HashMap<JobStatus, u64>,
    pub by_spec: HashMap<String, u64>,
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub password_hash: String,
    pub auth_source: String,
    pub is_admin: bool,
}

/// One method group per entity, plus the atomic dispatch reservation that
/// backs the no-double-dispatch invariant. `async_trait`-based, the same
/// shape as this codebase's other `Base*` service traits — a single trait
/// object held behind `Arc<dyn Repository>`.
#[async_trait]
pub trait Repository: Send + Sync {
    // ---- specs ----
    async fn create_spec(&self, spec: JobSpecification) -> Result<JobSpecification, DispatchError>;
    async fn get_spec(&self, id: SpecId) -> Result<Option<JobSpecification>, DispatchError>;
    async fn get_spec_by_name(&self, name: &str) -> Result<Option<JobSpecification>, DispatchError>;
    async fn list_specs(&self, page: u32, per_page: u32) -> Result<Page<JobSpecification>, DispatchError>;
    async fn update_spec(&self, spec: JobSpecification) -> Result<JobSpecification, DispatchError>;
    /// Fails (returns `false`) if any Running job still references this spec.
    async fn delete_spec(&self, id: SpecId) -> Result<bool, DispatchError>;

    // ---- jobs ----
    async fn create_job(&self, job: Job) -> Result<Job, DispatchError>;
    async fn get_job(&self, id: JobId) -> Result<Option<Job>, DispatchError>;
    async fn list_jobs(
        &self,
        page: u32,
        per_page: u32,
        exclude_status: &[JobStatus],
    ) -> Result<Page<Job>, DispatchError>;
    async fn job_statistics(&self) -> Result<JobStatistics, DispatchError>;
    /// `None` if the job does not exist or is not Pending.
    async fn cancel_pending_job(&self, id: JobId) -> Result<Option<Job>, DispatchError>;
    async fn move_pending_job(&self, id: JobId, new_queue: QueueId) -> Result<Option<Job>, DispatchError>;
    /// `false` if the job does not exist or is not in a terminal state.
    async fn delete_job(&self, id: JobId) -> Result<bool, DispatchError>;
    /// Atomic compare-and-set: `job.status == Pending` and
    /// `worker.current_jobs < worker.max_jobs`. On success sets
    /// `job.status = Running`, `job.assigned_worker`, `job.started_at`,
    /// and increments `worker.current_jobs`. Returns `false` if the
    /// precondition no longer holds (another dispatcher attempt won).
    async fn reserve_dispatch(&self, job_id: JobId, worker_id: WorkerId) -> Result<bool, DispatchError>;
    /// Reverts a reservation after a transport failure: job back to
    /// Pending, worker's `current_jobs` decremented.
    async fn release_reservation(&self, job_id: JobId, worker_id: WorkerId) -> Result<(), DispatchError>;
    /// Rejected (returns `false`) once the job is terminal (terminal
    /// absorption) or not Running.
    async fn update_job_progress(&self, job_id: JobId, progress: u8) -> Result<bool, DispatchError>;
    /// Rejected (returns `false`) if the job is already terminal.
    async fn set_job_terminal(
        &self,
        job_id: JobId,
        status: JobStatus,
        result: Option<Value>,
        error_message: Option<String>,
    ) -> Result<bool, DispatchError>;
    /// Sets a job terminal and releases its worker's dispatch slot in one
    /// call — the normal end-of-execution path, as distinct from
    /// `release_reservation` which reverts a job back to `Pending` after a
    /// transport failure.
    async fn complete_job(
        &self,
        job_id: JobId,
        worker_id: WorkerId,
        status: JobStatus,
        result: Option<Value>,
        error_message: Option<String>,
    ) -> Result<bool, DispatchError>;
    async fn oldest_pending_job(&self, queue_id: QueueId) -> Result<Option<Job>, DispatchError>;
    /// Marks every still-Running job `Failed` with the given reason;
    /// used once at startup to recover from an ungraceful shutdown.
    async fn fail_stale_running_jobs(&self, reason: &str) -> Result<u64, DispatchError>;

    // ---- queues ----
    async fn create_queue(&self, queue: Queue) -> Result<Queue, DispatchError>;
    async fn get_queue(&self, id: QueueId) -> Result<Option<Queue>, DispatchError>;
    async fn get_queue_by_name(&self, name: &str) -> Result<Option<Queue>, DispatchError>;
    async fn get_default_queue(&self) -> Result<Option<Queue>, DispatchError>;
    async fn list_queues(&self, page: u32, per_page: u32) -> Result<Page<Queue>, DispatchError>;
    async fn list_started_queues(&self) -> Result<Vec<Queue>, DispatchError>;
    async fn update_queue(&self, queue: Queue) -> Result<Queue, DispatchError>;
    async fn set_queue_state(&self, id: QueueId, state: QueueState) -> Result<Option<Queue>, DispatchError>;
    async fn advance_round_robin_cursor(&self, id: QueueId, new_cursor: i64) -> Result<(), DispatchError>;
    /// Fails (returns `false`) while any Pending job references the queue.
    async fn delete_queue(&self, id: QueueId) -> Result<bool, DispatchError>;
    async fn assign_worker_to_queue(
        &self,
        queue_id: QueueId,
        worker_id: WorkerId,
    ) -> Result<QueueWorkerAssignment, DispatchError>;
    async fn unassign_worker_from_queue(&self, queue_id: QueueId, worker_id: WorkerId) -> Result<(), DispatchError>;
    async fn list_queue_workers(&self, queue_id: QueueId) -> Result<Vec<Worker>, DispatchError>;
    /// Workers assigned to this queue with `state=Started ∧ status=Online
    /// ∧ current_jobs<max_jobs`.
    async fn list_eligible_workers(&self, queue_id: QueueId) -> Result<Vec<Worker>, DispatchError>;

    // ---- workers ----
    async fn create_worker(&self, worker: Worker) -> Result<Worker, DispatchError>;
    async fn get_worker(&self, id: WorkerId) -> Result<Option<Worker>, DispatchError>;
    async fn get_worker_by_name(&self, name: &str) -> Result<Option<Worker>, DispatchError>;
    async fn list_workers(&self, page: u32, per_page: u32) -> Result<Page<Worker>, DispatchError>;
    /// Workers in `state ∈ {Started, Paused}` — the health monitor's scan set.
    async fn list_monitored_workers(&self) -> Result<Vec<Worker>, DispatchError>;
    async fn update_worker_max_jobs(&self, id: WorkerId, max_jobs: u32) -> Result<Option<Worker>, DispatchError>;
    async fn set_worker_state(&self, id: WorkerId, state: WorkerState) -> Result<Option<Worker>, DispatchError>;
    /// Applies one probe outcome: success resets the miss counter, sets
    /// `status=Online`, stamps `last_seen`; failure increments the miss
    /// counter and flips `status=Offline` on the 3rd consecutive miss.
    async fn record_health_probe(&self, id: WorkerId, success: bool) -> Result<Option<Worker>, DispatchError>;
    async fn set_worker_status(
        &self,
        id: WorkerId,
        status: WorkerStatus,
        error_message: Option<String>,
    ) -> Result<(), DispatchError>;
    /// Fails (returns `false`) for the reserved "System" worker or an
    /// unknown id.
    async fn delete_worker(&self, id: WorkerId) -> Result<bool, DispatchError>;
    /// Flips every job currently `Running` on this worker to `Cancelled`
    /// and clears the worker's `current_jobs` counter. Used when a worker
    /// transitions to `Stopped` (spec.md §4.2: "stop cancels in-flight
    /// jobs; pause does not").
    async fn cancel_running_jobs_for_worker(&self, worker_id: WorkerId) -> Result<Vec<Job>, DispatchError>;
    /// Jobs currently `Running` and assigned to this worker — used to
    /// forward best-effort cancel requests over transport before flipping
    /// them locally.
    async fn list_running_jobs_for_worker(&self, worker_id: WorkerId) -> Result<Vec<Job>, DispatchError>;

    // ---- users ----
    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, DispatchError>;

    /// Runs embedded migrations for this backend.
    async fn migrate(&self) -> Result<(), DispatchError>;
}

/// String encodings shared by both backends. Every enum column is stored
/// as plain `TEXT`/`VARCHAR` (see `migrations/{sqlite,postgres}/0001_init.sql`),
/// so both adapters parse/render through these helpers rather than
/// leaning on a cross-database `sqlx::Type` derive.
pub(crate) mod codec {
    use crate::error::DispatchError;
    use crate::model::{
        JobStatus, QueuePriority, QueueState, QueueStrategy, SshAuthMethod, WorkerState, WorkerStatus, WorkerType,
    };

    fn bad(field: &str, value: &str) -> DispatchError {
        DispatchError::Internal(anyhow::anyhow!("unrecognized {field} '{value}' in storage"))
    }

    pub fn job_status_str(s: JobStatus) -> &'static str {
        match s {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn job_status_parse(s: &str) -> Result<JobStatus, DispatchError> {
        Ok(match s {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            other => return Err(bad("job status", other)),
        })
    }

    pub fn queue_priority_str(p: QueuePriority) -> &'static str {
        match p {
            QueuePriority::Low => "low",
            QueuePriority::Normal => "normal",
            QueuePriority::High => "high",
            QueuePriority::Critical => "critical",
        }
    }

    pub fn queue_priority_parse(s: &str) -> Result<QueuePriority, DispatchError> {
        Ok(match s {
            "low" => QueuePriority::Low,
            "normal" => QueuePriority::Normal,
            "high" => QueuePriority::High,
            "critical" => QueuePriority::Critical,
            other => return Err(bad("queue priority", other)),
        })
    }

    pub fn queue_strategy_str(s: QueueStrategy) -> &'static str {
        match s {
            QueueStrategy::RoundRobin => "round_robin",
            QueueStrategy::LeastLoaded => "least_loaded",
            QueueStrategy::Random => "random",
            QueueStrategy::Priority => "priority",
        }
    }

    pub fn queue_strategy_parse(s: &str) -> Result<QueueStrategy, DispatchError> {
        Ok(match s {
            "round_robin" => QueueStrategy::RoundRobin,
            "least_loaded" => QueueStrategy::LeastLoaded,
            "random" => QueueStrategy::Random,
            "priority" => QueueStrategy::Priority,
            other => return Err(bad("queue strategy", other)),
        })
    }

    pub fn queue_state_str(s: QueueState) -> &'static str {
        match s {
            QueueState::Stopped => "stopped",
            QueueState::Started => "started",
            QueueState::Paused => "paused",
        }
    }

    pub fn queue_state_parse(s: &str) -> Result<QueueState, DispatchError> {
        Ok(match s {
            "stopped" => QueueState::Stopped,
            "started" => QueueState::Started,
            "paused" => QueueState::Paused,
            other => return Err(bad("queue state", other)),
        })
    }

    pub fn worker_type_str(t: WorkerType) -> &'static str {
        match t {
            WorkerType::Local => "local",
            WorkerType::Remote => "remote",
        }
    }

    pub fn worker_type_parse(s: &str) -> Result<WorkerType, DispatchError> {
        Ok(match s {
            "local" => WorkerType::Local,
            "remote" => WorkerType::Remote,
            other => return Err(bad("worker type", other)),
        })
    }

    pub fn worker_status_str(s: WorkerStatus) -> &'static str {
        match s {
            WorkerStatus::Online => "online",
            WorkerStatus::Offline => "offline",
            WorkerStatus::Provisioning => "provisioning",
            WorkerStatus::Error => "error",
        }
    }

    pub fn worker_status_parse(s: &str) -> Result<WorkerStatus, DispatchError> {
        Ok(match s {
            "online" => WorkerStatus::Online,
            "offline" => WorkerStatus::Offline,
            "provisioning" => WorkerStatus::Provisioning,
            "error" => WorkerStatus::Error,
            other => return Err(bad("worker status", other)),
        })
    }

    pub fn worker_state_str(s: WorkerState) -> &'static str {
        match s {
            WorkerState::Stopped => "stopped",
            WorkerState::Started => "started",
            WorkerState::Paused => "paused",
            WorkerState::Failed => "failed",
        }
    }

    pub fn worker_state_parse(s: &str) -> Result<WorkerState, DispatchError> {
        Ok(match s {
            "stopped" => WorkerState::Stopped,
            "started" => WorkerState::Started,
            "paused" => WorkerState::Paused,
            "failed" => WorkerState::Failed,
            other => return Err(bad("worker state", other)),
        })
    }

    pub fn ssh_auth_method_str(m: SshAuthMethod) -> &'static str {
        match m {
            SshAuthMethod::Key => "key",
            SshAuthMethod::Password => "password",
        }
    }

    pub fn ssh_auth_method_parse(s: &str) -> Result<SshAuthMethod, DispatchError> {
        Ok(match s {
            "key" => SshAuthMethod::Key,
            "password" => SshAuthMethod::Password,
            other => return Err(bad("ssh auth method", other)),
        })
    }
}
