//! Wire types for the orchestrator<->worker protocol (spec.md §4.4, §6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::JobId;

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteRequest {
    pub job_id: JobId,
    pub command: String,
    pub runtime_args: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelResponse {
    pub accepted: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerStatusResponse {
    pub worker_name: String,
    pub current_jobs: u32,
    pub max_jobs: u32,
    pub state: String,
}

/// One event from a worker's `/logs/{job_id}/stream` SSE feed.
///
/// The worker emits `log` events for output lines and a terminal
/// `job_status` event once the job reaches Completed/Failed/Cancelled —
/// the worker is the sole authority on both (spec.md §4.3).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerLogEvent {
    Log { line: String },
    Progress { progress: u8 },
    JobStatus {
        status: String,
        result: Option<Value>,
        error_message: Option<String>,
    },
}
