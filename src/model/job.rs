use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Type;

use crate::ids::{JobId, QueueId, SpecId, WorkerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "PascalCase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// One execution attempt of a `JobSpecification`.
///
/// `started_at` is set iff the job ever became `Running`; `completed_at` is
/// set iff `status` is terminal. Terminal states are absorbing — callers
/// mutating a terminal job's status are rejected by the repository layer
/// (see `Repository::reserve_dispatch` and `Repository::set_terminal`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub spec_id: SpecId,
    pub spec_name: String,
    pub command: String,
    pub status: JobStatus,
    pub progress: u8,
    pub created_by: String,
    pub queue_id: QueueId,
    pub assigned_worker: Option<WorkerId>,
    pub runtime_args: Value,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new_pending(
        spec_id: SpecId,
        spec_name: String,
        command: String,
        created_by: String,
        queue_id: QueueId,
        runtime_args: Value,
    ) -> Self {
        Self {
            id: JobId::new(),
            spec_id,
            spec_name,
            command,
            status: JobStatus::Pending,
            progress: 0,
            created_by,
            queue_id,
            assigned_worker: None,
            runtime_args,
            result: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}
