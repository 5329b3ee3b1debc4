use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AssignmentId, QueueId, WorkerId};

/// Many-to-many link between a queue and the workers dispatched to serve
/// it. Removing an assignment never aborts jobs already running on that
/// worker for that queue — only future dispatch selection is affected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueWorkerAssignment {
    pub id: AssignmentId,
    pub queue_id: QueueId,
    pub worker_id: WorkerId,
    pub created_at: DateTime<Utc>,
}

impl QueueWorkerAssignment {
    pub fn new(queue_id: QueueId, worker_id: WorkerId) -> Self {
        Self {
            id: AssignmentId::new(),
            queue_id,
            worker_id,
            created_at: Utc::now(),
        }
    }
}
