//! Queue CRUD, state machine transitions, and worker assignment
//! (spec.md §4.1).

use std::sync::Arc;

use crate::error::{DispatchError, DispatchResult};
use crate::events::EventBus;
use crate::ids::{QueueId, WorkerId};
use crate::model::{Queue, QueuePriority, QueueState, QueueStrategy, QueueWorkerAssignment, Worker};
use crate::repository::{Page, Repository};

use super::wakeup::DispatchWakeup;

pub struct QueueManager {
    repo: Arc<dyn Repository>,
    events: EventBus,
    wakeup: DispatchWakeup,
}

impl QueueManager {
    pub fn new(repo: Arc<dyn Repository>, events: EventBus, wakeup: DispatchWakeup) -> Self {
        Self {
            repo,
            events,
            wakeup,
        }
    }

    pub async fn create(
        &self,
        name: String,
        description: Option<String>,
        priority: QueuePriority,
        strategy: QueueStrategy,
        is_default: bool,
    ) -> DispatchResult<Queue> {
        if self.repo.get_queue_by_name(&name).await?.is_some() {
            return Err(DispatchError::Conflict(format!(
                "queue named '{name}' already exists"
            )));
        }
        if is_default && self.repo.get_default_queue().await?.is_some() {
            return Err(DispatchError::Conflict(
                "a default queue already exists".to_string(),
            ));
        }
        let queue = Queue::new(name, description, priority, strategy, is_default);
        let queue = self.repo.create_queue(queue).await?;
        self.publish(&queue).await;
        Ok(queue)
    }

    pub async fn update(
        &self,
        id: QueueId,
        description: Option<String>,
        priority: QueuePriority,
        strategy: QueueStrategy,
        is_default: bool,
    ) -> DispatchResult<Queue> {
        let mut queue = self.require_queue(id).await?;
        if is_default && !queue.is_default {
            if let Some(existing) = self.repo.get_default_queue().await? {
                if existing.id != id {
                    return Err(DispatchError::Conflict(
                        "a default queue already exists".to_string(),
                    ));
                }
            }
        }
        queue.description = description;
        queue.priority = priority;
        queue.strategy = strategy;
        queue.is_default = is_default;
        queue.updated_at = chrono::Utc::now();
        let updated = self.repo.update_queue(queue).await?;
        self.publish(&updated).await;
        Ok(updated)
    }

    pub async fn delete(&self, id: QueueId) -> DispatchResult<()> {
        if !self.repo.delete_queue(id).await? {
            return Err(DispatchError::Conflict(
                "queue has Pending jobs and cannot be deleted".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn start(&self, id: QueueId) -> DispatchResult<Queue> {
        self.transition(id, QueueState::Started).await
    }

    pub async fn stop(&self, id: QueueId) -> DispatchResult<Queue> {
        self.transition(id, QueueState::Stopped).await
    }

    pub async fn pause(&self, id: QueueId) -> DispatchResult<Queue> {
        self.transition(id, QueueState::Paused).await
    }

    async fn transition(&self, id: QueueId, target: QueueState) -> DispatchResult<Queue> {
        let queue = self.require_queue(id).await?;
        if !queue.can_transition_to(target) {
            return Err(DispatchError::Conflict(format!(
                "cannot transition queue from {:?} to {target:?}",
                queue.state
            )));
        }
        let updated = self
            .repo
            .set_queue_state(id, target)
            .await?
            .ok_or_else(|| DispatchError::NotFound("queue".to_string()))?;
        self.publish(&updated).await;
        self.events
            .publish_queue_log_line(id, format!("queue transitioned to {target:?}"))
            .await;
        // Resuming to started or entering paused both change dispatch
        // eligibility; wake the dispatcher either way.
        self.wakeup.notify();
        Ok(updated)
    }

    pub async fn assign_worker(&self, queue_id: QueueId, worker_id: WorkerId) -> DispatchResult<QueueWorkerAssignment> {
        self.require_queue(queue_id).await?;
        let assignment = self.repo.assign_worker_to_queue(queue_id, worker_id).await?;
        self.wakeup.notify();
        Ok(assignment)
    }

    pub async fn unassign_worker(&self, queue_id: QueueId, worker_id: WorkerId) -> DispatchResult<()> {
        self.repo.unassign_worker_from_queue(queue_id, worker_id).await
    }

    pub async fn assign_workers_bulk(&self, queue_id: QueueId, worker_ids: Vec<WorkerId>) -> DispatchResult<Vec<QueueWorkerAssignment>> {
        self.require_queue(queue_id).await?;
        let mut out = Vec::with_capacity(worker_ids.len());
        for worker_id in worker_ids {
            out.push(self.repo.assign_worker_to_queue(queue_id, worker_id).await?);
        }
        self.wakeup.notify();
        Ok(out)
    }

    pub async fn list_workers(&self, queue_id: QueueId) -> DispatchResult<Vec<Worker>> {
        self.repo.list_queue_workers(queue_id).await
    }

    pub async fn list(&self, page: u32, per_page: u32) -> DispatchResult<Page<Queue>> {
        self.repo.list_queues(page, per_page).await
    }

    pub async fn get(&self, id: QueueId) -> DispatchResult<Queue> {
        self.require_queue(id).await
    }

    async fn require_queue(&self, id: QueueId) -> DispatchResult<Queue> {
        self.repo
            .get_queue(id)
            .await?
            .ok_or_else(|| DispatchError::NotFound("queue".to_string()))
    }

    async fn publish(&self, queue: &Queue) {
        self.events
            .publish_queue_update(queue.id, serde_json::to_value(queue).unwrap_or_default())
            .await;
    }
}
