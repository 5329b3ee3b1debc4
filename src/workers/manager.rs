//! Worker registration, lifecycle transitions, and CRUD (spec.md §4.2).

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::error::{DispatchError, DispatchResult};
use crate::events::EventBus;
use crate::ids::WorkerId;
use crate::model::{SshCredentials, Worker, WorkerState, WorkerStatus, WorkerType};
use crate::provisioning::{ProvisionRequest, WorkerLaunchArgs, WorkerProvisioner};
use crate::repository::{Page, Repository};
use crate::transport::WorkerTransportClient;

/// Input to `WorkerManager::register`.
pub struct WorkerRegistration {
    pub name: String,
    pub worker_type: WorkerType,
    pub hostname: String,
    pub ip_address: Option<String>,
    pub port: u16,
    pub ssh: Option<SshCredentials>,
    pub max_jobs: u32,
    pub provision: bool,
    pub orchestrator_callback_url: String,
}

pub struct WorkerManager {
    repo: Arc<dyn Repository>,
    events: EventBus,
    transport: WorkerTransportClient,
    provisioner: WorkerProvisioner,
}

impl WorkerManager {
    pub fn new(
        repo: Arc<dyn Repository>,
        events: EventBus,
        transport: WorkerTransportClient,
        provisioner: WorkerProvisioner,
    ) -> Self {
        Self {
            repo,
            events,
            transport,
            provisioner,
        }
    }

    pub async fn register(&self, req: WorkerRegistration) -> DispatchResult<Worker> {
        if self.repo.get_worker_by_name(&req.name).await?.is_some() {
            return Err(DispatchError::Conflict(format!(
                "worker named '{}' already exists",
                req.name
            )));
        }
        if req.worker_type == WorkerType::Remote && req.ssh.is_none() {
            return Err(DispatchError::Validation(
                "remote workers require ssh credentials".to_string(),
            ));
        }

        let provisioning = req.provision && req.worker_type == WorkerType::Remote;
        let worker = Worker::new(
            req.name.clone(),
            req.worker_type,
            req.hostname.clone(),
            req.ip_address,
            req.port,
            req.ssh.clone(),
            req.max_jobs,
            provisioning,
        );
        let worker = self.repo.create_worker(worker).await?;
        self.publish(&worker).await;
        self.events
            .publish_worker_log_line(worker.id, format!("worker '{}' registered ({:?})", worker.name, worker.worker_type))
            .await;

        if provisioning {
            self.spawn_provisioning(&worker, &req).await;
        }

        Ok(worker)
    }

    async fn spawn_provisioning(&self, worker: &Worker, req: &WorkerRegistration) {
        let Some(ssh) = req.ssh.clone() else { return };
        let provision_req = ProvisionRequest {
            worker_id: worker.id,
            hostname: worker.hostname.clone(),
            ssh,
            launch: WorkerLaunchArgs {
                name: worker.name.clone(),
                bind_host: "0.0.0.0".to_string(),
                bind_port: worker.port,
                orchestrator_callback_url: req.orchestrator_callback_url.clone(),
                max_jobs: worker.max_jobs,
            },
            remote_work_dir: format!("/opt/dispatcher-worker/{}", worker.name),
        };

        let deployment_id = self.provisioner.provision(provision_req).await;
        info!(worker_id = %worker.id, deployment_id, "remote worker provisioning started");

        let repo = self.repo.clone();
        let events = self.events.clone();
        let tracker = self.provisioner_tracker();
        let worker_id = worker.id;
        tokio::spawn(async move {
            // Poll the tracker for this in-process deployment until it
            // leaves `InProgress`; the HTTP surface polls the same tracker
            // independently for `GET /api/workers/deployment-status/{id}`.
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                let Some(record) = tracker.get(&deployment_id).await else { break };
                use crate::provisioning::DeploymentOutcome::*;
                match record.outcome {
                    InProgress => continue,
                    Success => {
                        let _ = repo.set_worker_status(worker_id, WorkerStatus::Online, None).await;
                        let _ = repo.set_worker_state(worker_id, WorkerState::Started).await;
                        if let Ok(Some(w)) = repo.get_worker(worker_id).await {
                            events
                                .publish_worker_update(worker_id, serde_json::to_value(&w).unwrap_or_default())
                                .await;
                        }
                    }
                    Error | Timeout => {
                        let msg = record
                            .steps
                            .iter()
                            .rev()
                            .find(|s| !s.success)
                            .map(|s| s.message.clone())
                            .unwrap_or_else(|| "provisioning failed".to_string());
                        let _ = repo
                            .set_worker_status(worker_id, WorkerStatus::Error, Some(msg))
                            .await;
                        let _ = repo.set_worker_state(worker_id, WorkerState::Failed).await;
                        if let Ok(Some(w)) = repo.get_worker(worker_id).await {
                            events
                                .publish_worker_update(worker_id, serde_json::to_value(&w).unwrap_or_default())
                                .await;
                        }
                    }
                }
                break;
            }
        });
    }

    fn provisioner_tracker(&self) -> crate::provisioning::DeploymentTracker {
        // The provisioner owns the tracker it was built with; cloning the
        // handle out is cheap (Arc-backed) and avoids threading a second
        // copy through every call site.
        self.provisioner.tracker_handle()
    }

    pub async fn start(&self, id: WorkerId) -> DispatchResult<Worker> {
        let worker = self.require_worker(id).await?;
        if !worker.can_transition_to(WorkerState::Started) {
            return Err(DispatchError::Conflict(format!(
                "cannot start worker in state {:?}",
                worker.state
            )));
        }
        self.repo.set_worker_state(id, WorkerState::Started).await?;

        let online = match worker.worker_type {
            WorkerType::Local => true,
            WorkerType::Remote => self.transport.health(&worker).await,
        };
        if online {
            self.repo.set_worker_status(id, WorkerStatus::Online, None).await?;
        } else {
            self.repo
                .set_worker_status(id, WorkerStatus::Error, Some("initial health probe failed".to_string()))
                .await?;
        }

        let updated = self.require_worker(id).await?;
        self.publish(&updated).await;
        self.events
            .publish_worker_log_line(id, format!("worker started, status={:?}", updated.status))
            .await;
        Ok(updated)
    }

    pub async fn pause(&self, id: WorkerId) -> DispatchResult<Worker> {
        let worker = self.require_worker(id).await?;
        if !worker.can_transition_to(WorkerState::Paused) {
            return Err(DispatchError::Conflict(format!(
                "cannot pause worker in state {:?}",
                worker.state
            )));
        }
        let updated = self
            .repo
            .set_worker_state(id, WorkerState::Paused)
            .await?
            .ok_or_else(|| DispatchError::NotFound("worker".to_string()))?;
        self.publish(&updated).await;
        Ok(updated)
    }

    /// Stopping a worker cancels its in-flight jobs (spec.md §4.2, §9 open
    /// question #2: pause does not, stop does).
    pub async fn stop(&self, id: WorkerId) -> DispatchResult<Worker> {
        let worker = self.require_worker(id).await?;
        if !worker.can_transition_to(WorkerState::Stopped) {
            return Err(DispatchError::Conflict(format!(
                "cannot stop worker in state {:?}",
                worker.state
            )));
        }

        for job in self.repo.list_running_jobs_for_worker(id).await? {
            if let Err(e) = self.transport.cancel(&worker, job.id).await {
                warn!(job_id = %job.id, worker_id = %id, error = %e, "best-effort cancel on stop failed");
            }
        }
        let cancelled = self.repo.cancel_running_jobs_for_worker(id).await?;
        for job in &cancelled {
            self.events
                .publish_job_update(job.id, json!({ "status": "Cancelled", "error_message": job.error_message }))
                .await;
        }

        let updated = self
            .repo
            .set_worker_state(id, WorkerState::Stopped)
            .await?
            .ok_or_else(|| DispatchError::NotFound("worker".to_string()))?;
        self.publish(&updated).await;
        self.events
            .publish_worker_log_line(id, format!("worker stopped, {} running job(s) cancelled", cancelled.len()))
            .await;
        Ok(updated)
    }

    pub async fn update_max_jobs(&self, id: WorkerId, max_jobs: u32) -> DispatchResult<Worker> {
        let updated = self
            .repo
            .update_worker_max_jobs(id, max_jobs)
            .await?
            .ok_or_else(|| DispatchError::NotFound("worker".to_string()))?;
        self.publish(&updated).await;
        Ok(updated)
    }

    pub async fn delete(&self, id: WorkerId) -> DispatchResult<()> {
        let worker = self.require_worker(id).await?;
        if worker.is_system() {
            return Err(DispatchError::Conflict(
                "the reserved System worker cannot be deleted".to_string(),
            ));
        }
        if !self.repo.delete_worker(id).await? {
            return Err(DispatchError::Conflict(
                "worker could not be deleted".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn list(&self, page: u32, per_page: u32) -> DispatchResult<Page<Worker>> {
        self.repo.list_workers(page, per_page).await
    }

    pub async fn get(&self, id: WorkerId) -> DispatchResult<Worker> {
        self.require_worker(id).await
    }

    async fn require_worker(&self, id: WorkerId) -> DispatchResult<Worker> {
        self.repo
            .get_worker(id)
            .await?
            .ok_or_else(|| DispatchError::NotFound("worker".to_string()))
    }

    async fn publish(&self, worker: &Worker) {
        self.events
            .publish_worker_update(worker.id, serde_json::to_value(worker).unwrap_or_default())
            .await;
    }
}
