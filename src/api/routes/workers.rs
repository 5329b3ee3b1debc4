//! Worker CRUD, lifecycle transitions, monitoring interval, and
//! deployment-status polling (spec.md §6).

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::state::AppState;
use crate::error::{DispatchError, DispatchResult};
use crate::ids::WorkerId;
use crate::model::{SshAuthMethod, SshCredentials, Worker, WorkerType};
use crate::repository::Page;
use crate::workers::manager::WorkerRegistration;

#[derive(Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}
fn default_per_page() -> u32 {
    20
}

#[derive(Deserialize)]
pub struct SshCredentialsRequest {
    pub username: String,
    pub auth_method: SshAuthMethod,
    pub private_key_path: Option<String>,
    pub password: Option<String>,
}

impl From<SshCredentialsRequest> for SshCredentials {
    fn from(r: SshCredentialsRequest) -> Self {
        Self {
            username: r.username,
            auth_method: r.auth_method,
            private_key_path: r.private_key_path,
            password: r.password,
        }
    }
}

#[derive(Deserialize)]
pub struct CreateWorkerRequest {
    pub name: String,
    pub worker_type: WorkerType,
    pub hostname: String,
    pub ip_address: Option<String>,
    pub port: u16,
    pub ssh: Option<SshCredentialsRequest>,
    #[serde(default = "default_max_jobs")]
    pub max_jobs: u32,
    #[serde(default)]
    pub provision: bool,
    /// URL the remote worker process calls back into this orchestrator on
    /// (spec.md §4.2 step 6). Required only when `worker_type = remote`
    /// and `provision = true`.
    #[serde(default)]
    pub orchestrator_callback_url: String,
}

fn default_max_jobs() -> u32 {
    1
}

pub async fn list(State(state): State<AppState>, Query(p): Query<Pagination>) -> DispatchResult<Json<Page<Worker>>> {
    Ok(Json(state.workers.list(p.page, p.per_page).await?))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<WorkerId>) -> DispatchResult<Json<Worker>> {
    Ok(Json(state.workers.get(id).await?))
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkerRequest>,
) -> DispatchResult<(StatusCode, Json<Worker>)> {
    if req.worker_type == WorkerType::Remote && req.provision && req.orchestrator_callback_url.is_empty() {
        return Err(DispatchError::Validation(
            "orchestrator_callback_url is required when provisioning a remote worker".to_string(),
        ));
    }
    let worker = state
        .workers
        .register(WorkerRegistration {
            name: req.name,
            worker_type: req.worker_type,
            hostname: req.hostname,
            ip_address: req.ip_address,
            port: req.port,
            ssh: req.ssh.map(Into::into),
            max_jobs: req.max_jobs,
            provision: req.provision,
            orchestrator_callback_url: req.orchestrator_callback_url,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(worker)))
}

#[derive(Deserialize)]
pub struct UpdateWorkerRequest {
    pub max_jobs: u32,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<WorkerId>,
    Json(req): Json<UpdateWorkerRequest>,
) -> DispatchResult<Json<Worker>> {
    Ok(Json(state.workers.update_max_jobs(id, req.max_jobs).await?))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<WorkerId>) -> DispatchResult<StatusCode> {
    state.workers.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn start(State(state): State<AppState>, Path(id): Path<WorkerId>) -> DispatchResult<Json<Worker>> {
    Ok(Json(state.workers.start(id).await?))
}

pub async fn stop(State(state): State<AppState>, Path(id): Path<WorkerId>) -> DispatchResult<Json<Worker>> {
    Ok(Json(state.workers.stop(id).await?))
}

pub async fn pause(State(state): State<AppState>, Path(id): Path<WorkerId>) -> DispatchResult<Json<Worker>> {
    Ok(Json(state.workers.pause(id).await?))
}

#[derive(Serialize)]
pub struct MonitoringIntervalResponse {
    pub interval_seconds: u64,
}

pub async fn get_monitoring_interval(State(state): State<AppState>) -> Json<MonitoringIntervalResponse> {
    let interval = *state.monitor_interval.read().await;
    Json(MonitoringIntervalResponse {
        interval_seconds: interval.as_secs(),
    })
}

#[derive(Deserialize)]
pub struct SetMonitoringIntervalRequest {
    pub interval_seconds: u64,
}

/// Hot-swaps the health monitor's period (spec.md §7 "global mutable
/// config" / §4.2: bounded 5-300s). Takes effect on the monitor's next
/// tick — no restart required.
pub async fn set_monitoring_interval(
    State(state): State<AppState>,
    Json(req): Json<SetMonitoringIntervalRequest>,
) -> DispatchResult<Json<MonitoringIntervalResponse>> {
    if !(5..=300).contains(&req.interval_seconds) {
        return Err(DispatchError::Validation(
            "interval_seconds must be between 5 and 300".to_string(),
        ));
    }
    *state.monitor_interval.write().await = Duration::from_secs(req.interval_seconds);
    Ok(Json(MonitoringIntervalResponse {
        interval_seconds: req.interval_seconds,
    }))
}

pub async fn deployment_status(
    State(state): State<AppState>,
    Path(deployment_id): Path<String>,
) -> DispatchResult<Json<crate::provisioning::DeploymentRecord>> {
    state
        .deployments
        .get(&deployment_id)
        .await
        .map(Json)
        .ok_or_else(|| DispatchError::NotFound("deployment".to_string()))
}
