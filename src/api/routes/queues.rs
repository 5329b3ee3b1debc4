//! Queue CRUD, state transitions, and worker assignment (spec.md §6).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::api::state::AppState;
use crate::error::DispatchResult;
use crate::ids::{QueueId, WorkerId};
use crate::model::{Queue, QueuePriority, QueueStrategy, QueueWorkerAssignment, Worker};
use crate::repository::Page;

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
pub struct CreateQueueRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub priority: QueuePriority,
    #[serde(default)]
    pub strategy: QueueStrategy,
    #[serde(default)]
    pub is_default: bool,
}

impl Default for QueuePriority {
    fn default() -> Self {
        QueuePriority::Normal
    }
}

impl Default for QueueStrategy {
    fn default() -> Self {
        QueueStrategy::RoundRobin
    }
}

#[derive(Deserialize)]
pub struct UpdateQueueRequest {
    pub description: Option<String>,
    pub priority: QueuePriority,
    pub strategy: QueueStrategy,
    pub is_default: bool,
}

pub async fn list(State(state): State<AppState>, Query(p): Query<Pagination>) -> DispatchResult<Json<Page<Queue>>> {
    Ok(Json(state.queues.list(p.page, p.per_page).await?))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<QueueId>) -> DispatchResult<Json<Queue>> {
    Ok(Json(state.queues.get(id).await?))
}

pub async fn create(State(state): State<AppState>, Json(req): Json<CreateQueueRequest>) -> DispatchResult<(StatusCode, Json<Queue>)> {
    let queue = state
        .queues
        .create(req.name, req.description, req.priority, req.strategy, req.is_default)
        .await?;
    Ok((StatusCode::CREATED, Json(queue)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<QueueId>,
    Json(req): Json<UpdateQueueRequest>,
) -> DispatchResult<Json<Queue>> {
    let updated = state
        .queues
        .update(id, req.description, req.priority, req.strategy, req.is_default)
        .await?;
    Ok(Json(updated))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<QueueId>) -> DispatchResult<StatusCode> {
    state.queues.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn start(State(state): State<AppState>, Path(id): Path<QueueId>) -> DispatchResult<Json<Queue>> {
    Ok(Json(state.queues.start(id).await?))
}

pub async fn stop(State(state): State<AppState>, Path(id): Path<QueueId>) -> DispatchResult<Json<Queue>> {
    Ok(Json(state.queues.stop(id).await?))
}

pub async fn pause(State(state): State<AppState>, Path(id): Path<QueueId>) -> DispatchResult<Json<Queue>> {
    Ok(Json(state.queues.pause(id).await?))
}

pub async fn list_workers(State(state): State<AppState>, Path(id): Path<QueueId>) -> DispatchResult<Json<Vec<Worker>>> {
    Ok(Json(state.queues.list_workers(id).await?))
}

pub async fn assign_worker(
    State(state): State<AppState>,
    Path((queue_id, worker_id)): Path<(QueueId, WorkerId)>,
) -> DispatchResult<(StatusCode, Json<QueueWorkerAssignment>)> {
    let assignment = state.queues.assign_worker(queue_id, worker_id).await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

pub async fn unassign_worker(
    State(state): State<AppState>,
    Path((queue_id, worker_id)): Path<(QueueId, WorkerId)>,
) -> DispatchResult<StatusCode> {
    state.queues.unassign_worker(queue_id, worker_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct BulkAssignRequest {
    pub worker_ids: Vec<WorkerId>,
}

pub async fn assign_workers_bulk(
    State(state): State<AppState>,
    Path(queue_id): Path<QueueId>,
    Json(req): Json<BulkAssignRequest>,
) -> DispatchResult<Json<Vec<QueueWorkerAssignment>>> {
    Ok(Json(state.queues.assign_workers_bulk(queue_id, req.worker_ids).await?))
}
