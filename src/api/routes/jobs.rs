//! Job routes: CRUD-ish lifecycle operations plus statistics (spec.md §6).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::state::AppState;
use crate::error::DispatchResult;
use crate::ids::JobId;
use crate::model::{Job, JobStatus};
use crate::repository::{JobStatistics, Page};

#[derive(Deserialize)]
pub struct ListJobsQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    pub exclude_status: Option<String>,
}

fn default_page() -> u32 {
    1
}
fn default_per_page() -> u32 {
    20
}

fn parse_exclude(raw: &Option<String>) -> DispatchResult<Vec<JobStatus>> {
    let Some(raw) = raw else { return Ok(Vec::new()) };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_job_status)
        .collect()
}

fn parse_job_status(s: &str) -> DispatchResult<JobStatus> {
    Ok(match s.to_ascii_lowercase().as_str() {
        "pending" => JobStatus::Pending,
        "running" => JobStatus::Running,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        "cancelled" | "canceled" => JobStatus::Cancelled,
        other => return Err(crate::error::DispatchError::Validation(format!("unknown job status '{other}'"))),
    })
}

pub async fn list(State(state): State<AppState>, Query(q): Query<ListJobsQuery>) -> DispatchResult<Json<Page<Job>>> {
    let exclude = parse_exclude(&q.exclude_status)?;
    Ok(Json(state.jobs.list(q.page, q.per_page, &exclude).await?))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<JobId>) -> DispatchResult<Json<Job>> {
    Ok(Json(state.jobs.get(id).await?))
}

#[derive(Deserialize)]
pub struct RunJobRequest {
    pub spec_name: String,
    #[serde(default)]
    pub runtime_args: Value,
    #[serde(default)]
    pub created_by: Option<String>,
    pub queue: Option<String>,
}

pub async fn run(State(state): State<AppState>, Json(req): Json<RunJobRequest>) -> DispatchResult<(StatusCode, Json<Job>)> {
    let created_by = req.created_by.unwrap_or_else(|| "api".to_string());
    let job = state
        .jobs
        .run(&req.spec_name, req.runtime_args, created_by, req.queue.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn cancel(State(state): State<AppState>, Path(id): Path<JobId>) -> DispatchResult<Json<Job>> {
    Ok(Json(state.jobs.cancel(id).await?))
}

#[derive(Serialize)]
pub struct RetryResponse {
    pub new_job_id: JobId,
}

pub async fn retry(State(state): State<AppState>, Path(id): Path<JobId>) -> DispatchResult<Json<RetryResponse>> {
    let new_job = state.jobs.retry(id).await?;
    Ok(Json(RetryResponse { new_job_id: new_job.id }))
}

#[derive(Deserialize)]
pub struct MoveJobRequest {
    pub new_queue: String,
}

pub async fn move_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
    Json(req): Json<MoveJobRequest>,
) -> DispatchResult<Json<Job>> {
    Ok(Json(state.jobs.move_to_queue(id, &req.new_queue).await?))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<JobId>) -> DispatchResult<StatusCode> {
    state.jobs.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn statistics(State(state): State<AppState>) -> DispatchResult<Json<JobStatistics>> {
    Ok(Json(state.jobs.statistics().await?))
}
