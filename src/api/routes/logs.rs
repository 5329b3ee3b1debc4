//! Per-entity log endpoints shared shape across jobs/workers/queues
//! (spec.md §4.5, §6): `GET .../logs` (buffered tail as JSON),
//! `POST .../logs/clear`, `GET .../logs/stream` (SSE).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::api::sse::log_stream;
use crate::api::state::AppState;
use crate::error::DispatchResult;
use crate::ids::{JobId, QueueId, WorkerId};
use crate::repository::codec;

#[derive(Serialize)]
pub struct LogTailResponse {
    pub lines: Vec<LogLine>,
}

#[derive(Serialize)]
pub struct LogLine {
    pub seq: u64,
    pub line: String,
}

fn render_tail(tail: Vec<(u64, String)>) -> LogTailResponse {
    LogTailResponse {
        lines: tail.into_iter().map(|(seq, line)| LogLine { seq, line }).collect(),
    }
}

// ---- jobs ----

pub async fn job_logs(State(state): State<AppState>, Path(id): Path<JobId>) -> Json<LogTailResponse> {
    Json(render_tail(state.events.job_log_tail(id).await))
}

pub async fn job_logs_stream(State(state): State<AppState>, Path(id): Path<JobId>) -> DispatchResult<impl IntoResponse> {
    let job = state.jobs.get(id).await?;
    let tail = state.events.job_log_tail(id).await;
    let rx = state
        .events
        .subscribe(&crate::events::EventBus::job_log_topic(id))
        .await;
    let already_terminal = job
        .status
        .is_terminal()
        .then(|| (codec::job_status_str(job.status).to_string(), job.error_message.clone()));
    Ok(Sse::new(log_stream(tail, rx, already_terminal)).keep_alive(KeepAlive::default()))
}

// ---- workers ----

pub async fn worker_logs(State(state): State<AppState>, Path(id): Path<WorkerId>) -> Json<LogTailResponse> {
    Json(render_tail(state.events.worker_log_tail(id).await))
}

pub async fn worker_logs_clear(State(state): State<AppState>, Path(id): Path<WorkerId>) -> StatusCode {
    state
        .events
        .clear_log_tail(&crate::events::EventBus::worker_log_topic(id))
        .await;
    StatusCode::NO_CONTENT
}

pub async fn worker_logs_stream(State(state): State<AppState>, Path(id): Path<WorkerId>) -> impl IntoResponse {
    let tail = state.events.worker_log_tail(id).await;
    let rx = state
        .events
        .subscribe(&crate::events::EventBus::worker_log_topic(id))
        .await;
    Sse::new(log_stream(tail, rx, None)).keep_alive(KeepAlive::default())
}

// ---- queues ----

pub async fn queue_logs(State(state): State<AppState>, Path(id): Path<QueueId>) -> Json<LogTailResponse> {
    Json(render_tail(state.events.queue_log_tail(id).await))
}

pub async fn queue_logs_clear(State(state): State<AppState>, Path(id): Path<QueueId>) -> StatusCode {
    state
        .events
        .clear_log_tail(&crate::events::EventBus::queue_log_topic(id))
        .await;
    StatusCode::NO_CONTENT
}

pub async fn queue_logs_stream(State(state): State<AppState>, Path(id): Path<QueueId>) -> impl IntoResponse {
    let tail = state.events.queue_log_tail(id).await;
    let rx = state
        .events
        .subscribe(&crate::events::EventBus::queue_log_topic(id))
        .await;
    Sse::new(log_stream(tail, rx, None)).keep_alive(KeepAlive::default())
}
