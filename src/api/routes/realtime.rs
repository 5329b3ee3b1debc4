//! `GET /api/{jobs,workers,queues}/realtime` — coalesced list streams
//! (spec.md §4.5, §6).
//!
//! Grounded on the teacher's `kernel::sse::stream_handler`
//! (`BroadcastStream` -> `Sse`), built on top of `api::sse::list_stream`'s
//! coalescing/heartbeat/idle-close behavior.

use axum::extract::State;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::IntoResponse;

use crate::api::sse::list_stream;
use crate::api::state::AppState;
use crate::events::EventBus;

pub async fn jobs_realtime(State(state): State<AppState>) -> impl IntoResponse {
    let rx = state.events.subscribe(EventBus::JOBS_LIST_TOPIC).await;
    let snapshot = match state.jobs.list(1, 100, &[]).await {
        Ok(page) => serde_json::to_value(page).unwrap_or_default(),
        Err(_) => serde_json::json!({ "items": [] }),
    };
    Sse::new(list_stream(rx, "jobs_update", snapshot)).keep_alive(KeepAlive::default())
}

pub async fn workers_realtime(State(state): State<AppState>) -> impl IntoResponse {
    let rx = state.events.subscribe(EventBus::WORKERS_LIST_TOPIC).await;
    let snapshot = match state.workers.list(1, 100).await {
        Ok(page) => serde_json::to_value(page).unwrap_or_default(),
        Err(_) => serde_json::json!({ "items": [] }),
    };
    Sse::new(list_stream(rx, "workers_update", snapshot)).keep_alive(KeepAlive::default())
}

pub async fn queues_realtime(State(state): State<AppState>) -> impl IntoResponse {
    let rx = state.events.subscribe(EventBus::QUEUES_LIST_TOPIC).await;
    let snapshot = match state.queues.list(1, 100).await {
        Ok(page) => serde_json::to_value(page).unwrap_or_default(),
        Err(_) => serde_json::json!({ "items": [] }),
    };
    Sse::new(list_stream(rx, "queues_update", snapshot)).keep_alive(KeepAlive::default())
}
