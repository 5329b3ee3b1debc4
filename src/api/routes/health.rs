//! `GET /health` — liveness/readiness probe (spec.md §6 ambient surface).
//!
//! Grounded on the teacher's `server/routes/health.rs`: a database
//! round-trip under a timeout, reported alongside the process's own
//! up/down verdict.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::api::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    database: DatabaseHealth,
}

#[derive(Serialize)]
pub struct DatabaseHealth {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db = match tokio::time::timeout(Duration::from_secs(5), state.repo.job_statistics()).await {
        Ok(Ok(_)) => DatabaseHealth { status: "ok", error: None },
        Ok(Err(e)) => DatabaseHealth { status: "error", error: Some(e.to_string()) },
        Err(_) => DatabaseHealth { status: "error", error: Some("query timeout (>5s)".to_string()) },
    };

    let healthy = db.status == "ok";
    let status_code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let status = if healthy { "healthy" } else { "unhealthy" };

    (status_code, Json(HealthResponse { status, database: db }))
}
