//! `GET/PUT /api/db` and `POST /api/db/initialize` (spec.md §6): database
//! backend configuration, modelled per spec.md §9 as "a configuration
//! object with a small enumerated set of options ... changes are applied
//! with explicit restart ... semantics" rather than a hot-swapped pool.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::state::AppState;
use crate::config::{DbConfig, DbKind};
use crate::error::{DispatchError, DispatchResult};

/// Read-only view of the configured backend. `pg_pwd` is deliberately
/// omitted — this is a status surface, not a credentials round-trip.
#[derive(Serialize)]
pub struct DbConfigResponse {
    pub db_type: &'static str,
    pub pg_host: String,
    pub pg_port: u16,
    pub pg_db: String,
    pub pg_schema: String,
    pub pg_user: String,
    pub use_managed_identity: bool,
    pub pg_managed_identity_user: Option<String>,
    pub restart_required: bool,
}

fn db_kind_str(kind: DbKind) -> &'static str {
    match kind {
        DbKind::Sqlite => "sqlite",
        DbKind::Postgresql => "postgresql",
        DbKind::Mysql => "mysql",
    }
}

fn render(config: &DbConfig, restart_required: bool) -> DbConfigResponse {
    DbConfigResponse {
        db_type: db_kind_str(config.kind),
        pg_host: config.pg_host.clone(),
        pg_port: config.pg_port,
        pg_db: config.pg_db.clone(),
        pg_schema: config.pg_schema.clone(),
        pg_user: config.pg_user.clone(),
        use_managed_identity: config.use_managed_identity,
        pg_managed_identity_user: config.pg_managed_identity_user.clone(),
        restart_required,
    }
}

pub async fn get_config(State(state): State<AppState>) -> Json<DbConfigResponse> {
    let config = state.db_config.read().await;
    Json(render(&config, false))
}

#[derive(Deserialize)]
pub struct UpdateDbConfigRequest {
    pub db_type: String,
    #[serde(default)]
    pub pg_host: Option<String>,
    #[serde(default)]
    pub pg_port: Option<u16>,
    #[serde(default)]
    pub pg_db: Option<String>,
    #[serde(default)]
    pub pg_schema: Option<String>,
    #[serde(default)]
    pub pg_user: Option<String>,
    #[serde(default)]
    pub pg_pwd: Option<String>,
    #[serde(default)]
    pub use_managed_identity: bool,
    #[serde(default)]
    pub pg_managed_identity_user: Option<String>,
}

/// Validates and stores the pending backend configuration. This never
/// hot-swaps the live connection pool — the stored value is picked up on
/// the orchestrator's next process start (spec.md §9).
pub async fn update_config(
    State(state): State<AppState>,
    Json(req): Json<UpdateDbConfigRequest>,
) -> DispatchResult<Json<DbConfigResponse>> {
    let kind = match req.db_type.as_str() {
        "sqlite" => DbKind::Sqlite,
        "postgresql" | "postgres" => DbKind::Postgresql,
        "mysql" => DbKind::Mysql,
        other => {
            return Err(DispatchError::Validation(format!(
                "unknown db_type '{other}' (expected sqlite|postgresql|mysql)"
            )))
        }
    };

    let mut config = state.db_config.write().await;
    config.kind = kind;
    if let Some(v) = req.pg_host {
        config.pg_host = v;
    }
    if let Some(v) = req.pg_port {
        config.pg_port = v;
    }
    if let Some(v) = req.pg_db {
        config.pg_db = v;
    }
    if let Some(v) = req.pg_schema {
        config.pg_schema = v;
    }
    if let Some(v) = req.pg_user {
        config.pg_user = v;
    }
    if let Some(v) = req.pg_pwd {
        config.pg_pwd = v;
    }
    config.use_managed_identity = req.use_managed_identity;
    if req.pg_managed_identity_user.is_some() {
        config.pg_managed_identity_user = req.pg_managed_identity_user;
    }

    Ok(Json(render(&config, true)))
}

/// Runs the embedded migrations against the currently connected pool
/// (not the pending `/api/db` value — initializing a *different* backend
/// requires a restart onto it first).
pub async fn initialize(State(state): State<AppState>) -> DispatchResult<StatusCode> {
    state.repo.migrate().await?;
    Ok(StatusCode::NO_CONTENT)
}
