//! `GET/POST/PUT/DELETE /api/specs` (and `/api/specs/{id}`) (spec.md §6).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::api::state::AppState;
use crate::error::{DispatchError, DispatchResult};
use crate::ids::SpecId;
use crate::model::JobSpecification;
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
pub struct CreateSpecRequest {
    pub name: String,
    pub description: Option<String>,
    pub command: String,
}

#[derive(Deserialize)]
pub struct UpdateSpecRequest {
    pub description: Option<String>,
    pub command: String,
}

pub async fn list(State(state): State<AppState>, Query(p): Query<Pagination>) -> DispatchResult<Json<Page<JobSpecification>>> {
    Ok(Json(state.repo.list_specs(p.page, p.per_page).await?))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<SpecId>) -> DispatchResult<Json<JobSpecification>> {
    let spec = state
        .repo
        .get_spec(id)
        .await?
        .ok_or_else(|| DispatchError::NotFound("spec".to_string()))?;
    Ok(Json(spec))
}

pub async fn create(State(state): State<AppState>, Json(req): Json<CreateSpecRequest>) -> DispatchResult<(StatusCode, Json<JobSpecification>)> {
    if req.name.trim().is_empty() {
        return Err(DispatchError::Validation("spec name must not be empty".to_string()));
    }
    if state.repo.get_spec_by_name(&req.name).await?.is_some() {
        return Err(DispatchError::Conflict(format!("spec named '{}' already exists", req.name)));
    }
    let spec = JobSpecification::new(req.name, req.description, req.command);
    let spec = state.repo.create_spec(spec).await?;
    Ok((StatusCode::CREATED, Json(spec)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<SpecId>,
    Json(req): Json<UpdateSpecRequest>,
) -> DispatchResult<Json<JobSpecification>> {
    let mut spec = state
        .repo
        .get_spec(id)
        .await?
        .ok_or_else(|| DispatchError::NotFound("spec".to_string()))?;
    spec.description = req.description;
    spec.command = req.command.trim_end_matches('\n').to_string();
    spec.updated_at = chrono::Utc::now();
    let updated = state.repo.update_spec(spec).await?;
    Ok(Json(updated))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<SpecId>) -> DispatchResult<StatusCode> {
    if !state.repo.delete_spec(id).await? {
        return Err(DispatchError::Conflict(
            "spec has a Running job referencing it and cannot be deleted".to_string(),
        ));
    }
    Ok(StatusCode::NO_CONTENT)
}
