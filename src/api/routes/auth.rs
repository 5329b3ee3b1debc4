//! `POST /api/auth/login`, `POST /api/auth/logout` (spec.md §6).

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::state::AppState;
use crate::auth::authenticate;
use crate::error::DispatchResult;
use crate::ids::UserId;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub auth_source: String,
}

#[derive(Serialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub is_admin: bool,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub user: UserSummary,
}

pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> DispatchResult<Json<LoginResponse>> {
    let user = authenticate(&state.repo, &req.username, &req.password, &req.auth_source).await?;
    let access_token = state
        .jwt
        .create_token(user.id, user.username.clone(), user.is_admin)
        .map_err(|e| crate::error::DispatchError::Internal(e))?;

    Ok(Json(LoginResponse {
        access_token,
        token_type: "Bearer",
        user: UserSummary {
            id: user.id,
            username: user.username,
            is_admin: user.is_admin,
        },
    }))
}

/// Tokens are stateless (no server-side session table), so logout is a
/// client-side no-op acknowledged with 200 — matches spec.md's bearer-token
/// model, which names no revocation/session store.
pub async fn logout() -> axum::http::StatusCode {
    axum::http::StatusCode::OK
}
