//! JWT auth middleware: optional-by-default extraction of `AuthUser` onto
//! request extensions, mirroring the teacher's `jwt_auth_middleware`
//! (`server/middleware/jwt_auth.rs`) — unauthenticated requests pass
//! through untouched, and individual handlers decide whether to demand a
//! caller.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use crate::auth::{extract_bearer, AuthUser};

use super::state::AppState;

pub async fn jwt_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let user = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| state.jwt.verify_token(extract_bearer(raw)).ok())
        .map(AuthUser::from);

    match &user {
        Some(u) => debug!(username = %u.username, is_admin = u.is_admin, "authenticated request"),
        None => debug!("unauthenticated request"),
    }

    if let Some(user) = user {
        request.extensions_mut().insert(user);
    }

    next.run(request).await
}
