//! REST + SSE surface consumed by the UI and by submitter scripts
//! (spec.md §6).
//!
//! Grounded on the teacher's `server/app.rs` `build_app`: one `Router`,
//! one `AxumAppState`-shaped `AppState`, a JWT middleware layer, CORS,
//! and `TraceLayer`. The teacher serves GraphQL; this crate's surface is
//! REST + SSE, so routes are grouped per entity instead of one `/graphql`
//! endpoint.

pub mod middleware;
pub mod routes;
pub mod sse;
pub mod state;

use axum::http::{HeaderValue, Method};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Builds the full application router over `state`. Split out from
/// `main.rs` so integration tests can mount the router directly without a
/// bound TCP listener.
pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    let cors = if allowed_origins.is_empty() {
        CorsLayer::new().allow_origin(tower_http::cors::Any)
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    }
    .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
    .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/health", get(routes::health::health_handler))
        .route("/api/auth/login", post(routes::auth::login))
        .route("/api/auth/logout", post(routes::auth::logout))
        .nest("/api", api_routes(state.clone()))
        .layer(from_fn_with_state(state.clone(), middleware::jwt_auth_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes(state: AppState) -> Router<AppState> {
    use routes::*;

    Router::new()
        // ---- specs ----
        .route("/specs", get(specs::list).post(specs::create))
        .route(
            "/specs/:id",
            get(specs::get).put(specs::update).delete(specs::delete),
        )
        // ---- jobs ----
        .route("/jobs", get(jobs::list).post(jobs::run))
        .route("/jobs/run", post(jobs::run))
        .route("/jobs/statistics/summary", get(jobs::statistics))
        .route("/jobs/realtime", get(realtime::jobs_realtime))
        .route("/jobs/:id", get(jobs::get).delete(jobs::delete))
        .route("/jobs/:id/cancel", put(jobs::cancel))
        .route("/jobs/:id/retry", put(jobs::retry))
        .route("/jobs/:id/move", put(jobs::move_job))
        .route("/jobs/:id/logs", get(logs::job_logs))
        .route("/jobs/:id/logs/stream", get(logs::job_logs_stream))
        // ---- queues ----
        .route("/queues", get(queues::list).post(queues::create))
        .route("/queues/realtime", get(realtime::queues_realtime))
        .route(
            "/queues/:id",
            get(queues::get).put(queues::update).delete(queues::delete),
        )
        .route("/queues/:id/start", post(queues::start))
        .route("/queues/:id/stop", post(queues::stop))
        .route("/queues/:id/pause", post(queues::pause))
        .route("/queues/:id/workers", get(queues::list_workers))
        .route("/queues/:id/workers/bulk", post(queues::assign_workers_bulk))
        .route(
            "/queues/:id/workers/:worker_id",
            post(queues::assign_worker).delete(queues::unassign_worker),
        )
        .route("/queues/:id/logs", get(logs::queue_logs))
        .route("/queues/:id/logs/clear", post(logs::queue_logs_clear))
        .route("/queues/:id/logs/stream", get(logs::queue_logs_stream))
        // ---- workers ----
        .route("/workers", get(workers::list).post(workers::register))
        .route("/workers/realtime", get(realtime::workers_realtime))
        .route(
            "/workers/monitoring",
            get(workers::get_monitoring_interval).put(workers::set_monitoring_interval),
        )
        .route(
            "/workers/deployment-status/:deployment_id",
            get(workers::deployment_status),
        )
        .route(
            "/workers/:id",
            get(workers::get).put(workers::update).delete(workers::delete),
        )
        .route("/workers/:id/start", post(workers::start))
        .route("/workers/:id/stop", post(workers::stop))
        .route("/workers/:id/pause", post(workers::pause))
        .route("/workers/:id/logs", get(logs::worker_logs))
        .route("/workers/:id/logs/clear", post(logs::worker_logs_clear))
        .route("/workers/:id/logs/stream", get(logs::worker_logs_stream))
        // ---- database configuration ----
        .route("/db", get(db::get_config).put(db::update_config))
        .route("/db/initialize", post(db::initialize))
        .with_state(state)
}
