//! Orchestrator process entry point: loads configuration, connects to
//! storage, seeds the reserved "System" worker, spawns the dispatch loop
//! / health monitor / startup-recovery pass, and serves the HTTP+SSE
//! surface.
//!
//! Grounded on the teacher's `server/main.rs` (tracing init -> config ->
//! pool connect -> migrate -> `build_app` -> `axum::serve`), extended with
//! the background loops spec.md §2/§5 names as concurrent long-lived
//! tasks supervised by a shared `CancellationToken`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dispatcher_core::api::{build_router, AppState};
use dispatcher_core::auth::JwtService;
use dispatcher_core::config::{Config, DbKind};
use dispatcher_core::events::EventBus;
use dispatcher_core::jobs::JobLifecycleController;
use dispatcher_core::model::{Worker, WorkerState, WorkerStatus};
use dispatcher_core::provisioning::{DeploymentTracker, WorkerProvisioner};
use dispatcher_core::queues::{DispatchLoop, DispatchWakeup, QueueManager};
use dispatcher_core::repository::{postgres::PostgresRepository, sqlite::SqliteRepository, Repository};
use dispatcher_core::transport::WorkerTransportClient;
use dispatcher_core::workers::health_monitor::monitor_interval;
use dispatcher_core::workers::{WorkerHealthMonitor, WorkerManager};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dispatcher_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting dispatcher orchestrator");

    let config = Config::from_env().context("failed to load configuration")?;

    let repo: Arc<dyn Repository> = match config.db.kind {
        DbKind::Sqlite => Arc::new(
            SqliteRepository::connect(&config.db.connection_url())
                .await
                .context("failed to connect to sqlite")?,
        ),
        DbKind::Postgresql => Arc::new(
            PostgresRepository::connect(&config.db.connection_url())
                .await
                .context("failed to connect to postgresql")?,
        ),
        // No MySQL adapter is implemented yet (DESIGN.md records this as a
        // deliberate scope cut); fail fast at startup rather than silently
        // falling back to a different backend.
        DbKind::Mysql => anyhow::bail!("DB_TYPE=mysql is accepted by configuration but has no repository adapter yet"),
    };

    tracing::info!("running database migrations");
    repo.migrate().await.context("failed to run migrations")?;

    ensure_system_worker(&repo).await?;

    let events = EventBus::new();
    let transport = WorkerTransportClient::new();
    let wakeup = DispatchWakeup::new();
    let jwt = Arc::new(JwtService::new(&config.jwt_secret, config.jwt_issuer.clone()));
    let deployments = DeploymentTracker::new();
    let provisioner = WorkerProvisioner::new(deployments.clone());
    let interval = monitor_interval(config.health_monitor_interval);

    let queues = Arc::new(QueueManager::new(repo.clone(), events.clone(), wakeup.clone()));
    let workers = Arc::new(WorkerManager::new(repo.clone(), events.clone(), transport.clone(), provisioner));
    let jobs = Arc::new(JobLifecycleController::new(
        repo.clone(),
        events.clone(),
        transport.clone(),
        wakeup.clone(),
    ));

    // Recover from an ungraceful shutdown: any job left Running from a
    // prior process instance is not actually running anywhere anymore.
    let recovered = jobs.recover_from_ungraceful_shutdown().await?;
    if recovered > 0 {
        tracing::warn!(count = recovered, "recovered stale Running jobs from a prior shutdown");
    }

    let state = AppState {
        repo: repo.clone(),
        events: events.clone(),
        transport: transport.clone(),
        wakeup: wakeup.clone(),
        jwt,
        queues,
        workers,
        jobs,
        deployments,
        monitor_interval: interval.clone(),
        db_config: Arc::new(RwLock::new(config.db.clone())),
    };

    let shutdown = CancellationToken::new();

    let dispatch_handle = tokio::spawn(
        DispatchLoop::new(repo.clone(), events.clone(), transport.clone(), wakeup.clone()).run(shutdown.child_token()),
    );
    let health_handle = tokio::spawn(
        WorkerHealthMonitor::new(repo.clone(), events.clone(), transport.clone(), interval).run(shutdown.child_token()),
    );

    let app = build_router(state, &allowed_origins());
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(%addr, "serving HTTP+SSE API");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("failed to bind to address")?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shutdown signal received, draining in-flight work");
    shutdown.cancel();
    // Spec.md §5: wait up to 10s for in-flight jobs' terminal events before
    // exiting; the ingestors are independently spawned tasks this process
    // does not join on, so this is a best-effort grace window rather than
    // a hard wait.
    let _ = tokio::time::timeout(Duration::from_secs(10), async {
        let _ = dispatch_handle.await;
        let _ = health_handle.await;
    })
    .await;

    tracing::info!("dispatcher orchestrator stopped cleanly");
    Ok(())
}

/// Seeds the reserved "System" worker on first boot (spec.md §3: "a
/// reserved local worker, undeletable, used as a safe fallback").
/// Idempotent — a no-op on every boot after the first.
async fn ensure_system_worker(repo: &Arc<dyn Repository>) -> Result<()> {
    if repo.get_worker_by_name(Worker::SYSTEM_WORKER_NAME).await?.is_some() {
        return Ok(());
    }
    let mut system = Worker::system("localhost".to_string(), num_cpus());
    system.status = WorkerStatus::Online;
    system.state = WorkerState::Started;
    repo.create_worker(system).await?;
    tracing::info!("seeded reserved System worker");
    Ok(())
}

fn num_cpus() -> u32 {
    std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1)
}

fn allowed_origins() -> Vec<String> {
    std::env::var("ALLOWED_ORIGINS")
        .ok()
        .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default()
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
