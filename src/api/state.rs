//! Shared application state handed to every route handler. Grounded on the
//! teacher's `server::app::AxumAppState` (a flat `Clone` bundle of Arc'd
//! services installed with `with_state`).

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::auth::JwtService;
use crate::config::DbConfig;
use crate::events::EventBus;
use crate::jobs::JobLifecycleController;
use crate::provisioning::DeploymentTracker;
use crate::queues::{DispatchWakeup, QueueManager};
use crate::repository::Repository;
use crate::transport::WorkerTransportClient;
use crate::workers::health_monitor::MonitorInterval;
use crate::workers::WorkerManager;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub events: EventBus,
    pub transport: WorkerTransportClient,
    pub wakeup: DispatchWakeup,
    pub jwt: Arc<JwtService>,
    pub queues: Arc<QueueManager>,
    pub workers: Arc<WorkerManager>,
    pub jobs: Arc<JobLifecycleController>,
    pub deployments: DeploymentTracker,
    pub monitor_interval: MonitorInterval,
    /// Currently configured database backend, exposed read-only via
    /// `GET /api/db`. Changing the backend takes effect only on the next
    /// process start (spec.md §9: "applied with explicit restart ... per
    /// field") — `PUT /api/db` validates and stores the pending value here
    /// for the operator to pick up on restart; it does not hot-swap the
    /// live connection pool.
    pub db_config: Arc<RwLock<DbConfig>>,
}
