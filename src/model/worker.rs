use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Type;

use crate::ids::WorkerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkerType {
    Local,
    Remote,
}

/// Reflects the last health probe outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Online,
    Offline,
    Provisioning,
    Error,
}

/// Reflects operator intent, independent of the last observed status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Stopped,
    Started,
    Paused,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SshAuthMethod {
    Key,
    Password,
}

/// SSH connection parameters for a remote worker. `None` for local workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshCredentials {
    pub username: String,
    pub auth_method: SshAuthMethod,
    /// Private key path (key auth) — never the key material itself.
    pub private_key_path: Option<String>,
    /// Password (password auth). Stored encrypted at rest by the
    /// repository adapter; kept as plain `String` at this layer since
    /// encryption-at-rest is a backend concern, not a domain one.
    pub password: Option<String>,
}

/// A compute endpoint the dispatcher can send jobs to.
///
/// `status` reflects the last health probe (pushed by the health monitor);
/// `state` reflects operator intent (pushed by `start`/`stop`/`pause`
/// calls). A worker accepts new dispatches only when
/// `state == Started && status == Online && current_jobs < max_jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    pub worker_type: WorkerType,
    pub hostname: String,
    pub ip_address: Option<String>,
    pub port: u16,
    pub ssh: Option<SshCredentials>,
    pub max_jobs: u32,
    pub current_jobs: u32,
    pub status: WorkerStatus,
    pub state: WorkerState,
    pub last_seen: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Consecutive missed health probes; reset on success, 3 misses flips
    /// `status` to `Offline` (§4.2).
    pub consecutive_health_misses: u32,
    pub created_at: DateTime<Utc>,
}

impl Worker {
    pub const SYSTEM_WORKER_NAME: &'static str = "System";

    /// Registers a new worker in `state=Stopped`. Remote workers requesting
    /// provisioning start `status=Provisioning`; everything else starts
    /// `status=Offline` until the first successful `start`/health probe.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        worker_type: WorkerType,
        hostname: String,
        ip_address: Option<String>,
        port: u16,
        ssh: Option<SshCredentials>,
        max_jobs: u32,
        provisioning: bool,
    ) -> Self {
        Self {
            id: WorkerId::new(),
            name,
            worker_type,
            hostname,
            ip_address,
            port,
            ssh,
            max_jobs,
            current_jobs: 0,
            status: if provisioning {
                WorkerStatus::Provisioning
            } else {
                WorkerStatus::Offline
            },
            state: WorkerState::Stopped,
            last_seen: None,
            error_message: None,
            consecutive_health_misses: 0,
            created_at: Utc::now(),
        }
    }

    /// Valid transitions per the worker state machine (§4.2):
    /// stopped->started, started<->paused, {started,paused}->stopped,
    /// and any->failed (handled separately via `set_worker_state` directly
    /// since it models an exceptional transition, not an operator intent).
    pub fn can_transition_to(&self, target: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self.state, target),
            (Stopped, Started)
                | (Started, Paused)
                | (Paused, Started)
                | (Started, Stopped)
                | (Paused, Stopped)
        )
    }

    pub fn is_eligible_for_dispatch(&self) -> bool {
        self.state == WorkerState::Started
            && self.status == WorkerStatus::Online
            && self.current_jobs < self.max_jobs
    }

    pub fn is_system(&self) -> bool {
        self.name == Self::SYSTEM_WORKER_NAME
    }

    pub fn system(hostname: String, max_jobs: u32) -> Self {
        Self {
            id: WorkerId::new(),
            name: Self::SYSTEM_WORKER_NAME.to_string(),
            worker_type: WorkerType::Local,
            hostname,
            ip_address: None,
            port: 0,
            ssh: None,
            max_jobs,
            current_jobs: 0,
            status: WorkerStatus::Online,
            state: WorkerState::Started,
            last_seen: Some(Utc::now()),
            error_message: None,
            consecutive_health_misses: 0,
            created_at: Utc::now(),
        }
    }
}
