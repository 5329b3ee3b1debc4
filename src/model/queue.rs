use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Type;

use crate::ids::QueueId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueuePriority {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueueStrategy {
    RoundRobin,
    LeastLoaded,
    Random,
    Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Stopped,
    Started,
    Paused,
}

/// A named dispatch lane. At most one queue in the system may have
/// `is_default = true`; jobs submitted without an explicit queue name
/// land on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Queue {
    pub id: QueueId,
    pub name: String,
    pub description: Option<String>,
    pub priority: QueuePriority,
    pub strategy: QueueStrategy,
    pub state: QueueState,
    pub is_default: bool,
    /// Round-robin cursor: index into the queue's eligible-worker list as
    /// of the last dispatch, advanced unconditionally every attempt.
    pub round_robin_cursor: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Queue {
    pub fn new(
        name: String,
        description: Option<String>,
        priority: QueuePriority,
        strategy: QueueStrategy,
        is_default: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: QueueId::new(),
            name,
            description,
            priority,
            strategy,
            state: QueueState::Stopped,
            is_default,
            round_robin_cursor: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Valid transitions per the queue state machine (§4.1):
    /// stopped->started, started<->paused, {started,paused}->stopped.
    pub fn can_transition_to(&self, target: QueueState) -> bool {
        use QueueState::*;
        matches!(
            (self.state, target),
            (Stopped, Started)
                | (Started, Paused)
                | (Paused, Started)
                | (Started, Stopped)
                | (Paused, Stopped)
        )
    }
}
