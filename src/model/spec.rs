use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SpecId;

/// A reusable job template: a name and a command. Jobs copy the command
/// text (and the spec name) at creation time, so editing a spec never
/// changes the behavior of jobs already created from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpecification {
    pub id: SpecId,
    pub name: String,
    pub description: Option<String>,
    pub command: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobSpecification {
    pub fn new(name: String, description: Option<String>, command: String) -> Self {
        let now = Utc::now();
        Self {
            id: SpecId::new(),
            name,
            description,
            // Trailing newlines stripped at save; multi-line bodies preserved.
            command: command.trim_end_matches('\n').to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}
