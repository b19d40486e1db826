use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An append-only record of a system decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub action: String,
    pub actor: String,
    pub target: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn system(action: impl Into<String>, target: impl Into<String>, metadata: Value) -> Self {
        Self {
            action: action.into(),
            actor: "system".to_string(),
            target: target.into(),
            metadata,
            created_at: Utc::now(),
        }
    }
}
