use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One immutable line of the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub id: i64,
    pub document_id: String,
    pub stage: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
