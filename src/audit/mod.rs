//! Append-only audit trail keyed by document id.
//!
//! `AuditLog` is handed to the orchestrator and to every stage through
//! `StageContext`; there is no process-wide logger.

use tracing::{trace, warn};

use invoice_flow_common::{AuditRecord, StoreError};

use crate::store::DbHandle;

#[derive(Clone)]
pub struct AuditLog {
    db: DbHandle,
}

impl AuditLog {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// Record a stage event. Never fails the caller: a write error is logged
    /// and the record is dropped.
    pub async fn append(&self, document_id: &str, stage: &str, message: impl Into<String>) {
        let (doc, stage_owned, message) =
            (document_id.to_string(), stage.to_string(), message.into());
        let result: Result<AuditRecord, StoreError> = self
            .db
            .call(move |db| db.append_audit(&doc, &stage_owned, &message))
            .await;
        match result {
            Ok(record) => trace!(
                document_id,
                stage,
                audit_id = record.id,
                message = %record.message,
                "audit"
            ),
            Err(e) => warn!(document_id, stage, error = %e, "failed to write audit record"),
        }
    }

    /// Trail of one document ordered by timestamp.
    pub async fn read_all(&self, document_id: &str) -> Result<Vec<AuditRecord>, StoreError> {
        let doc = document_id.to_string();
        self.db.call(move |db| db.read_audit(&doc)).await
    }

    /// Whole log ordered by timestamp, for export.
    pub async fn read_everything(&self) -> Result<Vec<AuditRecord>, StoreError> {
        self.db.call(|db| db.read_all_audit()).await
    }

    /// Administrative: remove every record.
    pub async fn purge(&self) -> Result<usize, StoreError> {
        let removed = self.db.call(|db| db.purge_audit()).await?;
        warn!(removed, "audit log purged");
        Ok(removed)
    }
}
