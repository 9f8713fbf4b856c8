//! Checkpoint table access. Every status change is a single conditional
//! `UPDATE ... WHERE status = <expected>`, so two writers racing on the same
//! checkpoint cannot both succeed.

use std::str::FromStr;

use chrono::Utc;
use rusqlite::{ErrorCode, OptionalExtension, params};

use invoice_flow_common::{Checkpoint, CheckpointStatus, Decision, StoreError, WorkflowState};

use super::db::{FlowDb, db_err, format_ts, parse_ts};

const SELECT_COLUMNS: &str = "SELECT id, document_id, stage_id, state_blob, status, reviewer_id, decision, created_at, updated_at FROM checkpoints";

impl FlowDb {
    pub fn create_checkpoint(
        &self,
        id: &str,
        document_id: &str,
        stage_id: &str,
        state: &WorkflowState,
    ) -> Result<Checkpoint, StoreError> {
        let blob = state.to_json().map_err(StoreError::database)?;
        let now = format_ts(Utc::now());
        let inserted = self.conn.execute(
            "INSERT INTO checkpoints (id, document_id, stage_id, state_blob, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                id,
                document_id,
                stage_id,
                blob,
                CheckpointStatus::Paused.as_str(),
                now
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::DuplicateCheckpoint { id: id.to_string() });
            }
            Err(e) => return Err(db_err("Failed to insert checkpoint")(e)),
        }
        self.require_checkpoint(id)
    }

    /// `PAUSED -> DECIDED`, recording who decided what.
    pub fn decide_checkpoint(
        &self,
        id: &str,
        reviewer_id: &str,
        decision: Decision,
    ) -> Result<Checkpoint, StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE checkpoints
                 SET status = ?1, reviewer_id = ?2, decision = ?3, updated_at = ?4
                 WHERE id = ?5 AND status = ?6",
                params![
                    CheckpointStatus::Decided.as_str(),
                    reviewer_id,
                    decision.as_str(),
                    format_ts(Utc::now()),
                    id,
                    CheckpointStatus::Paused.as_str()
                ],
            )
            .map_err(db_err("Failed to record decision"))?;
        if changed == 0 {
            return Err(self.rejected_transition(id, CheckpointStatus::Decided));
        }
        self.require_checkpoint(id)
    }

    /// `DECIDED -> COMPLETED`.
    pub fn complete_checkpoint(&self, id: &str) -> Result<Checkpoint, StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE checkpoints SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![
                    CheckpointStatus::Completed.as_str(),
                    format_ts(Utc::now()),
                    id,
                    CheckpointStatus::Decided.as_str()
                ],
            )
            .map_err(db_err("Failed to complete checkpoint"))?;
        if changed == 0 {
            return Err(self.rejected_transition(id, CheckpointStatus::Completed));
        }
        self.require_checkpoint(id)
    }

    pub fn get_checkpoint(&self, id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let row = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                CheckpointRow::from_row,
            )
            .optional()
            .map_err(db_err("Failed to query checkpoint"))?;
        row.map(CheckpointRow::into_checkpoint).transpose()
    }

    pub fn require_checkpoint(&self, id: &str) -> Result<Checkpoint, StoreError> {
        self.get_checkpoint(id)?
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    /// Checkpoints in the given status, oldest first.
    pub fn list_checkpoints_by_status(
        &self,
        status: CheckpointStatus,
    ) -> Result<Vec<Checkpoint>, StoreError> {
        self.query_checkpoints(
            &format!("{SELECT_COLUMNS} WHERE status = ?1 ORDER BY created_at ASC, rowid ASC"),
            params![status.as_str()],
        )
    }

    /// Every checkpoint that carries a decision, most recently updated first.
    pub fn list_decided_checkpoints(&self) -> Result<Vec<Checkpoint>, StoreError> {
        self.query_checkpoints(
            &format!(
                "{SELECT_COLUMNS} WHERE decision IS NOT NULL ORDER BY updated_at DESC, rowid DESC"
            ),
            [],
        )
    }

    pub fn list_checkpoints_for_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<Checkpoint>, StoreError> {
        self.query_checkpoints(
            &format!("{SELECT_COLUMNS} WHERE document_id = ?1 ORDER BY created_at ASC, rowid ASC"),
            params![document_id],
        )
    }

    fn query_checkpoints<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<Checkpoint>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(db_err("Failed to prepare checkpoint query"))?;
        let rows = stmt
            .query_map(params, CheckpointRow::from_row)
            .map_err(db_err("Failed to query checkpoints"))?;
        let mut checkpoints = Vec::new();
        for row in rows {
            let row = row.map_err(db_err("Failed to read checkpoint row"))?;
            checkpoints.push(row.into_checkpoint()?);
        }
        Ok(checkpoints)
    }

    /// Explain why a guarded update touched no rows.
    fn rejected_transition(&self, id: &str, to: CheckpointStatus) -> StoreError {
        match self.get_checkpoint(id) {
            Ok(Some(current)) => StoreError::InvalidTransition {
                id: id.to_string(),
                from: current.status,
                to,
            },
            Ok(None) => StoreError::NotFound { id: id.to_string() },
            Err(e) => e,
        }
    }
}

// ── Internal row helpers ──────────────────────────────────────────────

/// Raw checkpoint columns before status, decision, state and timestamps are
/// parsed into typed values.
struct CheckpointRow {
    id: String,
    document_id: String,
    stage_id: String,
    state_blob: String,
    status: String,
    reviewer_id: Option<String>,
    decision: Option<String>,
    created_at: String,
    updated_at: String,
}

impl CheckpointRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            document_id: row.get(1)?,
            stage_id: row.get(2)?,
            state_blob: row.get(3)?,
            status: row.get(4)?,
            reviewer_id: row.get(5)?,
            decision: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint, StoreError> {
        let corrupt = |message: String| StoreError::Corrupt {
            id: self.id.clone(),
            message,
        };
        let status = CheckpointStatus::from_str(&self.status).map_err(corrupt)?;
        let decision = self
            .decision
            .as_deref()
            .map(Decision::from_str)
            .transpose()
            .map_err(corrupt)?;
        if status.has_decision() && decision.is_none() {
            return Err(corrupt(format!("status {} without a decision", status)));
        }
        let state = WorkflowState::from_json(&self.state_blob)
            .map_err(|e| corrupt(format!("state blob: {}", e)))?;
        let created_at = parse_ts(&self.created_at).map_err(corrupt)?;
        let updated_at = parse_ts(&self.updated_at).map_err(corrupt)?;

        Ok(Checkpoint {
            id: self.id,
            document_id: self.document_id,
            stage_id: self.stage_id,
            state,
            status,
            reviewer_id: self.reviewer_id,
            decision,
            created_at,
            updated_at,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
