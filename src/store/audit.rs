use chrono::Utc;
use rusqlite::params;

use invoice_flow_common::{AuditRecord, StoreError};

use super::db::{FlowDb, db_err, format_ts, parse_ts};

impl FlowDb {
    pub fn append_audit(
        &self,
        document_id: &str,
        stage: &str,
        message: &str,
    ) -> Result<AuditRecord, StoreError> {
        let now = Utc::now();
        self.conn
            .execute(
                "INSERT INTO audit_log (document_id, stage, message, ts) VALUES (?1, ?2, ?3, ?4)",
                params![document_id, stage, message, format_ts(now)],
            )
            .map_err(db_err("Failed to append audit record"))?;
        Ok(AuditRecord {
            id: self.conn.last_insert_rowid(),
            document_id: document_id.to_string(),
            stage: stage.to_string(),
            message: message.to_string(),
            timestamp: now,
        })
    }

    /// Audit trail of one document, oldest first.
    pub fn read_audit(&self, document_id: &str) -> Result<Vec<AuditRecord>, StoreError> {
        self.query_audit(
            "SELECT id, document_id, stage, message, ts FROM audit_log
             WHERE document_id = ?1 ORDER BY ts ASC, id ASC",
            params![document_id],
        )
    }

    /// The whole audit log, oldest first.
    pub fn read_all_audit(&self) -> Result<Vec<AuditRecord>, StoreError> {
        self.query_audit(
            "SELECT id, document_id, stage, message, ts FROM audit_log ORDER BY ts ASC, id ASC",
            [],
        )
    }

    /// Delete every audit record and reclaim the space. Returns how many
    /// records were removed.
    pub fn purge_audit(&self) -> Result<usize, StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM audit_log", [])
            .map_err(db_err("Failed to purge audit log"))?;
        self.conn
            .execute_batch("VACUUM;")
            .map_err(db_err("Failed to vacuum database"))?;
        Ok(removed)
    }

    fn query_audit<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(db_err("Failed to prepare audit query"))?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(db_err("Failed to query audit log"))?;

        let mut records = Vec::new();
        for row in rows {
            let (id, document_id, stage, message, ts) =
                row.map_err(db_err("Failed to read audit row"))?;
            let timestamp = parse_ts(&ts).map_err(|message| StoreError::Corrupt {
                id: format!("audit:{}", id),
                message,
            })?;
            records.push(AuditRecord {
                id,
                document_id,
                stage,
                message,
                timestamp,
            });
        }
        Ok(records)
    }

    #[cfg(test)]
    pub(crate) fn drop_audit_table(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch("DROP TABLE audit_log;")
    }
}
