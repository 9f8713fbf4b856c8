//! Decision history export.
//!
//! Every recorded decision is appended to `logs/decisions.csv` and triggers a
//! fresh snapshot of `artifacts/decisions.csv` and `artifacts/audit_log.json`
//! for downstream consumers. The work runs on a background worker fed by a
//! bounded queue, so a decision write never waits on the filesystem.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use invoice_flow_common::{AuditRecord, Checkpoint};

use crate::store::{DbHandle, DecisionListener, FlowDb};

pub const DECISIONS_FILE: &str = "decisions.csv";
pub const AUDIT_FILE: &str = "audit_log.json";

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSettings {
    pub enabled: bool,
    /// Snapshot target.
    pub artifacts_dir: PathBuf,
    /// Append-only decision log.
    pub logs_dir: PathBuf,
    pub queue_capacity: usize,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            artifacts_dir: PathBuf::from("artifacts"),
            logs_dir: PathBuf::from("logs"),
            queue_capacity: 64,
        }
    }
}

/// One CSV row per decided checkpoint.
#[derive(Debug, Serialize)]
struct DecisionRow<'a> {
    checkpoint_id: &'a str,
    document_id: &'a str,
    decision: &'a str,
    reviewer_id: &'a str,
    created_at_unix: i64,
    updated_at_unix: i64,
}

impl<'a> DecisionRow<'a> {
    fn from_checkpoint(checkpoint: &'a Checkpoint) -> Self {
        Self {
            checkpoint_id: &checkpoint.id,
            document_id: &checkpoint.document_id,
            decision: checkpoint.decision.map(|d| d.as_str()).unwrap_or(""),
            reviewer_id: checkpoint.reviewer_id.as_deref().unwrap_or(""),
            created_at_unix: checkpoint.created_at.timestamp(),
            updated_at_unix: checkpoint.updated_at.timestamp(),
        }
    }
}

/// Append one decision to `<logs_dir>/decisions.csv`, writing the header
/// only when the file is new or empty.
pub fn append_decision_line(logs_dir: &Path, checkpoint: &Checkpoint) -> Result<PathBuf> {
    fs::create_dir_all(logs_dir)
        .with_context(|| format!("Failed to create {}", logs_dir.display()))?;
    let path = logs_dir.join(DECISIONS_FILE);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let write_header = file.metadata().map(|m| m.len() == 0).unwrap_or(true);

    let mut writer = csv::WriterBuilder::new()
        .has_headers(write_header)
        .from_writer(file);
    writer
        .serialize(DecisionRow::from_checkpoint(checkpoint))
        .with_context(|| format!("Failed to append to {}", path.display()))?;
    writer.flush()?;
    Ok(path)
}

/// Files written by one history export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedFiles {
    pub decisions: PathBuf,
    pub audit: PathBuf,
    pub decision_count: usize,
    pub audit_count: usize,
}

/// Rows read for one export: decided checkpoints (newest first) and the
/// whole audit log.
#[derive(Debug, Clone, Default)]
pub struct HistorySnapshot {
    pub decided: Vec<Checkpoint>,
    pub audit: Vec<AuditRecord>,
}

pub fn read_history(db: &FlowDb) -> Result<HistorySnapshot> {
    Ok(HistorySnapshot {
        decided: db.list_decided_checkpoints()?,
        audit: db.read_all_audit()?,
    })
}

/// Write `snapshot` into `out_dir`, replacing earlier exports. Touches only
/// the filesystem.
pub fn write_history(snapshot: &HistorySnapshot, out_dir: &Path) -> Result<ExportedFiles> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let decided = &snapshot.decided;
    let decisions = out_dir.join(DECISIONS_FILE);
    let mut writer = csv::WriterBuilder::new()
        .from_path(&decisions)
        .with_context(|| format!("Failed to create {}", decisions.display()))?;
    if decided.is_empty() {
        // serialize() writes the header lazily; keep it for empty exports.
        writer.write_record([
            "checkpoint_id",
            "document_id",
            "decision",
            "reviewer_id",
            "created_at_unix",
            "updated_at_unix",
        ])?;
    }
    for checkpoint in decided {
        writer.serialize(DecisionRow::from_checkpoint(checkpoint))?;
    }
    writer.flush()?;

    let records = &snapshot.audit;
    let audit = out_dir.join(AUDIT_FILE);
    let json = serde_json::to_string_pretty(records)?;
    fs::write(&audit, json).with_context(|| format!("Failed to write {}", audit.display()))?;

    Ok(ExportedFiles {
        decisions,
        audit,
        decision_count: decided.len(),
        audit_count: records.len(),
    })
}

/// Read the history under the database lock, then write the files on the
/// blocking pool with the lock released.
pub async fn export_history(db: &DbHandle, out_dir: &Path) -> Result<ExportedFiles> {
    let snapshot = db.call(read_history).await?;
    let out_dir = out_dir.to_path_buf();
    tokio::task::spawn_blocking(move || write_history(&snapshot, &out_dir))
        .await
        .context("History export task panicked")?
}

/// Decision listener that hands decided checkpoints to the export worker.
#[derive(Clone)]
pub struct ExportQueue {
    tx: mpsc::Sender<Checkpoint>,
}

impl ExportQueue {
    /// Start the export worker. It stops once every `ExportQueue` clone is
    /// dropped and the queue is drained; await the handle to flush.
    pub fn spawn(db: DbHandle, settings: ExportSettings) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let handle = tokio::spawn(run_worker(db, settings, rx));
        (Arc::new(Self { tx }), handle)
    }
}

impl DecisionListener for ExportQueue {
    fn on_decision(&self, checkpoint: &Checkpoint) -> anyhow::Result<()> {
        match self.tx.try_send(checkpoint.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(cp)) => {
                anyhow::bail!("export queue full, dropped decision for {}", cp.id)
            }
            Err(TrySendError::Closed(cp)) => {
                anyhow::bail!("export worker stopped, dropped decision for {}", cp.id)
            }
        }
    }
}

async fn run_worker(db: DbHandle, settings: ExportSettings, mut rx: mpsc::Receiver<Checkpoint>) {
    debug!(artifacts_dir = %settings.artifacts_dir.display(), "export worker started");
    while let Some(checkpoint) = rx.recv().await {
        let logs_dir = settings.logs_dir.clone();
        let checkpoint_id = checkpoint.id.clone();
        let appended =
            tokio::task::spawn_blocking(move || append_decision_line(&logs_dir, &checkpoint)).await;
        match appended {
            Ok(Ok(path)) => {
                debug!(checkpoint_id = %checkpoint_id, path = %path.display(), "decision logged")
            }
            Ok(Err(e)) => {
                warn!(checkpoint_id = %checkpoint_id, error = %e, "failed to log decision")
            }
            Err(e) => {
                warn!(checkpoint_id = %checkpoint_id, error = %e, "decision log task panicked")
            }
        }

        match export_history(&db, &settings.artifacts_dir).await {
            Ok(files) => info!(
                checkpoint_id = %checkpoint_id,
                decisions = files.decision_count,
                audit_records = files.audit_count,
                "history exported"
            ),
            Err(e) => warn!(checkpoint_id = %checkpoint_id, error = %e, "history export failed"),
        }
    }
    debug!("export worker stopped");
}
