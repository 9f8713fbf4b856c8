use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use invoice_flow_common::StoreError;

/// Async-safe handle to the flow database.
///
/// Wraps `FlowDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<FlowDb>>,
}

impl DbHandle {
    pub fn new(db: FlowDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Open the database at `path` (creating parent directories) and wrap it.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
        Ok(Self::new(FlowDb::new(path)?))
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R, E>(&self, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(&FlowDb) -> std::result::Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: From<StoreError> + Send + 'static,
    {
        let db = self.inner.clone();
        match tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| E::from(StoreError::LockPoisoned))?;
            f(&guard)
        })
        .await
        {
            Ok(result) => result,
            Err(join_err) => Err(E::from(StoreError::database(
                anyhow::Error::new(join_err).context("DB task panicked"),
            ))),
        }
    }

    /// Acquire the database mutex synchronously. Only for startup, admin
    /// commands and tests; never from a hot async path.
    pub fn lock_sync(&self) -> std::result::Result<std::sync::MutexGuard<'_, FlowDb>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

pub struct FlowDb {
    pub(super) conn: Connection,
}

impl FlowDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init(true)?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init(false)?;
        Ok(db)
    }

    fn init(&self, on_disk: bool) -> Result<()> {
        // Orchestrator and decision gateways may be separate processes
        // sharing one file.
        self.conn
            .busy_timeout(Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        if on_disk {
            let mode: String = self
                .conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                .context("Failed to enable WAL journal")?;
            tracing::debug!(journal_mode = %mode, "opened flow database");
        }
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS checkpoints (
                    id TEXT PRIMARY KEY,
                    document_id TEXT NOT NULL,
                    state_blob TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'PAUSED',
                    reviewer_id TEXT,
                    decision TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS audit_log (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    document_id TEXT NOT NULL,
                    stage TEXT NOT NULL,
                    message TEXT NOT NULL,
                    ts TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_checkpoints_status ON checkpoints(status);
                CREATE INDEX IF NOT EXISTS idx_checkpoints_document ON checkpoints(document_id);
                CREATE INDEX IF NOT EXISTS idx_audit_log_document ON audit_log(document_id, ts);
                ",
            )
            .context("Failed to create tables")?;

        // Additive migration for databases written before checkpoints
        // recorded their pausing stage. Only "duplicate column" is ignored.
        match self.conn.execute(
            "ALTER TABLE checkpoints ADD COLUMN stage_id TEXT NOT NULL DEFAULT ''",
            [],
        ) {
            Ok(_) => {}
            Err(e) if e.to_string().contains("duplicate column") => {}
            Err(e) => return Err(anyhow::anyhow!("Failed to add stage_id column: {}", e)),
        }

        Ok(())
    }
}

// ── Shared helpers ────────────────────────────────────────────────────

/// Timestamps are stored as fixed-width RFC 3339 strings so that text
/// ordering in SQLite matches chronological ordering.
pub(super) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(super) fn parse_ts(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{}': {}", raw, e))
}

pub(super) fn db_err(context: &'static str) -> impl FnOnce(rusqlite::Error) -> StoreError {
    move |e| StoreError::database(anyhow::Error::new(e).context(context))
}

// ── Tests ─────────────────────────────────────────────────────────────
