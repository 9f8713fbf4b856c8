use thiserror::Error;

use crate::checkpoint::CheckpointStatus;

/// Errors from the checkpoint and audit store.
///
/// The first three variants are contract violations and are always surfaced
/// to the caller as-is.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Checkpoint {id} already exists")]
    DuplicateCheckpoint { id: String },

    #[error("Checkpoint {id} not found")]
    NotFound { id: String },

    #[error("Checkpoint {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: CheckpointStatus,
        to: CheckpointStatus,
    },

    #[error("Stored checkpoint {id} is corrupt: {message}")]
    Corrupt { id: String, message: String },

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    pub fn database(err: impl Into<anyhow::Error>) -> Self {
        Self::Database(err.into())
    }
}
