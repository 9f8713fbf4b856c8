//! Durable checkpoint and audit storage.
//!
//! `FlowDb` owns the SQLite connection and the raw table operations.
//! `CheckpointStore` is the async facade the orchestrator and decision
//! gateways use: it runs every call on the blocking pool and, after a
//! successful decision, notifies in-process subscribers and registered
//! decision listeners.

mod audit;
mod checkpoints;
pub mod db;

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use invoice_flow_common::{Checkpoint, CheckpointStatus, Decision, StoreError, WorkflowState};

pub use db::{DbHandle, FlowDb};

/// Change notification published by `CheckpointStore`.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointEvent {
    Created { id: String, document_id: String },
    Decided { id: String, decision: Decision },
    Completed { id: String },
}

/// Side effect run after a decision is written.
///
/// Implementations must return quickly and must not block; failures are
/// logged and swallowed so they can never undo or delay the decision.
pub trait DecisionListener: Send + Sync {
    fn on_decision(&self, checkpoint: &Checkpoint) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct CheckpointStore {
    db: DbHandle,
    events: broadcast::Sender<CheckpointEvent>,
    listeners: Arc<Vec<Arc<dyn DecisionListener>>>,
}

impl CheckpointStore {
    pub fn new(db: DbHandle) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            db,
            events,
            listeners: Arc::new(Vec::new()),
        }
    }

    /// Register a decision listener. Call before cloning the store out.
    pub fn with_listener(mut self, listener: Arc<dyn DecisionListener>) -> Self {
        Arc::make_mut(&mut self.listeners).push(listener);
        self
    }

    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    /// Receive events for writes made through this store (and its clones).
    /// Writes from other processes are only visible by polling.
    pub fn subscribe(&self) -> broadcast::Receiver<CheckpointEvent> {
        self.events.subscribe()
    }

    pub async fn create(
        &self,
        checkpoint_id: &str,
        document_id: &str,
        stage_id: &str,
        state: &WorkflowState,
    ) -> Result<Checkpoint, StoreError> {
        let (id, doc, stage, state) = (
            checkpoint_id.to_string(),
            document_id.to_string(),
            stage_id.to_string(),
            state.clone(),
        );
        let checkpoint = self
            .db
            .call(move |db| db.create_checkpoint(&id, &doc, &stage, &state))
            .await?;
        info!(
            checkpoint_id = %checkpoint.id,
            document_id = %checkpoint.document_id,
            stage_id = %checkpoint.stage_id,
            "checkpoint created"
        );
        self.publish(CheckpointEvent::Created {
            id: checkpoint.id.clone(),
            document_id: checkpoint.document_id.clone(),
        });
        Ok(checkpoint)
    }

    pub async fn decide(
        &self,
        checkpoint_id: &str,
        reviewer_id: &str,
        decision: Decision,
    ) -> Result<Checkpoint, StoreError> {
        let (id, reviewer) = (checkpoint_id.to_string(), reviewer_id.to_string());
        let checkpoint = self
            .db
            .call(move |db| db.decide_checkpoint(&id, &reviewer, decision))
            .await?;
        info!(
            checkpoint_id = %checkpoint.id,
            document_id = %checkpoint.document_id,
            reviewer_id,
            decision = %decision,
            "decision recorded"
        );
        self.publish(CheckpointEvent::Decided {
            id: checkpoint.id.clone(),
            decision,
        });
        self.notify_listeners(&checkpoint);
        Ok(checkpoint)
    }

    pub async fn complete(&self, checkpoint_id: &str) -> Result<Checkpoint, StoreError> {
        let id = checkpoint_id.to_string();
        let checkpoint = self
            .db
            .call(move |db| db.complete_checkpoint(&id))
            .await?;
        debug!(checkpoint_id = %checkpoint.id, "checkpoint completed");
        self.publish(CheckpointEvent::Completed {
            id: checkpoint.id.clone(),
        });
        Ok(checkpoint)
    }

    pub async fn get(&self, checkpoint_id: &str) -> Result<Checkpoint, StoreError> {
        let id = checkpoint_id.to_string();
        self.db.call(move |db| db.require_checkpoint(&id)).await
    }

    pub async fn list_by_status(
        &self,
        status: CheckpointStatus,
    ) -> Result<Vec<Checkpoint>, StoreError> {
        self.db
            .call(move |db| db.list_checkpoints_by_status(status))
            .await
    }

    fn publish(&self, event: CheckpointEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn notify_listeners(&self, checkpoint: &Checkpoint) {
        for listener in self.listeners.iter() {
            if let Err(e) = listener.on_decision(checkpoint) {
                warn!(
                    checkpoint_id = %checkpoint.id,
                    error = %e,
                    "decision listener failed"
                );
            }
        }
    }
}
