//! The reviewer-facing side of the checkpoint store.
//!
//! Lists what is waiting for review and records decisions. Runs in the same
//! process as the orchestrator (in-process events wake it immediately) or in
//! a separate one sharing the database file (the orchestrator sees the
//! decision on its next poll).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use invoice_flow_common::{
    Checkpoint, CheckpointStatus, Decision, StoreError, WorkflowSpec, WorkflowState,
};

use crate::store::CheckpointStore;

/// What a reviewer needs to see to decide on a checkpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PendingItem {
    pub checkpoint_id: String,
    pub document_id: String,
    pub stage_id: String,
    pub created_at: DateTime<Utc>,
    pub summary: ReviewSummary,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReviewSummary {
    pub vendor_name: Option<String>,
    pub amount: Option<f64>,
    pub match_result: Option<String>,
    pub match_score: Option<f64>,
}

impl ReviewSummary {
    fn from_state(state: &WorkflowState) -> Self {
        let document = state.document();
        let doc_field = |key: &str| document.and_then(|d| d.get(key));
        Self {
            vendor_name: doc_field("vendor_name")
                .and_then(Value::as_str)
                .map(str::to_string),
            amount: doc_field("amount").and_then(Value::as_f64),
            match_result: state
                .get("match_result")
                .and_then(Value::as_str)
                .map(str::to_string),
            match_score: state.get("match_score").and_then(Value::as_f64),
        }
    }
}

/// Returned to the reviewer after a decision is recorded.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionReceipt {
    /// Checkpoint id; hand it to `resume` to continue the run elsewhere.
    pub resume_token: String,
    pub decision: Decision,
    pub status: CheckpointStatus,
    /// Stage the run continues with, or `None` when the run ends here.
    pub next_stage: Option<String>,
}

#[derive(Clone)]
pub struct DecisionGateway {
    store: CheckpointStore,
    spec: Option<Arc<WorkflowSpec>>,
}

impl DecisionGateway {
    pub fn new(store: CheckpointStore) -> Self {
        Self { store, spec: None }
    }

    /// Attach the workflow so receipts can name the next stage.
    pub fn with_workflow(mut self, spec: Arc<WorkflowSpec>) -> Self {
        self.spec = Some(spec);
        self
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Paused checkpoints, oldest first.
    pub async fn pending(&self) -> Result<Vec<PendingItem>, StoreError> {
        let checkpoints = self.store.list_by_status(CheckpointStatus::Paused).await?;
        Ok(checkpoints.into_iter().map(pending_item).collect())
    }

    pub async fn checkpoint(&self, checkpoint_id: &str) -> Result<Checkpoint, StoreError> {
        self.store.get(checkpoint_id).await
    }

    /// Record `decision` and close the checkpoint.
    ///
    /// Only a PAUSED checkpoint accepts a decision; a second submission
    /// fails with `InvalidTransition` and leaves the first one in place.
    pub async fn submit(
        &self,
        checkpoint_id: &str,
        decision: Decision,
        reviewer_id: &str,
    ) -> Result<DecisionReceipt, StoreError> {
        let decided = self.store.decide(checkpoint_id, reviewer_id, decision).await?;
        let checkpoint = match self.store.complete(checkpoint_id).await {
            Ok(cp) => cp,
            // The waiting run completed it first.
            Err(StoreError::InvalidTransition {
                from: CheckpointStatus::Completed,
                ..
            }) => self.store.get(checkpoint_id).await?,
            Err(e) => return Err(e),
        };

        info!(
            checkpoint_id,
            document_id = %decided.document_id,
            reviewer_id,
            decision = %decision,
            "decision submitted"
        );
        Ok(DecisionReceipt {
            resume_token: checkpoint.id.clone(),
            decision,
            status: checkpoint.status,
            next_stage: self.next_stage(&checkpoint, decision),
        })
    }

    fn next_stage(&self, checkpoint: &Checkpoint, decision: Decision) -> Option<String> {
        if decision == Decision::Reject {
            return None;
        }
        self.spec
            .as_ref()?
            .next_after(&checkpoint.stage_id)
            .map(|def| def.id.clone())
    }
}

fn pending_item(checkpoint: Checkpoint) -> PendingItem {
    PendingItem {
        summary: ReviewSummary::from_state(&checkpoint.state),
        checkpoint_id: checkpoint.id,
        document_id: checkpoint.document_id,
        stage_id: checkpoint.stage_id,
        created_at: checkpoint.created_at,
    }
}
