//! Waiting for a reviewer decision on a paused checkpoint.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use invoice_flow_common::{Checkpoint, Decision, StoreError};

use crate::errors::OrchestratorError;
use crate::store::{CheckpointEvent, CheckpointStore};

/// How a paused run obtains its decision.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DecisionMode {
    /// Wait for an external reviewer.
    #[default]
    Manual,
    /// Accept on the reviewer's behalf after `delay`. Demo and test use only.
    Automated { delay: Duration, reviewer_id: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    /// End the run as FAILED, leaving the checkpoint paused.
    Fail,
    /// Record a REJECT and terminate the run.
    Reject,
}

impl TimeoutAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Reject => "reject",
        }
    }
}

impl FromStr for TimeoutAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail" => Ok(Self::Fail),
            "reject" => Ok(Self::Reject),
            _ => Err(format!("Invalid timeout action: {} (expected fail or reject)", s)),
        }
    }
}

impl fmt::Display for TimeoutAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTimeout {
    /// Poll cycles to wait before giving up.
    pub max_polls: u32,
    pub action: TimeoutAction,
    /// Reviewer id recorded on a timeout rejection.
    pub reviewer_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionPolicy {
    pub mode: DecisionMode,
    pub poll_interval: Duration,
    /// No timeout unless configured.
    pub timeout: Option<DecisionTimeout>,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            mode: DecisionMode::Manual,
            poll_interval: Duration::from_secs(1),
            timeout: None,
        }
    }
}

/// Block until `checkpoint_id` carries a decision and return it.
///
/// The returned checkpoint is `DECIDED` or `COMPLETED`.
pub(crate) async fn await_decision(
    store: &CheckpointStore,
    policy: &DecisionPolicy,
    checkpoint_id: &str,
) -> Result<Checkpoint, OrchestratorError> {
    match &policy.mode {
        DecisionMode::Automated { delay, reviewer_id } => {
            tokio::time::sleep(*delay).await;
            info!(checkpoint_id, reviewer_id = %reviewer_id, "automated decision: ACCEPT");
            decide_or_current(store, checkpoint_id, reviewer_id, Decision::Accept).await
        }
        DecisionMode::Manual => poll(store, policy, checkpoint_id).await,
    }
}

async fn poll(
    store: &CheckpointStore,
    policy: &DecisionPolicy,
    checkpoint_id: &str,
) -> Result<Checkpoint, OrchestratorError> {
    // Subscribe before the first read so an in-process decision between the
    // read and the wait is not missed.
    let mut events = store.subscribe();
    let mut polls: u32 = 0;
    loop {
        let checkpoint = store.get(checkpoint_id).await?;
        if checkpoint.status.has_decision() {
            debug!(checkpoint_id, polls, "decision observed");
            return Ok(checkpoint);
        }

        match &policy.timeout {
            Some(timeout) if polls >= timeout.max_polls => {
                return on_timeout(store, timeout, checkpoint_id, polls).await;
            }
            _ => {}
        }

        // Only a full poll interval counts towards the timeout; event wakeups
        // just re-read the store.
        let interval_elapsed = tokio::select! {
            _ = tokio::time::sleep(policy.poll_interval) => true,
            _ = next_decision_event(&mut events, checkpoint_id) => false,
        };
        if interval_elapsed {
            polls += 1;
        }
    }
}

async fn on_timeout(
    store: &CheckpointStore,
    timeout: &DecisionTimeout,
    checkpoint_id: &str,
    polls: u32,
) -> Result<Checkpoint, OrchestratorError> {
    warn!(checkpoint_id, polls, action = %timeout.action, "no decision before timeout");
    match timeout.action {
        TimeoutAction::Fail => Err(OrchestratorError::DecisionTimeout {
            checkpoint_id: checkpoint_id.to_string(),
            polls,
        }),
        TimeoutAction::Reject => {
            decide_or_current(store, checkpoint_id, &timeout.reviewer_id, Decision::Reject).await
        }
    }
}

/// Record `decision`, or return the checkpoint as-is if someone else decided
/// first.
async fn decide_or_current(
    store: &CheckpointStore,
    checkpoint_id: &str,
    reviewer_id: &str,
    decision: Decision,
) -> Result<Checkpoint, OrchestratorError> {
    match store.decide(checkpoint_id, reviewer_id, decision).await {
        Ok(checkpoint) => Ok(checkpoint),
        Err(StoreError::InvalidTransition { .. }) => {
            let current = store.get(checkpoint_id).await?;
            debug!(checkpoint_id, status = %current.status, "checkpoint already decided");
            Ok(current)
        }
        Err(e) => Err(e.into()),
    }
}

/// Resolves when this process records a decision (or completion) for
/// `checkpoint_id`. Never resolves once the channel is closed, leaving the
/// poll timer in charge.
async fn next_decision_event(
    events: &mut broadcast::Receiver<CheckpointEvent>,
    checkpoint_id: &str,
) {
    loop {
        match events.recv().await {
            Ok(CheckpointEvent::Decided { id, .. } | CheckpointEvent::Completed { id })
                if id == checkpoint_id =>
            {
                return;
            }
            Ok(_) => continue,
            // Missed events: re-read the store.
            Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
