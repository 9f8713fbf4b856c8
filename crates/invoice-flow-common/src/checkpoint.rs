use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::WorkflowState;

/// Lifecycle of a checkpoint. Variants are declared in lifecycle order, so
/// `Ord` reflects progress and a status never compares lower than its
/// predecessor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointStatus {
    Paused,
    Decided,
    Completed,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paused => "PAUSED",
            Self::Decided => "DECIDED",
            Self::Completed => "COMPLETED",
        }
    }

    /// Only `PAUSED -> DECIDED` and `DECIDED -> COMPLETED` are legal.
    pub fn can_transition_to(&self, next: CheckpointStatus) -> bool {
        matches!(
            (self, next),
            (Self::Paused, Self::Decided) | (Self::Decided, Self::Completed)
        )
    }

    /// True once a reviewer decision has been recorded.
    pub fn has_decision(&self) -> bool {
        matches!(self, Self::Decided | Self::Completed)
    }
}

impl FromStr for CheckpointStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PAUSED" => Ok(Self::Paused),
            "DECIDED" => Ok(Self::Decided),
            "COMPLETED" => Ok(Self::Completed),
            _ => Err(format!("Invalid checkpoint status: {}", s)),
        }
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "ACCEPT",
            Self::Reject => "REJECT",
        }
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACCEPT" => Ok(Self::Accept),
            "REJECT" => Ok(Self::Reject),
            _ => Err(format!("Invalid decision: {} (expected ACCEPT or REJECT)", s)),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted pause point awaiting (or holding) a reviewer decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub id: String,
    pub document_id: String,
    /// Id of the stage that requested the pause.
    pub stage_id: String,
    pub state: WorkflowState,
    pub status: CheckpointStatus,
    pub reviewer_id: Option<String>,
    pub decision: Option<Decision>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn is_pending(&self) -> bool {
        self.status == CheckpointStatus::Paused
    }
}

/// Fresh, globally unique checkpoint id.
pub fn new_checkpoint_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
