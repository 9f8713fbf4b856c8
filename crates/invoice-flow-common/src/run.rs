use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a pipeline run stands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    AwaitingDecision,
    Completed,
    TerminatedRejected,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::AwaitingDecision => "AWAITING_DECISION",
            Self::Completed => "COMPLETED",
            Self::TerminatedRejected => "TERMINATED_REJECTED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::TerminatedRejected | Self::Failed
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
