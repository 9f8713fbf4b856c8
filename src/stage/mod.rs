//! Pipeline stages.
//!
//! A stage is a unit of work over the shared `WorkflowState`: it receives
//! the state by value and returns the next one. To hand control to a human
//! it calls `WorkflowState::request_pause` with a fresh checkpoint id; the
//! orchestrator does the rest.

pub mod builtin;
pub mod registry;
pub mod tools;

use std::sync::Arc;

use async_trait::async_trait;

use invoice_flow_common::WorkflowState;

use crate::audit::AuditLog;
use crate::errors::StageError;

pub use builtin::{BuiltinStage, StageSettings};
pub use registry::StageRegistry;
pub use tools::ToolPicker;

/// A single step of the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    async fn run(
        &self,
        ctx: &StageContext,
        state: WorkflowState,
    ) -> Result<WorkflowState, StageError>;
}

/// What a stage gets besides the state: who it is working for, where to
/// write audit lines, and which tools are configured.
#[derive(Clone)]
pub struct StageContext {
    document_id: String,
    stage_id: String,
    audit: AuditLog,
    tools: Arc<ToolPicker>,
}

impl StageContext {
    pub fn new(
        document_id: impl Into<String>,
        stage_id: impl Into<String>,
        audit: AuditLog,
        tools: Arc<ToolPicker>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            stage_id: stage_id.into(),
            audit,
            tools,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn stage_id(&self) -> &str {
        &self.stage_id
    }

    pub fn tools(&self) -> &ToolPicker {
        &self.tools
    }

    /// Append an audit line under this stage's id.
    pub async fn log(&self, message: impl Into<String>) {
        self.audit
            .append(&self.document_id, &self.stage_id, message)
            .await;
    }
}
