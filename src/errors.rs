//! Typed error hierarchy for the invoice-flow orchestrator.
//!
//! - `ConfigurationError`: workflow/registry problems, fatal before any side effect
//! - `StageError`: a single stage failed to produce its output state
//! - `OrchestratorError`: everything that ends a run as FAILED
//!
//! Store contract violations live in `invoice_flow_common::StoreError`, since
//! decision gateways in other processes share them.

use std::path::PathBuf;

use invoice_flow_common::{RunStatus, StoreError};
use thiserror::Error;

/// Errors in the workflow definition or its wiring to the stage registry.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Unknown stage '{name}'")]
    UnknownStage { name: String },

    #[error("Stage {stage_id} refers to unknown stage '{name}'")]
    UnresolvedStage { stage_id: String, name: String },

    #[error("Malformed workflow: {0}")]
    MalformedWorkflow(String),

    #[error("Failed to read workflow file at {path}: {source}")]
    WorkflowReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint {checkpoint_id} was created by stage {stage_id}, which is not in this workflow")]
    UnknownCheckpointStage {
        checkpoint_id: String,
        stage_id: String,
    },
}

/// Errors raised by a stage while transforming the workflow state.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Missing required field '{field}'")]
    MissingField { field: String },

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StageError {
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }
}

/// Errors that end a pipeline run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Document has no '{field}' field to identify it")]
    MissingDocumentId { field: String },

    #[error("Stage {stage_id} failed: {source}")]
    StageExecution {
        stage_id: String,
        #[source]
        source: StageError,
    },

    #[error("Checkpoint store error: {0}")]
    Store(#[from] StoreError),

    #[error("No decision for checkpoint {checkpoint_id} after {polls} polls")]
    DecisionTimeout { checkpoint_id: String, polls: u32 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// Every orchestrator error ends the run as FAILED; a rejection is an
    /// outcome, not an error.
    pub fn run_status(&self) -> RunStatus {
        RunStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_unresolved_stage_names_both_ids() {
        let err = ConfigurationError::UnresolvedStage {
            stage_id: "MATCH".into(),
            name: "fuzzy_match".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("MATCH"));
        assert!(msg.contains("fuzzy_match"));
    }

    #[test]
    fn orchestrator_error_converts_from_configuration_error() {
        let inner = ConfigurationError::UnknownStage { name: "x".into() };
        let err: OrchestratorError = inner.into();
        assert!(matches!(
            err,
            OrchestratorError::Configuration(ConfigurationError::UnknownStage { .. })
        ));
    }

    #[test]
    fn orchestrator_error_converts_from_store_error() {
        let err: OrchestratorError = StoreError::NotFound { id: "cp".into() }.into();
        match &err {
            OrchestratorError::Store(StoreError::NotFound { id }) => assert_eq!(id, "cp"),
            _ => panic!("Expected Store(NotFound)"),
        }
        assert_eq!(err.run_status(), RunStatus::Failed);
    }

    #[test]
    fn stage_execution_error_keeps_stage_source() {
        let err = OrchestratorError::StageExecution {
            stage_id: "UNDERSTAND".into(),
            source: StageError::missing("amount"),
        };
        assert!(err.to_string().contains("UNDERSTAND"));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Missing required field 'amount'"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ConfigurationError::MalformedWorkflow("x".into()));
        assert_std_error(&StageError::Failed("x".into()));
        assert_std_error(&OrchestratorError::DecisionTimeout {
            checkpoint_id: "cp".into(),
            polls: 3,
        });
    }
}
