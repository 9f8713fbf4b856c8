//! Shared domain types for the invoice-flow orchestrator.
//!
//! Everything that crosses the boundary between the orchestrator, the
//! checkpoint store and the review surfaces lives here, so that a decision
//! gateway running in another process reads and writes the same shapes.

pub mod audit;
pub mod checkpoint;
pub mod error;
pub mod run;
pub mod state;
pub mod workflow;

pub use audit::AuditRecord;
pub use checkpoint::{Checkpoint, CheckpointStatus, Decision, new_checkpoint_id};
pub use error::StoreError;
pub use run::RunStatus;
pub use state::{FinalPayload, FinalStatus, WorkflowState};
pub use workflow::{StageDef, WorkflowSpec};
