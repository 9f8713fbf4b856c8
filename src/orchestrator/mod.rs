pub mod decision;
pub mod runner;

pub use decision::{DecisionMode, DecisionPolicy, DecisionTimeout, TimeoutAction};
pub use runner::{Orchestrator, OrchestratorSettings, RunOutcome};
