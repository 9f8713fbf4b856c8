//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module     | Commands handled                                   |
//! |------------|-----------------------------------------------------|
//! | `project`  | `Init`, `Config`                                   |
//! | `run`      | `Run`, `Resume`                                    |
//! | `review`   | `Pending`, `Show`, `Decide`, `Submit`, `Serve`     |
//! | `audit`    | `Audit`                                            |
//! | `workflow` | `Workflow`                                         |
//!
//! `context` wires the store, audit log and export worker for commands
//! that touch the database.

pub mod audit;
pub mod context;
pub mod project;
pub mod review;
pub mod run;
pub mod workflow;

pub use audit::cmd_audit;
pub use project::{cmd_config, cmd_init};
pub use review::{cmd_decide, cmd_pending, cmd_serve, cmd_show, cmd_submit};
pub use run::{cmd_resume, cmd_run};
pub use workflow::cmd_workflow;
