//! Shared wiring for commands that open the checkpoint database.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use invoice_flow::audit::AuditLog;
use invoice_flow::config::FlowConfig;
use invoice_flow::export::ExportQueue;
use invoice_flow::gateway::DecisionGateway;
use invoice_flow::orchestrator::{DecisionMode, DecisionPolicy, Orchestrator};
use invoice_flow::stage::StageRegistry;
use invoice_flow::store::{CheckpointStore, DbHandle};
use invoice_flow::workflow::{default_invoice_workflow, load_workflow};
use invoice_flow_common::WorkflowSpec;

use crate::DecisionArgs;

pub struct FlowContext {
    pub config: FlowConfig,
    pub store: CheckpointStore,
    pub audit: AuditLog,
    export_worker: Option<JoinHandle<()>>,
}

impl FlowContext {
    /// Open the database and, if enabled, start the export worker.
    pub fn open(config: FlowConfig) -> Result<Self> {
        let db_path = config.db_path();
        let db = DbHandle::open(&db_path)
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
        debug!(db_path = %db_path.display(), "database opened");

        let mut store = CheckpointStore::new(db.clone());
        let export = config.export_settings();
        let export_worker = if export.enabled {
            let (queue, worker) = ExportQueue::spawn(db.clone(), export);
            store = store.with_listener(queue);
            Some(worker)
        } else {
            None
        };

        Ok(Self {
            config,
            store,
            audit: AuditLog::new(db),
            export_worker,
        })
    }

    /// The workflow to run: `path` if given, else the configured file, else
    /// the built-in invoice workflow when no file has been written yet.
    pub fn workflow(&self, path: Option<&Path>) -> Result<WorkflowSpec> {
        load_workflow_for(&self.config, path)
    }

    pub fn gateway(&self) -> DecisionGateway {
        let gateway = DecisionGateway::new(self.store.clone());
        match self.workflow(None) {
            Ok(spec) => gateway.with_workflow(Arc::new(spec)),
            Err(e) => {
                warn!(error = %e, "workflow unavailable; receipts will not name a next stage");
                gateway
            }
        }
    }

    pub fn orchestrator(&self, spec: WorkflowSpec, decision: &DecisionArgs) -> Orchestrator {
        let mut settings = self.config.orchestrator_settings();
        settings.decision = apply_decision_args(settings.decision, decision, &self.config);

        Orchestrator::new(
            Arc::new(spec),
            Arc::new(StageRegistry::builtin(&self.config.stage_settings())),
            self.store.clone(),
            self.audit.clone(),
            Arc::new(self.config.tool_picker()),
            settings,
        )
    }

    /// Release the database handles and wait for queued exports. Drop every
    /// orchestrator and gateway built from this context first.
    pub async fn finish(self) {
        let Self {
            store,
            audit,
            export_worker,
            ..
        } = self;
        drop(store);
        drop(audit);
        if let Some(worker) = export_worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "export worker panicked");
            }
        }
    }
}

pub fn load_workflow_for(config: &FlowConfig, path: Option<&Path>) -> Result<WorkflowSpec> {
    match path {
        Some(path) => Ok(load_workflow(path)?),
        None => {
            let path = config.workflow_path();
            if path.exists() {
                Ok(load_workflow(&path)?)
            } else {
                debug!(
                    path = %path.display(),
                    "no workflow file, using the built-in invoice workflow"
                );
                Ok(default_invoice_workflow())
            }
        }
    }
}

/// CLI flags override the configured decision mode.
fn apply_decision_args(
    mut policy: DecisionPolicy,
    args: &DecisionArgs,
    config: &FlowConfig,
) -> DecisionPolicy {
    if args.auto {
        policy.mode = DecisionMode::Automated {
            delay: std::time::Duration::from_millis(config.toml.decision.auto_delay_ms),
            reviewer_id: config.toml.decision.auto_reviewer_id.clone(),
        };
    }
    if let (Some(ms), DecisionMode::Automated { delay, .. }) =
        (args.decision_delay_ms, &mut policy.mode)
    {
        *delay = std::time::Duration::from_millis(ms);
    }
    policy
}
