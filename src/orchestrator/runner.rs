use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, info};

use invoice_flow_common::state::{FINAL_PAYLOAD_KEY, HUMAN_DECISION_KEY};
use invoice_flow_common::{
    Checkpoint, CheckpointStatus, Decision, FinalPayload, FinalStatus, RunStatus, StageDef,
    StoreError, WorkflowSpec, WorkflowState,
};

use super::decision::{DecisionPolicy, await_decision};
use crate::audit::AuditLog;
use crate::errors::{ConfigurationError, OrchestratorError};
use crate::stage::{StageContext, StageRegistry, ToolPicker};
use crate::store::CheckpointStore;
use crate::workflow::validate_workflow;

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub decision: DecisionPolicy,
    /// Field of the input document that identifies it.
    pub document_id_field: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            decision: DecisionPolicy::default(),
            document_id_field: "invoice_id".to_string(),
        }
    }
}

/// Result of a run that ended without error.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// `COMPLETED` or `TERMINATED_REJECTED`.
    pub status: RunStatus,
    pub document_id: String,
    /// Checkpoints opened during this run, in order.
    pub checkpoints: Vec<String>,
    pub state: WorkflowState,
}

impl RunOutcome {
    pub fn final_payload(&self) -> Option<FinalPayload> {
        self.state.final_payload()
    }
}

enum Resolution {
    Continue,
    Rejected,
}

/// Drives a workflow over one document: runs stages in order, parks the
/// state in the checkpoint store whenever a stage asks for review, and
/// resumes or terminates according to the recorded decision.
#[derive(Clone)]
pub struct Orchestrator {
    spec: Arc<WorkflowSpec>,
    registry: Arc<StageRegistry>,
    store: CheckpointStore,
    audit: AuditLog,
    tools: Arc<ToolPicker>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        spec: Arc<WorkflowSpec>,
        registry: Arc<StageRegistry>,
        store: CheckpointStore,
        audit: AuditLog,
        tools: Arc<ToolPicker>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            spec,
            registry,
            store,
            audit,
            tools,
            settings,
        }
    }

    pub fn spec(&self) -> &WorkflowSpec {
        &self.spec
    }

    /// Stage ids must be unique so a checkpoint maps back to exactly one
    /// position; every stage name must resolve.
    fn validate(&self) -> Result<(), ConfigurationError> {
        validate_workflow(&self.spec)?;
        self.registry.validate(&self.spec)
    }

    /// Run the whole workflow over `document`.
    ///
    /// Configuration problems and a missing document id are reported before
    /// anything is written. A rejection is an `Ok` outcome with status
    /// `TERMINATED_REJECTED`; every `Err` means the run FAILED.
    pub async fn run(&self, document: Value) -> Result<RunOutcome, OrchestratorError> {
        self.validate()?;

        let state = WorkflowState::new(document);
        let field = &self.settings.document_id_field;
        let document_id =
            state
                .document_id(field)
                .ok_or_else(|| OrchestratorError::MissingDocumentId {
                    field: field.clone(),
                })?;

        info!(document_id = %document_id, stages = self.spec.len(), "run started");
        self.drive(document_id, state, 0, Vec::new()).await
    }

    /// Pick up a checkpoint, possibly created by a process that has since
    /// exited: wait for its decision if there is none yet, apply it, and
    /// continue with the stage after the one that paused.
    pub async fn resume(&self, checkpoint_id: &str) -> Result<RunOutcome, OrchestratorError> {
        self.validate()?;

        let checkpoint = self.store.get(checkpoint_id).await?;
        let index = self.spec.position(&checkpoint.stage_id).ok_or_else(|| {
            ConfigurationError::UnknownCheckpointStage {
                checkpoint_id: checkpoint.id.clone(),
                stage_id: checkpoint.stage_id.clone(),
            }
        })?;
        let def = &self.spec.stages[index];
        let document_id = checkpoint.document_id.clone();
        let mut state = checkpoint.state.clone();

        info!(
            document_id = %document_id,
            checkpoint_id,
            status = %checkpoint.status,
            "resuming from checkpoint"
        );
        let checkpoint = if checkpoint.status.has_decision() {
            checkpoint
        } else {
            await_decision(&self.store, &self.settings.decision, checkpoint_id).await?
        };

        let checkpoints = vec![checkpoint.id.clone()];
        match self
            .apply_decision(&document_id, def, &mut state, checkpoint)
            .await?
        {
            Resolution::Rejected => Ok(RunOutcome {
                status: RunStatus::TerminatedRejected,
                document_id,
                checkpoints,
                state,
            }),
            Resolution::Continue => {
                self.drive(document_id, state, index + 1, checkpoints)
                    .await
            }
        }
    }

    async fn drive(
        &self,
        document_id: String,
        mut state: WorkflowState,
        start: usize,
        mut checkpoints: Vec<String>,
    ) -> Result<RunOutcome, OrchestratorError> {
        for def in self.spec.stages.iter().skip(start) {
            let stage = self.registry.resolve(&def.stage)?;
            let ctx = StageContext::new(
                document_id.clone(),
                def.id.clone(),
                self.audit.clone(),
                self.tools.clone(),
            );

            debug!(
                document_id = %document_id,
                stage_id = %def.id,
                stage = %def.stage,
                "running stage"
            );
            state = match stage.run(&ctx, state).await {
                Ok(next) => next,
                Err(source) => {
                    self.audit
                        .append(&document_id, &def.id, format!("Stage failed: {source}"))
                        .await;
                    error!(
                        document_id = %document_id,
                        stage_id = %def.id,
                        error = %source,
                        "stage failed"
                    );
                    return Err(OrchestratorError::StageExecution {
                        stage_id: def.id.clone(),
                        source,
                    });
                }
            };
            self.audit
                .append(&document_id, &def.id, "Stage completed")
                .await;

            if !state.is_paused() {
                continue;
            }

            let checkpoint_id = self.open_checkpoint(&document_id, def, &state).await?;
            checkpoints.push(checkpoint_id.clone());
            info!(
                document_id = %document_id,
                checkpoint_id = %checkpoint_id,
                status = %RunStatus::AwaitingDecision,
                "awaiting decision"
            );

            let checkpoint =
                await_decision(&self.store, &self.settings.decision, &checkpoint_id).await?;
            if let Resolution::Rejected = self
                .apply_decision(&document_id, def, &mut state, checkpoint)
                .await?
            {
                return Ok(RunOutcome {
                    status: RunStatus::TerminatedRejected,
                    document_id,
                    checkpoints,
                    state,
                });
            }
        }

        // A payload set by a stage is kept as-is, whatever its shape.
        if !state.contains_key(FINAL_PAYLOAD_KEY) {
            state
                .set_final_payload(&FinalPayload::new(
                    document_id.clone(),
                    FinalStatus::Completed,
                ))
                .map_err(|e| OrchestratorError::Other(e.into()))?;
        }
        info!(document_id = %document_id, checkpoints = checkpoints.len(), "run completed");
        Ok(RunOutcome {
            status: RunStatus::Completed,
            document_id,
            checkpoints,
            state,
        })
    }

    /// Persist the paused state. The stage is expected to have set a fresh
    /// checkpoint id; reusing one surfaces as `DuplicateCheckpoint`.
    async fn open_checkpoint(
        &self,
        document_id: &str,
        def: &StageDef,
        state: &WorkflowState,
    ) -> Result<String, OrchestratorError> {
        let checkpoint_id = state
            .checkpoint_id()
            .map(str::to_string)
            .ok_or_else(|| OrchestratorError::StageExecution {
                stage_id: def.id.clone(),
                source: crate::errors::StageError::missing("checkpoint_id"),
            })?;
        self.store
            .create(&checkpoint_id, document_id, &def.id, state)
            .await?;
        self.audit
            .append(
                document_id,
                &def.id,
                format!("Checkpoint created {checkpoint_id}"),
            )
            .await;
        Ok(checkpoint_id)
    }

    /// Fold a recorded decision back into the run. Decision records are
    /// written under the pausing stage's id.
    async fn apply_decision(
        &self,
        document_id: &str,
        def: &StageDef,
        state: &mut WorkflowState,
        checkpoint: Checkpoint,
    ) -> Result<Resolution, OrchestratorError> {
        let decision = checkpoint.decision.ok_or_else(|| StoreError::Corrupt {
            id: checkpoint.id.clone(),
            message: format!("status {} without a decision", checkpoint.status),
        })?;
        if checkpoint.status == CheckpointStatus::Decided {
            self.complete_checkpoint(&checkpoint.id).await?;
        }

        let reviewer = checkpoint
            .reviewer_id
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        state.insert(
            HUMAN_DECISION_KEY,
            json!({
                "checkpoint_id": checkpoint.id,
                "decision": decision.as_str(),
                "reviewer_id": reviewer,
            }),
        );
        state.clear_pause();

        match decision {
            Decision::Reject => {
                self.audit
                    .append(
                        document_id,
                        &def.id,
                        format!("Rejected by {reviewer} at checkpoint {}", checkpoint.id),
                    )
                    .await;
                state
                    .set_final_payload(&FinalPayload::new(
                        document_id,
                        FinalStatus::RequiresManualHandling,
                    ))
                    .map_err(|e| OrchestratorError::Other(e.into()))?;
                info!(
                    document_id,
                    checkpoint_id = %checkpoint.id,
                    status = %RunStatus::TerminatedRejected,
                    "run rejected"
                );
                Ok(Resolution::Rejected)
            }
            Decision::Accept => {
                self.audit
                    .append(
                        document_id,
                        &def.id,
                        format!(
                            "Accepted by {reviewer} at checkpoint {}, resuming",
                            checkpoint.id
                        ),
                    )
                    .await;
                Ok(Resolution::Continue)
            }
        }
    }

    async fn complete_checkpoint(&self, checkpoint_id: &str) -> Result<(), OrchestratorError> {
        match self.store.complete(checkpoint_id).await {
            Ok(_) => Ok(()),
            // A decision gateway completes on submit; losing that race is fine.
            Err(StoreError::InvalidTransition {
                from: CheckpointStatus::Completed,
                ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StageError;
    use crate::orchestrator::decision::{DecisionMode, DecisionTimeout, TimeoutAction};
    use crate::stage::{Stage, StageContext};
    use crate::store::{DbHandle, FlowDb};
    use anyhow::Result;
    use async_trait::async_trait;
    use invoice_flow_common::new_checkpoint_id;
    use std::time::Duration;

    // ── Test stages ───────────────────────────────────────────────────

    /// Records that it ran by setting `ran_<stage id>`.
    struct MarkStage;

    #[async_trait]
    impl Stage for MarkStage {
        async fn run(
            &self,
            ctx: &StageContext,
            mut state: WorkflowState,
        ) -> Result<WorkflowState, StageError> {
            state.insert(format!("ran_{}", ctx.stage_id()), json!(true));
            Ok(state)
        }
    }

    struct PauseStage;

    #[async_trait]
    impl Stage for PauseStage {
        async fn run(
            &self,
            _ctx: &StageContext,
            mut state: WorkflowState,
        ) -> Result<WorkflowState, StageError> {
            state.request_pause(new_checkpoint_id());
            Ok(state)
        }
    }

    struct FailStage;

    #[async_trait]
    impl Stage for FailStage {
        async fn run(
            &self,
            _ctx: &StageContext,
            _state: WorkflowState,
        ) -> Result<WorkflowState, StageError> {
            Err(StageError::Failed("ERP unreachable".into()))
        }
    }

    /// Sets its own final payload, shaped the way a posting stage reports.
    struct SettleStage;

    #[async_trait]
    impl Stage for SettleStage {
        async fn run(
            &self,
            _ctx: &StageContext,
            mut state: WorkflowState,
        ) -> Result<WorkflowState, StageError> {
            state.insert(
                FINAL_PAYLOAD_KEY,
                json!({"invoice_id": "INV-1", "status": "COMPLETED", "erp_txn": "TXN-1"}),
            );
            Ok(state)
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────

    fn registry() -> StageRegistry {
        let mut registry = StageRegistry::new();
        registry
            .register("mark", Arc::new(MarkStage))
            .register("pause", Arc::new(PauseStage))
            .register("fail", Arc::new(FailStage))
            .register("settle", Arc::new(SettleStage));
        registry
    }

    fn spec(stages: &[(&str, &str)]) -> WorkflowSpec {
        WorkflowSpec::new(
            stages
                .iter()
                .map(|(id, stage)| StageDef::new(*id, *stage))
                .collect(),
        )
    }

    fn standard_spec() -> WorkflowSpec {
        spec(&[
            ("A", "mark"),
            ("B", "mark"),
            ("CHECKPOINT", "pause"),
            ("C", "mark"),
            ("D", "mark"),
        ])
    }

    fn manual(poll_ms: u64) -> DecisionPolicy {
        DecisionPolicy {
            mode: DecisionMode::Manual,
            poll_interval: Duration::from_millis(poll_ms),
            timeout: None,
        }
    }

    fn automated() -> DecisionPolicy {
        DecisionPolicy {
            mode: DecisionMode::Automated {
                delay: Duration::ZERO,
                reviewer_id: "auto_reviewer".into(),
            },
            ..DecisionPolicy::default()
        }
    }

    fn setup_with(
        db: DbHandle,
        spec: WorkflowSpec,
        policy: DecisionPolicy,
    ) -> (Orchestrator, CheckpointStore, AuditLog) {
        let store = CheckpointStore::new(db.clone());
        let audit = AuditLog::new(db);
        let orchestrator = Orchestrator::new(
            Arc::new(spec),
            Arc::new(registry()),
            store.clone(),
            audit.clone(),
            Arc::new(ToolPicker::default()),
            OrchestratorSettings {
                decision: policy,
                ..OrchestratorSettings::default()
            },
        );
        (orchestrator, store, audit)
    }

    fn setup(
        spec: WorkflowSpec,
        policy: DecisionPolicy,
    ) -> Result<(Orchestrator, CheckpointStore, AuditLog)> {
        Ok(setup_with(
            DbHandle::new(FlowDb::new_in_memory()?),
            spec,
            policy,
        ))
    }

    fn invoice(id: &str) -> Value {
        json!({"invoice_id": id, "vendor_name": "Acme", "amount": 1200.0})
    }

    /// Stage ids in audit order, consecutive duplicates collapsed.
    async fn stage_trail(audit: &AuditLog, document_id: &str) -> Result<Vec<String>> {
        let mut stages: Vec<String> = audit
            .read_all(document_id)
            .await?
            .into_iter()
            .map(|r| r.stage)
            .collect();
        stages.dedup();
        Ok(stages)
    }

    /// Decide the first pending checkpoint as soon as one appears.
    async fn review_next(store: &CheckpointStore, decision: Decision) -> Result<String> {
        loop {
            let pending = store.list_by_status(CheckpointStatus::Paused).await?;
            if let Some(checkpoint) = pending.first() {
                store.decide(&checkpoint.id, "alice", decision).await?;
                return Ok(checkpoint.id.clone());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn with_deadline<F: std::future::Future>(fut: F) -> Result<F::Output> {
        Ok(tokio::time::timeout(Duration::from_secs(10), fut).await?)
    }

    // ── Happy paths ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_run_without_pause_completes() -> Result<()> {
        let (orchestrator, store, audit) = setup(
            spec(&[("A", "mark"), ("B", "mark")]),
            manual(5),
        )?;

        let outcome = orchestrator.run(invoice("INV-1")).await?;
        assert_eq!(outcome.status, RunStatus::Completed);
        assert!(outcome.checkpoints.is_empty());
        let payload = outcome.final_payload().unwrap();
        assert_eq!(payload.status, FinalStatus::Completed);
        assert_eq!(payload.document_id, "INV-1");
        assert_eq!(
            outcome.state.get("final_payload").unwrap()["status"],
            "COMPLETED"
        );

        assert_eq!(stage_trail(&audit, "INV-1").await?, vec!["A", "B"]);
        assert!(
            store
                .list_by_status(CheckpointStatus::Paused)
                .await?
                .is_empty()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_stage_final_payload_survives_completion() -> Result<()> {
        let (orchestrator, _store, _audit) = setup(
            spec(&[("A", "mark"), ("POSTING", "settle"), ("NOTIFY", "mark")]),
            automated(),
        )?;

        let outcome = orchestrator.run(invoice("INV-1")).await?;
        assert_eq!(outcome.status, RunStatus::Completed);
        let payload = outcome.state.get(FINAL_PAYLOAD_KEY).unwrap();
        assert_eq!(payload["erp_txn"], "TXN-1");
        assert_eq!(payload["invoice_id"], "INV-1");
        assert!(payload.get("document_id").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_accept_resumes_at_next_stage() -> Result<()> {
        let (orchestrator, store, audit) = setup(standard_spec(), automated())?;

        let outcome = orchestrator.run(invoice("INV-1")).await?;
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(
            stage_trail(&audit, "INV-1").await?,
            vec!["A", "B", "CHECKPOINT", "C", "D"]
        );

        assert_eq!(outcome.checkpoints.len(), 1);
        let checkpoint = store.get(&outcome.checkpoints[0]).await?;
        assert_eq!(checkpoint.status, CheckpointStatus::Completed);
        assert_eq!(checkpoint.decision, Some(Decision::Accept));
        assert_eq!(checkpoint.stage_id, "CHECKPOINT");

        assert!(!outcome.state.is_paused());
        assert_eq!(outcome.state.get("ran_C"), Some(&json!(true)));
        assert_eq!(
            outcome.state.get(HUMAN_DECISION_KEY).unwrap()["decision"],
            "ACCEPT"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_manual_accept_from_external_reviewer() -> Result<()> {
        let (orchestrator, store, audit) = setup(standard_spec(), manual(5))?;

        let run = tokio::spawn(async move { orchestrator.run(invoice("INV-1")).await });
        let checkpoint_id = with_deadline(review_next(&store, Decision::Accept)).await??;
        let outcome = with_deadline(run).await???;

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.checkpoints, vec![checkpoint_id.clone()]);
        assert_eq!(
            store.get(&checkpoint_id).await?.status,
            CheckpointStatus::Completed
        );
        assert_eq!(
            stage_trail(&audit, "INV-1").await?,
            vec!["A", "B", "CHECKPOINT", "C", "D"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_paused_state_is_persisted_exactly() -> Result<()> {
        let (orchestrator, store, _audit) = setup(standard_spec(), manual(5))?;

        let run = tokio::spawn(async move { orchestrator.run(invoice("INV-1")).await });
        let checkpoint = with_deadline(async {
            loop {
                let pending = store.list_by_status(CheckpointStatus::Paused).await?;
                if let Some(cp) = pending.into_iter().next() {
                    return Ok::<_, anyhow::Error>(cp);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await??;

        assert!(checkpoint.state.is_paused());
        assert_eq!(checkpoint.state.checkpoint_id(), Some(checkpoint.id.as_str()));
        assert_eq!(checkpoint.state.get("ran_B"), Some(&json!(true)));
        assert!(checkpoint.state.get("ran_C").is_none());
        assert_eq!(checkpoint.document_id, "INV-1");

        store.decide(&checkpoint.id, "alice", Decision::Accept).await?;
        with_deadline(run).await???;
        Ok(())
    }

    // ── Rejection ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_reject_terminates_without_later_stages() -> Result<()> {
        let (orchestrator, store, audit) = setup(standard_spec(), manual(5))?;

        let run = tokio::spawn(async move { orchestrator.run(invoice("INV-1")).await });
        let checkpoint_id = with_deadline(review_next(&store, Decision::Reject)).await??;
        let outcome = with_deadline(run).await???;

        assert_eq!(outcome.status, RunStatus::TerminatedRejected);
        let payload = outcome.final_payload().unwrap();
        assert_eq!(payload.status, FinalStatus::RequiresManualHandling);
        assert_eq!(payload.document_id, "INV-1");
        assert!(outcome.state.get("ran_C").is_none());

        assert_eq!(
            stage_trail(&audit, "INV-1").await?,
            vec!["A", "B", "CHECKPOINT"]
        );
        let checkpoint = store.get(&checkpoint_id).await?;
        assert_eq!(checkpoint.status, CheckpointStatus::Completed);
        assert_eq!(checkpoint.decision, Some(Decision::Reject));
        Ok(())
    }

    #[tokio::test]
    async fn test_timeout_reject_policy_terminates_run() -> Result<()> {
        let policy = DecisionPolicy {
            timeout: Some(DecisionTimeout {
                max_polls: 2,
                action: TimeoutAction::Reject,
                reviewer_id: "sla_timeout".into(),
            }),
            ..manual(5)
        };
        let (orchestrator, _store, _audit) = setup(standard_spec(), policy)?;

        let outcome = with_deadline(orchestrator.run(invoice("INV-1"))).await??;
        assert_eq!(outcome.status, RunStatus::TerminatedRejected);
        assert_eq!(
            outcome.state.get(HUMAN_DECISION_KEY).unwrap()["reviewer_id"],
            "sla_timeout"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_timeout_fail_policy_fails_run() -> Result<()> {
        let policy = DecisionPolicy {
            timeout: Some(DecisionTimeout {
                max_polls: 2,
                action: TimeoutAction::Fail,
                reviewer_id: "unused".into(),
            }),
            ..manual(5)
        };
        let (orchestrator, store, _audit) = setup(standard_spec(), policy)?;

        let err = with_deadline(orchestrator.run(invoice("INV-1")))
            .await?
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::DecisionTimeout { .. }));
        assert_eq!(err.run_status(), RunStatus::Failed);
        assert_eq!(
            store.list_by_status(CheckpointStatus::Paused).await?.len(),
            1
        );
        Ok(())
    }

    // ── Failures ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_unknown_stage_fails_before_side_effects() -> Result<()> {
        let (orchestrator, store, audit) = setup(
            spec(&[("A", "mark"), ("X", "does_not_exist"), ("C", "mark")]),
            automated(),
        )?;

        let err = orchestrator.run(invoice("INV-1")).await.unwrap_err();
        match err {
            OrchestratorError::Configuration(ConfigurationError::UnresolvedStage {
                stage_id,
                name,
            }) => {
                assert_eq!(stage_id, "X");
                assert_eq!(name, "does_not_exist");
            }
            other => panic!("Expected UnresolvedStage, got {other:?}"),
        }
        assert!(audit.read_everything().await?.is_empty());
        assert!(
            store
                .list_by_status(CheckpointStatus::Paused)
                .await?
                .is_empty()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_stage_ids_fail_before_side_effects() -> Result<()> {
        let (orchestrator, store, audit) = setup(
            spec(&[("S", "pause"), ("M", "mark"), ("S", "pause"), ("Z", "mark")]),
            automated(),
        )?;

        let err = orchestrator.run(invoice("INV-1")).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Configuration(ConfigurationError::MalformedWorkflow(ref msg))
                if msg.contains("duplicate stage id S")
        ));
        assert!(audit.read_everything().await?.is_empty());

        // A checkpoint could not be mapped back to one position either.
        let mut state = WorkflowState::new(invoice("INV-1"));
        state.request_pause("cp-1");
        store.create("cp-1", "INV-1", "S", &state).await?;
        store.decide("cp-1", "alice", Decision::Accept).await?;
        let err = orchestrator.resume("cp-1").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Configuration(ConfigurationError::MalformedWorkflow(_))
        ));
        assert!(audit.read_everything().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_workflow_is_rejected() -> Result<()> {
        let (orchestrator, _store, _audit) = setup(spec(&[]), automated())?;
        let err = orchestrator.run(invoice("INV-1")).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Configuration(ConfigurationError::MalformedWorkflow(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_document_id_fails_before_side_effects() -> Result<()> {
        let (orchestrator, _store, audit) = setup(standard_spec(), automated())?;

        let err = orchestrator
            .run(json!({"vendor_name": "Acme"}))
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                OrchestratorError::MissingDocumentId { ref field } if field == "invoice_id"
            )
        );
        assert!(audit.read_everything().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_stage_failure_is_audited_and_fails_run() -> Result<()> {
        let (orchestrator, _store, audit) = setup(
            spec(&[("A", "mark"), ("B", "fail"), ("C", "mark")]),
            automated(),
        )?;

        let err = orchestrator.run(invoice("INV-1")).await.unwrap_err();
        match &err {
            OrchestratorError::StageExecution { stage_id, source } => {
                assert_eq!(stage_id, "B");
                assert!(matches!(source, StageError::Failed(_)));
            }
            other => panic!("Expected StageExecution, got {other:?}"),
        }

        let trail = audit.read_all("INV-1").await?;
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[1].stage, "B");
        assert!(trail[1].message.contains("ERP unreachable"));
        Ok(())
    }

    // ── Concurrency and restart ───────────────────────────────────────

    #[tokio::test]
    async fn test_two_paused_runs_are_listed_separately() -> Result<()> {
        let db = DbHandle::new(FlowDb::new_in_memory()?);
        let (first, store, _audit) = setup_with(db.clone(), standard_spec(), manual(5));
        let (second, _, _) = setup_with(db, standard_spec(), manual(5));

        let run_a = tokio::spawn(async move { first.run(invoice("INV-A")).await });
        let run_b = tokio::spawn(async move { second.run(invoice("INV-B")).await });

        let pending = with_deadline(async {
            loop {
                let pending = store.list_by_status(CheckpointStatus::Paused).await?;
                if pending.len() >= 2 {
                    return Ok::<_, anyhow::Error>(pending);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await??;

        assert_eq!(pending.len(), 2);
        assert_ne!(pending[0].id, pending[1].id);
        let mut documents: Vec<&str> = pending.iter().map(|c| c.document_id.as_str()).collect();
        documents.sort_unstable();
        assert_eq!(documents, vec!["INV-A", "INV-B"]);

        for checkpoint in &pending {
            assert_eq!(store.get(&checkpoint.id).await?.id, checkpoint.id);
            store.decide(&checkpoint.id, "alice", Decision::Accept).await?;
        }

        assert_eq!(with_deadline(run_a).await???.status, RunStatus::Completed);
        assert_eq!(with_deadline(run_b).await???.status, RunStatus::Completed);
        Ok(())
    }

    #[tokio::test]
    async fn test_resume_after_restart() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db_path = dir.path().join("flow.db");

        // First process: pauses, records the checkpoint, then goes away.
        let checkpoint_id = {
            let (_orchestrator, store, audit) =
                setup_with(DbHandle::open(&db_path)?, standard_spec(), manual(5));
            let mut state = WorkflowState::new(invoice("INV-1"));
            state.insert("ran_B", json!(true));
            let id = new_checkpoint_id();
            state.request_pause(id.clone());
            store.create(&id, "INV-1", "CHECKPOINT", &state).await?;
            audit.append("INV-1", "CHECKPOINT", "Checkpoint created").await;
            id
        };

        // A reviewer decides while nothing is running.
        {
            let store = CheckpointStore::new(DbHandle::open(&db_path)?);
            store.decide(&checkpoint_id, "bob", Decision::Accept).await?;
        }

        // Second process picks the run back up.
        let (orchestrator, store, audit) =
            setup_with(DbHandle::open(&db_path)?, standard_spec(), manual(5));
        let outcome = orchestrator.resume(&checkpoint_id).await?;

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.document_id, "INV-1");
        assert_eq!(outcome.state.get("ran_B"), Some(&json!(true)));
        assert_eq!(outcome.state.get("ran_D"), Some(&json!(true)));
        assert!(outcome.state.get("ran_A").is_none());
        assert_eq!(
            store.get(&checkpoint_id).await?.status,
            CheckpointStatus::Completed
        );
        assert_eq!(
            stage_trail(&audit, "INV-1").await?,
            vec!["CHECKPOINT", "C", "D"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_resume_waits_for_pending_decision() -> Result<()> {
        let (orchestrator, store, _audit) = setup(standard_spec(), manual(5))?;
        let mut state = WorkflowState::new(invoice("INV-1"));
        state.request_pause("cp-1");
        store.create("cp-1", "INV-1", "CHECKPOINT", &state).await?;

        let resumed = tokio::spawn(async move { orchestrator.resume("cp-1").await });
        with_deadline(review_next(&store, Decision::Reject)).await??;
        let outcome = with_deadline(resumed).await???;
        assert_eq!(outcome.status, RunStatus::TerminatedRejected);
        Ok(())
    }

    #[tokio::test]
    async fn test_resume_rejects_checkpoint_from_other_workflow() -> Result<()> {
        let (orchestrator, store, _audit) = setup(standard_spec(), automated())?;
        let state = WorkflowState::new(invoice("INV-1"));
        store.create("cp-1", "INV-1", "ELSEWHERE", &state).await?;

        let err = orchestrator.resume("cp-1").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Configuration(ConfigurationError::UnknownCheckpointStage { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_second_pause_opens_new_checkpoint() -> Result<()> {
        let (orchestrator, store, _audit) = setup(
            spec(&[("P1", "pause"), ("M", "mark"), ("P2", "pause")]),
            automated(),
        )?;

        let outcome = orchestrator.run(invoice("INV-1")).await?;
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.checkpoints.len(), 2);
        assert_ne!(outcome.checkpoints[0], outcome.checkpoints[1]);
        for id in &outcome.checkpoints {
            assert_eq!(store.get(id).await?.status, CheckpointStatus::Completed);
        }
        Ok(())
    }
}
