//! `invoice-flow run` and `invoice-flow resume`.
//!
//! Both print a JSON summary of the run on stdout. A rejection is a normal
//! outcome (exit 0, `TERMINATED_REJECTED`); a failure prints `FAILED` and
//! exits non-zero.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Value, json};

use invoice_flow::config::{DecisionModeSetting, FlowConfig};
use invoice_flow::errors::OrchestratorError;
use invoice_flow::orchestrator::RunOutcome;
use invoice_flow_common::RunStatus;
use invoice_flow_common::state::FINAL_PAYLOAD_KEY;

use super::context::FlowContext;
use crate::DecisionArgs;

pub async fn cmd_run(
    config: FlowConfig,
    document: &Path,
    decision: &DecisionArgs,
    workflow: Option<&Path>,
) -> Result<()> {
    let content = std::fs::read_to_string(document)
        .with_context(|| format!("Failed to read document: {}", document.display()))?;
    let document: Value = serde_json::from_str(&content)
        .with_context(|| format!("Document is not valid JSON: {}", document.display()))?;
    if !document.is_object() {
        anyhow::bail!("Document must be a JSON object");
    }

    let ctx = FlowContext::open(config)?;
    let spec = ctx.workflow(workflow)?;
    let orchestrator = ctx.orchestrator(spec, decision);
    if is_manual_mode(decision, &ctx.config) {
        eprintln!(
            "{}",
            console::style("Waiting for reviewer decisions at checkpoints (manual mode)").dim()
        );
    }

    let result = orchestrator.run(document).await;
    drop(orchestrator);
    ctx.finish().await;
    report(result)
}

pub async fn cmd_resume(
    config: FlowConfig,
    checkpoint_id: &str,
    decision: &DecisionArgs,
    workflow: Option<&Path>,
) -> Result<()> {
    let ctx = FlowContext::open(config)?;
    let spec = ctx.workflow(workflow)?;
    let orchestrator = ctx.orchestrator(spec, decision);

    let result = orchestrator.resume(checkpoint_id).await;
    drop(orchestrator);
    ctx.finish().await;
    report(result)
}

fn is_manual_mode(decision: &DecisionArgs, config: &FlowConfig) -> bool {
    !decision.auto && config.toml.decision.mode == DecisionModeSetting::Manual
}

fn summary(outcome: &RunOutcome) -> Value {
    json!({
        "status": outcome.status,
        "document_id": outcome.document_id,
        "checkpoints": outcome.checkpoints,
        "final_payload": outcome.state.get(FINAL_PAYLOAD_KEY),
    })
}

fn report(result: Result<RunOutcome, OrchestratorError>) -> Result<()> {
    match result {
        Ok(outcome) => {
            println!("{}", serde_json::to_string_pretty(&summary(&outcome))?);
            if outcome.status == RunStatus::TerminatedRejected {
                eprintln!(
                    "{} document requires manual handling",
                    console::style("Rejected:").yellow().bold()
                );
            }
            Ok(())
        }
        Err(e) => {
            let failed = json!({
                "status": e.run_status(),
                "error": e.to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&failed)?);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invoice_flow_common::{FinalPayload, FinalStatus, WorkflowState};

    #[test]
    fn test_summary_includes_final_payload() {
        let mut state = WorkflowState::new(json!({"invoice_id": "INV-1"}));
        state
            .set_final_payload(&FinalPayload::new("INV-1", FinalStatus::RequiresManualHandling))
            .unwrap();
        let outcome = RunOutcome {
            status: RunStatus::TerminatedRejected,
            document_id: "INV-1".into(),
            checkpoints: vec!["cp-1".into()],
            state,
        };

        let value = summary(&outcome);
        assert_eq!(value["status"], "TERMINATED_REJECTED");
        assert_eq!(value["final_payload"]["status"], "REQUIRES_MANUAL_HANDLING");
        assert_eq!(value["checkpoints"][0], "cp-1");
    }
}
