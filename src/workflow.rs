//! Loading, checking and rendering workflow definitions.
//!
//! A workflow file is JSON:
//!
//! ```json
//! {
//!   "name": "invoice",
//!   "stages": [
//!     {"id": "INTAKE", "stage": "ingest"},
//!     {"id": "CHECKPOINT_HITL", "stage": "checkpoint"}
//!   ]
//! }
//! ```
//!
//! `agent` is accepted as an alias of `stage`.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};

use invoice_flow_common::{StageDef, WorkflowSpec};

use crate::errors::ConfigurationError;
use crate::stage::BuiltinStage;

/// The invoice pipeline: stage id and built-in stage, in order.
const INVOICE_STAGES: [(&str, BuiltinStage); 12] = [
    ("INTAKE", BuiltinStage::Ingest),
    ("UNDERSTAND", BuiltinStage::OcrNlp),
    ("PREPARE", BuiltinStage::NormalizeEnrich),
    ("RETRIEVE", BuiltinStage::ErpFetch),
    ("MATCH_TWO_WAY", BuiltinStage::TwoWayMatch),
    ("CHECKPOINT_HITL", BuiltinStage::Checkpoint),
    ("HITL_DECISION", BuiltinStage::HumanReview),
    ("RECONCILE", BuiltinStage::Reconcile),
    ("APPROVE", BuiltinStage::Approve),
    ("POSTING", BuiltinStage::Post),
    ("NOTIFY", BuiltinStage::Notify),
    ("COMPLETE", BuiltinStage::Complete),
];

pub fn default_invoice_workflow() -> WorkflowSpec {
    WorkflowSpec {
        name: Some("invoice".to_string()),
        stages: INVOICE_STAGES
            .iter()
            .map(|(id, stage)| StageDef::new(*id, stage.name()))
            .collect(),
    }
}

/// Read and structurally check a workflow file.
pub fn load_workflow(path: &Path) -> Result<WorkflowSpec, ConfigurationError> {
    let content =
        std::fs::read_to_string(path).map_err(|source| ConfigurationError::WorkflowReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
    parse_workflow(&content)
}

pub fn parse_workflow(content: &str) -> Result<WorkflowSpec, ConfigurationError> {
    let spec: WorkflowSpec = serde_json::from_str(content)
        .map_err(|e| ConfigurationError::MalformedWorkflow(e.to_string()))?;
    validate_workflow(&spec)?;
    Ok(spec)
}

pub fn save_workflow(spec: &WorkflowSpec, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(spec).context("Failed to serialize workflow")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write workflow file: {}", path.display()))?;
    Ok(())
}

/// Checks that do not need the stage registry: at least one stage, and
/// every stage id present and unique.
pub fn validate_workflow(spec: &WorkflowSpec) -> Result<(), ConfigurationError> {
    if spec.is_empty() {
        return Err(ConfigurationError::MalformedWorkflow(
            "workflow has no stages".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for (idx, def) in spec.stages.iter().enumerate() {
        if def.id.trim().is_empty() {
            return Err(ConfigurationError::MalformedWorkflow(format!(
                "stage #{} has an empty id",
                idx + 1
            )));
        }
        if def.stage.trim().is_empty() {
            return Err(ConfigurationError::MalformedWorkflow(format!(
                "stage {} names no stage",
                def.id
            )));
        }
        if !seen.insert(def.id.as_str()) {
            return Err(ConfigurationError::MalformedWorkflow(format!(
                "duplicate stage id {}",
                def.id
            )));
        }
    }
    Ok(())
}

fn may_pause(def: &StageDef) -> bool {
    def.stage
        .parse::<BuiltinStage>()
        .map(|stage| stage.may_pause())
        .unwrap_or(false)
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Render the workflow as a left-to-right Graphviz digraph. Stages that can
/// pause for review are filled.
pub fn render_dot(spec: &WorkflowSpec) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph workflow {{");
    let _ = writeln!(out, "  rankdir=LR;");
    let _ = writeln!(out, "  node [shape=box, style=rounded, fontsize=10];");

    for def in &spec.stages {
        let id = escape(&def.id);
        let (style, color) = if may_pause(def) {
            ("rounded,filled", "lightgoldenrod")
        } else {
            ("rounded", "lightgrey")
        };
        let _ = writeln!(
            out,
            "  \"{id}\" [label=\"{id}\\n{}\" style=\"{style}\" fillcolor=\"{color}\"];",
            escape(&def.stage)
        );
    }
    for pair in spec.stages.windows(2) {
        let _ = writeln!(
            out,
            "  \"{}\" -> \"{}\";",
            escape(&pair[0].id),
            escape(&pair[1].id)
        );
    }
    out.push_str("}\n");
    out
}
