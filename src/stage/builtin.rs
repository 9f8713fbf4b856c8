//! Built-in invoice stages.
//!
//! Every external system (OCR, ERP, vendor directory, notification service)
//! is mocked; the stages exist so a workflow can run end to end and so the
//! pause/resume path has a realistic shape around it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use invoice_flow_common::{FinalPayload, FinalStatus, WorkflowState, new_checkpoint_id};
use invoice_flow_common::state::HUMAN_DECISION_KEY;

use super::{Stage, StageContext};
use crate::errors::StageError;

/// Tunables shared by the built-in stages.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSettings {
    /// Minimum two-way match score for MATCHED.
    pub match_threshold: f64,
    /// Invoices below this amount are approved automatically.
    pub approval_limit: f64,
    /// Pause for review even when the match succeeded.
    pub always_pause: bool,
    /// Field of the document holding its id.
    pub document_id_field: String,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            match_threshold: 0.9,
            approval_limit: 10_000.0,
            always_pause: true,
            document_id_field: "invoice_id".to_string(),
        }
    }
}

/// Closed set of stages shipped with the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinStage {
    Ingest,
    OcrNlp,
    NormalizeEnrich,
    ErpFetch,
    TwoWayMatch,
    Checkpoint,
    HumanReview,
    Reconcile,
    Approve,
    Post,
    Notify,
    Complete,
}

impl BuiltinStage {
    pub const ALL: [BuiltinStage; 12] = [
        Self::Ingest,
        Self::OcrNlp,
        Self::NormalizeEnrich,
        Self::ErpFetch,
        Self::TwoWayMatch,
        Self::Checkpoint,
        Self::HumanReview,
        Self::Reconcile,
        Self::Approve,
        Self::Post,
        Self::Notify,
        Self::Complete,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::OcrNlp => "ocr_nlp",
            Self::NormalizeEnrich => "normalize_enrich",
            Self::ErpFetch => "erp_fetch",
            Self::TwoWayMatch => "two_way_match",
            Self::Checkpoint => "checkpoint",
            Self::HumanReview => "human_review",
            Self::Reconcile => "reconcile",
            Self::Approve => "approve",
            Self::Post => "post",
            Self::Notify => "notify",
            Self::Complete => "complete",
        }
    }

    /// True for stages that may hand control to a reviewer.
    pub fn may_pause(&self) -> bool {
        matches!(self, Self::Checkpoint)
    }

    pub fn build(self, settings: &StageSettings) -> Arc<dyn Stage> {
        match self {
            Self::Ingest => Arc::new(IngestStage),
            Self::OcrNlp => Arc::new(OcrNlpStage),
            Self::NormalizeEnrich => Arc::new(NormalizeEnrichStage),
            Self::ErpFetch => Arc::new(ErpFetchStage),
            Self::TwoWayMatch => Arc::new(TwoWayMatchStage {
                threshold: settings.match_threshold,
            }),
            Self::Checkpoint => Arc::new(CheckpointStage {
                always_pause: settings.always_pause,
            }),
            Self::HumanReview => Arc::new(HumanReviewStage),
            Self::Reconcile => Arc::new(ReconcileStage),
            Self::Approve => Arc::new(ApproveStage {
                limit: settings.approval_limit,
            }),
            Self::Post => Arc::new(PostStage),
            Self::Notify => Arc::new(NotifyStage),
            Self::Complete => Arc::new(CompleteStage {
                document_id_field: settings.document_id_field.clone(),
            }),
        }
    }
}

impl FromStr for BuiltinStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| format!("Unknown built-in stage: {}", s))
    }
}

impl fmt::Display for BuiltinStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Helpers ───────────────────────────────────────────────────────────

fn document(state: &WorkflowState) -> Result<&Map<String, Value>, StageError> {
    state
        .document()
        .and_then(Value::as_object)
        .ok_or_else(|| StageError::missing("document"))
}

fn document_amount(state: &WorkflowState) -> Result<f64, StageError> {
    Ok(document(state)?
        .get("amount")
        .and_then(Value::as_f64)
        .unwrap_or(0.0))
}

fn document_array(state: &WorkflowState, key: &str) -> Result<Option<Value>, StageError> {
    Ok(document(state)?.get(key).filter(|v| v.is_array()).cloned())
}

fn array_len(value: &Value) -> usize {
    value.as_array().map_or(0, Vec::len)
}

/// Collapse whitespace and title-case each word.
pub fn normalize_vendor_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// 0.0 with no purchase orders, 0.95 when any PO amount is within 5% of the
/// invoice amount, 0.3 otherwise.
pub fn match_score(invoice_amount: f64, purchase_orders: &[Value]) -> f64 {
    if purchase_orders.is_empty() {
        return 0.0;
    }
    let close_enough = purchase_orders.iter().any(|po| {
        let po_amount = po.get("amount").and_then(Value::as_f64).unwrap_or(0.0);
        (invoice_amount - po_amount).abs() / po_amount.max(1.0) <= 0.05
    });
    if close_enough { 0.95 } else { 0.3 }
}

// ── Stages ────────────────────────────────────────────────────────────

struct IngestStage;

#[async_trait]
impl Stage for IngestStage {
    async fn run(
        &self,
        ctx: &StageContext,
        mut state: WorkflowState,
    ) -> Result<WorkflowState, StageError> {
        let raw_id = uuid::Uuid::new_v4().to_string();
        let doc = state
            .document_mut()
            .ok_or_else(|| StageError::missing("document"))?;
        doc.insert("raw_id".to_string(), json!(raw_id));
        ctx.log(format!("Persisted raw_id {raw_id}")).await;
        Ok(state)
    }
}

struct OcrNlpStage;

#[async_trait]
impl Stage for OcrNlpStage {
    async fn run(
        &self,
        ctx: &StageContext,
        mut state: WorkflowState,
    ) -> Result<WorkflowState, StageError> {
        let tool = ctx.tools().select("ocr");
        ctx.log(format!("Tool selected: {tool}")).await;

        let line_items = document_array(&state, "line_items")?.unwrap_or_else(|| {
            json!([{"desc": "Widgets", "qty": 10, "unit_price": 1234.5, "total": 12345.0}])
        });
        let count = array_len(&line_items);
        state.insert(
            "parsed_invoice",
            json!({
                "invoice_text": format!("Invoice text extracted via {tool}"),
                "parsed_line_items": line_items,
            }),
        );
        ctx.log(format!("Parsed {count} line item(s)")).await;
        Ok(state)
    }
}

struct NormalizeEnrichStage;

#[async_trait]
impl Stage for NormalizeEnrichStage {
    async fn run(
        &self,
        ctx: &StageContext,
        mut state: WorkflowState,
    ) -> Result<WorkflowState, StageError> {
        let tool = ctx.tools().select("enrichment");
        ctx.log(format!("Tool selected for enrichment: {tool}")).await;

        let doc = document(&state)?;
        let vendor_name = doc
            .get("vendor_name")
            .and_then(Value::as_str)
            .map(normalize_vendor_name)
            .unwrap_or_default();
        let tax_id = doc
            .get("vendor_tax_id")
            .and_then(Value::as_str)
            .unwrap_or("GST12345")
            .to_string();
        let missing_info: Vec<&str> = ["vendor_name", "amount", "currency"]
            .into_iter()
            .filter(|field| doc.get(*field).is_none_or(Value::is_null))
            .collect();
        let normalized = json!({
            "amount": doc.get("amount").cloned().unwrap_or(Value::Null),
            "currency": doc.get("currency").cloned().unwrap_or(Value::Null),
            "line_items": state
                .get("parsed_invoice")
                .and_then(|p| p.get("parsed_line_items"))
                .cloned()
                .unwrap_or_else(|| json!([])),
        });
        let risk_score = if missing_info.is_empty() { 0.1 } else { 0.5 };

        state.insert(
            "vendor_profile",
            json!({
                "normalized_name": vendor_name,
                "tax_id": tax_id,
                "credit_score": 700,
                "source": tool,
            }),
        );
        state.insert("normalized_invoice", normalized);
        state.insert(
            "flags",
            json!({"missing_info": missing_info, "risk_score": risk_score}),
        );
        ctx.log("Vendor normalized and enriched").await;
        Ok(state)
    }
}

struct ErpFetchStage;

#[async_trait]
impl Stage for ErpFetchStage {
    async fn run(
        &self,
        ctx: &StageContext,
        mut state: WorkflowState,
    ) -> Result<WorkflowState, StageError> {
        let tool = ctx.tools().select("erp_connector");
        ctx.log(format!("ERP tool picked: {tool}")).await;

        let purchase_orders = document_array(&state, "purchase_orders")?
            .unwrap_or_else(|| json!([{"po_id": "PO-9001", "amount": 12000.0}]));
        let count = array_len(&purchase_orders);
        state.insert("matched_pos", purchase_orders);
        ctx.log(format!("Fetched {count} PO(s)")).await;
        Ok(state)
    }
}

struct TwoWayMatchStage {
    threshold: f64,
}

#[async_trait]
impl Stage for TwoWayMatchStage {
    async fn run(
        &self,
        ctx: &StageContext,
        mut state: WorkflowState,
    ) -> Result<WorkflowState, StageError> {
        let amount = document_amount(&state)?;
        let score = {
            let pos = state
                .get("matched_pos")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            match_score(amount, pos)
        };
        let result = if score >= self.threshold { "MATCHED" } else { "FAILED" };
        state.insert("match_score", json!(score));
        state.insert("match_result", json!(result));
        ctx.log(format!("Match score {score}, result {result}")).await;
        Ok(state)
    }
}

struct CheckpointStage {
    always_pause: bool,
}

#[async_trait]
impl Stage for CheckpointStage {
    async fn run(
        &self,
        ctx: &StageContext,
        mut state: WorkflowState,
    ) -> Result<WorkflowState, StageError> {
        let matched = state.get("match_result").and_then(Value::as_str) == Some("MATCHED");
        if self.always_pause || !matched {
            let checkpoint_id = new_checkpoint_id();
            ctx.log(format!("Review requested, checkpoint {checkpoint_id}"))
                .await;
            state.request_pause(checkpoint_id);
        } else {
            ctx.log("Match succeeded, no review required").await;
        }
        Ok(state)
    }
}

struct HumanReviewStage;

#[async_trait]
impl Stage for HumanReviewStage {
    async fn run(
        &self,
        ctx: &StageContext,
        state: WorkflowState,
    ) -> Result<WorkflowState, StageError> {
        match state.get(HUMAN_DECISION_KEY) {
            Some(decision) => {
                let verdict = decision.get("decision").and_then(Value::as_str).unwrap_or("?");
                let reviewer = decision.get("reviewer_id").and_then(Value::as_str).unwrap_or("?");
                ctx.log(format!("Applied {verdict} from reviewer {reviewer}")).await;
            }
            None => ctx.log("No reviewer decision on record").await,
        }
        Ok(state)
    }
}

struct ReconcileStage;

#[async_trait]
impl Stage for ReconcileStage {
    async fn run(
        &self,
        ctx: &StageContext,
        mut state: WorkflowState,
    ) -> Result<WorkflowState, StageError> {
        let amount = document_amount(&state)?;
        state.insert(
            "accounting_entries",
            json!([
                {"account": "AP", "debit": 0, "credit": amount},
                {"account": "Expense", "debit": amount, "credit": 0},
            ]),
        );
        ctx.log("Accounting entries built").await;
        Ok(state)
    }
}

struct ApproveStage {
    limit: f64,
}

#[async_trait]
impl Stage for ApproveStage {
    async fn run(
        &self,
        ctx: &StageContext,
        mut state: WorkflowState,
    ) -> Result<WorkflowState, StageError> {
        let amount = document_amount(&state)?;
        let status = if amount < self.limit {
            "AUTO_APPROVED"
        } else {
            "ESCALATED"
        };
        state.insert("approval_status", json!(status));
        ctx.log(format!("Approval status {status}")).await;
        Ok(state)
    }
}

struct PostStage;

#[async_trait]
impl Stage for PostStage {
    async fn run(
        &self,
        ctx: &StageContext,
        mut state: WorkflowState,
    ) -> Result<WorkflowState, StageError> {
        let entries = state
            .get("accounting_entries")
            .map(array_len)
            .unwrap_or(0);
        let simple = uuid::Uuid::new_v4().simple().to_string();
        let txn_id = format!("TXN-{}", &simple[..8]);
        state.insert("posted", json!({"posted": true, "erp_txn_id": txn_id}));
        ctx.log(format!("Posted {entries} entries to ERP as {txn_id}"))
            .await;
        Ok(state)
    }
}

struct NotifyStage;

#[async_trait]
impl Stage for NotifyStage {
    async fn run(
        &self,
        ctx: &StageContext,
        mut state: WorkflowState,
    ) -> Result<WorkflowState, StageError> {
        let channel = ctx.tools().select("email");
        state.insert(
            "notify_status",
            json!({"ok": true, "parties": ["vendor", "finance"], "channel": channel}),
        );
        ctx.log(format!("Notifications sent via {channel}")).await;
        Ok(state)
    }
}

struct CompleteStage {
    document_id_field: String,
}

#[async_trait]
impl Stage for CompleteStage {
    async fn run(
        &self,
        ctx: &StageContext,
        mut state: WorkflowState,
    ) -> Result<WorkflowState, StageError> {
        let document_id = state
            .document_id(&self.document_id_field)
            .unwrap_or_else(|| ctx.document_id().to_string());
        state
            .set_final_payload(&FinalPayload::new(document_id, FinalStatus::Completed))
            .map_err(|e| StageError::Other(e.into()))?;
        ctx.log("Workflow complete").await;
        Ok(state)
    }
}
