use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key holding the input document.
pub const DOCUMENT_KEY: &str = "document";
/// Key a stage sets to `true` to request a pause.
pub const PAUSED_KEY: &str = "paused";
/// Key holding the id of the checkpoint a pausing stage asked for.
pub const CHECKPOINT_ID_KEY: &str = "checkpoint_id";
/// Key holding the terminal payload of a run.
pub const FINAL_PAYLOAD_KEY: &str = "final_payload";
/// Key holding the reviewer decision applied after a pause.
pub const HUMAN_DECISION_KEY: &str = "human_decision";

/// Ordered mapping of named fields carried through one pipeline run.
///
/// Insertion order is preserved, so a state written to the checkpoint store
/// and read back serializes identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowState(Map<String, Value>);

impl WorkflowState {
    /// Initial state of a run: `{document: input}`.
    pub fn new(document: Value) -> Self {
        let mut fields = Map::new();
        fields.insert(DOCUMENT_KEY.to_string(), document);
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.0.get_mut(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn document(&self) -> Option<&Value> {
        self.0.get(DOCUMENT_KEY)
    }

    /// Mutable access to the document when it is a JSON object.
    pub fn document_mut(&mut self) -> Option<&mut Map<String, Value>> {
        self.0.get_mut(DOCUMENT_KEY).and_then(Value::as_object_mut)
    }

    /// Read the document id from `document.<field>`. Numbers are accepted
    /// and rendered in decimal.
    pub fn document_id(&self, field: &str) -> Option<String> {
        match self.document()?.get(field)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.0.get(PAUSED_KEY), Some(Value::Bool(true)))
    }

    pub fn checkpoint_id(&self) -> Option<&str> {
        self.0.get(CHECKPOINT_ID_KEY).and_then(Value::as_str)
    }

    /// Mark the state paused under a fresh checkpoint id.
    pub fn request_pause(&mut self, checkpoint_id: impl Into<String>) {
        self.0.insert(PAUSED_KEY.to_string(), Value::Bool(true));
        self.0
            .insert(CHECKPOINT_ID_KEY.to_string(), Value::String(checkpoint_id.into()));
    }

    /// Drop the pause marker. The checkpoint id stays behind as a record of
    /// the last review.
    pub fn clear_pause(&mut self) {
        self.0.remove(PAUSED_KEY);
    }

    pub fn final_payload(&self) -> Option<FinalPayload> {
        self.0
            .get(FINAL_PAYLOAD_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_final_payload(&mut self, payload: &FinalPayload) -> serde_json::Result<()> {
        let value = serde_json::to_value(payload)?;
        self.0.insert(FINAL_PAYLOAD_KEY.to_string(), value);
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.0)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s).map(Self)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for WorkflowState {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalStatus {
    Completed,
    RequiresManualHandling,
}

impl FinalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::RequiresManualHandling => "REQUIRES_MANUAL_HANDLING",
        }
    }
}

impl FromStr for FinalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPLETED" => Ok(Self::Completed),
            "REQUIRES_MANUAL_HANDLING" => Ok(Self::RequiresManualHandling),
            _ => Err(format!("Invalid final status: {}", s)),
        }
    }
}

/// Terminal payload written at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalPayload {
    pub document_id: String,
    pub status: FinalStatus,
    /// Any additional fields a stage chose to attach.
    #[serde(flatten, default)]
    pub extra: Map<String, Value>,
}

impl FinalPayload {
    pub fn new(document_id: impl Into<String>, status: FinalStatus) -> Self {
        Self {
            document_id: document_id.into(),
            status,
            extra: Map::new(),
        }
    }
}
