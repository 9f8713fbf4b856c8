use serde::{Deserialize, Serialize};

/// One step of a workflow: a unique stage id bound to a registered stage name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageDef {
    pub id: String,
    #[serde(alias = "agent")]
    pub stage: String,
}

impl StageDef {
    pub fn new(id: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stage: stage.into(),
        }
    }
}

/// Ordered list of stages for a run. Read once at startup and never
/// modified while a run is in flight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WorkflowSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub stages: Vec<StageDef>,
}

impl WorkflowSpec {
    pub fn new(stages: Vec<StageDef>) -> Self {
        Self { name: None, stages }
    }

    pub fn position(&self, stage_id: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.id == stage_id)
    }

    pub fn get(&self, stage_id: &str) -> Option<&StageDef> {
        self.stages.iter().find(|s| s.id == stage_id)
    }

    /// The stage that runs after `stage_id`, if any.
    pub fn next_after(&self, stage_id: &str) -> Option<&StageDef> {
        self.position(stage_id)
            .and_then(|idx| self.stages.get(idx + 1))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WorkflowSpec {
        WorkflowSpec::new(vec![
            StageDef::new("A", "ingest"),
            StageDef::new("CHECKPOINT", "checkpoint"),
            StageDef::new("C", "complete"),
        ])
    }

    #[test]
    fn test_navigation() {
        let spec = sample();
        assert_eq!(spec.position("CHECKPOINT"), Some(1));
        assert_eq!(spec.next_after("CHECKPOINT").map(|s| s.id.as_str()), Some("C"));
        assert!(spec.next_after("C").is_none());
        assert!(spec.next_after("MISSING").is_none());
        assert_eq!(spec.get("A").map(|s| s.stage.as_str()), Some("ingest"));
    }

    #[test]
    fn test_agent_alias_is_accepted() {
        let json = r#"{"stages": [{"id": "INTAKE", "agent": "ingest"}]}"#;
        let spec: WorkflowSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.stages[0], StageDef::new("INTAKE", "ingest"));
        assert!(spec.name.is_none());
    }
}
