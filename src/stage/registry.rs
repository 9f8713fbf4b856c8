use std::collections::HashMap;
use std::sync::Arc;

use invoice_flow_common::WorkflowSpec;

use super::Stage;
use super::builtin::{BuiltinStage, StageSettings};
use crate::errors::ConfigurationError;

/// Maps stage names to constructed stages.
///
/// Built once at startup. Every stage a workflow names must resolve before
/// the run performs any side effect; there is no skip-on-unknown.
#[derive(Clone, Default)]
pub struct StageRegistry {
    stages: HashMap<String, Arc<dyn Stage>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in stage.
    pub fn builtin(settings: &StageSettings) -> Self {
        let mut registry = Self::new();
        for stage in BuiltinStage::ALL {
            registry.register(stage.name(), stage.build(settings));
        }
        registry
    }

    /// Add or replace the stage registered under `name`.
    pub fn register(&mut self, name: impl Into<String>, stage: Arc<dyn Stage>) -> &mut Self {
        self.stages.insert(name.into(), stage);
        self
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Stage>, ConfigurationError> {
        self.stages
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownStage {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    /// Check that every stage of `spec` resolves. Reports the first
    /// unresolved stage in workflow order.
    pub fn validate(&self, spec: &WorkflowSpec) -> Result<(), ConfigurationError> {
        match spec.stages.iter().find(|def| !self.contains(&def.stage)) {
            Some(def) => Err(ConfigurationError::UnresolvedStage {
                stage_id: def.id.clone(),
                name: def.stage.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.stages.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
