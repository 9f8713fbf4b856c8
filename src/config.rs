//! Project configuration read from `.invoice-flow/flow.toml`.
//!
//! Layering is file → environment → CLI. Every field has a default, so a
//! missing file or a partial one is fine.
//!
//! # Configuration File Format
//!
//! ```toml
//! [store]
//! db_path = ".invoice-flow/flow.db"
//!
//! [workflow]
//! path = ".invoice-flow/workflow.json"
//! document_id_field = "invoice_id"
//!
//! [decision]
//! mode = "manual"            # or "auto"
//! auto_delay_ms = 2000
//! auto_reviewer_id = "auto_reviewer"
//! poll_interval_ms = 1000
//! timeout_polls = 3600       # optional; no timeout when absent
//! on_timeout = "fail"        # or "reject"
//!
//! [stages]
//! match_threshold = 0.9
//! approval_limit = 10000.0
//! always_pause = true
//!
//! [tools.pools]
//! ocr = ["google_vision", "tesseract"]
//!
//! [export]
//! enabled = true
//! artifacts_dir = ".invoice-flow/artifacts"
//! logs_dir = ".invoice-flow/logs"
//! queue_capacity = 64
//!
//! [server]
//! host = "127.0.0.1"
//! port = 8081
//!
//! [logging]
//! level = "info"
//! json = false
//! file = ".invoice-flow/logs/flow.log"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::export::ExportSettings;
use crate::logging::LogSettings;
use crate::orchestrator::{
    DecisionMode, DecisionPolicy, DecisionTimeout, OrchestratorSettings, TimeoutAction,
};
use crate::stage::{StageSettings, ToolPicker};

/// Name of the per-project directory.
pub const FLOW_DIR: &str = ".invoice-flow";
pub const CONFIG_FILE: &str = "flow.toml";
pub const WORKFLOW_FILE: &str = "workflow.json";

pub const ENV_DB_PATH: &str = "FLOW_DB_PATH";
pub const ENV_DECISION_MODE: &str = "FLOW_DECISION_MODE";
pub const ENV_POLL_INTERVAL_MS: &str = "FLOW_POLL_INTERVAL_MS";
pub const ENV_LOG_LEVEL: &str = "FLOW_LOG_LEVEL";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite file, relative to the project directory unless absolute.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    format!("{FLOW_DIR}/flow.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_workflow_path")]
    pub path: String,
    /// Document field that identifies the document.
    #[serde(default = "default_document_id_field")]
    pub document_id_field: String,
}

fn default_workflow_path() -> String {
    format!("{FLOW_DIR}/{WORKFLOW_FILE}")
}

fn default_document_id_field() -> String {
    "invoice_id".to_string()
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            path: default_workflow_path(),
            document_id_field: default_document_id_field(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionModeSetting {
    #[default]
    Manual,
    #[serde(alias = "automated")]
    Auto,
}

impl std::fmt::Display for DecisionModeSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionModeSetting::Manual => write!(f, "manual"),
            DecisionModeSetting::Auto => write!(f, "auto"),
        }
    }
}

impl std::str::FromStr for DecisionModeSetting {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "manual" => Ok(DecisionModeSetting::Manual),
            "auto" | "automated" => Ok(DecisionModeSetting::Auto),
            _ => anyhow::bail!("Invalid decision mode '{}'. Valid values: manual, auto", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    #[serde(default)]
    pub mode: DecisionModeSetting,
    #[serde(default = "default_auto_delay_ms")]
    pub auto_delay_ms: u64,
    #[serde(default = "default_auto_reviewer_id")]
    pub auto_reviewer_id: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Poll cycles before `on_timeout` applies. No timeout when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_polls: Option<u32>,
    #[serde(default = "default_on_timeout")]
    pub on_timeout: TimeoutAction,
    #[serde(default = "default_timeout_reviewer_id")]
    pub timeout_reviewer_id: String,
}

fn default_auto_delay_ms() -> u64 {
    2000
}

fn default_auto_reviewer_id() -> String {
    "auto_reviewer".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_on_timeout() -> TimeoutAction {
    TimeoutAction::Fail
}

fn default_timeout_reviewer_id() -> String {
    "decision_timeout".to_string()
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            mode: DecisionModeSetting::default(),
            auto_delay_ms: default_auto_delay_ms(),
            auto_reviewer_id: default_auto_reviewer_id(),
            poll_interval_ms: default_poll_interval_ms(),
            timeout_polls: None,
            on_timeout: default_on_timeout(),
            timeout_reviewer_id: default_timeout_reviewer_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagesConfig {
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
    #[serde(default = "default_approval_limit")]
    pub approval_limit: f64,
    #[serde(default = "default_always_pause")]
    pub always_pause: bool,
}

fn default_match_threshold() -> f64 {
    0.9
}

fn default_approval_limit() -> f64 {
    10_000.0
}

fn default_always_pause() -> bool {
    true
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            match_threshold: default_match_threshold(),
            approval_limit: default_approval_limit(),
            always_pause: default_always_pause(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Capability → tools in order of preference.
    #[serde(default)]
    pub pools: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_export_enabled")]
    pub enabled: bool,
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: String,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_export_enabled() -> bool {
    true
}

fn default_artifacts_dir() -> String {
    format!("{FLOW_DIR}/artifacts")
}

fn default_logs_dir() -> String {
    format!("{FLOW_DIR}/logs")
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: default_export_enabled(),
            artifacts_dir: default_artifacts_dir(),
            logs_dir: default_logs_dir(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8081
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Optional log file, relative to the project directory unless absolute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
        }
    }
}

/// Contents of `flow.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowToml {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub stages: StagesConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FlowToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse flow.toml")
    }

    /// Load `<flow_dir>/flow.toml`, or defaults if it does not exist.
    pub fn load_or_default(flow_dir: &Path) -> Result<Self> {
        let config_path = flow_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize flow.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `FLOW_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply `FLOW_*` overrides read through `lookup`. Empty values are
    /// ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = var(ENV_DB_PATH) {
            self.store.db_path = path;
        }
        if let Some(mode) = var(ENV_DECISION_MODE) {
            self.decision.mode = mode
                .parse()
                .with_context(|| format!("Invalid {ENV_DECISION_MODE}"))?;
        }
        if let Some(ms) = var(ENV_POLL_INTERVAL_MS) {
            self.decision.poll_interval_ms = ms
                .trim()
                .parse()
                .with_context(|| format!("Invalid {ENV_POLL_INTERVAL_MS} '{ms}'"))?;
        }
        if let Some(level) = var(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !(0.0..=1.0).contains(&self.stages.match_threshold) {
            warnings.push(format!(
                "match_threshold {} is outside 0.0..=1.0; matches will always {}",
                self.stages.match_threshold,
                if self.stages.match_threshold > 1.0 { "fail" } else { "pass" }
            ));
        }
        if self.stages.approval_limit <= 0.0 {
            warnings.push(format!(
                "approval_limit {} escalates every invoice",
                self.stages.approval_limit
            ));
        }
        if self.decision.poll_interval_ms == 0 {
            warnings.push("poll_interval_ms is 0; the decision poll will spin".to_string());
        }
        if self.decision.timeout_polls == Some(0) {
            warnings.push(format!(
                "timeout_polls is 0; every checkpoint times out immediately ({})",
                self.decision.on_timeout
            ));
        }
        if self.decision.mode == DecisionModeSetting::Auto {
            warnings.push(format!(
                "decision mode is auto; checkpoints are accepted as '{}' without review",
                self.decision.auto_reviewer_id
            ));
        }
        if self.workflow.document_id_field.trim().is_empty() {
            warnings.push("workflow.document_id_field is empty".to_string());
        }
        if self.export.queue_capacity == 0 {
            warnings.push("export.queue_capacity is 0; using 1".to_string());
        }
        for (capability, pool) in &self.tools.pools {
            if pool.iter().all(|t| t.trim().is_empty()) {
                warnings.push(format!(
                    "tool pool '{}' is empty; the built-in fallback will be used",
                    capability
                ));
            }
        }

        warnings
    }
}

/// Configuration for one project: `flow.toml` plus environment, with paths
/// resolved against the project directory.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub project_dir: PathBuf,
    pub flow_dir: PathBuf,
    pub toml: FlowToml,
}

impl FlowConfig {
    /// Load `flow.toml` (if present) and apply environment overrides.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let mut config = Self::from_file(project_dir)?;
        config.toml.apply_env()?;
        Ok(config)
    }

    /// Load `flow.toml` without looking at the environment.
    pub fn from_file(project_dir: &Path) -> Result<Self> {
        let flow_dir = project_dir.join(FLOW_DIR);
        let toml = FlowToml::load_or_default(&flow_dir)?;
        Ok(Self::with_toml(project_dir, toml))
    }

    pub fn with_toml(project_dir: &Path, toml: FlowToml) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
            flow_dir: project_dir.join(FLOW_DIR),
            toml,
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.flow_dir.join(CONFIG_FILE)
    }

    pub fn db_path(&self) -> PathBuf {
        self.resolve(&self.toml.store.db_path)
    }

    pub fn workflow_path(&self) -> PathBuf {
        self.resolve(&self.toml.workflow.path)
    }

    pub fn decision_policy(&self) -> DecisionPolicy {
        let decision = &self.toml.decision;
        let mode = match decision.mode {
            DecisionModeSetting::Manual => DecisionMode::Manual,
            DecisionModeSetting::Auto => DecisionMode::Automated {
                delay: Duration::from_millis(decision.auto_delay_ms),
                reviewer_id: decision.auto_reviewer_id.clone(),
            },
        };
        DecisionPolicy {
            mode,
            poll_interval: Duration::from_millis(decision.poll_interval_ms),
            timeout: decision.timeout_polls.map(|max_polls| DecisionTimeout {
                max_polls,
                action: decision.on_timeout,
                reviewer_id: decision.timeout_reviewer_id.clone(),
            }),
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            decision: self.decision_policy(),
            document_id_field: self.toml.workflow.document_id_field.clone(),
        }
    }

    pub fn stage_settings(&self) -> StageSettings {
        StageSettings {
            match_threshold: self.toml.stages.match_threshold,
            approval_limit: self.toml.stages.approval_limit,
            always_pause: self.toml.stages.always_pause,
            document_id_field: self.toml.workflow.document_id_field.clone(),
        }
    }

    pub fn tool_picker(&self) -> ToolPicker {
        ToolPicker::new(self.toml.tools.pools.clone())
    }

    pub fn export_settings(&self) -> ExportSettings {
        let export = &self.toml.export;
        ExportSettings {
            enabled: export.enabled,
            artifacts_dir: self.resolve(&export.artifacts_dir),
            logs_dir: self.resolve(&export.logs_dir),
            queue_capacity: export.queue_capacity.max(1),
        }
    }

    pub fn log_settings(&self) -> LogSettings {
        let logging = &self.toml.logging;
        LogSettings {
            level: logging.level.clone(),
            json: logging.json,
            file: logging.file.as_deref().map(|f| self.resolve(f)),
        }
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
