//! `invoice-flow init`: create the `.invoice-flow/` project directory.
//!
//! ```text
//! .invoice-flow/
//! ├── flow.toml        # Configuration with every default written out
//! ├── workflow.json    # The invoice pipeline
//! ├── logs/            # decisions.csv and the optional log file
//! └── artifacts/       # History exports
//! ```
//!
//! Existing files are never overwritten.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{CONFIG_FILE, FLOW_DIR, FlowToml, WORKFLOW_FILE};
use crate::workflow::{default_invoice_workflow, save_workflow};

/// Result of initializing a project.
#[derive(Debug)]
pub struct InitResult {
    /// Path to the `.invoice-flow` directory
    pub flow_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
}

pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let flow_dir = project_dir.join(FLOW_DIR);
    let created = !flow_dir.exists();

    std::fs::create_dir_all(&flow_dir)
        .with_context(|| format!("Failed to create directory: {}", flow_dir.display()))?;
    ensure_directory_structure(&flow_dir)?;

    Ok(InitResult { flow_dir, created })
}

/// Ensure all required subdirectories and files exist.
fn ensure_directory_structure(flow_dir: &Path) -> Result<()> {
    for sub in ["logs", "artifacts"] {
        let dir = flow_dir.join(sub);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {} directory: {}", sub, dir.display()))?;
    }

    let config_file = flow_dir.join(CONFIG_FILE);
    if !config_file.exists() {
        FlowToml::default().save(&config_file)?;
    }

    let workflow_file = flow_dir.join(WORKFLOW_FILE);
    if !workflow_file.exists() {
        save_workflow(&default_invoice_workflow(), &workflow_file)?;
    }

    Ok(())
}

/// Check if a project is already initialized.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(FLOW_DIR).exists()
}
