//! `invoice-flow workflow show|dot`.

use anyhow::{Context, Result};

use invoice_flow::config::FlowConfig;
use invoice_flow::stage::{BuiltinStage, StageRegistry};
use invoice_flow::workflow::render_dot;

use super::super::WorkflowCommands;
use super::context::load_workflow_for;

pub fn cmd_workflow(config: &FlowConfig, command: WorkflowCommands) -> Result<()> {
    match command {
        WorkflowCommands::Show { workflow } => {
            let spec = load_workflow_for(config, workflow.as_deref())?;
            let registry = StageRegistry::builtin(&config.stage_settings());

            let title = spec.name.as_deref().unwrap_or("workflow");
            println!("{}", console::style(title).bold().cyan());
            for (idx, def) in spec.stages.iter().enumerate() {
                let pause = def
                    .stage
                    .parse::<BuiltinStage>()
                    .map(|s| s.may_pause())
                    .unwrap_or(false);
                let marker = if !registry.contains(&def.stage) {
                    console::style(" (unknown stage)").red().to_string()
                } else if pause {
                    console::style(" (may pause for review)").yellow().to_string()
                } else {
                    String::new()
                };
                println!("  {:>2}. {:<18} {}{}", idx + 1, def.id, def.stage, marker);
            }
            if let Err(e) = registry.validate(&spec) {
                anyhow::bail!("Workflow cannot run: {}", e);
            }
        }
        WorkflowCommands::Dot { workflow, out } => {
            let spec = load_workflow_for(config, workflow.as_deref())?;
            let dot = render_dot(&spec);
            match out {
                Some(path) => {
                    std::fs::write(&path, dot)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Wrote {}", path.display());
                }
                None => print!("{}", dot),
            }
        }
    }
    Ok(())
}
