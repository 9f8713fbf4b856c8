//! Project setup and configuration commands.

use anyhow::Result;

use invoice_flow::config::FlowConfig;

use super::super::ConfigCommands;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use invoice_flow::init::{init_project, is_initialized};

    let was_initialized = is_initialized(project_dir);

    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized invoice-flow project at {}",
            result.flow_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .invoice-flow/");
        println!("  ├── flow.toml       # Configuration");
        println!("  ├── workflow.json   # Stage sequence");
        println!("  ├── logs/           # Decision log");
        println!("  └── artifacts/      # History exports");
        println!();
        println!("Next steps:");
        println!("  1. Run `invoice-flow run <invoice.json>` to start a run");
        println!("  2. Run `invoice-flow serve` and review with `invoice-flow pending`");
    } else if was_initialized {
        println!(
            "invoice-flow project already initialized at {}",
            result.flow_dir.display()
        );
        println!("Directory structure verified.");
    }

    Ok(())
}

pub fn cmd_config(config: &FlowConfig, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let config_path = config.config_file();
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# No config file; showing defaults");
            }
            println!("# Database: {}", config.db_path().display());
            println!("# Workflow: {}", config.workflow_path().display());
            println!();
            print!("{}", toml::to_string_pretty(&config.toml)?);
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("{} Configuration is valid", console::style("✓").green());
            } else {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  {} {}", console::style("⚠").yellow(), warning);
                }
            }
        }
    }
    Ok(())
}
