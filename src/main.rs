use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "invoice-flow")]
#[command(
    version,
    about = "Checkpoint/resume orchestrator for invoice pipelines with human review"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .invoice-flow/ with a default flow.toml and workflow.json
    Init,
    /// Run the workflow over a JSON document
    Run {
        /// Path to the input document (JSON object)
        document: PathBuf,

        #[command(flatten)]
        decision: DecisionArgs,

        /// Workflow file (defaults to the configured one)
        #[arg(long)]
        workflow: Option<PathBuf>,
    },
    /// Continue a run from a checkpoint, e.g. after a restart
    Resume {
        checkpoint_id: String,

        #[command(flatten)]
        decision: DecisionArgs,

        #[arg(long)]
        workflow: Option<PathBuf>,
    },
    /// List checkpoints waiting for review
    Pending {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show a checkpoint with its saved state
    Show { checkpoint_id: String },
    /// Record a decision directly in the checkpoint database
    Decide {
        checkpoint_id: String,
        /// ACCEPT or REJECT
        decision: String,
        #[arg(long, default_value = "cli_user")]
        reviewer: String,
    },
    /// Submit a decision through a running review API
    Submit {
        checkpoint_id: String,
        /// ACCEPT or REJECT
        decision: String,
        #[arg(long, default_value = "cli_user")]
        reviewer: String,
        /// Base URL of the review API (defaults to the configured server)
        #[arg(long)]
        url: Option<String>,
    },
    /// Serve the human review API
    Serve {
        /// Port to serve on (defaults to the configured port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable permissive CORS for a locally served review UI
        #[arg(long)]
        dev: bool,
    },
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

/// Decision-mode overrides for `run` and `resume`.
#[derive(clap::Args, Clone, Debug)]
pub struct DecisionArgs {
    /// Accept every checkpoint automatically (demo and testing only)
    #[arg(long)]
    pub auto: bool,

    /// Delay before an automatic decision, in milliseconds
    #[arg(long)]
    pub decision_delay_ms: Option<u64>,
}

#[derive(Subcommand, Clone)]
pub enum AuditCommands {
    /// Print the audit trail of one document
    Show { document_id: String },
    /// Export decisions.csv and audit_log.json
    Export {
        /// Output directory (defaults to the configured artifacts directory)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete every audit record
    Purge {
        /// Required; purging cannot be undone
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum WorkflowCommands {
    /// List the stages of the workflow
    Show {
        #[arg(long)]
        workflow: Option<PathBuf>,
    },
    /// Render the workflow as Graphviz dot
    Dot {
        #[arg(long)]
        workflow: Option<PathBuf>,
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let config = invoice_flow::config::FlowConfig::load(&project_dir)?;
    let _log_guard =
        invoice_flow::logging::init_tracing(&config.log_settings().verbose(cli.verbose))?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Run {
            document,
            decision,
            workflow,
        } => {
            cmd::cmd_run(config, document, decision, workflow.as_deref()).await?;
        }
        Commands::Resume {
            checkpoint_id,
            decision,
            workflow,
        } => {
            cmd::cmd_resume(config, checkpoint_id, decision, workflow.as_deref()).await?;
        }
        Commands::Pending { json } => cmd::cmd_pending(config, *json).await?,
        Commands::Show { checkpoint_id } => cmd::cmd_show(config, checkpoint_id).await?,
        Commands::Decide {
            checkpoint_id,
            decision,
            reviewer,
        } => cmd::cmd_decide(config, checkpoint_id, decision, reviewer).await?,
        Commands::Submit {
            checkpoint_id,
            decision,
            reviewer,
            url,
        } => cmd::cmd_submit(&config, checkpoint_id, decision, reviewer, url.as_deref()).await?,
        Commands::Serve { port, dev } => cmd::cmd_serve(config, *port, *dev).await?,
        Commands::Audit { command } => cmd::cmd_audit(config, command.clone()).await?,
        Commands::Workflow { command } => cmd::cmd_workflow(&config, command.clone())?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
