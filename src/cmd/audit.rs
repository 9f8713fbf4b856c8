//! Audit trail commands: `invoice-flow audit show|export|purge`.

use anyhow::Result;

use invoice_flow::config::FlowConfig;
use invoice_flow::export::export_history;

use super::super::AuditCommands;
use super::context::FlowContext;

pub async fn cmd_audit(config: FlowConfig, command: AuditCommands) -> Result<()> {
    let ctx = FlowContext::open(config)?;
    let result = run(&ctx, command).await;
    ctx.finish().await;
    result
}

async fn run(ctx: &FlowContext, command: AuditCommands) -> Result<()> {
    match command {
        AuditCommands::Show { document_id } => {
            let records = ctx.audit.read_all(&document_id).await?;
            if records.is_empty() {
                println!("No audit records for {}", document_id);
                return Ok(());
            }
            println!(
                "{}",
                console::style(format!("Audit trail for {}", document_id))
                    .bold()
                    .cyan()
            );
            for record in records {
                println!(
                    "  {}  {:<16} {}",
                    console::style(record.timestamp.format("%Y-%m-%d %H:%M:%S%.3f")).dim(),
                    record.stage,
                    record.message
                );
            }
        }
        AuditCommands::Export { out } => {
            let out_dir = out.unwrap_or_else(|| ctx.config.export_settings().artifacts_dir);
            let files = export_history(ctx.store.db(), &out_dir).await?;
            println!(
                "Exported {} decisions to {}",
                files.decision_count,
                files.decisions.display()
            );
            println!(
                "Exported {} audit records to {}",
                files.audit_count,
                files.audit.display()
            );
        }
        AuditCommands::Purge { force } => {
            if !force {
                anyhow::bail!(
                    "Refusing to purge the audit log without --force (this cannot be undone)"
                );
            }
            let removed = ctx.audit.purge().await?;
            println!("Purged {} audit records.", removed);
        }
    }
    Ok(())
}
