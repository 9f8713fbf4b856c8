//! Reviewer commands: inspect checkpoints and record decisions, directly or
//! through the HTTP API.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Value, json};

use invoice_flow::api::server::{ServerConfig, start_server};
use invoice_flow::api::{AppState, DEFAULT_REVIEWER};
use invoice_flow::config::FlowConfig;
use invoice_flow_common::Decision;

use super::context::FlowContext;

fn parse_decision(decision: &str) -> Result<Decision> {
    decision
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))
}

pub async fn cmd_pending(config: FlowConfig, as_json: bool) -> Result<()> {
    let ctx = FlowContext::open(config)?;
    let items = ctx.gateway().pending().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&json!({ "items": items }))?);
    } else if items.is_empty() {
        println!("No checkpoints waiting for review.");
    } else {
        println!("{}", console::style("Pending review").bold().cyan());
        for item in &items {
            let vendor = item.summary.vendor_name.as_deref().unwrap_or("-");
            let amount = item
                .summary
                .amount
                .map(|a| format!("{a:.2}"))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {}  {}  {}  vendor={} amount={}  {}",
                item.checkpoint_id,
                item.document_id,
                item.stage_id,
                vendor,
                amount,
                console::style(item.created_at.format("%Y-%m-%d %H:%M:%S")).dim()
            );
        }
    }

    ctx.finish().await;
    Ok(())
}

pub async fn cmd_show(config: FlowConfig, checkpoint_id: &str) -> Result<()> {
    let ctx = FlowContext::open(config)?;
    let checkpoint = ctx.store.get(checkpoint_id).await?;
    println!("{}", serde_json::to_string_pretty(&checkpoint)?);
    ctx.finish().await;
    Ok(())
}

/// Write the decision straight into the database, as the API would.
pub async fn cmd_decide(
    config: FlowConfig,
    checkpoint_id: &str,
    decision: &str,
    reviewer: &str,
) -> Result<()> {
    let decision = parse_decision(decision)?;
    let ctx = FlowContext::open(config)?;
    let result = ctx.gateway().submit(checkpoint_id, decision, reviewer).await;
    // Let the export worker record the decision before exiting.
    ctx.finish().await;

    let receipt = result?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

pub async fn cmd_submit(
    config: &FlowConfig,
    checkpoint_id: &str,
    decision: &str,
    reviewer: &str,
    url: Option<&str>,
) -> Result<()> {
    let decision = parse_decision(decision)?;
    let base = match url {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => format!(
            "http://{}:{}",
            config.toml.server.host, config.toml.server.port
        ),
    };
    let endpoint = format!("{base}/human-review/decision");
    let reviewer = if reviewer.trim().is_empty() {
        DEFAULT_REVIEWER
    } else {
        reviewer
    };

    let response = reqwest::Client::new()
        .post(&endpoint)
        .json(&json!({
            "checkpoint_id": checkpoint_id,
            "decision": decision.as_str(),
            "reviewer_id": reviewer,
        }))
        .send()
        .await
        .with_context(|| format!("Failed to reach review API at {endpoint}"))?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .with_context(|| format!("Review API returned an unreadable response ({status})"))?;
    if !status.is_success() {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        anyhow::bail!("Decision refused ({status}): {message}");
    }

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

pub async fn cmd_serve(config: FlowConfig, port: Option<u16>, dev: bool) -> Result<()> {
    for warning in config.validate() {
        eprintln!("{} {}", console::style("Warning:").yellow(), warning);
    }

    let server = ServerConfig {
        host: config.toml.server.host.clone(),
        port: port.unwrap_or(config.toml.server.port),
        dev_mode: dev,
    };
    let ctx = FlowContext::open(config)?;
    let state = Arc::new(AppState {
        gateway: ctx.gateway(),
        audit: ctx.audit.clone(),
    });

    let result = start_server(server, state).await;
    ctx.finish().await;
    result
}
