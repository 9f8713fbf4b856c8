//! Integration tests for the invoice-flow CLI.
//!
//! Each test works in its own temporary project directory; runs that pause
//! either decide automatically or time out so no test blocks on a reviewer.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Helper to create an invoice-flow Command
fn flow() -> Command {
    let mut cmd = cargo_bin_cmd!("invoice-flow");
    cmd.env_remove("RUST_LOG")
        .env_remove("FLOW_DB_PATH")
        .env_remove("FLOW_DECISION_MODE")
        .env_remove("FLOW_POLL_INTERVAL_MS")
        .env_remove("FLOW_LOG_LEVEL");
    cmd
}

fn init_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    flow()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
    dir
}

fn write_invoice(dir: &TempDir, name: &str, invoice: serde_json::Value) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, invoice.to_string()).unwrap();
    path
}

fn sample_invoice(dir: &TempDir) -> PathBuf {
    write_invoice(
        dir,
        "invoice.json",
        serde_json::json!({
            "invoice_id": "INV-1001",
            "vendor_name": "Acme Corp",
            "amount": 12345.0,
            "currency": "USD"
        }),
    )
}

/// Replace flow.toml so a manual run gives up after one poll.
fn configure_fast_timeout(dir: &TempDir) {
    fs::write(
        dir.path().join(".invoice-flow/flow.toml"),
        "[decision]\nmode = \"manual\"\npoll_interval_ms = 10\ntimeout_polls = 1\non_timeout = \"fail\"\n",
    )
    .unwrap();
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        flow().arg("--help").assert().success();
    }

    #[test]
    fn test_version() {
        flow().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = TempDir::new().unwrap();

        flow()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized invoice-flow project"));

        assert!(dir.path().join(".invoice-flow/flow.toml").is_file());
        assert!(dir.path().join(".invoice-flow/workflow.json").is_file());
        assert!(dir.path().join(".invoice-flow/logs").is_dir());
        assert!(dir.path().join(".invoice-flow/artifacts").is_dir());
    }

    #[test]
    fn test_init_idempotent() {
        let dir = init_project();
        flow()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));
    }

    #[test]
    fn test_config_validate_defaults() {
        let dir = init_project();
        flow()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));
    }
}

// =============================================================================
// Runs
// =============================================================================

mod runs {
    use super::*;

    #[test]
    fn test_auto_run_completes() {
        let dir = init_project();
        let invoice = sample_invoice(&dir);

        let output = flow()
            .current_dir(dir.path())
            .arg("run")
            .arg(&invoice)
            .args(["--auto", "--decision-delay-ms", "0"])
            .output()
            .unwrap();
        assert!(output.status.success(), "{output:?}");

        let summary = stdout_json(&output);
        assert_eq!(summary["status"], "COMPLETED");
        assert_eq!(summary["document_id"], "INV-1001");
        assert_eq!(summary["final_payload"]["status"], "COMPLETED");
        assert_eq!(summary["checkpoints"].as_array().unwrap().len(), 1);

        flow()
            .current_dir(dir.path())
            .args(["audit", "show", "INV-1001"])
            .assert()
            .success()
            .stdout(predicate::str::contains("CHECKPOINT_HITL"))
            .stdout(predicate::str::contains("COMPLETE"));

        // The automated decision went through the export worker.
        assert!(
            dir.path()
                .join(".invoice-flow/artifacts/decisions.csv")
                .is_file()
        );
        assert!(dir.path().join(".invoice-flow/logs/decisions.csv").is_file());
    }

    #[test]
    fn test_run_without_document_id_fails() {
        let dir = init_project();
        let invoice = write_invoice(
            &dir,
            "anonymous.json",
            serde_json::json!({"vendor_name": "Acme Corp", "amount": 10.0}),
        );

        flow()
            .current_dir(dir.path())
            .arg("run")
            .arg(&invoice)
            .arg("--auto")
            .assert()
            .failure()
            .stdout(predicate::str::contains("FAILED"))
            .stderr(predicate::str::contains("invoice_id"));
    }

    #[test]
    fn test_run_with_unknown_stage_fails_before_side_effects() {
        let dir = init_project();
        let invoice = sample_invoice(&dir);
        let workflow = dir.path().join("broken.json");
        fs::write(
            &workflow,
            r#"{"stages": [{"id": "INTAKE", "stage": "ingest"}, {"id": "FRAUD", "stage": "fraud_detector"}]}"#,
        )
        .unwrap();

        flow()
            .current_dir(dir.path())
            .arg("run")
            .arg(&invoice)
            .arg("--auto")
            .arg("--workflow")
            .arg(&workflow)
            .assert()
            .failure()
            .stderr(predicate::str::contains("fraud_detector"));

        flow()
            .current_dir(dir.path())
            .args(["audit", "show", "INV-1001"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No audit records"));
    }

    #[test]
    fn test_run_rejects_non_object_document() {
        let dir = init_project();
        let path = write_invoice(&dir, "list.json", serde_json::json!([1, 2, 3]));

        flow()
            .current_dir(dir.path())
            .arg("run")
            .arg(&path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("JSON object"));
    }
}

// =============================================================================
// Review across processes
// =============================================================================

mod review {
    use super::*;

    /// Run until the decision timeout, leaving one PAUSED checkpoint behind.
    fn paused_checkpoint(dir: &TempDir) -> String {
        configure_fast_timeout(dir);
        let invoice = sample_invoice(dir);

        flow()
            .current_dir(dir.path())
            .arg("run")
            .arg(&invoice)
            .assert()
            .failure()
            .stdout(predicate::str::contains("FAILED"));

        let output = flow()
            .current_dir(dir.path())
            .args(["pending", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let pending = stdout_json(&output);
        let items = pending["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["document_id"], "INV-1001");
        assert_eq!(items[0]["stage_id"], "CHECKPOINT_HITL");
        items[0]["checkpoint_id"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_reject_then_resume_terminates() {
        let dir = init_project();
        let checkpoint_id = paused_checkpoint(&dir);

        flow()
            .current_dir(dir.path())
            .args(["decide", &checkpoint_id, "reject", "--reviewer", "bob"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"REJECT\""))
            .stdout(predicate::str::contains(checkpoint_id.as_str()));

        let output = flow()
            .current_dir(dir.path())
            .args(["resume", &checkpoint_id])
            .output()
            .unwrap();
        assert!(output.status.success(), "{output:?}");
        let summary = stdout_json(&output);
        assert_eq!(summary["status"], "TERMINATED_REJECTED");
        assert_eq!(
            summary["final_payload"]["status"],
            "REQUIRES_MANUAL_HANDLING"
        );

        flow()
            .current_dir(dir.path())
            .args(["audit", "show", "INV-1001"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Rejected by bob"))
            .stdout(predicate::str::contains("RECONCILE").not());

        let log = fs::read_to_string(dir.path().join(".invoice-flow/logs/decisions.csv")).unwrap();
        assert!(log.contains(&format!("{checkpoint_id},INV-1001,REJECT,bob")));
    }

    #[test]
    fn test_accept_then_resume_completes() {
        let dir = init_project();
        let checkpoint_id = paused_checkpoint(&dir);

        flow()
            .current_dir(dir.path())
            .args(["decide", &checkpoint_id, "ACCEPT"])
            .assert()
            .success();

        let output = flow()
            .current_dir(dir.path())
            .args(["resume", &checkpoint_id])
            .output()
            .unwrap();
        assert!(output.status.success(), "{output:?}");
        assert_eq!(stdout_json(&output)["status"], "COMPLETED");

        flow()
            .current_dir(dir.path())
            .args(["show", &checkpoint_id])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"COMPLETED\""))
            .stdout(predicate::str::contains("cli_user"));
    }

    #[test]
    fn test_second_decision_is_refused() {
        let dir = init_project();
        let checkpoint_id = paused_checkpoint(&dir);

        flow()
            .current_dir(dir.path())
            .args(["decide", &checkpoint_id, "ACCEPT"])
            .assert()
            .success();
        flow()
            .current_dir(dir.path())
            .args(["decide", &checkpoint_id, "REJECT"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("cannot move"));
    }

    #[test]
    fn test_invalid_decision_is_refused() {
        let dir = init_project();
        flow()
            .current_dir(dir.path())
            .args(["decide", "cp-1", "MAYBE"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("MAYBE"));
    }

    #[test]
    fn test_pending_empty() {
        let dir = init_project();
        flow()
            .current_dir(dir.path())
            .arg("pending")
            .assert()
            .success()
            .stdout(predicate::str::contains("No checkpoints waiting"));
    }

    #[test]
    fn test_submit_without_server_fails() {
        let dir = init_project();
        flow()
            .current_dir(dir.path())
            .args([
                "submit",
                "cp-1",
                "ACCEPT",
                "--url",
                "http://127.0.0.1:9",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to reach review API"));
    }
}

// =============================================================================
// Audit and workflow
// =============================================================================

mod audit_and_workflow {
    use super::*;

    #[test]
    fn test_audit_export_writes_artifacts() {
        let dir = init_project();
        let out = dir.path().join("export");

        flow()
            .current_dir(dir.path())
            .args(["audit", "export", "--out"])
            .arg(&out)
            .assert()
            .success()
            .stdout(predicate::str::contains("Exported 0 decisions"));

        assert!(out.join("decisions.csv").is_file());
        assert!(out.join("audit_log.json").is_file());
    }

    #[test]
    fn test_audit_purge_requires_force() {
        let dir = init_project();
        flow()
            .current_dir(dir.path())
            .args(["audit", "purge"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--force"));

        flow()
            .current_dir(dir.path())
            .args(["audit", "purge", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Purged 0 audit records"));
    }

    #[test]
    fn test_workflow_show_lists_stages() {
        let dir = init_project();
        flow()
            .current_dir(dir.path())
            .args(["workflow", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("INTAKE"))
            .stdout(predicate::str::contains("may pause for review"));
    }

    #[test]
    fn test_workflow_dot() {
        let dir = init_project();
        flow()
            .current_dir(dir.path())
            .args(["workflow", "dot"])
            .assert()
            .success()
            .stdout(predicate::str::starts_with("digraph workflow {"))
            .stdout(predicate::str::contains("lightgoldenrod"))
            .stdout(predicate::str::contains("\"POSTING\" -> \"NOTIFY\";"));
    }
}
