//! CLI behavior through the compiled `labflow` binary.

#![cfg(unix)]

use assert_cmd::assert::OutputAssertExt;
use predicates::prelude::*;
use std::process::{Command, Stdio};

use labflow_utils::test_support::{TestProject, failing_body, succeeding_body};

const WORKFLOW: &str = "\
name: cli demo
steps:
  - {id: prep, script: prep.sh, allow_rerun: true}
  - {id: bad, script: bad.sh}
  - id: review
    script: review.sh
    conditional: {trigger_step: prep, prompt: 'Looks right?', target_step: bad}
";

fn project() -> TestProject {
    let p = TestProject::new();
    p.workflow(WORKFLOW);
    p.script("prep.sh", &format!("echo hello-from-prep\n{}", succeeding_body("prep.txt", "ok")));
    p.script("bad.sh", &failing_body("bad.txt"));
    p.script("review.sh", &succeeding_body("review.txt", "ok"));
    p
}

fn labflow(p: &TestProject) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("labflow"));
    cmd.arg("--project").arg(p.root().as_str());
    cmd.stdin(Stdio::null());
    cmd.env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_validate_lists_steps() {
    let p = project();
    labflow(&p)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("3 step(s)"))
        .stdout(predicate::str::contains("prep (rerun)"))
        .stdout(predicate::str::contains("review (asks after prep)"));
    assert!(!p.exists(".labflow/.lock"));
}

#[test]
fn test_invalid_definition_exit_code() {
    let p = TestProject::new();
    p.workflow("steps:\n  - {id: a, script: a.sh}\n  - {id: a, script: b.sh}\n");
    labflow(&p)
        .arg("validate")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_missing_project_dir_is_a_usage_error() {
    Command::new(assert_cmd::cargo::cargo_bin!("labflow"))
        .args(["--project", "/definitely/not/here", "status"])
        .stdin(Stdio::null())
        .assert()
        .code(2);
}

#[test]
fn test_run_streams_output_and_records_completion() {
    let p = project();
    labflow(&p)
        .args(["run", "prep"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello-from-prep"))
        .stderr(predicate::str::contains("prep run 1 completed"));

    let output = labflow(&p).args(["status", "--json"]).output().unwrap();
    assert!(output.status.success());
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["workflow"], "cli demo");
    assert_eq!(status["completion_order"], serde_json::json!(["prep"]));
    assert_eq!(status["steps"][0]["status"], "completed");
    assert_eq!(status["steps"][2]["status"], "awaiting_decision");
    assert_eq!(status["steps"][2]["prompt"], "Looks right?");
}

#[test]
fn test_failed_run_exit_code() {
    let p = project();
    labflow(&p)
        .args(["run", "bad"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("rolled back"));
    assert!(!p.exists("bad.txt"));
}

#[test]
fn test_rejected_requests_exit_code() {
    let p = project();
    labflow(&p)
        .arg("undo")
        .assert()
        .code(7)
        .stderr(predicate::str::contains("Nothing to undo").or(predicate::str::contains("nothing to undo")));
    labflow(&p).args(["run", "nope"]).assert().code(7);
    labflow(&p).args(["decide", "review", "yes"]).assert().code(7);
}

#[test]
fn test_unknown_input_is_rejected() {
    let p = project();
    labflow(&p)
        .args(["run", "prep", "--input", "plate=p1.csv"])
        .assert()
        .code(7);
}

#[test]
fn test_decide_then_undo() {
    let p = project();
    labflow(&p).args(["run", "prep"]).assert().success();
    labflow(&p)
        .args(["decide", "review", "no"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Skipped by decision: review"));

    let output = labflow(&p).args(["undo", "--json"]).output().unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["step_id"], "review");
    assert_eq!(report["kind"]["kind"], "decision");
    assert_eq!(report["status_after"], "awaiting_decision");
}

#[test]
fn test_undo_then_snapshots_and_diagnose() {
    let p = project();
    labflow(&p).args(["run", "prep"]).assert().success();
    labflow(&p).args(["run", "prep"]).assert().success();

    labflow(&p)
        .arg("snapshots")
        .assert()
        .success()
        .stdout(predicate::str::contains("prep_run_1"))
        .stdout(predicate::str::contains("prep_run_2"));

    labflow(&p)
        .arg("undo")
        .assert()
        .success()
        .stdout(predicate::str::contains("run 2 of prep"));

    let output = labflow(&p).args(["diagnose", "--json"]).output().unwrap();
    assert!(output.status.success());
    let diagnosis: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(diagnosis["ok"], true);
}

#[test]
fn test_skip_to() {
    let p = project();
    labflow(&p)
        .args(["skip-to", "review"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Skipped prep, bad"))
        .stdout(predicate::str::contains("_safety_skip_to_review"));
}

#[test]
fn test_status_show_config() {
    let p = project();
    labflow(&p)
        .args(["--grace-period", "2", "status", "--show-config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("grace_period_secs"))
        .stdout(predicate::str::contains("(cli)"));
}
