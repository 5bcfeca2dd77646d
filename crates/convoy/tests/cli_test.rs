#![allow(deprecated)] // TODO: move from Command::cargo_bin to the cargo_bin_cmd! macro

use assert_cmd::Command;
use predicates::prelude::*;

fn convoy() -> Command {
    let mut cmd = Command::cargo_bin("convoy").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    convoy()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("pipelines"))
        .stdout(predicate::str::contains("describe"))
        .stdout(predicate::str::contains("version"));
}

#[test]
fn test_cli_version() {
    convoy()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("convoy "));
}

#[test]
fn test_pipelines_list() {
    convoy()
        .args(["pipelines", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("deploy-mongo"))
        .stdout(predicate::str::contains("deploy-two-node"))
        .stdout(predicate::str::contains("deploy-three-node"))
        .stdout(predicate::str::contains("destroy-two-node"))
        .stdout(predicate::str::contains("destroy-three-node"))
        .stdout(predicate::str::contains("dns-update"));
}

#[test]
fn test_describe_pipeline() {
    convoy()
        .args(["describe", "pipeline", "destroy-three-node"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("# destroy-three-node"))
        .stdout(predicate::str::contains("--keep-state"));
}

#[test]
fn test_describe_unknown_pipeline() {
    convoy()
        .args(["describe", "pipeline", "deploy-four-node"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown pipeline 'deploy-four-node'"));
}

#[test]
fn test_run_unknown_pipeline_fails_before_setup() {
    let dir = tempfile::tempdir().unwrap();
    convoy()
        .current_dir(dir.path())
        .env("CONVOY_ENV_FILE", dir.path().join("missing.env"))
        .args(["pipelines", "run", "bogus", "--role", "x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown pipeline 'bogus'"))
        .stdout(predicate::str::contains("▶ Pipeline").not());
}

#[test]
fn test_run_requires_a_name() {
    convoy()
        .args(["pipelines", "run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("<NAME>"));
}
