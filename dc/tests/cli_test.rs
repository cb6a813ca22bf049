//! CLI tests for the dbcoord binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Run dbcoord with HOME and the working directory in a scratch dir so no
/// user config is picked up and logs stay out of the real home
fn dbcoord(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("dbcoord").expect("binary not built");
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_DATA_HOME", home.path().join("data"));
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let home = TempDir::new().unwrap();
    dbcoord(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("simulate"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_config_prints_defaults() {
    let home = TempDir::new().unwrap();
    dbcoord(&home)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("max-attempts: 5"))
        .stdout(predicate::str::contains("backend: local"));
}

#[test]
fn test_config_reads_local_file() {
    let home = TempDir::new().unwrap();
    std::fs::write(home.path().join(".dbcoord.yml"), "client:\n  max-attempts: 9\n").unwrap();
    dbcoord(&home)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("max-attempts: 9"));
}

#[test]
fn test_simulate_reports_single_owner() {
    let home = TempDir::new().unwrap();
    dbcoord(&home)
        .args(["simulate", "--candidates", "3", "--clients", "2", "--ops", "3", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"ops_ok\": 6"))
        .stdout(predicate::str::contains("\"ops_failed\": 0"));
}

#[test]
fn test_simulate_failover_keeps_operations_succeeding() {
    let home = TempDir::new().unwrap();
    dbcoord(&home)
        .args([
            "simulate",
            "--candidates",
            "2",
            "--clients",
            "1",
            "--ops",
            "4",
            "--failover",
            "--format",
            "json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"ops_failed\": 0"))
        .stdout(predicate::str::contains("\"terminated\": \"candidate-"));
}

#[test]
fn test_missing_config_file_fails() {
    let home = TempDir::new().unwrap();
    dbcoord(&home)
        .args(["--config", "/nonexistent/dbcoord.yml", "config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load"));
}
